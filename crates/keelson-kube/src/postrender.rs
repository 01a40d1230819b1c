//! Post-rendering through an external executable
//!
//! The rendered manifest is written to the program's stdin and whatever it
//! prints on stdout replaces the manifest.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{KubeError, Result};

/// An executable the manifest is piped through
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostRenderer {
    binary: PathBuf,
    args: Vec<String>,
}

impl PostRenderer {
    /// Resolve `binary` on `PATH` unless it names a path
    pub fn new(binary: &str, args: Vec<String>) -> Result<Self> {
        let binary = binary.trim();
        if binary.is_empty() {
            return Err(KubeError::InvalidConfig(
                "post-renderer path is empty".to_string(),
            ));
        }

        let path = Path::new(binary);
        let resolved = if path.components().count() > 1 {
            path.is_file().then(|| path.to_path_buf())
        } else {
            find_on_path(binary)
        };

        resolved
            .map(|binary| Self { binary, args })
            .ok_or_else(|| {
                KubeError::InvalidConfig(format!(
                    "unable to find binary at {}: not found on PATH",
                    binary
                ))
            })
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Pipe `manifest` through the program and return its output
    pub async fn run(&self, manifest: &str) -> Result<String> {
        tracing::debug!(binary = %self.binary.display(), "running post-renderer");

        let mut child = Command::new(&self.binary)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // stdin is fed while output is collected
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| KubeError::PostRender("stdin unavailable".to_string()))?;
        let input = manifest.as_bytes().to_vec();
        let writer = tokio::spawn(async move {
            stdin.write_all(&input).await?;
            stdin.shutdown().await
        });

        let output = child.wait_with_output().await?;
        if let Ok(Err(e)) = writer.await
            && e.kind() != std::io::ErrorKind::BrokenPipe
        {
            return Err(KubeError::PostRender(e.to_string()));
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(KubeError::PostRender(format!(
                "{}: {}",
                output.status,
                stderr.trim()
            )));
        }

        String::from_utf8(output.stdout)
            .map_err(|e| KubeError::PostRender(format!("output is not UTF-8: {}", e)))
    }
}

fn find_on_path(binary: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(binary))
        .find(|candidate| candidate.is_file())
}
