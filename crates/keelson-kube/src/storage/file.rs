//! File-based storage driver
//!
//! Stores release records under `<dir>/<namespace>/<name>/v<revision>.json`.
//! Useful for development without a cluster and for offline state.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::{
    StorageConfig, StorageDriver, compress, decompress, deserialize_release, latest_only,
    serialize_release,
};
use crate::error::{KubeError, Result};
use crate::release::StoredRelease;

/// File-based storage driver
pub struct FileDriver {
    base_dir: PathBuf,
    config: StorageConfig,
}

impl FileDriver {
    /// Create a new file driver, creating `base_dir` if needed
    pub fn new(base_dir: PathBuf, config: StorageConfig) -> Result<Self> {
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir, config })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn release_dir(&self, namespace: &str, name: &str) -> PathBuf {
        self.base_dir.join(namespace).join(name)
    }

    fn release_path(&self, namespace: &str, name: &str, revision: u32) -> PathBuf {
        self.release_dir(namespace, name)
            .join(format!("v{}.json", revision))
    }

    fn write_release(&self, release: &StoredRelease) -> Result<()> {
        let path = self.release_path(&release.namespace, &release.name, release.revision);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = serialize_release(release)?;
        let data = compress(&json, self.config.compression)?;
        std::fs::write(&path, data)?;
        Ok(())
    }

    fn read_release(&self, path: &Path) -> Result<StoredRelease> {
        let data = std::fs::read(path)?;
        let decompressed = decompress(&data, self.config.compression)?;
        deserialize_release(&decompressed)
    }

    /// Read every record in one release directory, newest first
    fn read_dir_releases(&self, dir: &Path) -> Result<Vec<StoredRelease>> {
        let mut releases = Vec::new();
        for entry in std::fs::read_dir(dir)?.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            match self.read_release(&path) {
                Ok(release) => releases.push(release),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable release record"),
            }
        }
        releases.sort_by(|a, b| b.revision.cmp(&a.revision));
        Ok(releases)
    }

    /// Remove `dir` and then its parent if they are empty
    fn prune_empty(&self, namespace: &str, name: &str) {
        for dir in [self.release_dir(namespace, name), self.base_dir.join(namespace)] {
            let empty = std::fs::read_dir(&dir)
                .map(|mut entries| entries.next().is_none())
                .unwrap_or(false);
            if empty {
                let _ = std::fs::remove_dir(&dir);
            }
        }
    }
}

fn subdirectories(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    Ok(std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect())
}

#[async_trait]
impl StorageDriver for FileDriver {
    async fn get(&self, namespace: &str, name: &str, revision: u32) -> Result<StoredRelease> {
        let path = self.release_path(namespace, name, revision);
        if !path.exists() {
            return Err(KubeError::ReleaseNotFound {
                name: name.to_string(),
                namespace: namespace.to_string(),
            });
        }
        self.read_release(&path)
    }

    async fn list(&self, namespace: Option<&str>) -> Result<Vec<StoredRelease>> {
        let namespaces = match namespace {
            Some(ns) => vec![self.base_dir.join(ns)],
            None => subdirectories(&self.base_dir)?,
        };

        let mut releases = Vec::new();
        for ns_dir in namespaces {
            for name_dir in subdirectories(&ns_dir)? {
                releases.extend(self.read_dir_releases(&name_dir)?);
            }
        }
        Ok(latest_only(releases))
    }

    async fn history(&self, namespace: &str, name: &str) -> Result<Vec<StoredRelease>> {
        let dir = self.release_dir(namespace, name);
        let releases = if dir.is_dir() {
            self.read_dir_releases(&dir)?
        } else {
            Vec::new()
        };

        if releases.is_empty() {
            return Err(KubeError::ReleaseNotFound {
                name: name.to_string(),
                namespace: namespace.to_string(),
            });
        }
        Ok(releases)
    }

    async fn create(&self, release: &StoredRelease) -> Result<()> {
        let path = self.release_path(&release.namespace, &release.name, release.revision);
        if path.exists() {
            return Err(KubeError::ReleaseAlreadyExists {
                name: release.name.clone(),
                namespace: release.namespace.clone(),
            });
        }
        self.write_release(release)
    }

    async fn update(&self, release: &StoredRelease) -> Result<()> {
        self.write_release(release)
    }

    async fn delete(&self, namespace: &str, name: &str, revision: u32) -> Result<StoredRelease> {
        let release = self.get(namespace, name, revision).await?;
        std::fs::remove_file(self.release_path(namespace, name, revision))?;
        self.prune_empty(namespace, name);
        Ok(release)
    }

    async fn delete_all(&self, namespace: &str, name: &str) -> Result<Vec<StoredRelease>> {
        let releases = self.history(namespace, name).await?;
        std::fs::remove_dir_all(self.release_dir(namespace, name))?;
        self.prune_empty(namespace, name);
        Ok(releases)
    }
}
