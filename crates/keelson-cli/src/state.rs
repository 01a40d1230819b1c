//! Local state file
//!
//! One JSON document per release resource: the URN, the release id, the
//! inputs accepted by check and the checkpoint returned by the provider.

use keelson_core::PropertyMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{CliError, Result};

/// Default state file, relative to the working directory
pub const DEFAULT_STATE_FILE: &str = "keelson.state.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct State {
    pub urn: String,
    pub id: String,
    pub inputs: PropertyMap,
    pub outputs: PropertyMap,
}

impl State {
    /// Read the state at `path`; a missing file means nothing is deployed
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let state = serde_json::from_str(&content).map_err(|e| CliError::State {
            message: format!("{}: {e}", path.display()),
            help: Some("the state file is not valid; restore it or remove it to start over".into()),
        })?;
        Ok(Some(state))
    }

    /// Read the state at `path`, failing when there is none
    pub fn require(path: &Path) -> Result<Self> {
        Self::load(path)?.ok_or_else(|| {
            CliError::state(
                format!("no state at {}", path.display()),
                "run `keelson up` first, or pass --state",
            )
        })
    }

    /// Write the state, replacing any previous file atomically
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        std::fs::rename(&tmp, path)?;
        tracing::debug!(path = %path.display(), id = %self.id, "saved state");
        Ok(())
    }

    /// Remove the state file if it exists
    pub fn remove(path: &Path) -> Result<()> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
