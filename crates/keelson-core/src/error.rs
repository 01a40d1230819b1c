//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Chart not found: {path}")]
    ChartNotFound { path: String },

    #[error("Invalid Chart.yaml: {message}")]
    InvalidChart { message: String },

    #[error("{chart_type} charts are not installable")]
    NotInstallable { chart_type: String },

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid version: {0}")]
    InvalidVersion(#[from] semver::Error),

    #[error("Archive error: {message}")]
    Archive { message: String },

    #[error("Values merge error: {message}")]
    ValuesMerge { message: String },

    #[error("unexpected type: {value_type}")]
    UnexpectedSetType { value_type: String },

    #[error("Invalid override path '{path}': {message}")]
    InvalidSetPath { path: String, message: String },

    #[error("Failed to decode property document: {message}")]
    Decode { message: String },
}

impl CoreError {
    /// Configuration errors are caused by the caller's inputs and are never retried.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            CoreError::NotInstallable { .. }
                | CoreError::ValuesMerge { .. }
                | CoreError::UnexpectedSetType { .. }
                | CoreError::InvalidSetPath { .. }
                | CoreError::Decode { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
