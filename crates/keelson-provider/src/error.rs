//! Error types for keelson-provider

use keelson_core::{CoreError, PropertyMap};
use keelson_kube::KubeError;
use keelson_repo::RepoError;
use thiserror::Error;

/// Result type for provider operations
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Errors returned by the release provider
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Repo(#[from] RepoError),

    #[error(transparent)]
    Kube(#[from] KubeError),

    /// The action failed after leaving a release behind
    ///
    /// `properties` is the checkpoint of that release; the host persists it
    /// so the next run can reconcile from what exists.
    #[error("release '{id}' was created but is not healthy: {}", reasons.join("; "))]
    InitFailed {
        id: String,
        properties: PropertyMap,
        reasons: Vec<String>,
    },

    /// The request does not describe a release resource
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Invalid provider configuration
    #[error("invalid provider configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for ProviderError {
    fn from(e: serde_json::Error) -> Self {
        ProviderError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for ProviderError {
    fn from(e: serde_yaml::Error) -> Self {
        ProviderError::Serialization(e.to_string())
    }
}

impl ProviderError {
    /// Whether the inputs themselves are at fault and a retry cannot succeed
    pub fn is_configuration(&self) -> bool {
        match self {
            ProviderError::Core(e) => e.is_configuration(),
            ProviderError::Repo(RepoError::Core(e)) => e.is_configuration(),
            ProviderError::InvalidRequest(_) | ProviderError::Config(_) => true,
            _ => false,
        }
    }

    /// Whether a checkpoint accompanies the error
    pub fn is_partial(&self) -> bool {
        matches!(self, ProviderError::InitFailed { .. })
    }

    /// The checkpoint carried by a partial failure
    pub fn checkpoint(&self) -> Option<&PropertyMap> {
        match self {
            ProviderError::InitFailed { properties, .. } => Some(properties),
            _ => None,
        }
    }
}
