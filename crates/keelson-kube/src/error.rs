//! Error types for keelson-kube

use thiserror::Error;

/// Result type for keelson-kube operations
pub type Result<T> = std::result::Result<T, KubeError>;

/// Message fragment some stores use for a missing release
const NOT_FOUND_MESSAGE: &str = "release: not found";

/// Errors that can occur during release actions
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KubeError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// Release not found
    #[error("release '{name}' not found in namespace '{namespace}'")]
    ReleaseNotFound { name: String, namespace: String },

    /// Release already exists
    #[error("cannot re-use release name '{name}' in namespace '{namespace}': it is still in use")]
    ReleaseAlreadyExists { name: String, namespace: String },

    /// Storage error
    #[error("storage error: {0}")]
    Storage(String),

    /// Release data too large
    #[error("release data too large ({size} bytes, max {max} bytes)")]
    ReleaseTooLarge { size: usize, max: usize },

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Compression error
    #[error("compression error: {0}")]
    Compression(String),

    /// Chart error
    #[error("chart error: {0}")]
    Chart(String),

    /// Invalid manifest
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// Post-renderer failed
    #[error("error while running post render on files: {0}")]
    PostRender(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Timeout
    #[error("operation timed out after {0}")]
    Timeout(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for KubeError {
    fn from(e: serde_json::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for KubeError {
    fn from(e: serde_yaml::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl From<keelson_core::CoreError> for KubeError {
    fn from(e: keelson_core::CoreError) -> Self {
        KubeError::Chart(e.to_string())
    }
}

impl KubeError {
    /// Whether this error means the release does not exist
    ///
    /// Covers typed not-found errors, API 404s, and stores that only report
    /// the condition in their message.
    pub fn is_not_found(&self) -> bool {
        match self {
            KubeError::ReleaseNotFound { .. } => true,
            KubeError::Api(kube::Error::Api(resp)) if resp.code == 404 => true,
            other => other.to_string().contains(NOT_FOUND_MESSAGE),
        }
    }

    /// Check if this is a conflict error (409)
    pub fn is_conflict(&self) -> bool {
        matches!(self, KubeError::Api(kube::Error::Api(resp)) if resp.code == 409)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16) -> KubeError {
        KubeError::Api(kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "secrets not found".to_string(),
            reason: "NotFound".to_string(),
            code,
        }))
    }

    #[test]
    fn test_not_found_detection() {
        assert!(
            KubeError::ReleaseNotFound {
                name: "web".to_string(),
                namespace: "default".to_string(),
            }
            .is_not_found()
        );
        assert!(api_error(404).is_not_found());
        assert!(!api_error(500).is_not_found());
        assert!(KubeError::Storage("query failed: release: not found".to_string()).is_not_found());
        assert!(!KubeError::Storage("connection refused".to_string()).is_not_found());
    }

    #[test]
    fn test_conflict_detection() {
        assert!(api_error(409).is_conflict());
        assert!(!api_error(404).is_conflict());
    }
}
