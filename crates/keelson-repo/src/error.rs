//! Error types for chart resolution

use thiserror::Error;

/// Chart resolution errors
#[derive(Debug, Error)]
pub enum RepoError {
    // ============ Configuration Errors ============
    #[error("Repository not found: {name}")]
    RepositoryNotFound { name: String },

    #[error("Invalid repository URL: {url} - {reason}")]
    InvalidRepositoryUrl { url: String, reason: String },

    #[error("Invalid repository configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Invalid TLS configuration: {message}")]
    InvalidTls { message: String },

    // ============ Network Errors ============
    #[error("HTTP error: {status} - {message}")]
    HttpError { status: u16, message: String },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Request timeout: {message}")]
    Timeout { message: String },

    #[error("Authentication required for {url}")]
    AuthRequired { url: String },

    // ============ Index Errors ============
    #[error("Index not found at {url}")]
    IndexNotFound { url: String },

    #[error("Invalid index format: {message}")]
    InvalidIndex { message: String },

    // ============ Chart Errors ============
    #[error("Chart not found: {name}{hint}")]
    ChartNotFound { name: String, hint: String },

    #[error("Version not found: {name}@{constraint} in repository {repo}")]
    VersionNotFound {
        name: String,
        constraint: String,
        repo: String,
    },

    #[error("Unsupported chart reference {reference}: {reason}")]
    UnsupportedReference { reference: String, reason: String },

    #[error("Integrity check failed for {name}: expected {expected}, got {actual}")]
    IntegrityCheckFailed {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("Verification failed for {name}: {message}")]
    VerificationFailed { name: String, message: String },

    // ============ Dependency Errors ============
    #[error("{}", describe_mismatch(.missing, .mismatched))]
    DependencyMismatch {
        missing: Vec<String>,
        mismatched: Vec<String>,
    },

    #[error("Dependency update failed: {message}")]
    DependencyUpdateFailed { message: String },

    #[error("Invalid version constraint '{constraint}': {message}")]
    InvalidConstraint { constraint: String, message: String },

    // ============ Cache Errors ============
    #[error("Cache error: {message}")]
    CacheError { message: String },

    // ============ IO Errors ============
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Core(#[from] keelson_core::CoreError),
}

impl RepoError {
    /// Whether vendoring dependencies may fix this error
    pub fn is_dependency_mismatch(&self) -> bool {
        matches!(self, RepoError::DependencyMismatch { .. })
    }
}

fn describe_mismatch(missing: &[String], mismatched: &[String]) -> String {
    let mut parts = Vec::new();
    if !missing.is_empty() {
        parts.push(format!(
            "found in Chart.yaml, but missing in charts/ directory: {}",
            missing.join(", ")
        ));
    }
    if !mismatched.is_empty() {
        parts.push(format!(
            "version does not satisfy the constraint in Chart.yaml: {}",
            mismatched.join(", ")
        ));
    }
    format!(
        "chart dependencies are out of date (set dependencyUpdate to vendor them): {}",
        parts.join("; ")
    )
}

/// Result type for repository operations
pub type Result<T> = std::result::Result<T, RepoError>;

impl From<reqwest::Error> for RepoError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RepoError::Timeout {
                message: e.to_string(),
            }
        } else if e.is_connect() {
            RepoError::NetworkError {
                message: format!("Connection failed: {}", e),
            }
        } else if let Some(status) = e.status() {
            RepoError::HttpError {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else {
            RepoError::NetworkError {
                message: e.to_string(),
            }
        }
    }
}

impl From<serde_yaml::Error> for RepoError {
    fn from(e: serde_yaml::Error) -> Self {
        RepoError::Serialization(e.to_string())
    }
}

impl From<url::ParseError> for RepoError {
    fn from(e: url::ParseError) -> Self {
        RepoError::InvalidRepositoryUrl {
            url: String::new(),
            reason: e.to_string(),
        }
    }
}

impl From<semver::Error> for RepoError {
    fn from(e: semver::Error) -> Self {
        RepoError::InvalidConstraint {
            constraint: String::new(),
            message: e.to_string(),
        }
    }
}
