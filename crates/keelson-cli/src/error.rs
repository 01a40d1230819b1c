//! CLI error types with exit code handling
//!
//! Every command returns [`CliError`], which renders through miette and
//! maps to a process exit code.

use keelson_provider::ProviderError;
use miette::Diagnostic;
use thiserror::Error;

use crate::exit_codes;

/// CLI-specific error type that includes exit code information
#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    /// Inputs were rejected by check
    #[error("Validation failed: {message}")]
    #[diagnostic(code(keelson::cli::validation))]
    Validation {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Configuration errors cannot be fixed by retrying
    #[error("Configuration error: {message}")]
    #[diagnostic(code(keelson::cli::config))]
    Config {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// The release was left behind unhealthy; its checkpoint was saved
    #[error("{message}")]
    #[diagnostic(
        code(keelson::cli::partial),
        help("state was saved; fix the release and run `keelson up` again")
    )]
    PartialFailure { message: String },

    /// Missing or unreadable state
    #[error("State error: {message}")]
    #[diagnostic(code(keelson::cli::state))]
    State {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// IO error (file not found, permissions, etc.)
    #[error("IO error: {message}")]
    #[diagnostic(code(keelson::cli::io))]
    Io { message: String },

    /// Any other failure reported by the provider
    #[error("{message}")]
    #[diagnostic(code(keelson::cli::error))]
    Other { message: String },
}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Validation { .. } => exit_codes::VALIDATION_ERROR,
            CliError::Config { .. } => exit_codes::CONFIG_ERROR,
            CliError::PartialFailure { .. } => exit_codes::PARTIAL_FAILURE,
            CliError::State { .. } => exit_codes::USAGE_ERROR,
            CliError::Io { .. } => exit_codes::IO_ERROR,
            CliError::Other { .. } => exit_codes::ERROR,
        }
    }

    /// Create a validation error with help text
    pub fn validation_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            help: Some(help.into()),
        }
    }

    /// Create an input error (user provided invalid input)
    pub fn input(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            help: None,
        }
    }

    /// Create a state error with help text
    pub fn state(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::State {
            message: message.into(),
            help: Some(help.into()),
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::Io {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CliError {
    fn from(err: serde_json::Error) -> Self {
        CliError::Other {
            message: format!("serialization error: {err}"),
        }
    }
}

impl From<keelson_core::CoreError> for CliError {
    fn from(err: keelson_core::CoreError) -> Self {
        ProviderError::from(err).into()
    }
}

impl From<ProviderError> for CliError {
    fn from(err: ProviderError) -> Self {
        let message = err.to_string();
        match err {
            ProviderError::InitFailed { .. } => CliError::PartialFailure { message },
            ProviderError::InvalidRequest(_) => CliError::Validation {
                message,
                help: None,
            },
            ProviderError::Io(_) => CliError::Io { message },
            err if err.is_configuration() => CliError::Config {
                message,
                help: Some("fix the release inputs or provider configuration".into()),
            },
            _ => CliError::Other { message },
        }
    }
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
