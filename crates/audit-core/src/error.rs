//! Error types shared by the gbq-audit crates.
//!
//! [`AuditError`] covers everything that happens before the pipeline starts
//! talking to the warehouse: configuration, credentials, logging setup and
//! local file access. Pipeline failures live in `audit-jobs`.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using [`AuditError`].
pub type Result<T> = std::result::Result<T, AuditError>;

/// Errors raised while preparing a gbq-audit run.
#[derive(Debug, Error)]
pub enum AuditError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Configuration file not found
    #[error("Configuration not found at {path}")]
    ConfigNotFound {
        path: PathBuf,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Configuration file is invalid YAML
    #[error("Invalid configuration at {path}: {message}")]
    ConfigInvalid { path: PathBuf, message: String },

    /// Configuration validation failed
    #[error("Configuration validation failed: {message}")]
    ConfigValidation { message: String },

    // =========================================================================
    // Credential Errors
    // =========================================================================
    /// Warehouse credentials file is missing
    #[error("Credentials file not found: {path}")]
    CredentialsNotFound { path: PathBuf },

    // =========================================================================
    // I/O Errors
    // =========================================================================
    /// Generic I/O error with context
    #[error("I/O error {operation}: {path}")]
    Io {
        operation: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Directory creation failed
    #[error("Failed to create directory: {path}")]
    DirectoryCreation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl AuditError {
    /// Create a ConfigNotFound error
    pub fn config_not_found(path: impl Into<PathBuf>) -> Self {
        Self::ConfigNotFound {
            path: path.into(),
            source: None,
        }
    }

    /// Create a ConfigValidation error
    pub fn config_validation(message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
        }
    }

    /// Create an I/O error
    pub fn io(operation: impl Into<String>, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            path: path.into(),
            source,
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns actionable guidance for the user
    pub fn guidance(&self) -> Option<&'static str> {
        match self {
            Self::ConfigNotFound { .. } => {
                Some("Pass --config or place gbq-audit.yaml next to the executable")
            }
            Self::ConfigInvalid { .. } => Some("Check YAML syntax in the configuration file"),
            Self::CredentialsNotFound { .. } => Some(
                "Place the service account key as google-creds.json next to the executable or set credentials_path",
            ),
            _ => None,
        }
    }
}
