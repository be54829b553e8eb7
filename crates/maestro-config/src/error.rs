//! Error types for credential storage operations.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Primary error type for credential storage operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No credential has been stored for the requested context.
    #[error("no credential stored for context '{context}'")]
    CredentialMissing {
        /// Context that was looked up.
        context: String,
        /// File that was expected to hold the credential.
        path: PathBuf,
    },
    /// Context name cannot be mapped to a credential file.
    #[error("invalid context name '{value}': {reason}")]
    InvalidContext {
        /// Context name provided by the caller.
        value: String,
        /// Machine-readable reason for the failure.
        reason: &'static str,
    },
    /// The home directory could not be resolved.
    #[error("unable to resolve the home directory")]
    HomeDirUnavailable,
    /// Credential file contents could not be decoded.
    #[error("failed to decode credential file {}", path.display())]
    Decode {
        /// File that failed to decode.
        path: PathBuf,
        /// Source YAML error.
        source: serde_yaml::Error,
    },
    /// Credential could not be encoded for persistence.
    #[error("failed to encode credential for context '{context}'")]
    Encode {
        /// Context being written.
        context: String,
        /// Source YAML error.
        source: serde_yaml::Error,
    },
    /// File system operation failed.
    #[error("filesystem operation '{operation}' failed for {}", path.display())]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Path involved in the failure.
        path: PathBuf,
        /// Source IO error.
        source: io::Error,
    },
}

impl ConfigError {
    /// Returns `true` when the error means the operator has not logged in yet.
    #[must_use]
    pub const fn is_missing(&self) -> bool {
        matches!(self, Self::CredentialMissing { .. })
    }
}

/// Convenience alias for credential storage results.
pub type ConfigResult<T> = Result<T, ConfigError>;
