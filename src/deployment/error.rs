//! Error types for the deployment lifecycle.

use thiserror::Error;

use crate::remote::RemoteError;

/// Errors raised by deployment operations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DeploymentError {
    /// Raised when configuration is missing required values.
    #[error(
        "missing {field}: set FERRY_DEPLOY_{env_suffix} or add {field} to ferry.toml",
        env_suffix = field.to_uppercase()
    )]
    InvalidConfig {
        /// Configuration field that failed validation.
        field: String,
    },
    /// Raised when a bundle handle has no usable final component.
    #[error("bundle handle '{destination}' does not name an artifact")]
    InvalidBundle {
        /// Storage handle supplied by the caller.
        destination: String,
    },
    /// Raised when a bundle cannot be resolved to a local file.
    #[error("failed to resolve bundle '{destination}': {message}")]
    Artifact {
        /// Storage handle supplied by the caller.
        destination: String,
        /// Human-readable reason.
        message: String,
    },
    /// Remote failures surface unchanged.
    #[error(transparent)]
    Remote(#[from] RemoteError),
}
