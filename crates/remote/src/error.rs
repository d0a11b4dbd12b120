//! Error taxonomy for the snapshot/replay cycle
//!
//! Every variant propagates untouched to the top-level entry point
//! ([`crate::Runner::run_or_alert`]), which logs it once and shows the raw
//! text in a modal alert. Nothing here is retried.

use thiserror::Error;

use crate::document::DocumentError;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, RemoteError>;

#[derive(Debug, Error)]
pub enum RemoteError {
    /// Mutually exclusive or malformed options, detected before any I/O
    #[error("{0}")]
    Configuration(String),

    /// The remote engine answered with a non-success status.
    /// The body is treated as human-readable diagnostic text.
    #[error("{body}")]
    Transport { status: u16, body: String },

    /// The request never produced a response (DNS, connect, TLS, ...)
    #[error("Request to remote engine failed: {0}")]
    Http(String),

    #[error("Failed to encode snapshot: {0}")]
    Encode(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// A command name with no handler
    #[error("Unknown action '{0}'")]
    UnknownAction(String),

    /// A known command whose arguments don't fit its payload
    #[error("Invalid arguments for action '{func}': {reason}")]
    InvalidAction { func: String, reason: String },

    #[error(
        "Didn't find callback '{0}'! Make sure to register it on the Registry before running."
    )]
    UnregisteredCallback(String),

    #[error("Credential renewal failed: {0}")]
    CredentialRenewal(String),

    #[error(transparent)]
    Document(#[from] DocumentError),
}

impl RemoteError {
    pub(crate) fn invalid_action(func: &str, reason: impl Into<String>) -> Self {
        Self::InvalidAction {
            func: func.to_string(),
            reason: reason.into(),
        }
    }
}
