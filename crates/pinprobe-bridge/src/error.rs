//! Bridge errors

use thiserror::Error;

/// Result type for bridge calls
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors returned to the caller of [`crate::Bridge::invoke`]
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Unknown method name
    #[error("Method not implemented: {0}")]
    NotImplemented(String),

    /// Arguments of the wrong shape
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// Configuration rejected
    #[error("Invalid configuration: {0}")]
    Config(#[from] pinprobe_core::Error),

    /// Harness error
    #[error(transparent)]
    Net(#[from] pinprobe_net::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
