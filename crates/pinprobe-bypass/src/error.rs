//! Error types for hook installation

use thiserror::Error;

/// Result type for hook operations
pub type Result<T> = std::result::Result<T, HookError>;

/// Hook errors
#[derive(Debug, Error)]
pub enum HookError {
    /// Export not present in the process image
    #[error("Symbol not found: {module}!{name}")]
    SymbolNotFound {
        /// Module or class
        module: String,
        /// Export or selector
        name: String,
    },

    /// Export already carries a replacement
    #[error("Symbol already replaced: {0}")]
    AlreadyReplaced(String),

    /// Hook id unknown or already reverted
    #[error("Unknown hook id {0}")]
    UnknownHook(u64),

    /// Argument missing or of the wrong shape
    #[error("Invalid argument {index} for {symbol}: expected {expected}")]
    InvalidArgument {
        /// Called symbol
        symbol: String,
        /// Argument position
        index: usize,
        /// Expected shape
        expected: &'static str,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
