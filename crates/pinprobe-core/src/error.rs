//! Error types

/// Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Pinning core errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Pin material could not be decoded
    #[error("Invalid pin: {0}")]
    InvalidPin(String),

    /// Configuration rejected
    #[error("Configuration error: {0}")]
    Config(String),

    /// Certificate could not be parsed
    #[error("Certificate error: {0}")]
    Certificate(String),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for errors caused by configuration input rather than the peer
    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_) | Error::InvalidPin(_))
    }
}
