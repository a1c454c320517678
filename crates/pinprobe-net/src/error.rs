//! Error types

use serde::Serialize;
use std::fmt;

/// Network and enforcement errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Connect, DNS, IO or protocol failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Deadline expired
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Peer certificate rejected by a pin check
    #[error("{0}")]
    PinMismatch(String),

    /// Invalid pin material or unsupported mode/technique combination
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed request from the caller
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// TLS setup or handshake failure not caused by a pin
    #[error("TLS error: {0}")]
    Tls(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Structured failure class reported next to the error text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// Network-level failure
    Transport,
    /// Deadline expired
    Timeout,
    /// Pin check rejected the peer
    PinMismatch,
    /// Adapter unusable until reconfigured
    Config,
    /// Request rejected before any I/O
    InvalidRequest,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Transport => write!(f, "transport"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::PinMismatch => write!(f, "pinMismatch"),
            ErrorKind::Config => write!(f, "config"),
            ErrorKind::InvalidRequest => write!(f, "invalidRequest"),
        }
    }
}

impl Error {
    /// Failure class
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Transport(_) | Error::Tls(_) | Error::Io(_) => ErrorKind::Transport,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::PinMismatch(_) => ErrorKind::PinMismatch,
            Error::Config(_) => ErrorKind::Config,
            Error::InvalidRequest(_) => ErrorKind::InvalidRequest,
        }
    }

    /// Classify a lower-level error by its full source chain
    ///
    /// Pin rejections raised inside a TLS handshake surface as generic
    /// handshake errors; their text still carries the mismatch marker.
    pub fn from_source(context: &str, err: &(dyn std::error::Error + 'static)) -> Self {
        let text = format!("{}: {}", context, error_chain(err));
        if text.contains(pinprobe_core::PIN_MISMATCH_MARKER) {
            Error::PinMismatch(text)
        } else {
            Error::Transport(text)
        }
    }
}

impl From<pinprobe_core::Error> for Error {
    fn from(err: pinprobe_core::Error) -> Self {
        if err.is_config() {
            Error::Config(err.to_string())
        } else {
            Error::Tls(err.to_string())
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Timeout(error_chain(&err))
        } else {
            Error::from_source("request failed", &err)
        }
    }
}

/// `err: source: source ...`, skipping sources whose text is already included
pub(crate) fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        let inner_text = inner.to_string();
        if !text.contains(&inner_text) {
            text.push_str(": ");
            text.push_str(&inner_text);
        }
        source = inner.source();
    }
    text
}
