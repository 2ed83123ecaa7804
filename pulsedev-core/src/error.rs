//! Error types for pulsedev-core

use thiserror::Error;

/// Main error type for the pulsedev-core library
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Network-level failure (connect, DNS, broken body)
    #[error("transport error: {0}")]
    Transport(String),

    /// Request exceeded the configured timeout
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Backend answered but refused the request
    #[error("backend rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// Session lifecycle violation
    #[error("session error: {0}")]
    Session(String),

    /// The tracker loop is gone; commands can no longer be delivered
    #[error("tracker is not running")]
    TrackerClosed,
}

impl Error {
    /// Whether retrying the same request may succeed.
    ///
    /// Network failures, timeouts, 5xx and 429 are transient; every other
    /// rejection is final.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Transport(_) | Error::Timeout(_) => true,
            Error::Rejected { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Timeout(err.to_string())
        } else if err.is_decode() {
            // 2xx with a body we can't read is the backend's fault, not the network's
            Error::Rejected {
                status: err.status().map(|s| s.as_u16()).unwrap_or(200),
                message: format!("failed to parse response: {}", err),
            }
        } else {
            Error::Transport(err.to_string())
        }
    }
}

/// Result type alias for pulsedev-core
pub type Result<T> = std::result::Result<T, Error>;
