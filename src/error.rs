//! Error types for the Chatgate service.

use thiserror::Error;

/// Main error type for Chatgate operations.
#[derive(Error, Debug)]
pub enum GateError {
    /// Configuration-related errors. Always fatal at startup.
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP client construction errors
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Chatgate operations.
pub type Result<T> = std::result::Result<T, GateError>;
