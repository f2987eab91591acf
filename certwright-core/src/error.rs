//! Error types for Certwright

use thiserror::Error;

/// Result type for Certwright operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Certwright
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration parsed but is not usable
    #[error("Invalid configuration: {0}")]
    Validation(String),

    /// Server error
    #[error("Server error: {0}")]
    Server(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
