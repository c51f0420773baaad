//! Error types for Warden.

use thiserror::Error;

/// Main error type for Warden operations.
#[derive(Error, Debug)]
pub enum WardenError {
    /// A limit string could not be parsed
    #[error("Invalid limit spec {spec:?}: {reason}")]
    InvalidLimitSpec { spec: String, reason: String },

    /// A key is absent or has expired
    #[error("Key not found: {0}")]
    NotFound(String),

    /// A jail reporter failed
    #[error("Reporter error: {0}")]
    Report(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Warden operations.
pub type Result<T> = std::result::Result<T, WardenError>;
