//! Error types for the Floodgate engine.

use thiserror::Error;

/// Main error type for Floodgate operations.
///
/// A denied request is not an error; it is a policy outcome carried in a
/// [`Decision`](crate::ratelimit::Decision). Misconfiguration is the only
/// condition that should prevent startup.
#[derive(Error, Debug)]
pub enum FloodgateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Floodgate operations.
pub type Result<T> = std::result::Result<T, FloodgateError>;
