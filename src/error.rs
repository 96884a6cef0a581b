//! Error types for the Turnstile engine.

use thiserror::Error;

/// Main error type for Turnstile operations.
///
/// Admission decisions never surface here: a rejected attempt is an
/// expected outcome and is reported through typed values instead.
#[derive(Error, Debug)]
pub enum TurnstileError {
    /// Configuration could not be read or parsed
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration parsed but holds a value the engine cannot run with
    #[error("Invalid configuration: {field} {reason}")]
    InvalidConfiguration {
        field: &'static str,
        reason: String,
    },

    /// A replayed request line could not be understood
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A spawned request task failed to complete
    #[error("Task error: {0}")]
    Task(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<::config::ConfigError> for TurnstileError {
    fn from(err: ::config::ConfigError) -> Self {
        TurnstileError::Config(err.to_string())
    }
}

/// Result type alias for Turnstile operations.
pub type Result<T> = std::result::Result<T, TurnstileError>;
