//! Common error types for bagdeck
//!
//! Defines the shared error enum using thiserror for clear error propagation.

use thiserror::Error;

/// Common result type for bagdeck operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the bagdeck crates
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Underlying data source error (read, decode, initialize)
    #[error("Source error: {0}")]
    Source(String),

    /// Playback engine error
    #[error("Playback error: {0}")]
    Playback(String),

    /// Invalid state for the requested operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
