//! Error types for state storage operations

use thiserror::Error;

/// Result type for state storage operations
pub type Result<T> = std::result::Result<T, StateError>;

/// Errors that can occur while reading, writing, or caching execution state
#[derive(Error, Debug)]
pub enum StateError {
    /// Execution state not found
    #[error("Execution not found: {0}")]
    NotFound(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Binary serialization error
    #[error("Binary serialization error: {0}")]
    BinarySerialization(#[from] bincode::Error),

    /// Persistent backend error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Illegal state transition or malformed record
    #[error("Invalid state: {0}")]
    Invalid(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Custom error
    #[error("{0}")]
    Custom(String),
}
