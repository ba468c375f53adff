//! Error types for memory store operations

use thiserror::Error;

/// Result type for memory store operations
pub type Result<T> = std::result::Result<T, MemoryError>;

/// Errors that can occur during memory store operations
#[derive(Error, Debug)]
pub enum MemoryError {
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Storage backend error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Attempt to overwrite the snapshot of a finished execution
    #[error("Snapshot for execution {0} is terminal and cannot be replaced")]
    SnapshotSealed(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    Invalid(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
