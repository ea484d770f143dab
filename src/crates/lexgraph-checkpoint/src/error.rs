//! Error types for checkpoint operations.

use thiserror::Error;

/// Errors raised by checkpoint savers and codecs.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// The requested thread has no checkpoints.
    #[error("Thread not found: {0}")]
    ThreadNotFound(String),

    /// The config did not carry the fields the operation needs.
    #[error("Invalid checkpoint config: {0}")]
    InvalidConfig(String),

    /// Encoding or decoding a checkpoint record failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The storage backend failed.
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Result type for checkpoint operations.
pub type Result<T> = std::result::Result<T, CheckpointError>;
