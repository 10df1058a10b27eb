//! Error types for VectorKV

use thiserror::Error;

/// Result type alias for VectorKV operations
pub type Result<T> = std::result::Result<T, KvError>;

/// VectorKV error types
///
/// A missing key is not an error: lookups return `Ok(None)`.
#[derive(Error, Debug)]
pub enum KvError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Data corruption detected
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// Checksum mismatch
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// Invalid data format
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Compression/decompression error
    #[error("Compression error: {0}")]
    Compression(String),

    /// Manifest or properties (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Caller passed an unusable argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Engine has been closed
    #[error("Engine is closed")]
    Closed,

    /// Flush or compaction failed in the background
    #[error("Background error: {0}")]
    Background(String),

    /// Compaction stopped on corrupt input; the engine keeps running
    #[error("Compaction error: {0}")]
    Compaction(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl KvError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, KvError::Io(_))
    }

    /// Check if error indicates corruption
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            KvError::Corruption(_) | KvError::ChecksumMismatch { .. } | KvError::InvalidFormat(_)
        )
    }
}

impl From<bincode::Error> for KvError {
    fn from(e: bincode::Error) -> Self {
        KvError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for KvError {
    fn from(e: serde_json::Error) -> Self {
        KvError::Config(e.to_string())
    }
}
