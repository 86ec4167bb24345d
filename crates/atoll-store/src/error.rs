//! Error types for chunk store operations.

/// Errors that can occur while loading or saving manifest chunks.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No chunk is stored under the given reference.
    #[error("chunk not found: {}", hex::encode(.0))]
    NotFound(Vec<u8>),

    /// An I/O error occurred in the backend.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Backend-specific failure.
    #[error("store backend error: {0}")]
    Backend(String),
}
