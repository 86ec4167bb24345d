//! Error types for manifest operations.

use atoll_store::StoreError;

/// Errors that can occur during manifest operations.
///
/// All errors are fatal to the in-progress operation; none are retried
/// internally. A failed mutation leaves the tree in its previous
/// consistent state.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    /// The path has no entry in the manifest.
    #[error("entry on '{0}': not found")]
    NotFound(String),

    /// Remove called with a zero-length path.
    #[error("empty path")]
    EmptyPath,

    /// A reference stub was traversed without a loader.
    #[error("node is a reference but no loader given")]
    NoLoader,

    /// Save was called without a saver.
    #[error("node is not persisted but no saver given")]
    NoSaver,

    /// Serialized input is shorter than the format requires.
    #[error("serialized input too short")]
    TooShort,

    /// Serialized input is malformed.
    #[error("input invalid: {0}")]
    Invalid(String),

    /// A fork block references a child that was never persisted.
    #[error("fork node without reference on byte '{0:02x}'")]
    ForkInvalid(u8),

    /// Entry size conflicts with the established reference width, or
    /// exceeds the 256-byte ceiling.
    #[error("invalid entry size: {got}, expected: {expected}")]
    EntrySizeMismatch {
        /// Size of the rejected entry.
        got: usize,
        /// Established reference width (0 when the ceiling was exceeded).
        expected: usize,
    },

    /// Canonical metadata encoding exceeds the 2-byte wire length limit.
    #[error("metadata too large: {0} bytes")]
    MetadataTooLarge(usize),

    /// The load/save collaborator failed.
    #[error("store: {0}")]
    Store(#[from] StoreError),

    /// A walk callback aborted the traversal.
    #[error("walk callback: {0}")]
    Callback(String),

    /// The operation observed cancellation and stopped.
    #[error("operation cancelled")]
    Cancelled,
}

impl ManifestError {
    /// Not-found error carrying the path in both text and hex form.
    pub(crate) fn not_found(path: &[u8]) -> Self {
        Self::NotFound(format!(
            "{} ({})",
            String::from_utf8_lossy(path),
            hex::encode(path)
        ))
    }
}
