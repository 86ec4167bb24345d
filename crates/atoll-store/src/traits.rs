//! Core capability traits for content-addressed chunk storage.

use bytes::Bytes;

use crate::error::StoreError;

/// Read-only retrieval of previously saved chunks.
///
/// Implementations must be `Send + Sync`; the manifest core issues
/// concurrent `load` calls from parallel traversals.
#[async_trait::async_trait]
pub trait Loader: Send + Sync {
    /// Fetch the bytes previously stored under `reference`.
    ///
    /// Returns [`StoreError::NotFound`] if the reference is unknown.
    async fn load(&self, reference: &[u8]) -> Result<Bytes, StoreError>;
}

/// Write-side of the capability: persist bytes, get back their address.
///
/// `save` must be deterministic — the same bytes always yield the same
/// reference. The hashing algorithm is the backend's choice.
#[async_trait::async_trait]
pub trait Saver: Send + Sync {
    /// Store `data` and return its content address.
    async fn save(&self, data: Bytes) -> Result<Vec<u8>, StoreError>;
}

/// Composite of [`Loader`] and [`Saver`], implemented by every backend
/// that supports both directions.
pub trait LoadSaver: Loader + Saver {}

impl<T: Loader + Saver> LoadSaver for T {}
