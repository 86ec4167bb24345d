//! In-memory chunk store backend.

use std::collections::HashMap;
use std::sync::RwLock;

use bytes::Bytes;
use tracing::debug;

use crate::error::StoreError;
use crate::traits::{Loader, Saver};

/// In-memory chunk store backed by a `RwLock<HashMap>`.
///
/// Addresses are BLAKE3 hashes of the stored bytes, so `save` is
/// deterministic and idempotent. Useful for testing and for manifests
/// that never leave process memory.
#[derive(Default)]
pub struct MemoryStore {
    chunks: RwLock<HashMap<Vec<u8>, Bytes>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct chunks currently stored.
    pub fn len(&self) -> usize {
        self.chunks.read().expect("lock poisoned").len()
    }

    /// Whether the store holds no chunks.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a chunk is stored under `reference`.
    pub fn contains(&self, reference: &[u8]) -> bool {
        self.chunks
            .read()
            .expect("lock poisoned")
            .contains_key(reference)
    }
}

#[async_trait::async_trait]
impl Loader for MemoryStore {
    async fn load(&self, reference: &[u8]) -> Result<Bytes, StoreError> {
        let map = self.chunks.read().expect("lock poisoned");
        map.get(reference)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(reference.to_vec()))
    }
}

#[async_trait::async_trait]
impl Saver for MemoryStore {
    async fn save(&self, data: Bytes) -> Result<Vec<u8>, StoreError> {
        let reference = blake3::hash(&data).as_bytes().to_vec();
        debug!(
            reference = %hex::encode(&reference),
            size = data.len(),
            "storing chunk in memory"
        );
        let mut map = self.chunks.write().expect("lock poisoned");
        map.insert(reference.clone(), data);
        Ok(reference)
    }
}
