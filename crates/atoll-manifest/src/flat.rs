//! Trivial flat-map manifest, the fallback for tiny manifests.
//!
//! Stores entries in one map behind a reader-writer lock and serializes
//! the whole map as JSON. Unlike the radix trie, which leaves concurrent
//! mutation to the caller, the flat variant guards its entire state with
//! the lock. It is not content-addressed; it exists as a conformance
//! target for the top-level API.

use std::collections::BTreeMap;
use std::sync::RwLock;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::ManifestError;

type Result<T> = std::result::Result<T, ManifestError>;

/// Reference bytes serialized as a hex string in the JSON form.
mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &bytes::Bytes, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<bytes::Bytes, D::Error> {
        let text = String::deserialize(d)?;
        hex::decode(&text)
            .map(bytes::Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

/// One flat manifest entry: a reference plus optional metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlatEntry {
    /// Reference to the stored content.
    #[serde(with = "hex_bytes")]
    pub reference: Bytes,
    /// Per-entry metadata.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl FlatEntry {
    /// Entry with a reference and no metadata.
    pub fn new(reference: impl Into<Bytes>) -> Self {
        Self {
            reference: reference.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Entry with a reference and metadata.
    pub fn with_metadata(
        reference: impl Into<Bytes>,
        metadata: BTreeMap<String, String>,
    ) -> Self {
        Self {
            reference: reference.into(),
            metadata,
        }
    }
}

/// Flat path-to-entry manifest behind a reader-writer lock.
#[derive(Debug, Default)]
pub struct FlatManifest {
    entries: RwLock<BTreeMap<String, FlatEntry>>,
}

impl FlatManifest {
    /// Fresh empty manifest.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `entry` under `path`, replacing any previous entry.
    pub fn add(&self, path: &str, entry: FlatEntry) -> Result<()> {
        if path.is_empty() {
            return Err(ManifestError::EmptyPath);
        }
        let mut entries = self.entries.write().expect("lock poisoned");
        entries.insert(path.to_string(), entry);
        Ok(())
    }

    /// Delete the entry under `path`, if any.
    pub fn remove(&self, path: &str) -> Result<()> {
        if path.is_empty() {
            return Err(ManifestError::EmptyPath);
        }
        let mut entries = self.entries.write().expect("lock poisoned");
        entries.remove(path);
        Ok(())
    }

    /// A copy of the entry under `path`, or `NotFound`.
    pub fn lookup(&self, path: &str) -> Result<FlatEntry> {
        let entries = self.entries.read().expect("lock poisoned");
        entries
            .get(path)
            .cloned()
            .ok_or_else(|| ManifestError::not_found(path.as_bytes()))
    }

    /// Whether any stored path starts with `prefix`.
    pub fn has_prefix(&self, prefix: &str) -> bool {
        let entries = self.entries.read().expect("lock poisoned");
        entries.keys().any(|k| k.starts_with(prefix))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.read().expect("lock poisoned").len()
    }

    /// Whether the manifest holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serialize the whole manifest as a JSON object.
    pub fn marshal_binary(&self) -> Result<Vec<u8>> {
        let entries = self.entries.read().expect("lock poisoned");
        serde_json::to_vec(&*entries)
            .map_err(|e| ManifestError::Invalid(format!("flat manifest encoding: {e}")))
    }

    /// Deserialize a manifest previously produced by
    /// [`marshal_binary`](FlatManifest::marshal_binary).
    pub fn unmarshal_binary(data: &[u8]) -> Result<Self> {
        let entries: BTreeMap<String, FlatEntry> = serde_json::from_slice(data)
            .map_err(|e| ManifestError::Invalid(format!("flat manifest decoding: {e}")))?;
        Ok(Self {
            entries: RwLock::new(entries),
        })
    }
}
