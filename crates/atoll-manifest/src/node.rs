//! In-memory trie node model and the radix operations.
//!
//! A [`Node`] is a vertex of a compressed radix trie over raw bytes (not
//! UTF-8). Outgoing edges are [`Fork`]s keyed by their first prefix byte;
//! a fork prefix is the maximal non-branching extension of the path and
//! never exceeds [`PREFIX_MAX_SIZE`] bytes — longer runs are chained
//! through intermediate nodes.
//!
//! Mutations clear the node's persisted reference on every node along the
//! root-to-modification path, so a later [`Node::save`](crate::Node::save)
//! re-persists exactly the dirty spine.

use std::collections::BTreeMap;

use atoll_store::{LoadSaver, Loader};
use bytes::Bytes;
use futures::FutureExt;
use futures::future::BoxFuture;
use tracing::trace;

use crate::PATH_SEPARATOR;
use crate::error::ManifestError;
use crate::marshal::PREFIX_MAX_SIZE;

type Result<T> = std::result::Result<T, ManifestError>;

/// Largest entry the manifest accepts, in bytes.
const ENTRY_MAX_SIZE: usize = 256;

/// Typed node flags, stored as a bitmask on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Flags(pub(crate) u8);

impl Flags {
    /// An entry is stored at exactly this path.
    pub(crate) const VALUE: u8 = 0b0000_0010;
    /// The node has children.
    pub(crate) const EDGE: u8 = 0b0000_0100;
    /// The incoming prefix contains a path separator past position 0.
    pub(crate) const WITH_PATH_SEPARATOR: u8 = 0b0000_1000;
    /// The node carries metadata.
    pub(crate) const WITH_METADATA: u8 = 0b0001_0000;

    pub(crate) fn has(self, bit: u8) -> bool {
        self.0 & bit == bit
    }

    pub(crate) fn set(&mut self, bit: u8) {
        self.0 |= bit;
    }

    pub(crate) fn clear(&mut self, bit: u8) {
        self.0 &= !bit;
    }
}

/// A labelled outgoing edge of a [`Node`].
#[derive(Debug)]
pub struct Fork {
    /// Non-branching part of the subpath; `prefix[0]` is the fork key.
    pub(crate) prefix: Vec<u8>,
    /// The child node, exclusively owned.
    pub(crate) node: Node,
}

impl Fork {
    /// The edge label.
    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    /// The child node.
    pub fn node(&self) -> &Node {
        &self.node
    }
}

/// A vertex of the content-addressed compressed radix trie.
#[derive(Debug, Default)]
pub struct Node {
    pub(crate) flags: Flags,
    /// Fixed width of every reference in this manifest; 0 until the first
    /// non-empty entry establishes it.
    pub(crate) ref_len: usize,
    /// Per-root XOR mask for the wire form; generated on first
    /// serialization when unset.
    pub(crate) obfuscation_key: Option<[u8; 32]>,
    /// Content address produced by the last successful persist; empty
    /// while the node (or a descendant on its spine) is dirty.
    pub(crate) reference: Bytes,
    /// Opaque payload stored at this node; possibly empty (directory
    /// marker).
    pub(crate) entry: Bytes,
    pub(crate) metadata: BTreeMap<String, String>,
    /// Fork table; `None` marks a reference stub that has not been
    /// materialized yet.
    pub(crate) forks: Option<BTreeMap<u8, Fork>>,
}

/// Length of the longest common prefix of `a` and `b`.
pub(crate) fn common_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

impl Node {
    /// Fresh empty node with a materialized (empty) fork table.
    pub fn new() -> Self {
        Self {
            forks: Some(BTreeMap::new()),
            ..Self::default()
        }
    }

    /// Reference stub: carries only a persisted address, resolved through
    /// a loader on first traversal.
    pub fn new_ref(reference: impl Into<Bytes>) -> Self {
        Self {
            reference: reference.into(),
            ..Self::default()
        }
    }

    /// Content address of this node if saved; empty while dirty.
    pub fn reference(&self) -> &[u8] {
        &self.reference
    }

    /// The payload stored at this node.
    pub fn entry(&self) -> &[u8] {
        &self.entry
    }

    /// The metadata stored at this node.
    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// Whether an entry terminates at exactly this node.
    pub fn is_value(&self) -> bool {
        self.flags.has(Flags::VALUE)
    }

    /// Whether the node has children.
    pub fn is_edge(&self) -> bool {
        self.flags.has(Flags::EDGE)
    }

    /// Whether the incoming prefix contains a path separator past
    /// position 0.
    pub fn is_with_path_separator(&self) -> bool {
        self.flags.has(Flags::WITH_PATH_SEPARATOR)
    }

    /// Whether the node carries metadata.
    pub fn is_with_metadata(&self) -> bool {
        self.flags.has(Flags::WITH_METADATA)
    }

    /// Whether this node is an unmaterialized reference stub.
    pub fn is_stub(&self) -> bool {
        self.forks.is_none() && !self.reference.is_empty()
    }

    /// Pre-seed the obfuscation key, e.g. for deterministic content
    /// addresses in tests. Without this a random key is generated on
    /// first serialization.
    pub fn set_obfuscation_key(&mut self, key: [u8; 32]) {
        self.obfuscation_key = Some(key);
    }

    /// The fork keyed by `key`, if present and materialized.
    pub fn fork(&self, key: u8) -> Option<&Fork> {
        self.forks.as_ref()?.get(&key)
    }

    /// Fork keys in ascending order; empty for stubs.
    pub fn fork_keys(&self) -> Vec<u8> {
        self.forks
            .as_ref()
            .map(|f| f.keys().copied().collect())
            .unwrap_or_default()
    }

    pub(crate) fn forks_ref(&self) -> &BTreeMap<u8, Fork> {
        self.forks.as_ref().expect("node not materialized")
    }

    pub(crate) fn forks_mut(&mut self) -> &mut BTreeMap<u8, Fork> {
        self.forks.as_mut().expect("node not materialized")
    }

    /// Recompute the path-separator hint from `path`: set iff any byte
    /// past position 0 is the separator.
    fn update_with_path_separator(&mut self, path: &[u8]) {
        if path.iter().skip(1).any(|b| *b == PATH_SEPARATOR) {
            self.flags.set(Flags::WITH_PATH_SEPARATOR);
        } else {
            self.flags.clear(Flags::WITH_PATH_SEPARATOR);
        }
    }

    /// Check `entry` against the established reference width, adopting
    /// it on first non-empty entry.
    fn check_entry_size(&mut self, entry: &[u8]) -> Result<()> {
        if self.ref_len == 0 {
            if entry.len() > ENTRY_MAX_SIZE {
                return Err(ManifestError::EntrySizeMismatch {
                    got: entry.len(),
                    expected: 0,
                });
            }
            if !entry.is_empty() {
                self.ref_len = entry.len();
            }
        } else if !entry.is_empty() && entry.len() != self.ref_len {
            return Err(ManifestError::EntrySizeMismatch {
                got: entry.len(),
                expected: self.ref_len,
            });
        }
        Ok(())
    }

    /// Store `entry` under `path`, splitting fork prefixes as needed.
    ///
    /// An empty `entry` is permitted (directory marker); an empty `path`
    /// stores at this node. The first non-empty entry fixes the
    /// reference width for the whole manifest; later entries must match.
    /// `metadata`, when non-empty, is attached to the terminal node.
    pub async fn add(
        &mut self,
        path: &[u8],
        entry: &[u8],
        metadata: BTreeMap<String, String>,
        ls: Option<&dyn LoadSaver>,
    ) -> Result<()> {
        self.add_inner(path, entry, &metadata, ls.map(|s| s as &dyn Loader))
            .await
    }

    fn add_inner<'a>(
        &'a mut self,
        path: &'a [u8],
        entry: &'a [u8],
        metadata: &'a BTreeMap<String, String>,
        l: Option<&'a dyn Loader>,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            // Stubs are loaded before any state is touched, so the wire
            // header's reference width is in place for the entry check.
            self.materialize(l).await?;
            self.check_entry_size(entry)?;

            if path.is_empty() {
                self.entry = Bytes::copy_from_slice(entry);
                if !metadata.is_empty() {
                    self.metadata = metadata.clone();
                    self.flags.set(Flags::WITH_METADATA);
                }
                self.flags.set(Flags::VALUE);
                self.reference = Bytes::new();
                return Ok(());
            }

            let first = path[0];
            if !self.forks_ref().contains_key(&first) {
                let mut nn = Node::new();
                nn.ref_len = self.ref_len;

                if path.len() > PREFIX_MAX_SIZE {
                    // Prefix too long for one fork block: chain through an
                    // intermediate node.
                    let (prefix, rest) = path.split_at(PREFIX_MAX_SIZE);
                    nn.add_inner(rest, entry, metadata, l).await?;
                    nn.update_with_path_separator(prefix);
                    self.forks_mut().insert(
                        first,
                        Fork {
                            prefix: prefix.to_vec(),
                            node: nn,
                        },
                    );
                    self.flags.set(Flags::EDGE);
                    self.reference = Bytes::new();
                    return Ok(());
                }

                nn.entry = Bytes::copy_from_slice(entry);
                if !metadata.is_empty() {
                    nn.metadata = metadata.clone();
                    nn.flags.set(Flags::WITH_METADATA);
                }
                nn.flags.set(Flags::VALUE);
                nn.update_with_path_separator(path);
                self.forks_mut().insert(
                    first,
                    Fork {
                        prefix: path.to_vec(),
                        node: nn,
                    },
                );
                self.flags.set(Flags::EDGE);
                self.reference = Bytes::new();
                return Ok(());
            }

            let (c_len, prefix_len) = {
                let f = &self.forks_ref()[&first];
                (common_len(&f.prefix, path), f.prefix.len())
            };

            if c_len == prefix_len {
                // The fork fully prefixes the remaining path; descend.
                let f = self.forks_mut().get_mut(&first).expect("fork checked");
                f.node.update_with_path_separator(path);
                f.node.add_inner(&path[c_len..], entry, metadata, l).await?;
                self.flags.set(Flags::EDGE);
                self.reference = Bytes::new();
                return Ok(());
            }

            // Paths diverge inside the fork prefix: split. The new
            // intermediate is assembled off to the side and swapped in
            // only after the inner add succeeds, so a failure leaves the
            // original fork in place.
            trace!(
                key = first,
                split_at = c_len,
                "splitting fork prefix"
            );
            let Fork {
                prefix,
                node: mut moved,
            } = self.forks_mut().remove(&first).expect("fork checked");
            let shared = prefix[..c_len].to_vec();
            let rest = prefix[c_len..].to_vec();

            moved.update_with_path_separator(&rest);
            let mut nn = Node::new();
            nn.ref_len = self.ref_len;
            nn.forks_mut().insert(
                rest[0],
                Fork {
                    prefix: rest.clone(),
                    node: moved,
                },
            );
            nn.flags.set(Flags::EDGE);
            nn.update_with_path_separator(path);

            match nn.add_inner(&path[c_len..], entry, metadata, l).await {
                Ok(()) => {
                    self.forks_mut().insert(
                        first,
                        Fork {
                            prefix: shared,
                            node: nn,
                        },
                    );
                    self.flags.set(Flags::EDGE);
                    self.reference = Bytes::new();
                    Ok(())
                }
                Err(e) => {
                    // Roll back: restore the original fork untouched.
                    let Fork { node: mut back, .. } =
                        nn.forks_mut().remove(&rest[0]).expect("restored fork");
                    back.update_with_path_separator(&prefix);
                    self.forks_mut().insert(first, Fork { prefix, node: back });
                    Err(e)
                }
            }
        }
        .boxed()
    }

    /// Resolve the node at `path`, materializing stubs on the way.
    pub async fn lookup_node<'a>(
        &'a mut self,
        path: &'a [u8],
        l: Option<&'a dyn Loader>,
    ) -> Result<&'a Node> {
        self.lookup_node_mut(path, l).await.map(|n| &*n)
    }

    pub(crate) fn lookup_node_mut<'a>(
        &'a mut self,
        path: &'a [u8],
        l: Option<&'a dyn Loader>,
    ) -> BoxFuture<'a, Result<&'a mut Node>> {
        async move {
            self.materialize(l).await?;
            if path.is_empty() {
                return Ok(self);
            }
            let Some(f) = self.forks_mut().get_mut(&path[0]) else {
                return Err(ManifestError::not_found(path));
            };
            let c_len = common_len(&f.prefix, path);
            if c_len == f.prefix.len() {
                return f.node.lookup_node_mut(&path[c_len..], l).await;
            }
            Err(ManifestError::not_found(path))
        }
        .boxed()
    }

    /// Entry and metadata stored at `path`, or `NotFound`.
    pub async fn lookup(
        &mut self,
        path: &[u8],
        l: Option<&dyn Loader>,
    ) -> Result<(Bytes, BTreeMap<String, String>)> {
        let node = self.lookup_node(path, l).await?;
        Ok((node.entry.clone(), node.metadata.clone()))
    }

    /// Delete the entry at `path`.
    ///
    /// The fork whose full prefix matches the residual path is removed
    /// from its parent. An intermediate node left with a single child is
    /// intentionally not collapsed: the resulting shape is part of the
    /// observable wire format.
    pub async fn remove(&mut self, path: &[u8], ls: Option<&dyn LoadSaver>) -> Result<()> {
        self.remove_inner(path, ls.map(|s| s as &dyn Loader)).await
    }

    fn remove_inner<'a>(
        &'a mut self,
        path: &'a [u8],
        l: Option<&'a dyn Loader>,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            if path.is_empty() {
                return Err(ManifestError::EmptyPath);
            }
            self.materialize(l).await?;
            let Some(f) = self.forks_mut().get_mut(&path[0]) else {
                return Err(ManifestError::not_found(path));
            };
            if !path.starts_with(&f.prefix) {
                return Err(ManifestError::not_found(path));
            }
            let prefix_len = f.prefix.len();
            if path.len() == prefix_len {
                self.forks_mut().remove(&path[0]);
                self.reference = Bytes::new();
                return Ok(());
            }
            f.node.remove_inner(&path[prefix_len..], l).await?;
            self.reference = Bytes::new();
            Ok(())
        }
        .boxed()
    }

    /// Whether some stored path starts with `path`, or `path` ends
    /// inside a fork prefix.
    pub async fn has_prefix(&mut self, path: &[u8], l: Option<&dyn Loader>) -> Result<bool> {
        self.has_prefix_inner(path, l).await
    }

    fn has_prefix_inner<'a>(
        &'a mut self,
        path: &'a [u8],
        l: Option<&'a dyn Loader>,
    ) -> BoxFuture<'a, Result<bool>> {
        async move {
            self.materialize(l).await?;
            if path.is_empty() {
                return Ok(true);
            }
            let Some(f) = self.forks_mut().get_mut(&path[0]) else {
                return Ok(false);
            };
            let c_len = common_len(&f.prefix, path);
            if c_len == f.prefix.len() {
                return f.node.has_prefix_inner(&path[c_len..], l).await;
            }
            Ok(f.prefix.starts_with(path))
        }
        .boxed()
    }
}
