//! Content-addressed manifest: a compressed-radix trie over a flat chunk
//! store.
//!
//! An atoll manifest maps arbitrary byte paths (e.g. `img/logo.png`) to
//! opaque fixed-width references, with optional per-entry metadata. The
//! trie is the directory layer of a content-addressed storage fabric:
//! every node, when persisted, yields a reference that becomes part of
//! the bytes of the node above it, so the root reference commits to the
//! whole directory tree.
//!
//! The core type is [`Node`]:
//!
//! - [`Node::add`] / [`Node::lookup`] / [`Node::remove`] /
//!   [`Node::has_prefix`] — radix operations with transparent prefix
//!   splitting and merging.
//! - [`Node::save`] — recursive bottom-up persist through a
//!   [`Saver`](atoll_store::Saver); children are saved concurrently with
//!   first-error semantics.
//! - [`Node::new_ref`] — a reference stub, materialized lazily through a
//!   [`Loader`](atoll_store::Loader) on first traversal.
//! - [`Node::marshal_binary`] / [`Node::unmarshal_binary`] — the
//!   bit-exact obfuscated wire format.
//!
//! Walkers ([`Node::walk_nodes`], [`Node::walk_paths`] and their
//! `_async` variants) traverse the tree by node or by file/directory
//! boundary; the `_async` variants descend sibling subtrees concurrently
//! and observe a cancellation token between recursion frames.
//!
//! Mutating operations on one tree are single-threaded by design: the
//! trie carries no internal locking. [`FlatManifest`] is a trivial
//! map-backed fallback for tiny manifests with a reader-writer lock
//! around its whole state.

mod bitmap;
mod error;
mod flat;
mod marshal;
mod node;
mod persist;
mod walker;

pub use bitmap::Bitmap;
pub use error::ManifestError;
pub use flat::{FlatEntry, FlatManifest};
pub use marshal::{PREFIX_MAX_SIZE, VERSION_STRING};
pub use node::{Fork, Node};
pub use walker::{WalkNodeFn, WalkPathFn};

/// Byte that separates path segments in walk output.
pub const PATH_SEPARATOR: u8 = b'/';
