//! Load/save capability traits and chunk store backends.
//!
//! This crate defines the external interface an atoll manifest persists
//! through: [`Saver`] hashes a blob and stores it under the resulting
//! reference, [`Loader`] fetches blobs back by reference. The manifest
//! core never sees the hashing algorithm — identity is whatever the
//! backend derives from the bytes.
//!
//! Two backends are provided:
//!
//! - [`MemoryStore`] — in-memory storage backed by a `RwLock<HashMap>`,
//!   addresses are BLAKE3 hashes of the stored bytes.
//! - [`SlowStore`] — a wrapper injecting seeded random latency before each
//!   operation, for surfacing races and exercising cancellation.

mod error;
mod memory;
mod slow;
mod traits;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use slow::SlowStore;
pub use traits::{LoadSaver, Loader, Saver};
