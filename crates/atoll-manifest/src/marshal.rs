//! Bit-exact binary codec for manifest nodes.
//!
//! A node serializes to a variable-length blob:
//!
//! ```text
//! [0..32)    obfuscation key (stored in the clear)
//! [32..63)   version hash: Keccak-256("mantaray:0.1") truncated to 31 bytes
//! [63]       reference width R (1 byte)
//! [64..64+R) entry, zero-padded to R
//! [..+32)    fork index bitmap, one bit per present fork key
//! then, per set bit in ascending order, one fork block:
//!   [0]        child flags (copied at save time)
//!   [1]        prefix length, 1..=30
//!   [2..32)    prefix, zero-padded
//!   [32..32+R) child reference
//!   and, when the child carries metadata:
//!   [..+2)     big-endian length of the canonical JSON object
//!   [..]       the JSON, zero-padded to the next 32-byte block boundary
//! ```
//!
//! Every byte after the obfuscation key is XORed with the key repeated as
//! a keystream. Distinct manifests with identical content therefore yield
//! distinct chunks; the key is not a secret.

use std::collections::BTreeMap;

use bytes::Bytes;
use rand::RngCore;

use crate::bitmap::Bitmap;
use crate::error::ManifestError;
use crate::node::{Flags, Fork, Node};

type Result<T> = std::result::Result<T, ManifestError>;

/// Version label hashed into the header; the only accepted framing.
pub const VERSION_STRING: &str = "mantaray:0.1";

/// Keccak-256 of [`VERSION_STRING`], truncated to 31 bytes.
pub(crate) const VERSION_HASH: [u8; 31] = [
    0x02, 0x51, 0x84, 0x78, 0x9d, 0x63, 0x63, 0x57, 0x66, 0xd7, 0x8c, 0x41, 0x90, 0x01, 0x96,
    0xb5, 0x7d, 0x74, 0x00, 0x87, 0x5e, 0xbe, 0x4d, 0x9b, 0x5d, 0x1e, 0x76, 0xbd, 0x96, 0x52,
    0xa9,
];

pub(crate) const OBFUSCATION_KEY_SIZE: usize = 32;
const VERSION_HASH_SIZE: usize = 31;
const REF_WIDTH_SIZE: usize = 1;
/// Total header size: key + version hash + reference width.
const HEADER_SIZE: usize = OBFUSCATION_KEY_SIZE + VERSION_HASH_SIZE + REF_WIDTH_SIZE;

const FORK_FLAGS_SIZE: usize = 1;
const FORK_PREFIX_LEN_SIZE: usize = 1;
const FORK_HEADER_SIZE: usize = FORK_FLAGS_SIZE + FORK_PREFIX_LEN_SIZE;
/// Fixed part of a fork block before the child reference.
const FORK_PRE_REFERENCE_SIZE: usize = 32;
/// Hard limit on a fork prefix; longer paths chain through extra nodes.
pub const PREFIX_MAX_SIZE: usize = FORK_PRE_REFERENCE_SIZE - FORK_HEADER_SIZE;

const METADATA_LEN_SIZE: usize = 2;
const METADATA_MAX_SIZE: usize = u16::MAX as usize;

/// Fresh random obfuscation key.
pub(crate) fn random_obfuscation_key() -> [u8; 32] {
    let mut key = [0u8; OBFUSCATION_KEY_SIZE];
    rand::rng().fill_bytes(&mut key);
    key
}

/// XOR `data[OBFUSCATION_KEY_SIZE..]` with the repeating keystream.
/// Involutive: applying it twice restores the input.
fn apply_keystream(data: &mut [u8], key: &[u8; 32]) {
    for (i, b) in data[OBFUSCATION_KEY_SIZE..].iter_mut().enumerate() {
        *b ^= key[i % OBFUSCATION_KEY_SIZE];
    }
}

/// Canonical metadata encoding: JSON object with lexicographically sorted
/// keys and no insignificant whitespace (the `BTreeMap` ordering makes
/// `serde_json` output canonical).
fn canonical_metadata(metadata: &BTreeMap<String, String>) -> Result<Vec<u8>> {
    let bytes = serde_json::to_vec(metadata)
        .map_err(|e| ManifestError::Invalid(format!("metadata encoding: {e}")))?;
    if bytes.len() > METADATA_MAX_SIZE {
        return Err(ManifestError::MetadataTooLarge(bytes.len()));
    }
    Ok(bytes)
}

/// Zero padding that closes a fork block on a 32-byte boundary.
fn metadata_padding(ref_len: usize, metadata_len: usize) -> usize {
    let unpadded = FORK_PRE_REFERENCE_SIZE + ref_len + METADATA_LEN_SIZE + metadata_len;
    (OBFUSCATION_KEY_SIZE - unpadded % OBFUSCATION_KEY_SIZE) % OBFUSCATION_KEY_SIZE
}

impl Node {
    /// Serialize this node to its obfuscated wire form.
    ///
    /// Generates the obfuscation key on first call if none was pre-seeded.
    /// Fails with [`ManifestError::ForkInvalid`] if any child has not been
    /// persisted (its reference is unset), since the wire format stores
    /// children by reference only.
    pub fn marshal_binary(&mut self) -> Result<Bytes> {
        let Some(forks) = self.forks.as_ref() else {
            return Err(ManifestError::Invalid(
                "cannot serialize an unmaterialized node".to_string(),
            ));
        };

        if self.ref_len > u8::MAX as usize {
            return Err(ManifestError::Invalid(format!(
                "reference width {} does not fit the wire header",
                self.ref_len
            )));
        }

        let key = *self.obfuscation_key.get_or_insert_with(random_obfuscation_key);

        let mut out = Vec::with_capacity(
            HEADER_SIZE + self.ref_len + 32 + forks.len() * (FORK_PRE_REFERENCE_SIZE + self.ref_len),
        );

        // Header.
        out.extend_from_slice(&key);
        out.extend_from_slice(&VERSION_HASH);
        out.push(self.ref_len as u8);

        // Entry, zero-padded to the reference width.
        out.extend_from_slice(&self.entry);
        out.resize(HEADER_SIZE + self.ref_len, 0);

        // Fork index.
        let mut index = Bitmap::new();
        for k in forks.keys() {
            index.set(*k);
        }
        out.extend_from_slice(index.as_bytes());

        // Fork blocks, strictly ascending by key.
        for (k, fork) in forks {
            out.extend_from_slice(&fork.wire_block(*k, self.ref_len)?);
        }

        apply_keystream(&mut out, &key);
        Ok(Bytes::from(out))
    }

    /// Deserialize a node from its wire form.
    ///
    /// The result is a materialized node whose children are reference
    /// stubs. The node's own flags and metadata live in its parent's fork
    /// block and are not part of this blob.
    pub fn unmarshal_binary(data: &[u8]) -> Result<Node> {
        let mut node = Node {
            forks: None,
            ..Node::default()
        };
        node.unmarshal_into(data)?;
        Ok(node)
    }

    /// Decode `data` into this node in place, preserving the fields the
    /// wire form does not carry (flags, metadata, own reference).
    pub(crate) fn unmarshal_into(&mut self, data: &[u8]) -> Result<()> {
        if data.len() < HEADER_SIZE {
            return Err(ManifestError::TooShort);
        }

        let mut key = [0u8; OBFUSCATION_KEY_SIZE];
        key.copy_from_slice(&data[..OBFUSCATION_KEY_SIZE]);

        let mut data = data.to_vec();
        apply_keystream(&mut data, &key);

        let version = &data[OBFUSCATION_KEY_SIZE..OBFUSCATION_KEY_SIZE + VERSION_HASH_SIZE];
        if version != &VERSION_HASH[..] {
            return Err(ManifestError::Invalid(format!(
                "version hash {}",
                hex::encode(version)
            )));
        }

        let ref_len = usize::from(data[HEADER_SIZE - 1]);
        if data.len() < HEADER_SIZE + ref_len + 32 {
            return Err(ManifestError::TooShort);
        }

        self.obfuscation_key = Some(key);
        self.ref_len = ref_len;
        self.entry = Bytes::copy_from_slice(&data[HEADER_SIZE..HEADER_SIZE + ref_len]);

        let mut index_bytes = [0u8; 32];
        index_bytes.copy_from_slice(&data[HEADER_SIZE + ref_len..HEADER_SIZE + ref_len + 32]);
        let index = Bitmap::from_bytes(&index_bytes);

        let mut forks = BTreeMap::new();
        let mut offset = HEADER_SIZE + ref_len + 32;
        for k in index.iter() {
            let (fork, consumed) = Fork::from_wire(&data[offset..], ref_len)?;
            offset += consumed;
            forks.insert(k, fork);
        }

        self.forks = Some(forks);
        Ok(())
    }
}

impl Fork {
    /// Encode one fork block: flags, prefix length, padded prefix, child
    /// reference, and the child's metadata when present.
    fn wire_block(&self, key: u8, ref_len: usize) -> Result<Vec<u8>> {
        if self.node.reference.is_empty() {
            return Err(ManifestError::ForkInvalid(key));
        }
        if self.node.reference.len() != ref_len {
            return Err(ManifestError::Invalid(format!(
                "fork reference width {} != manifest width {ref_len}",
                self.node.reference.len()
            )));
        }

        let mut b = Vec::with_capacity(FORK_PRE_REFERENCE_SIZE + ref_len);
        b.push(self.node.flags.0);
        b.push(self.prefix.len() as u8);
        b.extend_from_slice(&self.prefix);
        b.resize(FORK_PRE_REFERENCE_SIZE, 0);
        b.extend_from_slice(&self.node.reference);

        if self.node.flags.has(Flags::WITH_METADATA) {
            let metadata = canonical_metadata(&self.node.metadata)?;
            b.extend_from_slice(&(metadata.len() as u16).to_be_bytes());
            let padding = metadata_padding(ref_len, metadata.len());
            b.extend_from_slice(&metadata);
            b.resize(b.len() + padding, 0);
        }

        Ok(b)
    }

    /// Decode one fork block from `data`, returning the fork and the
    /// number of bytes consumed.
    fn from_wire(data: &[u8], ref_len: usize) -> Result<(Fork, usize)> {
        let base = FORK_PRE_REFERENCE_SIZE + ref_len;
        if data.len() < base {
            return Err(ManifestError::TooShort);
        }

        let flags = Flags(data[0]);
        let prefix_len = usize::from(data[1]);
        if prefix_len == 0 || prefix_len > PREFIX_MAX_SIZE {
            return Err(ManifestError::Invalid(format!(
                "prefix length {prefix_len}"
            )));
        }

        let prefix = data[FORK_HEADER_SIZE..FORK_HEADER_SIZE + prefix_len].to_vec();
        let reference =
            Bytes::copy_from_slice(&data[FORK_PRE_REFERENCE_SIZE..FORK_PRE_REFERENCE_SIZE + ref_len]);

        let mut node = Node::new_ref(reference);
        node.flags = flags;

        let mut consumed = base;
        if flags.has(Flags::WITH_METADATA) {
            if data.len() < consumed + METADATA_LEN_SIZE {
                return Err(ManifestError::TooShort);
            }
            let metadata_len =
                usize::from(u16::from_be_bytes([data[consumed], data[consumed + 1]]));
            consumed += METADATA_LEN_SIZE;
            if data.len() < consumed + metadata_len {
                return Err(ManifestError::TooShort);
            }
            node.metadata = serde_json::from_slice(&data[consumed..consumed + metadata_len])
                .map_err(|e| ManifestError::Invalid(format!("metadata decoding: {e}")))?;
            consumed += metadata_len;

            let padding = metadata_padding(ref_len, metadata_len);
            if data.len() < consumed + padding {
                return Err(ManifestError::TooShort);
            }
            consumed += padding;
        }

        Ok((Fork { prefix, node }, consumed))
    }
}
