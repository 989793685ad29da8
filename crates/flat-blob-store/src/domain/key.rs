//! Core value types shared by every layer: [`Key`], [`Location`],
//! [`BlockReference`] and the on-disk [`LocationRecord`].
//!
//! ## Data model
//!
//! - `Key` is a fixed 32-byte content-derived identifier.
//! - `Location` names where a blob's bytes live *right now* (relative to the
//!   current head of the block list). It is never persisted directly —
//!   persistence instead stores a `BlockReference`, which survives
//!   `PopFront` operations that would otherwise shift every `blockIndex`.
//! - `LocationRecord` is the unit stored by the key-location hash table.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A fixed 32-byte content-derived key.
///
/// Equality is byte equality. Keys are write-once within a logical blob
/// identity: a later `Put` for the same key supersedes, it never mutates
/// the bytes of an earlier write in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Key(pub [u8; 32]);

impl Key {
    pub const LEN: usize = 32;

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Key(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Derive a key from an arbitrary digest string, as the façade does for
    /// callers that identify blobs by `digest || instance_name`.
    pub fn derive(digest_and_instance: &[u8]) -> Self {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(digest_and_instance);
        let out = hasher.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&out);
        Key(bytes)
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for b in &self.0[..4] {
            write!(f, "{:02x}", b)?;
        }
        write!(f, "..")
    }
}

/// Where a blob's bytes currently live.
///
/// `block_index` is relative to the present head of the `BlockList` — it is
/// *not* stable across `PopFront`. Values loaded from persistent state are
/// always re-derived from a [`BlockReference`] through the resolver, never
/// stored as a raw `Location`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub block_index: u64,
    pub offset_bytes: u64,
    pub size_bytes: u64,
}

impl Location {
    pub fn new(block_index: u64, offset_bytes: u64, size_bytes: u64) -> Self {
        Location {
            block_index,
            offset_bytes,
            size_bytes,
        }
    }

    /// Total ordering: A is older than B iff A.block_index < B.block_index,
    /// or block_index is equal and A.offset_bytes < B.offset_bytes.
    pub fn is_older_than(&self, other: &Location) -> bool {
        match self.block_index.cmp(&other.block_index) {
            Ordering::Less => true,
            Ordering::Greater => false,
            Ordering::Equal => self.offset_bytes < other.offset_bytes,
        }
    }
}

/// A stable (epoch_id, blocks_from_last) name for a block, surviving
/// `PopFront` operations within the epoch horizon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockReference {
    pub epoch_id: u32,
    pub blocks_from_last: u16,
}

impl BlockReference {
    pub fn new(epoch_id: u32, blocks_from_last: u16) -> Self {
        BlockReference {
            epoch_id,
            blocks_from_last,
        }
    }
}

/// The key used inside the hash table's slots: the blob key plus the probe
/// distance at which this record was (or would be) inserted. The attempt
/// count is part of the record's identity so a record displaced by
/// Robin-Hood probing can still be found by continuing to probe past it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordKey {
    pub key: Key,
    pub attempt: u32,
}

/// A single entry of the key-location hash table: which key, at which probe
/// distance, pointing at which location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocationRecord {
    pub record_key: RecordKey,
    pub location: Location,
}

impl LocationRecord {
    pub fn new(key: Key, attempt: u32, location: Location) -> Self {
        LocationRecord {
            record_key: RecordKey { key, attempt },
            location,
        }
    }
}

/// FNV-1a over `key bytes ‖ attempt (LE u32)`, seeded with the table's seed.
/// The upper 32 bits of the 64-bit hash are XOR-folded into the low 32 to
/// improve low-bit avalanche before reducing mod R.
pub fn slot_hash(seed: u64, key: &Key, attempt: u32) -> u64 {
    const FNV_PRIME: u64 = 0x100000001b3;
    let mut hash = seed ^ 0xcbf29ce484222325; // mix the seed into the basis
    for byte in key.0.iter().chain(attempt.to_le_bytes().iter()) {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    let folded = (hash >> 32) ^ (hash & 0xffff_ffff);
    folded
}

/// FNV-1a checksum of an on-disk record body, seeded by the epoch's hash
/// seed. Used both when writing a record and when validating one on read.
pub fn record_checksum(hash_seed: u64, body: &[u8]) -> u64 {
    const FNV_PRIME: u64 = 0x100000001b3;
    let mut hash = hash_seed ^ 0xcbf29ce484222325;
    for byte in body {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_ordering() {
        let a = Location::new(1, 10, 5);
        let b = Location::new(1, 20, 5);
        let c = Location::new(2, 0, 5);
        assert!(a.is_older_than(&b));
        assert!(!b.is_older_than(&a));
        assert!(a.is_older_than(&c));
        assert!(!c.is_older_than(&a));
        assert!(!a.is_older_than(&a));
    }

    #[test]
    fn slot_hash_is_deterministic() {
        let key = Key::from_bytes([7u8; 32]);
        let h1 = slot_hash(42, &key, 0);
        let h2 = slot_hash(42, &key, 0);
        assert_eq!(h1, h2);
        let h3 = slot_hash(42, &key, 1);
        assert_ne!(h1, h3);
        let h4 = slot_hash(43, &key, 0);
        assert_ne!(h1, h4);
    }

    #[test]
    fn key_derive_is_sha256_of_input() {
        let k1 = Key::derive(b"digest||instance");
        let k2 = Key::derive(b"digest||instance");
        let k3 = Key::derive(b"other");
        assert_eq!(k1, k2);
        assert_ne!(k1, k3);
    }
}
