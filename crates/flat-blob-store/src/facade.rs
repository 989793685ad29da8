//! The blob-access façade: composes the key-location index and the
//! old/current/new placement policy behind a single reader/writer lock, a
//! refresh-bandwidth mutex, and a small capabilities snapshot.
//!
//! The byte-stream abstraction that would carry blob bytes end-to-end in a
//! full deployment (with cloning/teeing so a refresh can split one read
//! into "return to caller" and "copy to new location") is out of scope —
//! see spec §1. [`BlobStream`] stands in for it: an eagerly-read buffer
//! with a known size, cheap to clone for the refresh path.

use crate::block::list::BlockList;
use crate::domain::errors::EngineError;
use crate::domain::key::{Key, Location};
use crate::index::record_array::LocationRecordArray;
use crate::index::KeyLocationMap;
use crate::policy::OldCurrentNewLocationBlobMap;
use std::sync::{Mutex, RwLock};

/// Stand-in for the opaque, cloneable "byte stream with size" that the
/// real service layer carries end-to-end.
#[derive(Debug, Clone)]
pub struct BlobStream {
    size_bytes: u64,
    bytes: Vec<u8>,
}

impl BlobStream {
    pub fn new(bytes: Vec<u8>) -> Self {
        BlobStream {
            size_bytes: bytes.len() as u64,
            bytes,
        }
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// What this façade instance can do — read once at construction time from
/// the engine's configuration, exposed for a host process that wants to
/// branch on capability rather than probe by triggering an error.
#[derive(Debug, Clone, Copy)]
pub struct Capabilities {
    /// Whether reads of blobs in the "old" span are copied forward.
    pub supports_refresh: bool,
    /// Whether a corrupted block is quarantined and drained automatically.
    pub supports_corruption_containment: bool,
}

struct Maps<L: BlockList, A: LocationRecordArray> {
    keys: KeyLocationMap<A>,
    blobs: OldCurrentNewLocationBlobMap<L>,
}

/// Composes the key-location index and the placement policy behind one
/// reader/writer lock plus a refresh-bandwidth mutex.
///
/// Multiple `get`s run concurrently under the shared lock; a `put`'s
/// allocation and finalization each take the exclusive lock briefly, with
/// the byte-ingest step in between running lock-free so a slow caller
/// never stalls other requests. The refresh mutex caps concurrent
/// copy-on-refresh work to one thread at a time, so independent `get`s for
/// blobs that both need refreshing don't duplicate the copy.
pub struct FlatBlobAccess<L: BlockList, A: LocationRecordArray> {
    maps: RwLock<Maps<L, A>>,
    refresh_mutex: Mutex<()>,
    capabilities: Capabilities,
}

impl<L: BlockList, A: LocationRecordArray> FlatBlobAccess<L, A> {
    pub fn new(keys: KeyLocationMap<A>, blobs: OldCurrentNewLocationBlobMap<L>) -> Self {
        FlatBlobAccess {
            maps: RwLock::new(Maps { keys, blobs }),
            refresh_mutex: Mutex::new(()),
            capabilities: Capabilities {
                supports_refresh: true,
                supports_corruption_containment: true,
            },
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Fetch a blob by key.
    ///
    /// A not-found record or an evicted epoch both surface as
    /// `EngineError::NotFound`. Content-integrity verification against the
    /// byte stream is an external collaborator's concern (spec §1) and is
    /// not re-derived here; record-level corruption is instead caught
    /// earlier, by the per-record epoch checksum in a `BlockDevice`-backed
    /// `LocationRecordArray` (a failed checksum there already surfaces as
    /// `NotFound` out of `maps.keys.get`, before a location is ever
    /// resolved). A blob living in the "old" span is copied into a fresh
    /// location before the stream is handed back, so it survives the next
    /// rotation; that refresh runs after the caller's bytes are already in
    /// hand, so a refresh failure never prevents the `get` itself from
    /// succeeding — it's logged and returns the caller's original data.
    pub fn get(&self, key: &Key) -> Result<BlobStream, EngineError> {
        let resolved = {
            let maps = self.maps.read().unwrap();
            let location = maps.keys.get(key)?.ok_or(EngineError::NotFound)?;
            maps.blobs.resolve_for_read(location)
        };

        let bytes = self.read_location(resolved.location)?;

        if resolved.needs_refresh {
            if let Err(err) = self.refresh(key, &bytes) {
                tracing::warn!(error = %err, key = %key, "failed to refresh blob");
            }
        }

        Ok(BlobStream::new(bytes))
    }

    /// Store a blob under `key`. `stream`'s declared size must not exceed
    /// a single block's capacity.
    pub fn put(&self, key: Key, stream: BlobStream) -> Result<(), EngineError> {
        let location = self.write_blob(stream.size_bytes(), stream.as_bytes())?;
        let maps = self.maps.write().unwrap();
        maps.keys.put(key, location)?;
        Ok(())
    }

    /// Return the subset of `keys` with no retrievable blob. Any candidate
    /// that also needs a refresh is refreshed in place (bounded by the
    /// refresh mutex) before the final answer is returned; a key that
    /// vanishes between the read-only scan and the refresh pass is
    /// reported missing rather than re-scanned a third time (open
    /// question in spec §9 — this engine does not re-verify refreshed
    /// items a second time).
    pub fn find_missing(&self, keys: &[Key]) -> Result<Vec<Key>, EngineError> {
        let mut missing = Vec::new();
        let mut candidates: Vec<Key> = Vec::new();
        {
            let maps = self.maps.read().unwrap();
            for key in keys {
                match maps.keys.get(key)? {
                    None => missing.push(*key),
                    Some(location) => {
                        if maps.blobs.resolve_for_read(location).needs_refresh {
                            candidates.push(*key);
                        }
                    }
                }
            }
        }

        if candidates.is_empty() {
            return Ok(missing);
        }

        let _refresh_guard = self.refresh_mutex.lock().unwrap();
        for key in candidates {
            let recheck = {
                let maps = self.maps.write().unwrap();
                maps.keys.get(&key)?.map(|location| maps.blobs.resolve_for_read(location))
            };
            match recheck {
                None => missing.push(key),
                Some(resolved) if resolved.needs_refresh => {
                    let bytes = self.read_location(resolved.location)?;
                    if let Err(err) = self.refresh_locked(&key, &bytes) {
                        tracing::warn!(error = %err, key = %key, "failed to refresh blob during find_missing");
                    }
                }
                Some(_) => {} // already refreshed by a concurrent caller
            }
        }
        Ok(missing)
    }

    fn read_location(&self, location: Location) -> Result<Vec<u8>, EngineError> {
        let maps = self.maps.read().unwrap();
        Ok(maps
            .blobs
            .block_list()
            .get(location.block_index, location.offset_bytes, location.size_bytes)?)
    }

    fn write_blob(&self, size_bytes: u64, bytes: &[u8]) -> Result<Location, EngineError> {
        let (writer, reference, _hash_seed) = {
            let maps = self.maps.write().unwrap();
            maps.blobs.put(size_bytes)?
        };
        let mut writer = writer;
        writer.write_all(bytes).map_err(EngineError::from)?;
        let offset = writer.finish().map_err(EngineError::from)?;

        let maps = self.maps.write().unwrap();
        let (block_index, _seed) = maps
            .blobs
            .block_list()
            .block_reference_to_block_index(reference)
            .map_err(|_| {
                EngineError::Internal(
                    "block was popped before the write could be finalized; retry".to_string(),
                )
            })?;
        Ok(Location::new(block_index, offset, size_bytes))
    }

    /// Allocate, copy and re-point `key` at a new location, entered only
    /// while holding the refresh mutex. Re-checks under the write lock in
    /// case a concurrent caller already refreshed the same key.
    fn refresh(&self, key: &Key, bytes: &[u8]) -> Result<(), EngineError> {
        let _refresh_guard = self.refresh_mutex.lock().unwrap();
        let still_needs_refresh = {
            let maps = self.maps.write().unwrap();
            match maps.keys.get(key)? {
                None => return Ok(()),
                Some(location) => maps.blobs.resolve_for_read(location).needs_refresh,
            }
        };
        if !still_needs_refresh {
            return Ok(());
        }
        self.refresh_locked(key, bytes)
    }

    /// Shared tail of the refresh dance: allocate and write without
    /// holding the façade lock, then reacquire briefly to repoint the
    /// key-location map. Callers that have already verified
    /// `needs_refresh` under the write lock (and hold the refresh mutex)
    /// invoke this directly; `refresh` wraps it with that re-check for the
    /// plain `get` path.
    fn refresh_locked(&self, key: &Key, bytes: &[u8]) -> Result<(), EngineError> {
        let new_location = self.write_blob(bytes.len() as u64, bytes)?;
        let maps = self.maps.write().unwrap();
        maps.keys.put(*key, new_location)?;
        Ok(())
    }
}
