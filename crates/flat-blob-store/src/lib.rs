//! # flat-blob-store
//!
//! A durable, bounded-size local blob store used as a content-addressable
//! storage cache (and, analogously, an action-result cache). The store
//! holds a fixed-size pool of storage blocks and rotates through them using
//! an old/current/new retention policy: every blob put into the store will
//! eventually be dropped to make room for newer ones, but recently-written
//! and recently-read blobs are kept around longer.
//!
//! ## Crate structure
//!
//! - `domain/` - pure value types: keys, locations, block references,
//!   configuration, and the error taxonomy. No I/O.
//! - `block/` - fixed-size storage regions (`Block`), their allocator
//!   (`BlockAllocator`), and the ordered list a policy treats as
//!   old/current/new spans (`BlockList`).
//! - `index/` - the key→location hash table (`KeyLocationMap`), a
//!   Robin-Hood open-addressed table over a pluggable `LocationRecordArray`
//!   backing (in-memory, legacy file-backed, or block-device-backed).
//! - `policy/` - `OldCurrentNewLocationBlobMap`, the placement/rotation/
//!   corruption-containment policy that decides where a new blob lands and
//!   when a span rotates.
//! - `persistent_state` - the durable snapshot written by the syncer and
//!   read back on restart to recover epoch bookkeeping across a crash.
//! - `wake` - the single-slot wake-up primitive the syncer's background
//!   loops block on.
//! - `lock` - a process-exclusivity flock over the data directory (feature
//!   `locking`, default-on).
//! - `facade` - `FlatBlobAccess`, the public get/put/find_missing surface
//!   that composes the index and the policy behind one lock.
//! - `syncer` - `PeriodicSyncer`, the background threads that flush
//!   `PersistentState` to disk and return fully-drained blocks to the
//!   allocator.
//!
//! ## Usage
//!
//! ```ignore
//! use flat_blob_store::{
//!     BlobStream, FlatBlobAccess, GrowthPolicy, InMemoryBlockAllocator,
//!     InMemoryLocationRecordArray, Key, KeyLocationMap, OldCurrentNewLocationBlobMap,
//!     VolatileBlockList,
//! };
//! use std::sync::Arc;
//!
//! let allocator = Arc::new(InMemoryBlockAllocator::new(1 << 20, 16));
//! let list = VolatileBlockList::new(allocator);
//! let blobs =
//!     OldCurrentNewLocationBlobMap::new(list, 1 << 20, 2, 4, 8, GrowthPolicy::Immutable);
//! let keys = KeyLocationMap::new(InMemoryLocationRecordArray::new(1021), 42, 16, 64);
//! let store = FlatBlobAccess::new(keys, blobs);
//!
//! let key = Key::derive(b"hello world");
//! store.put(key, BlobStream::new(b"hello world".to_vec())).unwrap();
//! assert_eq!(store.get(&key).unwrap().as_bytes(), b"hello world");
//! ```

pub mod block;
pub mod domain;
pub mod facade;
pub mod index;
#[cfg(feature = "locking")]
pub mod lock;
pub mod persistent_state;
pub mod policy;
pub mod syncer;
pub mod test_support;
pub mod wake;

pub use block::{
    Block, BlockAllocator, BlockList, BlockLocation, BlockReferenceResolver, BlockWriter,
    InMemoryBlockAllocator, MemoryBlock, PersistentBlockList, RawDeviceBlock,
    RawDeviceBlockAllocator, VolatileBlockList,
};
pub use domain::{
    AllocatorError, BlockError, BlockListError, BlockReference, DataIntegrityError, EngineError,
    GrowthPolicy, Key, Location, LocationRecord, LockError, PersistentStateError, RecordKey,
    StorageConfig,
};
pub use facade::{BlobStream, Capabilities, FlatBlobAccess};
pub use index::{
    BlockDeviceLocationRecordArray, FileBackedLocationRecordArray, InMemoryLocationRecordArray,
    KeyLocationMap, KeyLocationMapStats, LocationRecordArray,
};
#[cfg(feature = "locking")]
pub use lock::DataDirLock;
pub use persistent_state::{BlockState, EpochSeed, PersistentState};
pub use policy::{OldCurrentNewLocationBlobMap, ResolvedLocation, Stats, StatsSnapshot};
pub use syncer::{DataSyncer, NoopDataSyncer, PeriodicSyncer};
