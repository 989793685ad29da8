//! Pure domain value types: keys, locations, block references, errors and
//! configuration. Nothing in this module touches I/O.

pub mod config;
pub mod errors;
pub mod key;

pub use config::{GrowthPolicy, StorageConfig};
pub use errors::{
    AllocatorError, BlockError, BlockListError, DataIntegrityError, EngineError, LockError,
    PersistentStateError, RecordArrayError,
};
pub use key::{BlockReference, Key, Location, LocationRecord, RecordKey};
