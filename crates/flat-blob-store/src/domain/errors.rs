//! Error taxonomy.
//!
//! Each layer gets a focused error enum; `EngineError` is the only one that
//! crosses the façade boundary. `DataIntegrityError` is internal-only: it is
//! caught once the offending blocks are quarantined and surfaced to callers
//! as `EngineError::NotFound`, never directly.

use thiserror::Error;

/// Errors surfaced by the block layer.
#[derive(Debug, Error)]
pub enum BlockError {
    #[error("requested range (offset={offset}, size={size}) is out of bounds for a block of {capacity} bytes")]
    MalformedRange {
        offset: u64,
        size: u64,
        capacity: u64,
    },

    #[error("block does not have {requested} bytes of free space")]
    InsufficientSpace { requested: u64 },

    #[error("I/O error on block backing medium: {0}")]
    Io(String),

    #[error("block was released while a write was still in flight")]
    ReleasedDuringWrite,
}

/// Errors surfaced by the block allocator.
#[derive(Debug, Error)]
pub enum AllocatorError {
    #[error("block pool exhausted")]
    PoolExhausted,

    #[error("no free block at the requested location")]
    LocationNotFound,

    #[error("I/O error from allocator backing medium: {0}")]
    Io(String),
}

impl From<AllocatorError> for BlockListError {
    fn from(err: AllocatorError) -> Self {
        match err {
            AllocatorError::PoolExhausted => BlockListError::Unavailable,
            other => BlockListError::Allocator(other),
        }
    }
}

/// Errors surfaced by the block list.
#[derive(Debug, Error)]
pub enum BlockListError {
    #[error("allocator error: {0}")]
    Allocator(#[from] AllocatorError),

    #[error("block error: {0}")]
    Block(#[from] BlockError),

    #[error("list is closed for writing")]
    Unavailable,

    #[error("block index {0} is out of range")]
    IndexOutOfRange(u64),

    #[error("blob of {size_bytes} bytes exceeds block capacity of {capacity_bytes} bytes")]
    BlobTooLarge { size_bytes: u64, capacity_bytes: u64 },

    #[error("block reference is outside the valid epoch window")]
    InvalidReference,
}

/// Errors surfaced by the key-location record array.
#[derive(Debug, Error)]
pub enum RecordArrayError {
    #[error("slot index {0} is out of range")]
    IndexOutOfRange(u64),

    #[error("record at slot is invalid (checksum mismatch or evicted epoch)")]
    RecordInvalid,

    #[error("I/O error from record array backing medium: {0}")]
    Io(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Errors surfaced by persistent-state I/O.
#[derive(Debug, Error)]
pub enum PersistentStateError {
    #[error("I/O error reading or writing persistent state: {0}")]
    Io(String),

    #[error("persistent state file is unparseable: {0}")]
    Corrupt(String),
}

/// Errors surfaced by the data-directory exclusivity lock.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("failed to create lock file: {0}")]
    CreateFailed(String),

    #[error("data directory already in use by another process (pid {pid:?})")]
    AlreadyLocked { pid: Option<u32> },
}

/// The only error type that crosses the façade's public API boundary.
///
/// `DataIntegrityError` is deliberately absent here: integrity failures are
/// handled internally (quarantine the block, return `NotFound`) and never
/// reach a caller under that name.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("key not found")]
    NotFound,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unavailable, retry later: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<BlockListError> for EngineError {
    fn from(err: BlockListError) -> Self {
        let message = err.to_string();
        match err {
            BlockListError::Unavailable => {
                EngineError::Unavailable("block list closed for writing".to_string())
            }
            BlockListError::Allocator(AllocatorError::PoolExhausted) => {
                EngineError::Unavailable("block pool exhausted".to_string())
            }
            BlockListError::BlobTooLarge { .. } => EngineError::InvalidArgument(message),
            _ => EngineError::Internal(message),
        }
    }
}

impl From<RecordArrayError> for EngineError {
    fn from(err: RecordArrayError) -> Self {
        match err {
            RecordArrayError::RecordInvalid => EngineError::NotFound,
            other => EngineError::Internal(other.to_string()),
        }
    }
}

impl From<PersistentStateError> for EngineError {
    fn from(err: PersistentStateError) -> Self {
        EngineError::Internal(err.to_string())
    }
}

impl From<BlockError> for EngineError {
    fn from(err: BlockError) -> Self {
        EngineError::Internal(err.to_string())
    }
}

/// An internal-only signal: "the bytes at this location failed the
/// integrity check against the claimed key". Never surfaced to callers;
/// the façade/policy layer catches it, quarantines the containing block,
/// and reports `EngineError::NotFound` instead.
#[derive(Debug, Error)]
#[error("data integrity error for block {block_index}")]
pub struct DataIntegrityError {
    pub block_index: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocator_pool_exhausted_maps_to_unavailable() {
        let err: BlockListError = AllocatorError::PoolExhausted.into();
        assert!(matches!(err, BlockListError::Unavailable));
        let engine_err: EngineError = err.into();
        assert!(matches!(engine_err, EngineError::Unavailable(_)));
    }

    #[test]
    fn record_invalid_maps_to_not_found() {
        let err: EngineError = RecordArrayError::RecordInvalid.into();
        assert!(matches!(err, EngineError::NotFound));
    }
}
