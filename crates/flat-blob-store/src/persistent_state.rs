//! The durable snapshot written by the `PeriodicSyncer`: enough to
//! rematerialize every block and its confirmed epoch seeds after a crash,
//! without needing to replay anything.
//!
//! Writes follow the teacher's atomic-replace pattern: serialize to a
//! temp file in the same directory, `fsync` the file, rename over the
//! previous snapshot, then `fsync` the directory so the rename itself is
//! durable. A reader never observes a half-written file.

use crate::domain::errors::PersistentStateError;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochSeed {
    pub epoch_id: u32,
    pub hash_seed: u64,
}

/// A single block's durable footprint: where it lives, how far it has been
/// written, and which confirmed epochs have ever landed records in it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockState {
    pub offset_bytes: u64,
    pub size_bytes: u64,
    pub write_offset_bytes: u64,
    pub epochs: Vec<EpochSeed>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistentState {
    pub oldest_epoch_id: u32,
    pub blocks: Vec<BlockState>,
    /// The `KeyLocationMap`'s hash seed, carried across restarts so the
    /// table's slot assignments stay consistent with whatever was written
    /// before the crash. Drawn from a cryptographic RNG the first time a
    /// store is opened against a fresh (non-existent) state file.
    pub key_location_map_hash_initialization: u64,
}

impl PersistentState {
    pub fn empty(key_location_map_hash_initialization: u64) -> Self {
        PersistentState {
            oldest_epoch_id: 0,
            blocks: Vec::new(),
            key_location_map_hash_initialization,
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), PersistentStateError> {
        let bytes =
            bincode::serialize(self).map_err(|e| PersistentStateError::Corrupt(e.to_string()))?;
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile_in(dir).map_err(|e| PersistentStateError::Io(e.to_string()))?;
        tmp.write_all(&bytes)
            .map_err(|e| PersistentStateError::Io(e.to_string()))?;
        tmp.flush()
            .map_err(|e| PersistentStateError::Io(e.to_string()))?;
        tmp.sync_all()
            .map_err(|e| PersistentStateError::Io(e.to_string()))?;
        tmp.persist(path)
            .map_err(|e| PersistentStateError::Io(e.error.to_string()))?;
        if let Ok(dir_handle) = std::fs::File::open(dir) {
            let _ = dir_handle.sync_all();
        }
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Option<Self>, PersistentStateError> {
        if !path.exists() {
            return Ok(None);
        }
        let bytes =
            std::fs::read(path).map_err(|e| PersistentStateError::Io(e.to_string()))?;
        let state = bincode::deserialize(&bytes)
            .map_err(|e| PersistentStateError::Corrupt(e.to_string()))?;
        Ok(Some(state))
    }
}

fn tempfile_in(dir: &Path) -> std::io::Result<tempfile::NamedTempFile> {
    tempfile::NamedTempFile::new_in(dir)
}
