//! Process-level exclusivity over a data directory.
//!
//! Two engine instances must never open the same data directory
//! concurrently — there is no protocol for sharing the block list or
//! record array across processes. `DataDirLock` enforces this with an
//! advisory `flock` over a `LOCK` file, released automatically on drop.

#![cfg(feature = "locking")]

use crate::domain::errors::LockError;
use fs2::FileExt;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

pub struct DataDirLock {
    file: File,
    path: PathBuf,
}

impl DataDirLock {
    pub fn acquire(data_dir: &Path) -> Result<Self, LockError> {
        std::fs::create_dir_all(data_dir)
            .map_err(|e| LockError::CreateFailed(e.to_string()))?;
        let path = data_dir.join("LOCK");
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| LockError::CreateFailed(e.to_string()))?;

        file.try_lock_exclusive().map_err(|_| {
            let pid = std::fs::read_to_string(&path)
                .ok()
                .and_then(|s| s.trim().parse().ok());
            LockError::AlreadyLocked { pid }
        })?;

        file.set_len(0).map_err(|e| LockError::CreateFailed(e.to_string()))?;
        write!(file, "{}", std::process::id())
            .map_err(|e| LockError::CreateFailed(e.to_string()))?;
        file.sync_all().map_err(|e| LockError::CreateFailed(e.to_string()))?;

        Ok(DataDirLock { file, path })
    }
}

impl Drop for DataDirLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
        let _ = &self.path; // kept for diagnostics, not removed: a stale LOCK file with a stale pid is harmless once unlocked
    }
}
