//! The background syncer: two cooperating loops that flush `PersistentState`
//! to disk and return fully-drained blocks to the allocator.
//!
//! Both loops are driven by the [`WakeSignal`]s exposed by
//! [`PersistentBlockList`] — the list itself signals "there's something new
//! to sync" (on `put`, when a fresh epoch opens) and "a block is waiting to
//! be released" (on `pop_front`). Getting the wake-up semantics wrong stalls
//! the syncer forever or makes it busy-loop; see `wake.rs`.

use crate::block::list::PersistentBlockList;
use crate::domain::errors::{EngineError, PersistentStateError};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// The external collaborator that durably commits whatever data the
/// engine's record array or block contents depend on (e.g. flushing a
/// block-device-backed `LocationRecordArray`) before a sync cycle is
/// allowed to call `notify_sync_completed`. Retried forever on failure —
/// see spec §7, "Internal retries".
pub trait DataSyncer: Send + Sync {
    fn sync(&self) -> Result<(), EngineError>;
}

/// A `DataSyncer` that has nothing external to flush (e.g. an in-memory
/// record array backing a volatile deployment's persistent block list).
pub struct NoopDataSyncer;

impl DataSyncer for NoopDataSyncer {
    fn sync(&self) -> Result<(), EngineError> {
        Ok(())
    }
}

/// Owns the two background threads that keep `PersistentState` on disk in
/// step with the in-memory `PersistentBlockList`.
pub struct PeriodicSyncer {
    shutdown: Arc<AtomicBool>,
    release_thread: Option<JoinHandle<()>>,
    put_thread: Option<JoinHandle<()>>,
    list: Arc<PersistentBlockList>,
    state_path: PathBuf,
    data_syncer: Arc<dyn DataSyncer>,
    error_retry_interval: Duration,
    key_location_map_hash_initialization: u64,
}

impl PeriodicSyncer {
    /// Spawn the block-release and block-put tasks. Both poll their
    /// respective `WakeSignal` with a short timeout so a `shutdown` request
    /// is noticed promptly even if nothing has signaled.
    ///
    /// `key_location_map_hash_initialization` is the `KeyLocationMap`'s hash
    /// seed, stamped onto every snapshot this syncer writes so a restart can
    /// rebuild the table with the same slot assignments (see
    /// `PersistentState::key_location_map_hash_initialization`).
    pub fn spawn(
        list: Arc<PersistentBlockList>,
        state_path: PathBuf,
        data_syncer: Arc<dyn DataSyncer>,
        min_epoch_interval: Duration,
        error_retry_interval: Duration,
        key_location_map_hash_initialization: u64,
    ) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));

        let release_thread = {
            let list = list.clone();
            let state_path = state_path.clone();
            let shutdown = shutdown.clone();
            std::thread::spawn(move || {
                release_task(
                    list,
                    state_path,
                    shutdown,
                    error_retry_interval,
                    key_location_map_hash_initialization,
                )
            })
        };

        let put_thread = {
            let list = list.clone();
            let state_path = state_path.clone();
            let data_syncer = data_syncer.clone();
            let shutdown = shutdown.clone();
            std::thread::spawn(move || {
                put_task(
                    list,
                    state_path,
                    data_syncer,
                    shutdown,
                    min_epoch_interval,
                    error_retry_interval,
                    key_location_map_hash_initialization,
                )
            })
        };

        PeriodicSyncer {
            shutdown,
            release_thread: Some(release_thread),
            put_thread: Some(put_thread),
            list,
            state_path,
            data_syncer,
            error_retry_interval,
            key_location_map_hash_initialization,
        }
    }

    /// Stop both background loops and perform a final, synchronous sync
    /// with `is_final_sync = true`: this closes the list for writing and
    /// guarantees every write that finalized before this call is either
    /// durable afterward or was already rejected as `Unavailable`.
    pub fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.list.put_wake().signal();
        self.list.release_wake().signal();
        if let Some(handle) = self.release_thread.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.put_thread.take() {
            let _ = handle.join();
        }

        self.list.notify_sync_starting(true);
        retry_forever(self.error_retry_interval, || self.data_syncer.sync());
        self.list.notify_sync_completed();
        let snapshot = self
            .list
            .get_persistent_state(self.key_location_map_hash_initialization);
        retry_forever(self.error_retry_interval, || {
            snapshot.save(&self.state_path).map_err(EngineError::from)
        });
        self.list.confirm_releases_not_referenced(&snapshot);
        tracing::info!("periodic syncer shut down after final sync");
    }
}

fn retry_forever<F>(error_retry_interval: Duration, mut attempt: F)
where
    F: FnMut() -> Result<(), EngineError>,
{
    loop {
        match attempt() {
            Ok(()) => return,
            Err(err) => {
                tracing::warn!(error = %err, "sync attempt failed, retrying after back-off");
                std::thread::sleep(error_retry_interval);
            }
        }
    }
}

fn release_task(
    list: Arc<PersistentBlockList>,
    state_path: PathBuf,
    shutdown: Arc<AtomicBool>,
    error_retry_interval: Duration,
    key_location_map_hash_initialization: u64,
) {
    loop {
        let signaled = list.release_wake().wait_timeout(Duration::from_millis(200));
        if !signaled {
            if shutdown.load(Ordering::SeqCst) {
                return;
            }
            continue;
        }
        if shutdown.load(Ordering::SeqCst) {
            return;
        }

        loop {
            let snapshot = list.get_persistent_state(key_location_map_hash_initialization);
            match snapshot.save(&state_path) {
                Ok(()) => {
                    list.confirm_releases_not_referenced(&snapshot);
                    tracing::info!(blocks = snapshot.blocks.len(), "released blocks after persisting state");
                    break;
                }
                Err(err) => {
                    log_persistent_state_failure(&err);
                    std::thread::sleep(error_retry_interval);
                }
            }
        }
    }
}

fn put_task(
    list: Arc<PersistentBlockList>,
    state_path: PathBuf,
    data_syncer: Arc<dyn DataSyncer>,
    shutdown: Arc<AtomicBool>,
    min_epoch_interval: Duration,
    error_retry_interval: Duration,
    key_location_map_hash_initialization: u64,
) {
    let mut last_sync = Instant::now() - min_epoch_interval;
    loop {
        let signaled = list.put_wake().wait_timeout(Duration::from_millis(200));
        if !signaled {
            if shutdown.load(Ordering::SeqCst) {
                return;
            }
            continue;
        }
        if shutdown.load(Ordering::SeqCst) {
            return;
        }

        let elapsed = last_sync.elapsed();
        if elapsed < min_epoch_interval {
            std::thread::sleep(min_epoch_interval - elapsed);
        }

        list.notify_sync_starting(false);
        retry_forever(error_retry_interval, || data_syncer.sync());
        list.notify_sync_completed();

        let snapshot = list.get_persistent_state(key_location_map_hash_initialization);
        loop {
            match snapshot.save(&state_path) {
                Ok(()) => break,
                Err(err) => {
                    log_persistent_state_failure(&err);
                    std::thread::sleep(error_retry_interval);
                }
            }
        }
        last_sync = Instant::now();
        tracing::info!(
            oldest_epoch_id = snapshot.oldest_epoch_id,
            blocks = snapshot.blocks.len(),
            "completed sync cycle"
        );
    }
}

fn log_persistent_state_failure(err: &PersistentStateError) {
    tracing::warn!(error = %err, "persistent state write failed, retrying after back-off");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::allocator::InMemoryBlockAllocator;
    use std::sync::Arc;

    #[test]
    fn shutdown_performs_a_final_sync_and_closes_the_list() {
        let dir = tempfile::tempdir().unwrap();
        let allocator = Arc::new(InMemoryBlockAllocator::new(64, 4));
        let list = Arc::new(PersistentBlockList::new(allocator));
        list.push_back().unwrap();
        let mut w = list.put(0, 5).unwrap();
        w.write_all(b"hello").unwrap();
        w.finish().unwrap();

        let syncer = PeriodicSyncer::spawn(
            list.clone(),
            dir.path().join("state.bin"),
            Arc::new(NoopDataSyncer),
            Duration::from_millis(1),
            Duration::from_millis(5),
            0xdead_beef,
        );
        syncer.shutdown();

        assert!(dir.path().join("state.bin").exists());
        assert!(matches!(
            list.push_back(),
            Err(crate::domain::errors::BlockListError::Unavailable)
        ));
        let loaded = crate::persistent_state::PersistentState::load(&dir.path().join("state.bin"))
            .unwrap()
            .unwrap();
        assert_eq!(loaded.key_location_map_hash_initialization, 0xdead_beef);
    }

    #[test]
    fn put_signal_eventually_persists_state_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let allocator = Arc::new(InMemoryBlockAllocator::new(64, 4));
        let list = Arc::new(PersistentBlockList::new(allocator));
        let state_path = dir.path().join("state.bin");

        let syncer = PeriodicSyncer::spawn(
            list.clone(),
            state_path.clone(),
            Arc::new(NoopDataSyncer),
            Duration::from_millis(1),
            Duration::from_millis(5),
            7,
        );

        list.push_back().unwrap();
        let mut w = list.put(0, 5).unwrap();
        w.write_all(b"hello").unwrap();
        w.finish().unwrap();

        // The put above signals the put-wake; give the background thread
        // time to notice and persist.
        let deadline = Instant::now() + Duration::from_secs(2);
        while !state_path.exists() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }

        syncer.shutdown();
        assert!(state_path.exists());
    }
}
