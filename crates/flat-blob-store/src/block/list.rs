//! The queue of blocks an `OldCurrentNew` policy places blobs into.
//!
//! Blocks are addressed two ways: a `block_index`, dense and relative to
//! the current head (used for every hot-path `get`/`put`/`has_space` call),
//! and a [`BlockReference`], stable across `PopFront` (used inside stored
//! `LocationRecord`s, since the hash table can't rewrite every persisted
//! index each time the head moves).
//!
//! [`VolatileBlockList`] backs an all-in-memory deployment: one epoch per
//! block, no persistence, `PopFront` releases the block to the allocator
//! immediately. [`PersistentBlockList`] backs a crash-recoverable
//! deployment: blocks may accumulate more than one epoch over their
//! lifetime, and a popped block is held in a pending-release queue until
//! the `PeriodicSyncer` has durably confirmed it is no longer referenced.

use crate::block::allocator::{BlockAllocator, BlockLocation};
use crate::block::block::{Block, BlockWriter};
use crate::domain::errors::BlockListError;
use crate::domain::key::BlockReference;
use crate::persistent_state::{BlockState, EpochSeed, PersistentState};
use crate::wake::WakeSignal;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Converts between a block's present position and a name that survives
/// the head of the list moving out from under it.
pub trait BlockReferenceResolver {
    fn block_reference_to_block_index(
        &self,
        reference: BlockReference,
    ) -> Result<(u64, u64), BlockListError>;

    fn block_index_to_block_reference(
        &self,
        block_index: u64,
    ) -> Result<(BlockReference, u64), BlockListError>;
}

pub trait BlockList: BlockReferenceResolver + Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push_back(&self) -> Result<(), BlockListError>;

    /// Remove the head block. For a volatile list this releases it to the
    /// allocator immediately; for a persistent list it is held in a
    /// pending-release queue until `confirm_release` is called.
    fn pop_front(&self) -> Result<(), BlockListError>;

    fn has_space(&self, block_index: u64, size_bytes: u64) -> Result<bool, BlockListError>;

    fn put(&self, block_index: u64, size_bytes: u64) -> Result<BlockWriter, BlockListError>;

    fn get(
        &self,
        block_index: u64,
        offset_bytes: u64,
        size_bytes: u64,
    ) -> Result<Vec<u8>, BlockListError>;

    /// Raise the condemned-from-head prefix to cover at least `up_to_index`
    /// (a monotonic high-water mark via `fetch_max`, safe to call without
    /// holding the write lock). Indices inside the condemned prefix are
    /// reported invalid by the resolver; the policy layer is expected to
    /// `pop_front` them out once informed.
    fn condemn_up_to(&self, up_to_index: u64);

    fn condemned_count(&self) -> u64;
}

impl<T: BlockReferenceResolver + ?Sized> BlockReferenceResolver for Arc<T> {
    fn block_reference_to_block_index(
        &self,
        reference: BlockReference,
    ) -> Result<(u64, u64), BlockListError> {
        (**self).block_reference_to_block_index(reference)
    }

    fn block_index_to_block_reference(
        &self,
        block_index: u64,
    ) -> Result<(BlockReference, u64), BlockListError> {
        (**self).block_index_to_block_reference(block_index)
    }
}

/// Lets a shared `Arc<PersistentBlockList>` (or `Arc<VolatileBlockList>`)
/// stand in anywhere a `BlockList` is expected by value — needed when the
/// same list must also be handed to a `BlockDeviceLocationRecordArray` as
/// its resolver, since both sides need a live handle to the same state.
impl<T: BlockList + ?Sized> BlockList for Arc<T> {
    fn len(&self) -> usize {
        (**self).len()
    }

    fn push_back(&self) -> Result<(), BlockListError> {
        (**self).push_back()
    }

    fn pop_front(&self) -> Result<(), BlockListError> {
        (**self).pop_front()
    }

    fn has_space(&self, block_index: u64, size_bytes: u64) -> Result<bool, BlockListError> {
        (**self).has_space(block_index, size_bytes)
    }

    fn put(&self, block_index: u64, size_bytes: u64) -> Result<BlockWriter, BlockListError> {
        (**self).put(block_index, size_bytes)
    }

    fn get(
        &self,
        block_index: u64,
        offset_bytes: u64,
        size_bytes: u64,
    ) -> Result<Vec<u8>, BlockListError> {
        (**self).get(block_index, offset_bytes, size_bytes)
    }

    fn condemn_up_to(&self, up_to_index: u64) {
        (**self).condemn_up_to(up_to_index)
    }

    fn condemned_count(&self) -> u64 {
        (**self).condemned_count()
    }
}

/// Whether `epoch_id` lies strictly before `oldest_epoch_id` in the
/// wrapped, modular `u32` epoch space (spec §9: "epoch math with
/// wrap-around ... treats overflow the same way (modular) as the
/// reference"). A plain `<` misclassifies a live reference as evicted once
/// `epoch_id` has wrapped past `u32::MAX`, since minting goes through
/// `wrapping_add`. Computed the way sequence-number comparisons are: the
/// signed difference `epoch_id - oldest_epoch_id` is negative iff `epoch_id`
/// is "behind" `oldest_epoch_id` on the wrapped number line.
fn epoch_is_before(epoch_id: u32, oldest_epoch_id: u32) -> bool {
    (epoch_id.wrapping_sub(oldest_epoch_id) as i32) < 0
}

fn epoch_matches<T>(entries: &[T], epoch_id: u32, get_epochs: impl Fn(&T) -> &[EpochSeed]) -> Option<(usize, u64)> {
    for (index, entry) in entries.iter().enumerate() {
        if let Some(seed) = get_epochs(entry).iter().find(|e| e.epoch_id == epoch_id) {
            return Some((index, seed.hash_seed));
        }
    }
    None
}

struct VolatileEntry {
    block: Arc<dyn Block>,
    location: BlockLocation,
    epoch: EpochSeed,
}

struct VolatileState {
    entries: VecDeque<VolatileEntry>,
    next_epoch_id: u32,
    oldest_epoch_id: u32,
}

/// Backs an in-memory-only deployment: exactly one epoch per block, minted
/// at `push_back` time, with no persistence of epoch seeds across restarts.
pub struct VolatileBlockList {
    allocator: Arc<dyn BlockAllocator>,
    state: Mutex<VolatileState>,
    condemned_count: AtomicU64,
}

impl VolatileBlockList {
    pub fn new(allocator: Arc<dyn BlockAllocator>) -> Self {
        VolatileBlockList {
            allocator,
            state: Mutex::new(VolatileState {
                entries: VecDeque::new(),
                next_epoch_id: 0,
                oldest_epoch_id: 0,
            }),
            condemned_count: AtomicU64::new(0),
        }
    }
}

impl BlockReferenceResolver for VolatileBlockList {
    fn block_reference_to_block_index(
        &self,
        reference: BlockReference,
    ) -> Result<(u64, u64), BlockListError> {
        let state = self.state.lock().unwrap();
        if epoch_is_before(reference.epoch_id, state.oldest_epoch_id) {
            return Err(BlockListError::InvalidReference);
        }
        let entries: Vec<&VolatileEntry> = state.entries.iter().collect();
        let found = entries
            .iter()
            .position(|e| e.epoch.epoch_id == reference.epoch_id);
        match found {
            Some(index) if index as u64 >= self.condemned_count.load(Ordering::SeqCst) => {
                Ok((index as u64, entries[index].epoch.hash_seed))
            }
            _ => Err(BlockListError::InvalidReference),
        }
    }

    fn block_index_to_block_reference(
        &self,
        block_index: u64,
    ) -> Result<(BlockReference, u64), BlockListError> {
        let state = self.state.lock().unwrap();
        let entry = state
            .entries
            .get(block_index as usize)
            .ok_or(BlockListError::IndexOutOfRange(block_index))?;
        let blocks_from_last = (state.entries.len() as u64 - 1 - block_index) as u16;
        Ok((
            BlockReference::new(entry.epoch.epoch_id, blocks_from_last),
            entry.epoch.hash_seed,
        ))
    }
}

impl BlockList for VolatileBlockList {
    fn len(&self) -> usize {
        self.state.lock().unwrap().entries.len()
    }

    fn push_back(&self) -> Result<(), BlockListError> {
        let (block, location) = self.allocator.new_block()?;
        let mut state = self.state.lock().unwrap();
        let epoch_id = state.next_epoch_id;
        state.next_epoch_id = state.next_epoch_id.wrapping_add(1);
        if state.entries.is_empty() {
            state.oldest_epoch_id = epoch_id;
        }
        state.entries.push_back(VolatileEntry {
            block,
            location,
            epoch: EpochSeed {
                epoch_id,
                hash_seed: rand::random(),
            },
        });
        Ok(())
    }

    fn pop_front(&self) -> Result<(), BlockListError> {
        let mut state = self.state.lock().unwrap();
        let entry = state
            .entries
            .pop_front()
            .ok_or(BlockListError::IndexOutOfRange(0))?;
        if let Some(next) = state.entries.front() {
            state.oldest_epoch_id = next.epoch.epoch_id;
        } else {
            state.oldest_epoch_id = state.next_epoch_id;
        }
        self.condemned_count.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| {
            Some(c.saturating_sub(1))
        }).ok();
        drop(state);
        self.allocator.release(entry.location);
        Ok(())
    }

    fn has_space(&self, block_index: u64, size_bytes: u64) -> Result<bool, BlockListError> {
        let state = self.state.lock().unwrap();
        let entry = state
            .entries
            .get(block_index as usize)
            .ok_or(BlockListError::IndexOutOfRange(block_index))?;
        Ok(entry.block.has_space(size_bytes))
    }

    fn put(&self, block_index: u64, size_bytes: u64) -> Result<BlockWriter, BlockListError> {
        let block = {
            let state = self.state.lock().unwrap();
            state
                .entries
                .get(block_index as usize)
                .ok_or(BlockListError::IndexOutOfRange(block_index))?
                .block
                .clone()
        };
        Ok(block.put(size_bytes)?)
    }

    fn get(
        &self,
        block_index: u64,
        offset_bytes: u64,
        size_bytes: u64,
    ) -> Result<Vec<u8>, BlockListError> {
        let block = {
            let state = self.state.lock().unwrap();
            state
                .entries
                .get(block_index as usize)
                .ok_or(BlockListError::IndexOutOfRange(block_index))?
                .block
                .clone()
        };
        Ok(block.read_range(offset_bytes, size_bytes)?)
    }

    fn condemn_up_to(&self, up_to_index: u64) {
        self.condemned_count.fetch_max(up_to_index + 1, Ordering::SeqCst);
    }

    fn condemned_count(&self) -> u64 {
        self.condemned_count.load(Ordering::SeqCst)
    }
}

struct PersistentEntry {
    block: Arc<dyn Block>,
    location: BlockLocation,
    epochs: Vec<EpochSeed>,
}

struct ListState {
    entries: VecDeque<PersistentEntry>,
    next_epoch_id: u32,
    oldest_epoch_id: u32,
    current_epoch: EpochSeed,
    /// Number of entries present when `current_epoch` was minted. A push
    /// since then means the current epoch's "last-known last block" is
    /// stale, forcing a bump on the next `put` (re-architecture rule (b)).
    current_epoch_tail_len: usize,
    /// Set by `notify_sync_starting`; forces a bump on the next `put`
    /// (rule (a)) so no further writes get attributed to an epoch that is
    /// already being drained into a snapshot.
    synchronizing: bool,
    synchronized_up_to_epoch: u32,
    closed_for_writing: bool,
}

/// Backs a crash-recoverable deployment. Epoch bookkeeping follows the
/// two re-architecture rules verbatim: a new epoch is minted when the
/// previous one has been marked as synchronizing, or when a block has been
/// pushed since the current epoch was created.
pub struct PersistentBlockList {
    allocator: Arc<dyn BlockAllocator>,
    state: Mutex<ListState>,
    pending_release: Mutex<VecDeque<(BlockLocation, Arc<dyn Block>)>>,
    condemned_count: AtomicU64,
    put_wake: WakeSignal,
    release_wake: WakeSignal,
}

impl PersistentBlockList {
    pub fn new(allocator: Arc<dyn BlockAllocator>) -> Self {
        PersistentBlockList {
            allocator,
            state: Mutex::new(ListState {
                entries: VecDeque::new(),
                next_epoch_id: 0,
                oldest_epoch_id: 0,
                current_epoch: EpochSeed {
                    epoch_id: 0,
                    hash_seed: rand::random(),
                },
                current_epoch_tail_len: 0,
                synchronizing: false,
                synchronized_up_to_epoch: 0,
                closed_for_writing: false,
            }),
            pending_release: Mutex::new(VecDeque::new()),
            condemned_count: AtomicU64::new(0),
            put_wake: WakeSignal::new(),
            release_wake: WakeSignal::new(),
        }
    }

    pub fn put_wake(&self) -> &WakeSignal {
        &self.put_wake
    }

    pub fn release_wake(&self) -> &WakeSignal {
        &self.release_wake
    }

    /// Freeze the current epoch as "now being synchronized". If `is_final`,
    /// latch the list closed for writing — used for a clean shutdown sync.
    pub fn notify_sync_starting(&self, is_final: bool) {
        let mut state = self.state.lock().unwrap();
        state.synchronizing = true;
        if is_final {
            state.closed_for_writing = true;
        }
    }

    /// Advance the synchronized watermark to the epoch that was frozen by
    /// the most recent `notify_sync_starting`, exposing it (and everything
    /// at or before it) through `get_persistent_state`.
    pub fn notify_sync_completed(&self) {
        let mut state = self.state.lock().unwrap();
        state.synchronized_up_to_epoch = state.current_epoch.epoch_id;
        state.synchronizing = false;
    }

    /// A durable snapshot of every block and its confirmed (synchronized)
    /// epoch seeds, stamped with the `KeyLocationMap`'s hash seed so a
    /// restart can rebuild the hash table with slot assignments consistent
    /// with whatever was durable before the crash.
    pub fn get_persistent_state(&self, key_location_map_hash_initialization: u64) -> PersistentState {
        let state = self.state.lock().unwrap();
        let mut blocks = Vec::with_capacity(state.entries.len());
        for entry in &state.entries {
            let confirmed: Vec<EpochSeed> = entry
                .epochs
                .iter()
                .filter(|e| e.epoch_id <= state.synchronized_up_to_epoch)
                .cloned()
                .collect();
            if confirmed.is_empty() {
                continue;
            }
            blocks.push(BlockState {
                offset_bytes: entry.location.offset_bytes,
                size_bytes: entry.location.size_bytes,
                write_offset_bytes: entry.block.write_offset_bytes(),
                epochs: confirmed,
            });
        }
        PersistentState {
            oldest_epoch_id: state.oldest_epoch_id,
            blocks,
            key_location_map_hash_initialization,
        }
    }

    /// Rematerialize from a loaded snapshot, reopening each block through
    /// the allocator at its recorded write offset.
    pub fn restore(
        allocator: Arc<dyn BlockAllocator>,
        snapshot: &PersistentState,
    ) -> Result<Self, BlockListError> {
        let list = Self::new(allocator.clone());
        let mut state = list.state.lock().unwrap();
        state.oldest_epoch_id = snapshot.oldest_epoch_id;
        let mut max_epoch = snapshot.oldest_epoch_id;
        for block_state in &snapshot.blocks {
            let location = BlockLocation {
                offset_bytes: block_state.offset_bytes,
                size_bytes: block_state.size_bytes,
            };
            let block = allocator.new_block_at_location(location, block_state.write_offset_bytes)?;
            for epoch in &block_state.epochs {
                max_epoch = max_epoch.max(epoch.epoch_id.wrapping_add(1));
            }
            state.entries.push_back(PersistentEntry {
                block,
                location,
                epochs: block_state.epochs.clone(),
            });
        }
        state.next_epoch_id = max_epoch;
        state.current_epoch = EpochSeed {
            epoch_id: max_epoch,
            hash_seed: rand::random(),
        };
        state.current_epoch_tail_len = state.entries.len();
        state.synchronized_up_to_epoch = snapshot
            .blocks
            .iter()
            .flat_map(|b| b.epochs.iter())
            .map(|e| e.epoch_id)
            .max()
            .unwrap_or(snapshot.oldest_epoch_id);
        drop(state);
        Ok(list)
    }

    /// Called once the syncer has durably confirmed a pending-release
    /// block is absent from the latest snapshot; returns it to the
    /// allocator.
    pub fn confirm_release(&self, location: BlockLocation) {
        let mut pending = self.pending_release.lock().unwrap();
        if let Some(pos) = pending.iter().position(|(l, _)| *l == location) {
            let (location, _block) = pending.remove(pos).unwrap();
            drop(pending);
            self.allocator.release(location);
        }
    }

    pub fn pending_release_count(&self) -> usize {
        self.pending_release.lock().unwrap().len()
    }

    /// Confirm every pending-release block whose location no longer
    /// appears in a just-written snapshot, returning each to the
    /// allocator. Called by the `PeriodicSyncer`'s block-release task
    /// right after a successful `PersistentState::save` (invariant I5).
    pub fn confirm_releases_not_referenced(&self, state: &PersistentState) {
        let referenced: std::collections::HashSet<(u64, u64)> = state
            .blocks
            .iter()
            .map(|b| (b.offset_bytes, b.size_bytes))
            .collect();
        let to_confirm: Vec<BlockLocation> = self
            .pending_release
            .lock()
            .unwrap()
            .iter()
            .map(|(location, _block)| *location)
            .filter(|location| !referenced.contains(&(location.offset_bytes, location.size_bytes)))
            .collect();
        for location in to_confirm {
            self.confirm_release(location);
        }
    }
}

impl BlockReferenceResolver for PersistentBlockList {
    fn block_reference_to_block_index(
        &self,
        reference: BlockReference,
    ) -> Result<(u64, u64), BlockListError> {
        let state = self.state.lock().unwrap();
        if epoch_is_before(reference.epoch_id, state.oldest_epoch_id) {
            return Err(BlockListError::InvalidReference);
        }
        let entries: Vec<&PersistentEntry> = state.entries.iter().collect();
        match epoch_matches(&entries, reference.epoch_id, |e| &e.epochs) {
            Some((index, hash_seed))
                if index as u64 >= self.condemned_count.load(Ordering::SeqCst) =>
            {
                Ok((index as u64, hash_seed))
            }
            _ => Err(BlockListError::InvalidReference),
        }
    }

    fn block_index_to_block_reference(
        &self,
        block_index: u64,
    ) -> Result<(BlockReference, u64), BlockListError> {
        let state = self.state.lock().unwrap();
        let entry = state
            .entries
            .get(block_index as usize)
            .ok_or(BlockListError::IndexOutOfRange(block_index))?;
        let epoch = entry
            .epochs
            .last()
            .cloned()
            .unwrap_or_else(|| state.current_epoch.clone());
        let blocks_from_last = (state.entries.len() as u64 - 1 - block_index) as u16;
        Ok((BlockReference::new(epoch.epoch_id, blocks_from_last), epoch.hash_seed))
    }
}

impl BlockList for PersistentBlockList {
    fn len(&self) -> usize {
        self.state.lock().unwrap().entries.len()
    }

    fn push_back(&self) -> Result<(), BlockListError> {
        let mut state = self.state.lock().unwrap();
        if state.closed_for_writing {
            return Err(BlockListError::Unavailable);
        }
        drop(state);
        let (block, location) = self.allocator.new_block()?;
        let mut state = self.state.lock().unwrap();
        state.entries.push_back(PersistentEntry {
            block,
            location,
            epochs: Vec::new(),
        });
        Ok(())
    }

    fn pop_front(&self) -> Result<(), BlockListError> {
        let mut state = self.state.lock().unwrap();
        let entry = state
            .entries
            .pop_front()
            .ok_or(BlockListError::IndexOutOfRange(0))?;
        if let Some(last) = entry.epochs.last() {
            state.oldest_epoch_id = last.epoch_id.wrapping_add(1);
        }
        self.condemned_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| Some(c.saturating_sub(1)))
            .ok();
        drop(state);
        self.pending_release
            .lock()
            .unwrap()
            .push_back((entry.location, entry.block));
        self.release_wake.signal();
        Ok(())
    }

    fn has_space(&self, block_index: u64, size_bytes: u64) -> Result<bool, BlockListError> {
        let state = self.state.lock().unwrap();
        let entry = state
            .entries
            .get(block_index as usize)
            .ok_or(BlockListError::IndexOutOfRange(block_index))?;
        Ok(entry.block.has_space(size_bytes))
    }

    fn put(&self, block_index: u64, size_bytes: u64) -> Result<BlockWriter, BlockListError> {
        let block = {
            let mut state = self.state.lock().unwrap();
            if state.closed_for_writing {
                return Err(BlockListError::Unavailable);
            }
            let tail_len = state.entries.len();
            let needs_new_epoch = state.synchronizing || state.current_epoch_tail_len != tail_len;
            if needs_new_epoch {
                let epoch_id = state.next_epoch_id;
                state.next_epoch_id = state.next_epoch_id.wrapping_add(1);
                state.current_epoch = EpochSeed {
                    epoch_id,
                    hash_seed: rand::random(),
                };
                state.current_epoch_tail_len = tail_len;
                state.synchronizing = false;
                self.put_wake.signal();
            }
            let current_epoch = state.current_epoch.clone();
            let entry = state
                .entries
                .get_mut(block_index as usize)
                .ok_or(BlockListError::IndexOutOfRange(block_index))?;
            if entry.epochs.last().map(|e| e.epoch_id) != Some(current_epoch.epoch_id) {
                entry.epochs.push(current_epoch);
            }
            entry.block.clone()
        };
        Ok(block.put(size_bytes)?)
    }

    fn get(
        &self,
        block_index: u64,
        offset_bytes: u64,
        size_bytes: u64,
    ) -> Result<Vec<u8>, BlockListError> {
        let block = {
            let state = self.state.lock().unwrap();
            state
                .entries
                .get(block_index as usize)
                .ok_or(BlockListError::IndexOutOfRange(block_index))?
                .block
                .clone()
        };
        Ok(block.read_range(offset_bytes, size_bytes)?)
    }

    fn condemn_up_to(&self, up_to_index: u64) {
        self.condemned_count.fetch_max(up_to_index + 1, Ordering::SeqCst);
    }

    fn condemned_count(&self) -> u64 {
        self.condemned_count.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::allocator::InMemoryBlockAllocator;

    fn alloc(pool_size: usize) -> Arc<dyn BlockAllocator> {
        Arc::new(InMemoryBlockAllocator::new(64, pool_size))
    }

    #[test]
    fn volatile_list_mints_one_epoch_per_block_and_resolves_reference() {
        let list = VolatileBlockList::new(alloc(4));
        list.push_back().unwrap();
        list.push_back().unwrap();
        let (reference, seed) = list.block_index_to_block_reference(1).unwrap();
        let (index, resolved_seed) = list.block_reference_to_block_index(reference).unwrap();
        assert_eq!(index, 1);
        assert_eq!(resolved_seed, seed);
    }

    #[test]
    fn volatile_pop_front_advances_oldest_epoch_and_invalidates_reference() {
        let list = VolatileBlockList::new(alloc(4));
        list.push_back().unwrap();
        list.push_back().unwrap();
        let (old_ref, _) = list.block_index_to_block_reference(0).unwrap();
        list.pop_front().unwrap();
        assert!(matches!(
            list.block_reference_to_block_index(old_ref),
            Err(BlockListError::InvalidReference)
        ));
    }

    #[test]
    fn epoch_is_before_handles_u32_wraparound() {
        assert!(!epoch_is_before(5, 5));
        assert!(epoch_is_before(4, 5));
        assert!(!epoch_is_before(6, 5));
        // oldest_epoch_id has wrapped past u32::MAX; epoch_id near the top of
        // the range is actually older, not newer, on the wrapped number line.
        assert!(epoch_is_before(u32::MAX - 1, 1));
        assert!(!epoch_is_before(1, u32::MAX - 1));
    }

    #[test]
    fn volatile_put_and_get_round_trip_through_block_index() {
        let list = VolatileBlockList::new(alloc(4));
        list.push_back().unwrap();
        let mut w = list.put(0, 5).unwrap();
        w.write_all(b"hello").unwrap();
        let offset = w.finish().unwrap();
        let bytes = list.get(0, offset, 5).unwrap();
        assert_eq!(&bytes, b"hello");
    }

    #[test]
    fn persistent_list_bumps_epoch_after_push_since_creation() {
        let list = PersistentBlockList::new(alloc(4));
        list.push_back().unwrap();
        let mut w = list.put(0, 5).unwrap();
        w.write_all(b"first").unwrap();
        w.finish().unwrap();
        let (ref1, _) = list.block_index_to_block_reference(0).unwrap();

        list.push_back().unwrap();
        let mut w2 = list.put(0, 5).unwrap();
        w2.write_all(b"other").unwrap();
        w2.finish().unwrap();
        let (ref2, _) = list.block_index_to_block_reference(0).unwrap();

        assert_ne!(ref1.epoch_id, ref2.epoch_id);
    }

    #[test]
    fn persistent_list_bumps_epoch_after_sync_starting() {
        let list = PersistentBlockList::new(alloc(4));
        list.push_back().unwrap();
        let mut w = list.put(0, 5).unwrap();
        w.write_all(b"first").unwrap();
        w.finish().unwrap();
        let (ref1, _) = list.block_index_to_block_reference(0).unwrap();

        list.notify_sync_starting(false);
        let mut w2 = list.put(0, 5).unwrap();
        w2.write_all(b"other").unwrap();
        w2.finish().unwrap();
        let (ref2, _) = list.block_index_to_block_reference(0).unwrap();

        assert_ne!(ref1.epoch_id, ref2.epoch_id);
    }

    #[test]
    fn persistent_get_persistent_state_excludes_unsynchronized_epochs() {
        let list = PersistentBlockList::new(alloc(4));
        list.push_back().unwrap();
        let mut w = list.put(0, 5).unwrap();
        w.write_all(b"first").unwrap();
        w.finish().unwrap();

        // Nothing synchronized yet.
        assert!(list.get_persistent_state(42).blocks.is_empty());

        list.notify_sync_starting(false);
        list.notify_sync_completed();
        let snapshot = list.get_persistent_state(42);
        assert_eq!(snapshot.blocks.len(), 1);
    }

    #[test]
    fn persistent_pop_front_defers_allocator_release_until_confirmed() {
        let allocator = alloc(1);
        let list = PersistentBlockList::new(allocator);
        list.push_back().unwrap();
        list.pop_front().unwrap();
        assert_eq!(list.pending_release_count(), 1);
    }

    #[test]
    fn notify_sync_starting_final_closes_list_for_writing() {
        let list = PersistentBlockList::new(alloc(4));
        list.push_back().unwrap();
        list.notify_sync_starting(true);
        assert!(matches!(list.put(0, 5), Err(BlockListError::Unavailable)));
        assert!(matches!(list.push_back(), Err(BlockListError::Unavailable)));
    }

    #[test]
    fn condemned_prefix_is_reported_as_invalid_reference() {
        let list = VolatileBlockList::new(alloc(4));
        list.push_back().unwrap();
        list.push_back().unwrap();
        let (reference, _) = list.block_index_to_block_reference(0).unwrap();
        list.condemn_up_to(0);
        assert!(matches!(
            list.block_reference_to_block_index(reference),
            Err(BlockListError::InvalidReference)
        ));
    }
}
