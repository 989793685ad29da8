//! The placement policy: partitions the `BlockList` into old/current/new
//! spans, decides which "new" block a blob lands in, rotates spans as the
//! new span fills, and contains data-integrity failures by condemning and
//! draining a prefix of blocks.

use crate::block::list::{BlockList, BlockReferenceResolver};
use crate::block::BlockWriter;
use crate::domain::config::GrowthPolicy;
use crate::domain::errors::BlockListError;
use crate::domain::key::{BlockReference, Location};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// The result of resolving a read location: whether the caller should
/// refresh the blob into a fresh block while it has the data in hand.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedLocation {
    pub location: Location,
    pub needs_refresh: bool,
}

/// Plain atomic counters exposed for observability, mirroring the
/// teacher's hand-rolled metrics structs rather than pulling in a metrics
/// facade.
#[derive(Debug, Default)]
pub struct Stats {
    pub condemned_blocks_total: AtomicU64,
    pub refreshes_total: AtomicU64,
}

impl Stats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            condemned_blocks_total: self.condemned_blocks_total.load(Ordering::Relaxed),
            refreshes_total: self.refreshes_total.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StatsSnapshot {
    pub condemned_blocks_total: u64,
    pub refreshes_total: u64,
}

struct Spans {
    old_count: usize,
    current_count: usize,
    new_count: usize,
}

/// Tracks which "new"-span block is currently receiving writes and how
/// many more blobs it will accept before the placement cursor advances.
///
/// The k-th "new" block (0 = newest, i.e. the tail) accepts up to
/// `2^(N-1-k)` consecutive blobs; during warm-up (extra "new" blocks exist
/// purely to seed "current") each extra block instead accepts a uniform
/// `2^N` attempts.
struct PlacementCursor {
    /// Index into the "new" span, 0 = newest/tail.
    span_offset: usize,
    remaining: u64,
}

impl PlacementCursor {
    fn budget_for(span_offset: usize, new_span_len: usize, warmup: bool) -> u64 {
        if warmup {
            1u64 << new_span_len.min(62)
        } else {
            let k = span_offset.min(new_span_len.saturating_sub(1));
            let exp = new_span_len.saturating_sub(1).saturating_sub(k);
            1u64 << exp.min(62)
        }
    }

    fn fresh(new_span_len: usize, warmup: bool) -> Self {
        PlacementCursor {
            span_offset: 0,
            remaining: Self::budget_for(0, new_span_len, warmup),
        }
    }

    /// Consume one placement slot, advancing cyclically across the "new"
    /// span once the current block's budget is exhausted.
    fn advance(&mut self, new_span_len: usize, warmup: bool) {
        if self.remaining > 1 {
            self.remaining -= 1;
            return;
        }
        self.span_offset = (self.span_offset + 1) % new_span_len.max(1);
        self.remaining = Self::budget_for(self.span_offset, new_span_len, warmup);
    }
}

struct PolicyState {
    spans: Spans,
    cursor: PlacementCursor,
}

/// Binds blob placement, span rotation, refresh detection and
/// data-corruption containment over a [`BlockList`].
pub struct OldCurrentNewLocationBlobMap<L: BlockList> {
    block_list: L,
    block_size_bytes: u64,
    desired_old_count: usize,
    desired_current_count: usize,
    desired_new_count: usize,
    growth_policy: GrowthPolicy,
    state: Mutex<PolicyState>,
    stats: Stats,
}

impl<L: BlockList> OldCurrentNewLocationBlobMap<L> {
    pub fn new(
        block_list: L,
        block_size_bytes: u64,
        desired_old_count: usize,
        desired_current_count: usize,
        desired_new_count: usize,
        growth_policy: GrowthPolicy,
    ) -> Self {
        let warmup = block_list.len() < desired_current_count + desired_new_count;
        let new_span_len = desired_new_count.max(1);
        OldCurrentNewLocationBlobMap {
            block_list,
            block_size_bytes,
            desired_old_count,
            desired_current_count,
            desired_new_count,
            growth_policy,
            state: Mutex::new(PolicyState {
                spans: Spans {
                    old_count: 0,
                    current_count: 0,
                    new_count: 0,
                },
                cursor: PlacementCursor::fresh(new_span_len, warmup),
            }),
            stats: Stats::default(),
        }
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn block_list(&self) -> &L {
        &self.block_list
    }

    fn warmup(&self, spans: &Spans) -> bool {
        spans.current_count + spans.new_count < self.desired_current_count + self.desired_new_count
    }

    /// Grow the "new" span (and, under the mutable policy, "current") to
    /// the configured desired counts.
    fn grow_spans(&self, state: &mut PolicyState) -> Result<(), BlockListError> {
        loop {
            let grow_new = self.growth_policy.should_grow_new(
                state.spans.current_count,
                state.spans.new_count,
                self.desired_current_count,
                self.desired_new_count,
            );
            let grow_current = self
                .growth_policy
                .should_grow_current(state.spans.current_count, self.desired_current_count);
            if !grow_new && !grow_current {
                break;
            }
            self.block_list.push_back()?;
            if grow_new {
                state.spans.new_count += 1;
            } else {
                state.spans.current_count += 1;
            }
        }
        Ok(())
    }

    /// Promote new[0] to current, current[0] to old, pop old[0] (or just
    /// PopFront directly if the old span is already at its desired size).
    fn rotate_once(&self, state: &mut PolicyState) -> Result<(), BlockListError> {
        if state.spans.new_count > 0 {
            state.spans.new_count -= 1;
            state.spans.current_count += 1;
        }
        if state.spans.current_count > self.desired_current_count || self.desired_current_count == 0
        {
            if state.spans.current_count > 0 {
                state.spans.current_count -= 1;
                state.spans.old_count += 1;
            }
        }
        if state.spans.old_count > self.desired_old_count {
            self.block_list.pop_front()?;
            state.spans.old_count -= 1;
        }
        tracing::debug!(
            old = state.spans.old_count,
            current = state.spans.current_count,
            new = state.spans.new_count,
            "rotated block spans"
        );
        Ok(())
    }

    /// Drain any blocks condemned by a prior integrity failure. Each
    /// `pop_front` also decrements the list's condemned-count itself, so
    /// this loop only needs to keep the span bookkeeping in step.
    fn drain_condemned(&self, state: &mut PolicyState) -> Result<(), BlockListError> {
        while self.block_list.condemned_count() > 0 {
            self.block_list.pop_front()?;
            if state.spans.old_count > 0 {
                state.spans.old_count -= 1;
            } else if state.spans.current_count > 0 {
                state.spans.current_count -= 1;
            } else if state.spans.new_count > 0 {
                state.spans.new_count -= 1;
            }
        }
        Ok(())
    }

    /// Record a data-integrity failure observed while reading `block_index`:
    /// condemn it and every older block. Safe to call without the write
    /// lock (it only raises a monotonic high-water mark).
    pub fn record_integrity_failure(&self, block_index: u64) {
        let before = self.block_list.condemned_count();
        self.block_list.condemn_up_to(block_index);
        let after = self.block_list.condemned_count();
        if after > before {
            self.stats
                .condemned_blocks_total
                .fetch_add(after - before, Ordering::Relaxed);
            tracing::error!(
                n = after - before,
                "releasing {} blocks due to a data integrity error",
                after - before
            );
        }
    }

    /// Place a new blob of `size_bytes`, returning a writer and the
    /// `BlockReference` that should be embedded in its persisted record.
    /// Must be called under the façade's write lock.
    pub fn put(
        &self,
        size_bytes: u64,
    ) -> Result<(BlockWriter, BlockReference, u64), BlockListError> {
        if size_bytes > self.block_size_bytes {
            return Err(BlockListError::BlobTooLarge {
                size_bytes,
                capacity_bytes: self.block_size_bytes,
            });
        }
        let mut state = self.state.lock().unwrap();
        self.drain_condemned(&mut state)?;
        self.grow_spans(&mut state)?;

        loop {
            let new_span_len = state.spans.new_count.max(1);
            let tail_len = self.block_list.len();
            let target_index = tail_len
                .checked_sub(1 + state.cursor.span_offset.min(new_span_len - 1))
                .ok_or(BlockListError::IndexOutOfRange(0))?;
            if self
                .block_list
                .has_space(target_index as u64, size_bytes)?
            {
                let writer = self.block_list.put(target_index as u64, size_bytes)?;
                let (reference, hash_seed) = self
                    .block_list
                    .block_index_to_block_reference(target_index as u64)?;
                let warmup = self.warmup(&state.spans);
                state.cursor.advance(new_span_len, warmup);
                return Ok((writer, reference, hash_seed));
            }
            self.rotate_once(&mut state)?;
            // Rotation promotes new[0] out of the "new" span without
            // replacing it; re-grow so the span always has a fresh, empty
            // tail block to place into before the next attempt.
            self.grow_spans(&mut state)?;
            let warmup = self.warmup(&state.spans);
            let new_span_len = state.spans.new_count.max(1);
            state.cursor = PlacementCursor::fresh(new_span_len, warmup);
        }
    }

    /// Resolve a stored `Location` for a read, reporting whether the
    /// caller should refresh the blob into a fresh block.
    pub fn resolve_for_read(&self, location: Location) -> ResolvedLocation {
        let state = self.state.lock().unwrap();
        let needs_refresh = (location.block_index as usize) < state.spans.old_count;
        if needs_refresh {
            self.stats.refreshes_total.fetch_add(1, Ordering::Relaxed);
        }
        ResolvedLocation {
            location,
            needs_refresh,
        }
    }

    pub fn old_count(&self) -> usize {
        self.state.lock().unwrap().spans.old_count
    }

    pub fn current_count(&self) -> usize {
        self.state.lock().unwrap().spans.current_count
    }

    pub fn new_count(&self) -> usize {
        self.state.lock().unwrap().spans.new_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::allocator::InMemoryBlockAllocator;
    use crate::block::list::VolatileBlockList;
    use std::sync::Arc;

    fn map(block_size: u64, o: usize, c: usize, n: usize) -> OldCurrentNewLocationBlobMap<VolatileBlockList> {
        let allocator = Arc::new(InMemoryBlockAllocator::new(block_size, (o + c + n) * 4));
        let list = VolatileBlockList::new(allocator);
        OldCurrentNewLocationBlobMap::new(list, block_size, o, c, n, GrowthPolicy::Immutable)
    }

    #[test]
    fn put_grows_new_span_to_desired_count() {
        let m = map(64, 1, 1, 2);
        let (_w, _reference, _seed) = m.put(8).unwrap();
        assert_eq!(m.new_count() + m.current_count(), 2);
    }

    #[test]
    fn basic_put_and_get_round_trip() {
        let m = map(1024, 2, 4, 4);
        let (mut w, reference, _seed) = m.put(5).unwrap();
        w.write_all(b"Hello").unwrap();
        let offset = w.finish().unwrap();
        let (index, _seed2) = m
            .block_list()
            .block_reference_to_block_index(reference)
            .unwrap();
        let bytes = m.block_list().get(index, offset, 5).unwrap();
        assert_eq!(&bytes, b"Hello");
    }

    #[test]
    fn old_span_location_needs_refresh() {
        let m = map(32, 1, 1, 1);
        // Force enough rotations that a block ends up in "old".
        for _ in 0..6 {
            let (mut w, _reference, _seed) = m.put(16).unwrap();
            w.write_all(&[0u8; 16]).unwrap();
            w.finish().unwrap();
        }
        let stale = Location::new(0, 0, 16);
        let resolved = m.resolve_for_read(stale);
        assert!(resolved.needs_refresh);
    }

    #[test]
    fn record_integrity_failure_condemns_prefix() {
        let m = map(64, 1, 1, 2);
        m.put(8).unwrap();
        m.record_integrity_failure(0);
        assert_eq!(m.block_list().condemned_count(), 1);
        assert_eq!(m.stats().snapshot().condemned_blocks_total, 1);
    }

    #[test]
    fn rejects_blob_larger_than_block_capacity() {
        let m = map(16, 1, 1, 1);
        assert!(m.put(17).is_err());
    }

    #[test]
    fn placement_cursor_halves_budget_moving_toward_tail() {
        assert_eq!(PlacementCursor::budget_for(0, 4, false), 8);
        assert_eq!(PlacementCursor::budget_for(1, 4, false), 4);
        assert_eq!(PlacementCursor::budget_for(2, 4, false), 2);
        assert_eq!(PlacementCursor::budget_for(3, 4, false), 1);
    }
}
