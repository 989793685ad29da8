//! The open-addressed, Robin-Hood-flavored key→location hash table.

use crate::domain::errors::RecordArrayError;
use crate::domain::key::{slot_hash, Key, Location, LocationRecord, RecordKey};
use crate::index::record_array::LocationRecordArray;
use std::sync::atomic::{AtomicU64, Ordering};

/// Plain counters for table-overflow observability.
#[derive(Debug, Default)]
pub struct KeyLocationMapStats {
    pub get_overflow_total: AtomicU64,
    pub put_dropped_total: AtomicU64,
}

pub struct KeyLocationMap<A: LocationRecordArray> {
    array: A,
    slot_count: u64,
    hash_seed: u64,
    max_get_attempts: u32,
    max_put_attempts: u32,
    stats: KeyLocationMapStats,
}

impl<A: LocationRecordArray> KeyLocationMap<A> {
    pub fn new(
        array: A,
        hash_seed: u64,
        max_get_attempts: u32,
        max_put_attempts: u32,
    ) -> Self {
        let slot_count = array.slot_count();
        KeyLocationMap {
            array,
            slot_count,
            hash_seed,
            max_get_attempts,
            max_put_attempts,
            stats: KeyLocationMapStats::default(),
        }
    }

    pub fn stats(&self) -> &KeyLocationMapStats {
        &self.stats
    }

    /// The seed this table hashes with, i.e. the value a host process
    /// should carry forward as `PersistentState::key_location_map_hash_initialization`
    /// on the next snapshot so a restart reconstructs the same slot
    /// assignments.
    pub fn hash_seed(&self) -> u64 {
        self.hash_seed
    }

    fn slot_for(&self, key: &Key, attempt: u32) -> u64 {
        slot_hash(self.hash_seed, key, attempt) % self.slot_count
    }

    /// Returns `Ok(None)` for "not found" (the common case) rather than a
    /// `RecordArrayError`, since a missing key is not an error here;
    /// genuine I/O errors still propagate.
    pub fn get(&self, key: &Key) -> Result<Option<Location>, RecordArrayError> {
        let mut attempt = 0u32;
        loop {
            let slot = self.slot_for(key, attempt);
            let record = match self.array.get(slot) {
                Ok(record) => record,
                Err(RecordArrayError::RecordInvalid) => return Ok(None),
                Err(other) => return Err(other),
            };
            if record.record_key == (RecordKey { key: *key, attempt }) {
                return Ok(Some(record.location));
            }
            attempt += 1;
            if attempt >= self.max_get_attempts {
                self.stats.get_overflow_total.fetch_add(1, Ordering::Relaxed);
                return Ok(None);
            }
        }
    }

    /// Insert via Robin-Hood displacement. A later write for the same key
    /// supersedes an earlier one; collisions push older records outward so
    /// the oldest records sit at the probe fringe. Bounded iteration
    /// guarantees forward progress; on exhaustion the insert is silently
    /// dropped (counted in stats), matching the source's overflow policy.
    pub fn put(&self, key: Key, location: Location) -> Result<(), RecordArrayError> {
        let mut record = LocationRecord::new(key, 0, location);
        for _ in 0..self.max_put_attempts {
            let slot = self.slot_for(&record.record_key.key, record.record_key.attempt);
            let existing = self.array.get(slot);
            match existing {
                Err(RecordArrayError::RecordInvalid) => {
                    self.array.put(slot, record)?;
                    return Ok(());
                }
                Err(other) => return Err(other),
                Ok(existing) => {
                    if existing.record_key.key == record.record_key.key {
                        if existing.location.is_older_than(&record.location) {
                            self.array.put(slot, record)?;
                        }
                        return Ok(());
                    }
                    if existing.location.is_older_than(&record.location) {
                        self.array.put(slot, record)?;
                        record = existing;
                    }
                    record.record_key.attempt += 1;
                }
            }
        }
        self.stats.put_dropped_total.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::record_array::InMemoryLocationRecordArray;

    fn map(slots: u64) -> KeyLocationMap<InMemoryLocationRecordArray> {
        KeyLocationMap::new(InMemoryLocationRecordArray::new(slots), 42, 16, 64)
    }

    #[test]
    fn hash_seed_exposes_the_construction_time_seed() {
        let m = map(101);
        assert_eq!(m.hash_seed(), 42);
    }

    #[test]
    fn put_then_get_round_trips() {
        let m = map(101);
        let key = Key::from_bytes([1u8; 32]);
        let location = Location::new(0, 10, 20);
        m.put(key, location).unwrap();
        assert_eq!(m.get(&key).unwrap(), Some(location));
    }

    #[test]
    fn get_of_absent_key_is_not_found() {
        let m = map(101);
        let key = Key::from_bytes([2u8; 32]);
        assert_eq!(m.get(&key).unwrap(), None);
    }

    #[test]
    fn later_put_supersedes_earlier_for_same_key() {
        let m = map(101);
        let key = Key::from_bytes([3u8; 32]);
        m.put(key, Location::new(0, 0, 10)).unwrap();
        m.put(key, Location::new(1, 0, 10)).unwrap();
        assert_eq!(m.get(&key).unwrap(), Some(Location::new(1, 0, 10)));
    }

    #[test]
    fn older_put_for_same_key_does_not_regress_location() {
        let m = map(101);
        let key = Key::from_bytes([4u8; 32]);
        m.put(key, Location::new(5, 0, 10)).unwrap();
        m.put(key, Location::new(1, 0, 10)).unwrap();
        assert_eq!(m.get(&key).unwrap(), Some(Location::new(5, 0, 10)));
    }

    #[test]
    fn colliding_keys_both_remain_findable() {
        // A tiny table forces collisions across many keys; every key
        // inserted must still be reachable within max_get_attempts.
        let m = map(17);
        let mut keys = Vec::new();
        for i in 0..10u8 {
            let key = Key::from_bytes([i; 32]);
            let location = Location::new(i as u64, 0, 10);
            m.put(key, location).unwrap();
            keys.push((key, location));
        }
        for (key, location) in keys {
            assert_eq!(m.get(&key).unwrap(), Some(location));
        }
    }
}
