//! Storage for the hash table's slots: in-memory, file-backed (legacy),
//! and block-device-backed with per-record checksums.

use crate::block::list::BlockReferenceResolver;
use crate::domain::errors::RecordArrayError;
use crate::domain::key::{record_checksum, BlockReference, Key, Location, LocationRecord, RecordKey};
use std::sync::{Arc, Mutex, RwLock};

pub trait LocationRecordArray: Send + Sync {
    fn get(&self, slot: u64) -> Result<LocationRecord, RecordArrayError>;
    fn put(&self, slot: u64, record: LocationRecord) -> Result<(), RecordArrayError>;
    fn slot_count(&self) -> u64;
}

/// Records live purely in process memory; never invalid except by bounds.
pub struct InMemoryLocationRecordArray {
    slots: RwLock<Vec<Option<LocationRecord>>>,
}

impl InMemoryLocationRecordArray {
    pub fn new(slot_count: u64) -> Self {
        InMemoryLocationRecordArray {
            slots: RwLock::new(vec![None; slot_count as usize]),
        }
    }
}

impl LocationRecordArray for InMemoryLocationRecordArray {
    fn get(&self, slot: u64) -> Result<LocationRecord, RecordArrayError> {
        let slots = self.slots.read().unwrap();
        let entry = slots
            .get(slot as usize)
            .ok_or(RecordArrayError::IndexOutOfRange(slot))?;
        entry.ok_or(RecordArrayError::RecordInvalid)
    }

    fn put(&self, slot: u64, record: LocationRecord) -> Result<(), RecordArrayError> {
        let mut slots = self.slots.write().unwrap();
        let entry = slots
            .get_mut(slot as usize)
            .ok_or(RecordArrayError::IndexOutOfRange(slot))?;
        *entry = Some(record);
        Ok(())
    }

    fn slot_count(&self) -> u64 {
        self.slots.read().unwrap().len() as u64
    }
}

const LEGACY_STRIDE_BYTES: u64 = 1 + 32 + 4 + 8 + 8 + 8;

/// Positional I/O into a plain file, no resolver or checksum involved — the
/// simple predecessor of the block-device-backed variant. A leading
/// validity byte distinguishes a written record from a never-written slot.
pub struct FileBackedLocationRecordArray {
    file: Mutex<std::fs::File>,
    slot_count: u64,
}

impl FileBackedLocationRecordArray {
    pub fn new(path: impl AsRef<std::path::Path>, slot_count: u64) -> std::io::Result<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;
        file.set_len(slot_count * LEGACY_STRIDE_BYTES)?;
        Ok(FileBackedLocationRecordArray {
            file: Mutex::new(file),
            slot_count,
        })
    }

    fn pwrite(&self, offset: u64, bytes: &[u8]) -> std::io::Result<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            self.file.lock().unwrap().write_all_at(bytes, offset)
        }
        #[cfg(not(unix))]
        {
            use std::io::{Seek, SeekFrom, Write};
            let mut file = self.file.lock().unwrap();
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(bytes)
        }
    }

    fn pread(&self, offset: u64, len: usize) -> std::io::Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            self.file.lock().unwrap().read_exact_at(&mut buf, offset)?;
        }
        #[cfg(not(unix))]
        {
            use std::io::{Read, Seek, SeekFrom};
            let mut file = self.file.lock().unwrap();
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut buf)?;
        }
        Ok(buf)
    }
}

impl LocationRecordArray for FileBackedLocationRecordArray {
    fn get(&self, slot: u64) -> Result<LocationRecord, RecordArrayError> {
        if slot >= self.slot_count {
            return Err(RecordArrayError::IndexOutOfRange(slot));
        }
        let bytes = self
            .pread(slot * LEGACY_STRIDE_BYTES, LEGACY_STRIDE_BYTES as usize)
            .map_err(|e| RecordArrayError::Io(e.to_string()))?;
        if bytes[0] == 0 {
            return Err(RecordArrayError::RecordInvalid);
        }
        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes[1..33]);
        let attempt = u32::from_le_bytes(bytes[33..37].try_into().unwrap());
        let block_index = u64::from_le_bytes(bytes[37..45].try_into().unwrap());
        let offset_bytes = u64::from_le_bytes(bytes[45..53].try_into().unwrap());
        let size_bytes = u64::from_le_bytes(bytes[53..61].try_into().unwrap());
        Ok(LocationRecord {
            record_key: RecordKey {
                key: Key::from_bytes(key),
                attempt,
            },
            location: Location::new(block_index, offset_bytes, size_bytes),
        })
    }

    fn put(&self, slot: u64, record: LocationRecord) -> Result<(), RecordArrayError> {
        if slot >= self.slot_count {
            return Err(RecordArrayError::IndexOutOfRange(slot));
        }
        let mut buf = Vec::with_capacity(LEGACY_STRIDE_BYTES as usize);
        buf.push(1u8);
        buf.extend_from_slice(record.record_key.key.as_bytes());
        buf.extend_from_slice(&record.record_key.attempt.to_le_bytes());
        buf.extend_from_slice(&record.location.block_index.to_le_bytes());
        buf.extend_from_slice(&record.location.offset_bytes.to_le_bytes());
        buf.extend_from_slice(&record.location.size_bytes.to_le_bytes());
        self.pwrite(slot * LEGACY_STRIDE_BYTES, &buf)
            .map_err(|e| RecordArrayError::Io(e.to_string()))
    }

    fn slot_count(&self) -> u64 {
        self.slot_count
    }
}

const RECORD_STRIDE_BYTES: u64 = 66;
const CHECKSUMMED_REGION_END: usize = 6 + 32 + 4 + 8 + 8; // 58

/// Positional I/O at fixed stride into a raw-device region, with an
/// epoch-seeded FNV-1a checksum over every record, checked against the
/// resolver on read and embedded on write.
pub struct BlockDeviceLocationRecordArray {
    file: Mutex<std::fs::File>,
    resolver: Arc<dyn BlockReferenceResolver + Send + Sync>,
    slot_count: u64,
}

impl BlockDeviceLocationRecordArray {
    pub fn new(
        path: impl AsRef<std::path::Path>,
        slot_count: u64,
        resolver: Arc<dyn BlockReferenceResolver + Send + Sync>,
    ) -> std::io::Result<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;
        file.set_len(slot_count * RECORD_STRIDE_BYTES)?;
        Ok(BlockDeviceLocationRecordArray {
            file: Mutex::new(file),
            resolver,
            slot_count,
        })
    }

    fn pwrite(&self, offset: u64, bytes: &[u8]) -> std::io::Result<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            self.file.lock().unwrap().write_all_at(bytes, offset)
        }
        #[cfg(not(unix))]
        {
            use std::io::{Seek, SeekFrom, Write};
            let mut file = self.file.lock().unwrap();
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(bytes)
        }
    }

    fn pread(&self, offset: u64, len: usize) -> std::io::Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            self.file.lock().unwrap().read_exact_at(&mut buf, offset)?;
        }
        #[cfg(not(unix))]
        {
            use std::io::{Read, Seek, SeekFrom};
            let mut file = self.file.lock().unwrap();
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut buf)?;
        }
        Ok(buf)
    }
}

impl LocationRecordArray for BlockDeviceLocationRecordArray {
    fn get(&self, slot: u64) -> Result<LocationRecord, RecordArrayError> {
        if slot >= self.slot_count {
            return Err(RecordArrayError::IndexOutOfRange(slot));
        }
        let bytes = self
            .pread(slot * RECORD_STRIDE_BYTES, RECORD_STRIDE_BYTES as usize)
            .map_err(|e| RecordArrayError::Io(e.to_string()))?;

        let epoch_id = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let blocks_from_last = u16::from_le_bytes(bytes[4..6].try_into().unwrap());
        let mut key_bytes = [0u8; 32];
        key_bytes.copy_from_slice(&bytes[6..38]);
        let attempt = u32::from_le_bytes(bytes[38..42].try_into().unwrap());
        let offset_bytes = u64::from_le_bytes(bytes[42..50].try_into().unwrap());
        let size_bytes = u64::from_le_bytes(bytes[50..58].try_into().unwrap());
        let stored_checksum = u64::from_le_bytes(bytes[58..66].try_into().unwrap());

        let reference = BlockReference::new(epoch_id, blocks_from_last);
        let (block_index, hash_seed) = self
            .resolver
            .block_reference_to_block_index(reference)
            .map_err(|_| RecordArrayError::RecordInvalid)?;

        let checksum = record_checksum(hash_seed, &bytes[6..CHECKSUMMED_REGION_END]);
        if checksum != stored_checksum {
            return Err(RecordArrayError::RecordInvalid);
        }

        Ok(LocationRecord {
            record_key: RecordKey {
                key: Key::from_bytes(key_bytes),
                attempt,
            },
            location: Location::new(block_index, offset_bytes, size_bytes),
        })
    }

    fn put(&self, slot: u64, record: LocationRecord) -> Result<(), RecordArrayError> {
        if slot >= self.slot_count {
            return Err(RecordArrayError::IndexOutOfRange(slot));
        }
        let (reference, hash_seed) = self
            .resolver
            .block_index_to_block_reference(record.location.block_index)
            .map_err(|e| RecordArrayError::Serialization(e.to_string()))?;

        let mut buf = Vec::with_capacity(RECORD_STRIDE_BYTES as usize);
        buf.extend_from_slice(&reference.epoch_id.to_le_bytes());
        buf.extend_from_slice(&reference.blocks_from_last.to_le_bytes());
        buf.extend_from_slice(record.record_key.key.as_bytes());
        buf.extend_from_slice(&record.record_key.attempt.to_le_bytes());
        buf.extend_from_slice(&record.location.offset_bytes.to_le_bytes());
        buf.extend_from_slice(&record.location.size_bytes.to_le_bytes());
        let checksum = record_checksum(hash_seed, &buf[6..CHECKSUMMED_REGION_END]);
        buf.extend_from_slice(&checksum.to_le_bytes());
        debug_assert_eq!(buf.len(), RECORD_STRIDE_BYTES as usize);

        self.pwrite(slot * RECORD_STRIDE_BYTES, &buf)
            .map_err(|e| RecordArrayError::Io(e.to_string()))
    }

    fn slot_count(&self) -> u64 {
        self.slot_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::allocator::InMemoryBlockAllocator;
    use crate::block::list::VolatileBlockList;

    #[test]
    fn in_memory_array_reports_invalid_for_unwritten_slot() {
        let array = InMemoryLocationRecordArray::new(8);
        assert!(matches!(array.get(0), Err(RecordArrayError::RecordInvalid)));
    }

    #[test]
    fn in_memory_array_round_trips_a_record() {
        let array = InMemoryLocationRecordArray::new(8);
        let record = LocationRecord::new(Key::from_bytes([1u8; 32]), 0, Location::new(0, 0, 16));
        array.put(3, record).unwrap();
        assert_eq!(array.get(3).unwrap(), record);
    }

    #[test]
    fn file_backed_array_reports_invalid_for_unwritten_slot() {
        let dir = tempfile::tempdir().unwrap();
        let array = FileBackedLocationRecordArray::new(dir.path().join("records"), 8).unwrap();
        assert!(matches!(array.get(2), Err(RecordArrayError::RecordInvalid)));
    }

    #[test]
    fn file_backed_array_round_trips_a_record() {
        let dir = tempfile::tempdir().unwrap();
        let array = FileBackedLocationRecordArray::new(dir.path().join("records"), 8).unwrap();
        let record = LocationRecord::new(Key::from_bytes([9u8; 32]), 2, Location::new(4, 10, 20));
        array.put(5, record).unwrap();
        assert_eq!(array.get(5).unwrap(), record);
    }

    #[test]
    fn block_device_array_round_trips_with_valid_checksum() {
        let allocator = Arc::new(InMemoryBlockAllocator::new(64, 4));
        let list = Arc::new(VolatileBlockList::new(allocator));
        list.push_back().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let array =
            BlockDeviceLocationRecordArray::new(dir.path().join("records"), 8, list.clone())
                .unwrap();
        let record = LocationRecord::new(Key::from_bytes([3u8; 32]), 0, Location::new(0, 0, 16));
        array.put(1, record).unwrap();
        assert_eq!(array.get(1).unwrap(), record);
    }

    #[test]
    fn block_device_array_rejects_tampered_checksum() {
        let allocator = Arc::new(InMemoryBlockAllocator::new(64, 4));
        let list = Arc::new(VolatileBlockList::new(allocator));
        list.push_back().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let array =
            BlockDeviceLocationRecordArray::new(dir.path().join("records"), 8, list.clone())
                .unwrap();
        let record = LocationRecord::new(Key::from_bytes([3u8; 32]), 0, Location::new(0, 0, 16));
        array.put(1, record).unwrap();

        // Flip a byte inside the checksummed region.
        let bytes = array.pread(RECORD_STRIDE_BYTES, RECORD_STRIDE_BYTES as usize).unwrap();
        let mut tampered = bytes.clone();
        tampered[10] ^= 0xff;
        array.pwrite(RECORD_STRIDE_BYTES, &tampered).unwrap();

        assert!(matches!(array.get(1), Err(RecordArrayError::RecordInvalid)));
    }

    #[test]
    fn block_device_array_rejects_reference_evicted_from_epoch_window() {
        let allocator = Arc::new(InMemoryBlockAllocator::new(64, 4));
        let list = Arc::new(VolatileBlockList::new(allocator));
        list.push_back().unwrap();
        list.push_back().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let array =
            BlockDeviceLocationRecordArray::new(dir.path().join("records"), 8, list.clone())
                .unwrap();
        let record = LocationRecord::new(Key::from_bytes([3u8; 32]), 0, Location::new(0, 0, 16));
        array.put(1, record).unwrap();

        list.pop_front().unwrap(); // evicts epoch 0
        assert!(matches!(array.get(1), Err(RecordArrayError::RecordInvalid)));
    }
}
