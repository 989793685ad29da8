//! Owns the free pool of block-sized regions on a backing medium.
//!
//! Recycling is LRU-by-release-time: the region that has been free the
//! longest is handed out first, for wear leveling.

use crate::block::block::{Block, MemoryBlock, RawDeviceBlock};
use crate::domain::errors::AllocatorError;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// A location-descriptor identifies a free region in a form suitable for
/// persistence. In-memory allocators use an opaque index; raw-device
/// allocators use (offset_bytes, size_bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockLocation {
    pub offset_bytes: u64,
    pub size_bytes: u64,
}

pub trait BlockAllocator: Send + Sync {
    /// Hand out the least-recently-released region. Fails when the pool is
    /// empty.
    fn new_block(&self) -> Result<(Arc<dyn Block>, BlockLocation), AllocatorError>;

    /// Rematerialize a specific region for crash recovery, resuming its
    /// write cursor at `write_offset_bytes` (rounded up to the next sector
    /// boundary for raw-device allocators).
    fn new_block_at_location(
        &self,
        location: BlockLocation,
        write_offset_bytes: u64,
    ) -> Result<Arc<dyn Block>, AllocatorError>;

    /// Return a region to the free pool (called once the last `Arc<dyn
    /// Block>` clone referencing it is dropped).
    fn release(&self, location: BlockLocation);

    fn block_size_bytes(&self) -> u64;
}

/// Allocates from a fixed pool of equally-sized in-memory regions.
pub struct InMemoryBlockAllocator {
    block_size_bytes: u64,
    free_pool: Mutex<VecDeque<BlockLocation>>,
}

impl InMemoryBlockAllocator {
    /// `pool_size` is the total number of block-sized regions available.
    pub fn new(block_size_bytes: u64, pool_size: usize) -> Self {
        let mut free_pool = VecDeque::with_capacity(pool_size);
        for i in 0..pool_size {
            free_pool.push_back(BlockLocation {
                offset_bytes: i as u64,
                size_bytes: block_size_bytes,
            });
        }
        InMemoryBlockAllocator {
            block_size_bytes,
            free_pool: Mutex::new(free_pool),
        }
    }
}

impl BlockAllocator for InMemoryBlockAllocator {
    fn new_block(&self) -> Result<(Arc<dyn Block>, BlockLocation), AllocatorError> {
        let location = self
            .free_pool
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(AllocatorError::PoolExhausted)?;
        Ok((MemoryBlock::new(self.block_size_bytes), location))
    }

    fn new_block_at_location(
        &self,
        location: BlockLocation,
        write_offset_bytes: u64,
    ) -> Result<Arc<dyn Block>, AllocatorError> {
        {
            let mut pool = self.free_pool.lock().unwrap();
            let before = pool.len();
            pool.retain(|l| *l != location);
            if pool.len() == before {
                return Err(AllocatorError::LocationNotFound);
            }
        }
        Ok(MemoryBlock::resume(location.size_bytes, write_offset_bytes))
    }

    fn release(&self, location: BlockLocation) {
        self.free_pool.lock().unwrap().push_back(location);
    }

    fn block_size_bytes(&self) -> u64 {
        self.block_size_bytes
    }
}

/// Allocates fixed-size regions from a single backing file that stands in
/// for a raw block-device partition: region `i` occupies bytes
/// `[i * block_size, (i + 1) * block_size)`.
pub struct RawDeviceBlockAllocator {
    path: std::path::PathBuf,
    block_size_bytes: u64,
    sector_size_bytes: u64,
    free_pool: Mutex<VecDeque<BlockLocation>>,
}

impl RawDeviceBlockAllocator {
    pub fn new(
        path: impl Into<std::path::PathBuf>,
        block_size_bytes: u64,
        sector_size_bytes: u64,
        region_count: usize,
    ) -> std::io::Result<Self> {
        let path = path.into();
        let file = std::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)?;
        file.set_len(block_size_bytes * region_count as u64)?;

        let mut free_pool = VecDeque::with_capacity(region_count);
        for i in 0..region_count {
            free_pool.push_back(BlockLocation {
                offset_bytes: i as u64 * block_size_bytes,
                size_bytes: block_size_bytes,
            });
        }
        Ok(RawDeviceBlockAllocator {
            path,
            block_size_bytes,
            sector_size_bytes,
            free_pool: Mutex::new(free_pool),
        })
    }

    fn open_file(&self) -> std::io::Result<std::fs::File> {
        std::fs::OpenOptions::new().read(true).write(true).open(&self.path)
    }
}

impl BlockAllocator for RawDeviceBlockAllocator {
    fn new_block(&self) -> Result<(Arc<dyn Block>, BlockLocation), AllocatorError> {
        let location = self
            .free_pool
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(AllocatorError::PoolExhausted)?;
        let file = self
            .open_file()
            .map_err(|e| AllocatorError::Io(e.to_string()))?;
        let block = RawDeviceBlock::new(
            file,
            location.offset_bytes,
            location.size_bytes,
            self.sector_size_bytes,
        );
        Ok((block, location))
    }

    fn new_block_at_location(
        &self,
        location: BlockLocation,
        write_offset_bytes: u64,
    ) -> Result<Arc<dyn Block>, AllocatorError> {
        {
            let mut pool = self.free_pool.lock().unwrap();
            let before = pool.len();
            pool.retain(|l| *l != location);
            if pool.len() == before {
                return Err(AllocatorError::LocationNotFound);
            }
        }
        let file = self
            .open_file()
            .map_err(|e| AllocatorError::Io(e.to_string()))?;
        Ok(RawDeviceBlock::resume(
            file,
            location.offset_bytes,
            location.size_bytes,
            self.sector_size_bytes,
            write_offset_bytes,
        ))
    }

    fn release(&self, location: BlockLocation) {
        self.free_pool.lock().unwrap().push_back(location);
    }

    fn block_size_bytes(&self) -> u64 {
        self.block_size_bytes
    }
}
