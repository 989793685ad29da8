//! The block layer: fixed-size storage regions, their allocator, and the
//! ordered list that an `OldCurrentNew` policy treats as old/current/new
//! spans.

pub mod allocator;
pub mod block;
pub mod list;

pub use allocator::{BlockAllocator, BlockLocation, InMemoryBlockAllocator, RawDeviceBlockAllocator};
pub use block::{Block, BlockWriter, MemoryBlock, RawDeviceBlock};
pub use list::{BlockList, BlockReferenceResolver, PersistentBlockList, VolatileBlockList};
