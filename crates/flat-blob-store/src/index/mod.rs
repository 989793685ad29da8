//! The key→location index: an open-addressed hash table over a pluggable
//! record array backing.

pub mod key_location_map;
pub mod record_array;

pub use key_location_map::{KeyLocationMap, KeyLocationMapStats};
pub use record_array::{
    BlockDeviceLocationRecordArray, FileBackedLocationRecordArray, InMemoryLocationRecordArray,
    LocationRecordArray,
};
