//! End-to-end scenarios exercising the engine the way a host process would:
//! through the public `flat_blob_store` API rather than any single layer's
//! internals. These correspond to the literal crash-recovery and
//! closed-for-writing scenarios the storage engine is required to honor.

use flat_blob_store::{
    BlobStream, BlockDeviceLocationRecordArray, BlockList, BlockReferenceResolver, FlatBlobAccess,
    GrowthPolicy, InMemoryBlockAllocator, InMemoryLocationRecordArray, Key, KeyLocationMap,
    Location, LocationRecordArray, OldCurrentNewLocationBlobMap, PersistentBlockList,
    PersistentState, RawDeviceBlockAllocator, VolatileBlockList,
};
use std::sync::Arc;

fn key_for(bytes: &[u8]) -> Key {
    Key::derive(bytes)
}

/// S1: a basic put/get round-trip through the full façade.
#[test]
fn s1_basic_round_trip() {
    let block_size = 4096u64;
    let allocator = Arc::new(InMemoryBlockAllocator::new(block_size, 32));
    let list = VolatileBlockList::new(allocator);
    let blobs = OldCurrentNewLocationBlobMap::new(list, block_size, 2, 4, 4, GrowthPolicy::Immutable);
    let keys = KeyLocationMap::new(InMemoryLocationRecordArray::new(1009), 7, 16, 64);
    let store = FlatBlobAccess::new(keys, blobs);

    let key = key_for(b"hello");
    store.put(key, BlobStream::new(b"Hello".to_vec())).unwrap();
    assert_eq!(store.get(&key).unwrap().as_bytes(), b"Hello");
}

/// S5: records written in an epoch that was never confirmed by a
/// persistent-state write must be treated as absent after a restart, while
/// records from an epoch that *was* confirmed survive.
#[test]
fn s5_crash_recovery_discards_unsynced_epoch_but_keeps_synced_one() {
    let dir = tempfile::tempdir().unwrap();
    let device_path = dir.path().join("blocks.bin");
    let records_path = dir.path().join("records.bin");
    let state_path = dir.path().join("state.bin");

    let block_size = 4096u64;
    let sector_size = 512u64;
    let hash_seed = 0x1122_3344_5566_7788u64;

    let key1 = key_for(b"b1");
    let key2 = key_for(b"b2");
    let key3 = key_for(b"b3");

    // --- First "process": write b1, b2; persist; write b3; crash. ---
    {
        let allocator: Arc<dyn flat_blob_store::BlockAllocator> =
            Arc::new(RawDeviceBlockAllocator::new(&device_path, block_size, sector_size, 4).unwrap());
        let list = Arc::new(PersistentBlockList::new(allocator));
        list.push_back().unwrap();

        let records =
            BlockDeviceLocationRecordArray::new(&records_path, 101, list.clone()).unwrap();
        let keys = KeyLocationMap::new(records, hash_seed, 16, 64);

        write_blob(&list, &keys, 0, key1, b"first-blob");
        write_blob(&list, &keys, 0, key2, b"second-blob");

        // Persist: this is epoch E, now durable.
        list.notify_sync_starting(false);
        list.notify_sync_completed();
        let snapshot = list.get_persistent_state(hash_seed);
        snapshot.save(&state_path).unwrap();

        // A new sync cycle opens (as the syncer's put task would before
        // calling the data-syncer callback), bumping every subsequent write
        // into epoch E+1 — then the process crashes before that epoch is
        // ever confirmed or persisted.
        list.notify_sync_starting(false);
        write_blob(&list, &keys, 0, key3, b"third-blob-lost-in-crash");
        // No notify_sync_completed, no second snapshot.save: simulates a
        // crash right here.
    }

    // --- Restart: reopen the same files, restore from the last snapshot. ---
    let loaded = PersistentState::load(&state_path).unwrap().unwrap();
    assert_eq!(loaded.key_location_map_hash_initialization, hash_seed);

    let allocator2: Arc<dyn flat_blob_store::BlockAllocator> =
        Arc::new(RawDeviceBlockAllocator::new(&device_path, block_size, sector_size, 4).unwrap());
    let list2 = Arc::new(PersistentBlockList::restore(allocator2, &loaded).unwrap());
    let records2 =
        BlockDeviceLocationRecordArray::new(&records_path, 101, list2.clone()).unwrap();
    let keys2 = KeyLocationMap::new(records2, loaded.key_location_map_hash_initialization, 16, 64);

    assert!(keys2.get(&key1).unwrap().is_some(), "b1 was synced before the crash");
    assert!(keys2.get(&key2).unwrap().is_some(), "b2 was synced before the crash");
    assert!(
        keys2.get(&key3).unwrap().is_none(),
        "b3's epoch was never confirmed, so it must be treated as absent"
    );
}

/// Write `bytes` under `key` directly through the block list and
/// key-location map (bypassing the policy layer, since this test wants
/// explicit control over which epoch each write lands in).
fn write_blob<A: LocationRecordArray>(
    list: &Arc<PersistentBlockList>,
    keys: &KeyLocationMap<A>,
    block_index: u64,
    key: Key,
    bytes: &[u8],
) {
    let mut writer = list.put(block_index, bytes.len() as u64).unwrap();
    writer.write_all(bytes).unwrap();
    let offset = writer.finish().unwrap();
    keys.put(key, Location::new(block_index, offset, bytes.len() as u64))
        .unwrap();
}

/// S6: once a final sync has closed the list for writing, every subsequent
/// `PushBack` is rejected, and puts already finalized beforehand remain
/// readable.
#[test]
fn s6_closed_for_writing_rejects_further_pushes() {
    let allocator: Arc<dyn flat_blob_store::BlockAllocator> =
        Arc::new(InMemoryBlockAllocator::new(4096, 8));
    let list = Arc::new(PersistentBlockList::new(allocator));
    list.push_back().unwrap();

    let mut writer = list.put(0, 5).unwrap();
    writer.write_all(b"hello").unwrap();
    let offset = writer.finish().unwrap();

    list.notify_sync_starting(true);

    assert!(matches!(
        list.push_back(),
        Err(flat_blob_store::BlockListError::Unavailable)
    ));
    assert!(matches!(
        list.put(0, 1),
        Err(flat_blob_store::BlockListError::Unavailable)
    ));

    // Data written before the close is still there.
    let bytes = list.get(0, offset, 5).unwrap();
    assert_eq!(&bytes, b"hello");
}

/// Resolving a reference from before the list was closed still works after
/// the close — closing for writes doesn't invalidate existing references.
#[test]
fn s6_closed_list_still_resolves_existing_references() {
    let allocator: Arc<dyn flat_blob_store::BlockAllocator> =
        Arc::new(InMemoryBlockAllocator::new(4096, 8));
    let list = Arc::new(PersistentBlockList::new(allocator));
    list.push_back().unwrap();
    let mut writer = list.put(0, 5).unwrap();
    writer.write_all(b"hello").unwrap();
    writer.finish().unwrap();
    let (reference, _seed) = list.block_index_to_block_reference(0).unwrap();

    list.notify_sync_starting(true);

    let (index, _seed) = list.block_reference_to_block_index(reference).unwrap();
    assert_eq!(index, 0);
}
