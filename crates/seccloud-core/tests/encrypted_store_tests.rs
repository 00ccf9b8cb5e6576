//! End-to-end tests of the encrypting decorator over real stores.
//!
//! These run the decorator against the local-directory store and the JSON key
//! repository, i.e. the same stack the CLI uses.

use std::fs;
use std::io::Cursor;
use std::sync::Arc;

use seccloud_core::testing::{
    CHUNK_SIZE, MemoryCloudStore, all_byte_values, assert_bytes_equal, chunk_minus_one,
    chunk_plus_one, multi_chunk_content, patterned_chunks,
};
use seccloud_core::{
    CloudStore, CloudStoreRegistry, DeleteTask, EncryptingCloudStore, JsonKeyRepository,
    KeyRepository, KeyRetention, LocalDirCloudStore, MemoryKeyRepository, PoolConfig,
    SliceMetadata, StoreError, WorkerPool, delete_slices,
};
use tempfile::TempDir;

fn local_stack(dir: &TempDir) -> (Arc<LocalDirCloudStore>, EncryptingCloudStore) {
    let remote = Arc::new(LocalDirCloudStore::open(dir.path().join("blobs")).unwrap());
    let keys = Arc::new(JsonKeyRepository::open(dir.path().join("keys.json")).unwrap());
    let store = EncryptingCloudStore::new(remote.clone(), keys);
    (remote, store)
}

fn upload(store: &dyn CloudStore, id: &str, data: &[u8]) -> u64 {
    store
        .upload(id, &mut Cursor::new(data.to_vec()), data.len() as u64)
        .unwrap()
}

fn download(store: &dyn CloudStore, id: &str) -> Result<Vec<u8>, StoreError> {
    let mut out = Vec::new();
    store.download(id, &mut out)?;
    Ok(out)
}

// =============================================================================
// Round trips at chunk boundaries
// =============================================================================

#[test]
fn test_round_trip_chunk_boundaries() {
    let dir = TempDir::new().unwrap();
    let (_, store) = local_stack(&dir);

    let cases: Vec<(&str, Vec<u8>)> = vec![
        ("empty", Vec::new()),
        ("bytes", all_byte_values()),
        ("minus-one", chunk_minus_one()),
        ("plus-one", chunk_plus_one()),
        ("three", multi_chunk_content(3)),
        ("patterned", patterned_chunks(4)),
    ];

    for (id, data) in &cases {
        upload(&store, id, data);
    }
    for (id, data) in &cases {
        assert_bytes_equal(&download(&store, id).unwrap(), data, id);
    }
}

#[test]
fn test_blob_on_disk_is_not_plaintext() {
    let dir = TempDir::new().unwrap();
    let (remote, store) = local_stack(&dir);
    let data = patterned_chunks(2);

    upload(&store, "doc", &data);

    let mut raw = Vec::new();
    remote.download("doc", &mut raw).unwrap();
    assert!(raw.len() > data.len());
    assert!(
        !raw.windows(64).any(|w| w.iter().all(|&b| b == 0)),
        "zero-filled chunk leaked to the remote store"
    );
}

#[test]
fn test_keys_survive_restart() {
    let dir = TempDir::new().unwrap();
    let data = vec![0xC3u8; CHUNK_SIZE + 17];

    {
        let (_, store) = local_stack(&dir);
        upload(&store, "persisted", &data);
    }

    let (_, store) = local_stack(&dir);
    assert_eq!(download(&store, "persisted").unwrap(), data);
}

// =============================================================================
// Failure paths
// =============================================================================

#[test]
fn test_lost_key_file_is_missing_key() {
    let dir = TempDir::new().unwrap();
    {
        let (_, store) = local_stack(&dir);
        upload(&store, "doc", b"irrecoverable without its key");
    }
    fs::remove_file(dir.path().join("keys.json")).unwrap();

    let (_, store) = local_stack(&dir);
    let mut out = Vec::new();
    let err = store.download("doc", &mut out).unwrap_err();
    assert!(matches!(err, StoreError::MissingKey { .. }));
    assert!(!err.is_retryable());
    assert!(out.is_empty(), "no plaintext may be written without a key");
}

#[test]
fn test_blob_swapped_between_ids_fails() {
    let remote = Arc::new(MemoryCloudStore::new("mem://swap"));
    let store = EncryptingCloudStore::new(remote.clone(), Arc::new(MemoryKeyRepository::new()));

    upload(&store, "a", b"content of a");
    upload(&store, "b", b"content of b");
    remote.put_blob("a", remote.blob("b").unwrap());

    let err = download(&store, "a").unwrap_err();
    assert!(matches!(err, StoreError::Decryption { .. }));
}

#[test]
fn test_remote_failure_surfaces_with_context() {
    let remote = Arc::new(MemoryCloudStore::new("mem://flaky"));
    let keys = Arc::new(MemoryKeyRepository::new());
    let store = EncryptingCloudStore::new(remote.clone(), keys.clone());
    remote.fail_uploads(true);

    let err = store
        .upload("doc", &mut Cursor::new(b"x".to_vec()), 1)
        .unwrap_err();
    assert_eq!(err.data_id(), "doc");
    assert!(err.is_retryable());
    // The key is saved before the remote call; a retry simply replaces it.
    assert!(keys.find_by_data_id("doc").unwrap().is_some());
}

// =============================================================================
// Slice deletion through encrypting stores
// =============================================================================

#[test]
fn test_unlink_multi_slice_file() {
    let fast = Arc::new(MemoryCloudStore::new("mem://fast"));
    let broken = Arc::new(MemoryCloudStore::new("mem://broken"));
    let keys = Arc::new(MemoryKeyRepository::new());

    let registry = CloudStoreRegistry::new();
    for remote in [&fast, &broken] {
        registry.register(Arc::new(
            EncryptingCloudStore::new(remote.clone(), keys.clone())
                .with_retention(KeyRetention::PurgeOnDelete),
        ));
    }

    let slices: Vec<SliceMetadata> = (0..6)
        .map(|i| {
            let store = if i % 3 == 0 { "mem://broken" } else { "mem://fast" };
            SliceMetadata::new(format!("file-1.slice{i}"), store)
        })
        .collect();
    for slice in &slices {
        let store = registry.get(&slice.store_name).unwrap();
        upload(store.as_ref(), &slice.id, slice.id.as_bytes());
    }
    broken.fail_deletes(true);

    let pool = WorkerPool::with_config(PoolConfig::default().with_threads(4)).unwrap();
    let tasks = slices
        .iter()
        .cloned()
        .map(|s| DeleteTask::resolve(s, &registry).unwrap());
    let report = delete_slices(&pool, tasks);
    pool.wait();

    assert_eq!(report.succeeded.len(), 4);
    assert_eq!(report.failed.len(), 2);
    assert!(report.failed.iter().all(|s| s.store_name == "mem://broken"));
    assert!(fast.is_empty());
    assert_eq!(broken.len(), 2);

    // Keys go with successfully deleted slices only.
    assert_eq!(keys.len(), 2);
    for slice in &report.failed {
        assert!(keys.contains(&slice.id));
    }
}
