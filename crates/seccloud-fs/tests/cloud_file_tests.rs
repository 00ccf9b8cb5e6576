//! Integration tests: handles, cached files and deferred uploads through the
//! encrypting store.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use seccloud_core::testing::{MemoryCloudStore, init_test_tracing, random_bytes};
use seccloud_core::{CloudStore, EncryptingCloudStore, KeyRepository, MemoryKeyRepository};
use seccloud_fs::{
    CloudFile, CloudFileFactory, FileHandle, FileHandleRegistry, FileMetadata, FsConfig,
    FsError, HandleCacheConfig, MemoryMetadataRepository, data_id_for,
};
use tempfile::TempDir;

struct Stack {
    _dir: TempDir,
    remote: Arc<MemoryCloudStore>,
    keys: Arc<MemoryKeyRepository>,
    store: Arc<EncryptingCloudStore>,
    repo: Arc<MemoryMetadataRepository>,
    factory: CloudFileFactory,
}

fn stack(config: impl FnOnce(FsConfig) -> FsConfig) -> Stack {
    init_test_tracing();
    let dir = TempDir::new().unwrap();
    let remote = Arc::new(MemoryCloudStore::new("mem://remote"));
    let keys = Arc::new(MemoryKeyRepository::new());
    let store = Arc::new(EncryptingCloudStore::new(remote.clone(), keys.clone()));
    let repo = Arc::new(MemoryMetadataRepository::new());
    let factory = CloudFileFactory::new(
        config(FsConfig::new(dir.path().join("cache"))),
        store.clone(),
        repo.clone(),
    )
    .unwrap();
    Stack {
        _dir: dir,
        remote,
        keys,
        store,
        repo,
        factory,
    }
}

fn new_file(stack: &Stack, path: &str) -> Arc<CloudFile> {
    let file = stack
        .factory
        .open(FileMetadata::file(path).into_shared())
        .unwrap();
    file.create_content().unwrap();
    file
}

fn decrypted(stack: &Stack, file: &CloudFile) -> Vec<u8> {
    let mut out = Vec::new();
    stack.store.download(&file.data_id(), &mut out).unwrap();
    out
}

#[test]
fn test_quick_rewrite_uploads_final_content_once() {
    let stack = stack(|c| c.next_update_timeout(Duration::from_millis(200)));
    let file = new_file(&stack, "/a/b.txt");
    let content = file.content().unwrap();

    content.write_all_at(b"hello", 0).unwrap();
    thread::sleep(Duration::from_millis(20));
    content.write_all_at(b"hello world", 0).unwrap();

    thread::sleep(Duration::from_millis(250));
    assert!(file.uploader().wait_idle(Duration::from_secs(5)));

    assert_eq!(stack.remote.upload_count(), 1);
    assert_eq!(decrypted(&stack, &file), b"hello world");

    let data_id = data_id_for("/a/b.txt");
    assert_ne!(stack.remote.blob(&data_id).unwrap(), b"hello world");
    assert!(stack.keys.find_by_data_id(&data_id).unwrap().is_some());
}

#[test]
fn test_write_during_upload_is_not_lost() {
    let stack = stack(|c| c.next_update_timeout(Duration::from_millis(30)));
    stack.remote.set_upload_latency(Duration::from_millis(300));
    let file = new_file(&stack, "/race.bin");
    let content = file.content().unwrap();

    content.write_all_at(&[1u8; 1024], 0).unwrap();
    let start = Instant::now();
    while stack.remote.upload_count() == 0 && start.elapsed() < Duration::from_secs(5) {
        thread::sleep(Duration::from_millis(5));
    }
    let last = random_bytes(4096);
    content.write_all_at(&last, 0).unwrap();

    thread::sleep(Duration::from_millis(50));
    assert!(file.uploader().wait_idle(Duration::from_secs(10)));
    assert_eq!(stack.remote.upload_count(), 2);
    assert_eq!(decrypted(&stack, &file), last);
    assert_eq!(stack.remote.max_concurrent_uploads(), 1);
}

#[test]
fn test_at_most_one_upload_per_file() {
    let stack = stack(|c| {
        c.next_update_timeout(Duration::from_millis(5))
            .upload_threads(4)
    });
    stack.remote.set_upload_latency(Duration::from_millis(20));
    let file = new_file(&stack, "/busy.bin");
    let content = file.content().unwrap();

    let writers: Vec<_> = (0u8..4)
        .map(|i| {
            let content = Arc::clone(&content);
            thread::spawn(move || {
                for round in 0u8..25 {
                    content.write_all_at(&[i ^ round; 256], 0).unwrap();
                    thread::sleep(Duration::from_millis(3));
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    thread::sleep(Duration::from_millis(20));
    assert!(file.uploader().wait_idle(Duration::from_secs(10)));
    assert_eq!(stack.remote.max_concurrent_uploads(), 1);
    assert_eq!(decrypted(&stack, &file), content.read_to_vec().unwrap());
}

#[test]
fn test_close_expedites_pending_upload() {
    let stack = stack(|c| c.next_update_timeout(Duration::from_secs(3600)));
    let file = new_file(&stack, "/docs/report.txt");
    let registry = FileHandleRegistry::new(&HandleCacheConfig::default());

    let id = registry.register(FileHandle::open(Arc::clone(&file)).unwrap());
    registry
        .get(id)
        .unwrap()
        .content()
        .write_all_at(b"final words", 0)
        .unwrap();
    assert_eq!(stack.remote.upload_count(), 0);

    registry.destroy(id);
    assert!(file.uploader().wait_idle(Duration::from_secs(5)));
    assert_eq!(decrypted(&stack, &file), b"final words");
    assert_eq!(stack.repo.save_count(), 1);
}

#[test]
fn test_close_wait_timeout_blocks_until_uploaded() {
    let stack = stack(|c| {
        c.next_update_timeout(Duration::from_secs(3600))
            .close_wait_timeout(Duration::from_secs(5))
    });
    stack.remote.set_upload_latency(Duration::from_millis(100));
    let file = new_file(&stack, "/sync.txt");
    let registry = FileHandleRegistry::new(&HandleCacheConfig::default());

    let id = registry.register(FileHandle::open(Arc::clone(&file)).unwrap());
    registry
        .get(id)
        .unwrap()
        .content()
        .write_all_at(b"durable", 0)
        .unwrap();

    registry.destroy(id);
    assert!(file.uploader().is_idle());
    assert!(!file.uploader().is_dirty());
    assert_eq!(stack.remote.upload_count(), 1);
}

#[test]
fn test_eviction_then_destroy_cleans_up_once() {
    let stack = stack(|c| c);
    let registry = FileHandleRegistry::new(&HandleCacheConfig::default().max_entries(1));

    let first = registry.register(FileHandle::open(new_file(&stack, "/one")).unwrap());
    let kept = registry.get(first).unwrap();
    let second = registry.register(FileHandle::open(new_file(&stack, "/two")).unwrap());
    registry.sweep();

    assert_eq!(registry.eviction_count(), 1);
    assert!(kept.is_retired());
    assert!(!kept.content().is_open());
    assert_eq!(stack.repo.save_count(), 1);

    assert!(registry.destroy(first).is_none());
    assert!(!kept.retire(first));
    assert_eq!(stack.repo.save_count(), 1);

    registry.destroy(second);
    assert_eq!(stack.repo.save_count(), 2);
}

#[test]
fn test_handles_share_one_file() {
    let stack = stack(|c| c.next_update_timeout(Duration::from_millis(20)));
    let registry = FileHandleRegistry::new(&HandleCacheConfig::default());
    let file = new_file(&stack, "/shared.txt");

    let a = registry.register(FileHandle::open(Arc::clone(&file)).unwrap());
    let b = registry.register(
        FileHandle::open(stack.factory.open(file.metadata().clone()).unwrap()).unwrap(),
    );
    assert_ne!(a, b);
    assert!(Arc::ptr_eq(
        registry.get(a).unwrap().file(),
        registry.get(b).unwrap().file()
    ));

    registry.get(a).unwrap().content().write_all_at(b"from a", 0).unwrap();
    let mut buf = [0u8; 6];
    registry.get(b).unwrap().content().read_at(&mut buf, 0).unwrap();
    assert_eq!(&buf, b"from a");

    registry.destroy_all();
    assert!(file.uploader().wait_idle(Duration::from_secs(5)));
    assert_eq!(decrypted(&stack, &file), b"from a");
}

#[test]
fn test_fetch_then_edit_round_trip() {
    let stack = stack(|c| c.next_update_timeout(Duration::from_millis(20)));
    let original = random_bytes(100_000);
    let data_id = data_id_for("/big.bin");
    stack
        .store
        .upload(&data_id, &mut std::io::Cursor::new(original.clone()), original.len() as u64)
        .unwrap();

    let file = stack
        .factory
        .open(FileMetadata::file("/big.bin").into_shared())
        .unwrap();
    assert_eq!(file.fetch_content().unwrap(), stack.remote.blob(&data_id).unwrap().len() as u64);

    let content = file.content().unwrap();
    assert_eq!(content.read_to_vec().unwrap(), original);
    content.truncate(10).unwrap();
    assert!(file.flush(Duration::from_secs(5)));
    assert_eq!(decrypted(&stack, &file), &original[..10]);
}

#[test]
fn test_missing_cache_file_fails_open() {
    let stack = stack(|c| c);
    let file = stack
        .factory
        .open(FileMetadata::file("/never-fetched.txt").into_shared())
        .unwrap();
    let err = FileHandle::open(file).unwrap_err();
    assert!(matches!(err, FsError::ContentOpen { .. }));
}

#[test]
fn test_failed_upload_retried_on_close() {
    let stack = stack(|c| c.next_update_timeout(Duration::from_millis(10)));
    stack.remote.fail_uploads(true);
    let file = new_file(&stack, "/flaky.txt");
    let registry = FileHandleRegistry::new(&HandleCacheConfig::default());
    let id = registry.register(FileHandle::open(Arc::clone(&file)).unwrap());

    registry.get(id).unwrap().content().write_all_at(b"retry me", 0).unwrap();
    thread::sleep(Duration::from_millis(30));
    assert!(file.uploader().wait_idle(Duration::from_secs(5)));
    assert!(file.uploader().is_dirty());
    assert!(stack.remote.blob(&file.data_id()).is_none());

    stack.remote.fail_uploads(false);
    registry.destroy(id);
    assert!(file.uploader().wait_idle(Duration::from_secs(5)));
    assert!(!file.uploader().is_dirty());
    assert_eq!(decrypted(&stack, &file), b"retry me");
}

#[test]
fn test_shutdown_flushes_live_files() {
    let stack = stack(|c| c.next_update_timeout(Duration::from_secs(3600)));
    let file = new_file(&stack, "/pending.txt");
    file.content().unwrap().write_all_at(b"pending", 0).unwrap();

    assert!(stack.factory.shutdown(Duration::from_secs(5)));
    assert_eq!(decrypted(&stack, &file), b"pending");
}
