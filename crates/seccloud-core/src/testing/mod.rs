//! Test support shared by every seccloud crate.
//!
//! - **Memory store**: [`MemoryCloudStore`] with failure injection, latency and
//!   concurrency tracking
//! - **Generators**: chunk-aware content generation (32 KiB boundaries)
//! - **Assertions**: byte comparisons with readable failure messages
//!
//! # Usage
//!
//! ```
//! use seccloud_core::CloudStore;
//! use seccloud_core::testing::{MemoryCloudStore, chunk_plus_one};
//!
//! let store = MemoryCloudStore::new("mem://test");
//! let data = chunk_plus_one();
//! store
//!     .upload("id", &mut std::io::Cursor::new(data.clone()), data.len() as u64)
//!     .unwrap();
//! assert_eq!(store.blob("id").unwrap(), data);
//! ```

mod generators;
mod memory;

pub use generators::{
    CHUNK_SIZE, all_byte_values, chunk_minus_one, chunk_plus_one, multi_chunk_content,
    patterned_chunks, random_bytes,
};
pub use memory::MemoryCloudStore;

/// Assert that two byte slices are equal with helpful error messages.
///
/// On failure, shows sizes and first differing position rather than
/// dumping potentially huge byte arrays.
pub fn assert_bytes_equal(actual: &[u8], expected: &[u8], context: &str) {
    assert!(
        actual.len() == expected.len(),
        "{context}: size mismatch - expected {} bytes, got {} bytes",
        expected.len(),
        actual.len()
    );
    if let Some(i) = actual.iter().zip(expected).position(|(a, e)| a != e) {
        panic!(
            "{context}: content mismatch at byte {i} - expected 0x{:02x}, got 0x{:02x}",
            expected[i], actual[i]
        );
    }
}

/// Install a `tracing` subscriber writing to the test harness output.
///
/// Honors `RUST_LOG`; safe to call from every test.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
