//! Content generators aligned to the encryption chunk size.

use rand::Rng;

/// Plaintext chunk size of the content encryption (32 KiB).
///
/// Content at chunk boundaries catches off-by-one errors in the stream
/// encryption and in the spill-file handling around it.
pub const CHUNK_SIZE: usize = crate::crypto::CHUNK_PLAINTEXT_SIZE;

/// Generate random bytes of specified size.
pub fn random_bytes(size: usize) -> Vec<u8> {
    let mut rng = rand::rng();
    (0..size).map(|_| rng.random()).collect()
}

/// One byte less than a chunk.
pub fn chunk_minus_one() -> Vec<u8> {
    random_bytes(CHUNK_SIZE - 1)
}

/// One byte more than a chunk.
pub fn chunk_plus_one() -> Vec<u8> {
    random_bytes(CHUNK_SIZE + 1)
}

/// Exactly `chunks * CHUNK_SIZE` random bytes.
pub fn multi_chunk_content(chunks: usize) -> Vec<u8> {
    random_bytes(chunks * CHUNK_SIZE)
}

/// All 256 byte values, once each.
pub fn all_byte_values() -> Vec<u8> {
    (0u8..=255).collect()
}

/// Content with a distinct fill byte per chunk.
///
/// Makes chunk reordering or boundary mistakes visible in the output.
pub fn patterned_chunks(num_chunks: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(num_chunks * CHUNK_SIZE);
    for chunk_num in 0..num_chunks {
        #[allow(clippy::cast_possible_truncation)]
        let fill_byte = (chunk_num % 256) as u8;
        data.extend(std::iter::repeat_n(fill_byte, CHUNK_SIZE));
    }
    data
}
