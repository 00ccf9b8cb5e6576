//! Symmetric content encryption for data leaving the local cache.

pub mod key;
pub mod stream;

use std::io;

use thiserror::Error;

pub use key::{ContentKey, KEY_SIZE};
pub use stream::{
    decrypt_stream, encrypt_stream, encrypted_size, CHUNK_ENCRYPTED_SIZE, CHUNK_OVERHEAD,
    CHUNK_PLAINTEXT_SIZE, HEADER_SIZE,
};

/// Errors that can occur while encrypting or decrypting content streams.
///
/// # Security Classification
///
/// Errors marked `[INTEGRITY VIOLATION]` mean the ciphertext handed back by a
/// remote store does not authenticate under the stored key. Remote stores are
/// untrusted, so these must never be retried or silently ignored.
#[derive(Error, Debug)]
pub enum CryptoError {
    // =========================================================================
    // INTEGRITY VIOLATIONS - remote content was altered, truncated or mixed up
    // =========================================================================
    /// A chunk failed AES-GCM tag verification.
    ///
    /// **[INTEGRITY VIOLATION]** Either the chunk was tampered with, chunks were
    /// reordered or dropped, or the content was encrypted under another key.
    #[error("[INTEGRITY VIOLATION] chunk {chunk} failed authentication - tampered, truncated or wrong key")]
    Authentication { chunk: u64 },

    /// The stream ended inside the header.
    #[error("ciphertext too short: expected a {expected}-byte header, got {actual} bytes")]
    TruncatedHeader { expected: usize, actual: usize },

    /// A chunk is shorter than the nonce and tag alone.
    #[error("incomplete chunk {chunk}: expected at least {CHUNK_OVERHEAD} bytes, got {actual}")]
    IncompleteChunk { chunk: u64, actual: usize },

    // =========================================================================
    // PROGRAMMING / SYSTEM ERRORS
    // =========================================================================
    /// The cipher refused to encrypt a chunk.
    #[error("failed to encrypt chunk {chunk}: {reason}")]
    Encryption { chunk: u64, reason: String },

    /// Stored key material has the wrong length.
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// Reading plaintext/ciphertext or writing the output failed.
    #[error("stream I/O failed: {0}")]
    Io(#[from] io::Error),
}

impl CryptoError {
    /// Whether this error indicates the ciphertext itself cannot be trusted.
    pub fn is_integrity_violation(&self) -> bool {
        matches!(
            self,
            CryptoError::Authentication { .. }
                | CryptoError::TruncatedHeader { .. }
                | CryptoError::IncompleteChunk { .. }
        )
    }
}
