//! Chunked AES-256-GCM stream encryption.
//!
//! # Format
//!
//! ```text
//! header_nonce (12) | chunk 0 | chunk 1 | ... | chunk N (final)
//! chunk = nonce (12) | ciphertext (<= 32 KiB) | tag (16)
//! ```
//!
//! Every chunk authenticates `chunk_number (u64 BE) || header_nonce || final`
//! as AAD, so chunks cannot be reordered, spliced between streams, or dropped
//! from the end without failing verification. At least one chunk is always
//! written, which keeps empty content authenticated too.

use std::io::{self, Read, Write};

use aead::Payload;
use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit},
};
use rand::RngCore;
use tracing::{debug, trace, warn};

use super::{ContentKey, CryptoError};

/// Size of the stream header (the header nonce).
pub const HEADER_SIZE: usize = 12;

/// Plaintext bytes per chunk (32 KiB).
pub const CHUNK_PLAINTEXT_SIZE: usize = 32 * 1024;

/// Per-chunk overhead: 12-byte nonce + 16-byte GCM tag.
pub const CHUNK_OVERHEAD: usize = 28;

/// Maximum size of one encrypted chunk.
pub const CHUNK_ENCRYPTED_SIZE: usize = CHUNK_PLAINTEXT_SIZE + CHUNK_OVERHEAD;

const NONCE_SIZE: usize = 12;

/// Ciphertext length produced for `plaintext_len` bytes of input.
pub fn encrypted_size(plaintext_len: u64) -> u64 {
    let chunk = CHUNK_PLAINTEXT_SIZE as u64;
    let chunks = plaintext_len.div_ceil(chunk).max(1);
    HEADER_SIZE as u64 + chunks * CHUNK_OVERHEAD as u64 + plaintext_len
}

/// Encrypt everything readable from `plaintext` into `ciphertext`.
///
/// Returns the number of ciphertext bytes written.
pub fn encrypt_stream<R, W>(
    plaintext: &mut R,
    ciphertext: &mut W,
    key: &ContentKey,
) -> Result<u64, CryptoError>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.expose()));

    let mut header_nonce = [0u8; HEADER_SIZE];
    rand::rng().fill_bytes(&mut header_nonce);
    ciphertext.write_all(&header_nonce)?;
    let mut written = HEADER_SIZE as u64;

    // Look one chunk ahead so the final chunk can be flagged in its AAD.
    let mut current = vec![0u8; CHUNK_PLAINTEXT_SIZE];
    let mut next = vec![0u8; CHUNK_PLAINTEXT_SIZE];
    let mut current_len = read_full(plaintext, &mut current)?;
    let mut chunk_number = 0u64;

    loop {
        let next_len = if current_len == CHUNK_PLAINTEXT_SIZE {
            read_full(plaintext, &mut next)?
        } else {
            0
        };
        let is_final = next_len == 0;

        let mut chunk_nonce = [0u8; NONCE_SIZE];
        rand::rng().fill_bytes(&mut chunk_nonce);
        let aad = chunk_aad(chunk_number, &header_nonce, is_final);
        let payload = Payload {
            msg: &current[..current_len],
            aad: &aad,
        };

        let sealed = cipher
            .encrypt(Nonce::from_slice(&chunk_nonce), payload)
            .map_err(|e| CryptoError::Encryption {
                chunk: chunk_number,
                reason: e.to_string(),
            })?;

        ciphertext.write_all(&chunk_nonce)?;
        ciphertext.write_all(&sealed)?;
        written += (NONCE_SIZE + sealed.len()) as u64;

        trace!(chunk = chunk_number, plaintext_len = current_len, is_final, "Chunk encrypted");

        if is_final {
            break;
        }
        std::mem::swap(&mut current, &mut next);
        current_len = next_len;
        chunk_number += 1;
    }

    ciphertext.flush()?;
    debug!(chunks = chunk_number + 1, ciphertext_len = written, "Stream encrypted");
    Ok(written)
}

/// Decrypt a stream produced by [`encrypt_stream`] into `plaintext`.
///
/// Chunks are verified and written one at a time. Returns the number of
/// plaintext bytes written.
pub fn decrypt_stream<R, W>(
    ciphertext: &mut R,
    plaintext: &mut W,
    key: &ContentKey,
) -> Result<u64, CryptoError>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.expose()));

    let mut header_nonce = [0u8; HEADER_SIZE];
    let header_len = read_full(ciphertext, &mut header_nonce)?;
    if header_len != HEADER_SIZE {
        warn!(actual = header_len, "Ciphertext shorter than its header");
        return Err(CryptoError::TruncatedHeader {
            expected: HEADER_SIZE,
            actual: header_len,
        });
    }

    let mut current = vec![0u8; CHUNK_ENCRYPTED_SIZE];
    let mut next = vec![0u8; CHUNK_ENCRYPTED_SIZE];
    let mut current_len = read_full(ciphertext, &mut current)?;
    let mut chunk_number = 0u64;
    let mut written = 0u64;

    loop {
        if current_len < CHUNK_OVERHEAD {
            warn!(chunk = chunk_number, actual = current_len, "Incomplete chunk");
            return Err(CryptoError::IncompleteChunk {
                chunk: chunk_number,
                actual: current_len,
            });
        }

        let next_len = if current_len == CHUNK_ENCRYPTED_SIZE {
            read_full(ciphertext, &mut next)?
        } else {
            0
        };
        let is_final = next_len == 0;

        let chunk = &current[..current_len];
        let aad = chunk_aad(chunk_number, &header_nonce, is_final);
        let payload = Payload {
            msg: &chunk[NONCE_SIZE..],
            aad: &aad,
        };

        let opened = cipher
            .decrypt(Nonce::from_slice(&chunk[..NONCE_SIZE]), payload)
            .map_err(|_| {
                warn!(chunk = chunk_number, "Chunk decryption failed - authentication tag mismatch");
                CryptoError::Authentication {
                    chunk: chunk_number,
                }
            })?;

        plaintext.write_all(&opened)?;
        written += opened.len() as u64;

        if is_final {
            break;
        }
        std::mem::swap(&mut current, &mut next);
        current_len = next_len;
        chunk_number += 1;
    }

    plaintext.flush()?;
    debug!(chunks = chunk_number + 1, plaintext_len = written, "Stream decrypted");
    Ok(written)
}

/// AAD: chunk_number (8 bytes BE) || header_nonce (12 bytes) || final flag.
fn chunk_aad(chunk_number: u64, header_nonce: &[u8; HEADER_SIZE], is_final: bool) -> [u8; 21] {
    let mut aad = [0u8; 21];
    aad[..8].copy_from_slice(&chunk_number.to_be_bytes());
    aad[8..20].copy_from_slice(header_nonce);
    aad[20] = u8::from(is_final);
    aad
}

/// Fill `buf` as far as the reader allows, returning the number of bytes read.
fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
