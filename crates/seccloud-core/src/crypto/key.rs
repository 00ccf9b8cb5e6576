use std::fmt;

use rand::RngCore;
use zeroize::Zeroizing;

use super::CryptoError;

/// Size of a content key in bytes (AES-256).
pub const KEY_SIZE: usize = 32;

/// A symmetric key protecting the remote copy of one content id.
///
/// The key bytes are zeroized on drop and never printed by `Debug`.
#[derive(Clone)]
pub struct ContentKey(Zeroizing<[u8; KEY_SIZE]>);

impl ContentKey {
    /// Generate a fresh random key.
    pub fn generate() -> Self {
        let mut bytes = Zeroizing::new([0u8; KEY_SIZE]);
        rand::rng().fill_bytes(&mut bytes[..]);
        Self(bytes)
    }

    /// Rebuild a key from stored raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: KEY_SIZE,
                actual: bytes.len(),
            });
        }
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }

    /// Raw key bytes, for the cipher and for key persistence only.
    pub fn expose(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ContentKey([REDACTED])")
    }
}

impl PartialEq for ContentKey {
    fn eq(&self, other: &Self) -> bool {
        // Only used by tests and key repositories; not on a timing-sensitive path.
        self.0.as_slice() == other.0.as_slice()
    }
}

impl Eq for ContentKey {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_is_random() {
        let a = ContentKey::generate();
        let b = ContentKey::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_from_bytes_round_trip() {
        let key = ContentKey::generate();
        let restored = ContentKey::from_bytes(key.expose()).unwrap();
        assert_eq!(key, restored);
    }

    #[test]
    fn test_from_bytes_rejects_wrong_length() {
        let err = ContentKey::from_bytes(&[0u8; 16]).unwrap_err();
        assert!(matches!(
            err,
            CryptoError::InvalidKeyLength {
                expected: 32,
                actual: 16
            }
        ));
    }

    #[test]
    fn test_debug_redacts_key() {
        let key = ContentKey::from_bytes(&[0xAB; 32]).unwrap();
        let debug = format!("{key:?}");
        assert!(debug.contains("REDACTED"));
        assert!(!debug.to_lowercase().contains("ab"));
    }
}
