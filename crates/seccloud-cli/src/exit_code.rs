//! Process exit codes.

pub const SUCCESS: u8 = 0;
pub const GENERAL_ERROR: u8 = 1;
/// Content, store or local file does not exist.
pub const NOT_FOUND: u8 = 3;
/// Stored content cannot be decrypted: key lost or ciphertext corrupted.
pub const INTEGRITY_FAILED: u8 = 4;
pub const PERMISSION_DENIED: u8 = 5;
/// Remote store failed; retrying may succeed.
pub const STORE_UNAVAILABLE: u8 = 6;
pub const CONFIG_INVALID: u8 = 7;
