//! Holder identities and lock keys.

use rand::Rng;
use sha1::{Digest, Sha1};

/// Lock name used when none is given.
pub const DEFAULT_LOCK_NAME: &str = "default";

/// Prefix of every derived lock key.
pub const LOCK_KEY_PREFIX: &str = "leader-";

/// Generates a fresh 256-bit holder identity, hex encoded.
pub fn generate_identity() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    hex::encode(bytes)
}

/// Derives the store key for `lock_name`: `leader-` followed by the hex SHA-1 of the name.
pub fn derive_lock_key(lock_name: &str) -> String {
    let digest = Sha1::digest(lock_name.as_bytes());
    format!("{}{}", LOCK_KEY_PREFIX, hex::encode(digest))
}
