//! Locator → [`StorageKey`] derivation.
//!
//! The key is the standard base64 encoding of the locator's bytes with every
//! non-alphanumeric character removed. For ASCII locators the stripped
//! characters (`+`, `/`, `=`) only arise from `>`, `?`, `~` and padding, so
//! distinct plain paths never collide in practice. The scheme is not a
//! cryptographic digest; SHA-256 is only used as a fallback for empty
//! results and to cap very long keys.

use crate::types::StorageKey;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha2::{Digest, Sha256};

/// Longest key written to disk. Leaves room for an extension under the
/// usual 255-byte file name limit.
pub const MAX_KEY_LEN: usize = 128;

/// Width of the hex digest used for fallbacks and the long-key suffix.
const DIGEST_LEN: usize = 16;

/// Derive the storage key for a locator.
///
/// Same locator, same key, across calls and process restarts.
pub fn resolve_key(locator: &str) -> StorageKey {
    let encoded: String = STANDARD
        .encode(locator.as_bytes())
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect();

    if encoded.is_empty() {
        return StorageKey::from_raw(short_digest(locator));
    }

    if encoded.len() > MAX_KEY_LEN {
        let mut key = encoded[..MAX_KEY_LEN - DIGEST_LEN].to_string();
        key.push_str(&short_digest(locator));
        return StorageKey::from_raw(key);
    }

    StorageKey::from_raw(encoded)
}

fn short_digest(locator: &str) -> String {
    let digest = Sha256::digest(locator.as_bytes());
    let hex = format!("{:x}", digest);
    hex[..DIGEST_LEN].to_string()
}

/// Whether a file stem looks like something [`resolve_key`] produced.
pub fn is_key_like(stem: &str) -> bool {
    !stem.is_empty() && stem.len() <= MAX_KEY_LEN && stem.chars().all(|c| c.is_ascii_alphanumeric())
}
