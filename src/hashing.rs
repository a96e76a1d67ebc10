//! Hashing System - SHA-256 Content Fingerprints
//!
//! Provides deterministic, content-derived file names for cache busting.

use sha2::{Sha256, Digest};

/// Default number of hex characters embedded in fingerprinted file names
pub const DEFAULT_HASH_LENGTH: usize = 10;

/// Compute SHA-256 hash of bytes, return hex string
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    hex::encode(result)
}

/// Compute the content hash of an asset, truncated to `len` hex characters
pub fn content_hash(data: &[u8], len: usize) -> String {
    let mut digest = sha256_hex(data);
    digest.truncate(len.clamp(1, 64));
    digest
}

/// Insert a hash before the final extension of a file name.
///
/// `app.css` becomes `app-<hash>.css`, `jquery.min.js` becomes
/// `jquery.min-<hash>.js`. Dot files and names without extension get the
/// hash appended.
pub fn hashed_file_name(file_name: &str, hash: &str) -> String {
    match file_name.rfind('.') {
        Some(idx) if idx > 0 => {
            let (stem, ext) = file_name.split_at(idx);
            format!("{}-{}{}", stem, hash, ext)
        }
        _ => format!("{}-{}", file_name, hash),
    }
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{:02x}", b)).collect()
    }
}
