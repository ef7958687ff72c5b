//! Deterministic cache directory names.
//!
//! When no download directory is given, downloads land in
//! `<cache root>/<fingerprint>`, where the fingerprint is the first
//! [`FINGERPRINT_LEN`] hex characters of the SHA-256 of the source identity.
//! Repeated runs against the same source therefore reuse the same cache.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Number of hex characters kept from the digest.
pub const FINGERPRINT_LEN: usize = 10;

/// Fingerprint of a source identity string (URL, page title, subreddit name,
/// drive id, or `<url>_<branch>`).
pub fn fingerprint(identity: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(identity.as_bytes());
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(FINGERPRINT_LEN);
    digest
}

/// `<cache_root>/<fingerprint(identity)>`.
pub fn default_download_dir(cache_root: &Path, identity: &str) -> PathBuf {
    cache_root.join(fingerprint(identity))
}
