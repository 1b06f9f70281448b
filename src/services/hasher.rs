//! Content fingerprinting for deduplication.

use crate::models::image::Fingerprint;

/// MD5 of the raw image bytes.
///
/// This is a dedup key, not a security boundary; MD5's speed matters more
/// here than collision resistance.
pub fn fingerprint(bytes: &[u8]) -> Fingerprint {
    Fingerprint(md5::compute(bytes).0)
}
