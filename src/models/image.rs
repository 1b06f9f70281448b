//! Represents a stored image and its content fingerprint.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use std::fmt;

/// 128-bit MD5 digest of an image's raw bytes, used as the dedup key.
///
/// Displays as lowercase hex, the form persisted in `images.md5`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Fingerprint(pub [u8; 16]);

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// A deduplicated image in the index.
///
/// One row exists per unique fingerprint. Assets are immutable after
/// insertion: the canonical URL handed out on first upload is the one every
/// later identical upload receives.
#[derive(Clone, FromRow, Debug, PartialEq, Eq)]
pub struct ImageAsset {
    /// Hex MD5 of the image bytes, exactly as stored in `images.md5` and
    /// as rendered by [`Fingerprint`]'s `Display`. Kept as text so the row
    /// decodes straight from the column.
    #[sqlx(rename = "md5")]
    pub fingerprint: String,

    /// Public URL of the stored object.
    #[sqlx(rename = "url")]
    pub canonical_url: String,

    /// MIME type the image was stored with.
    pub content_type: String,

    /// Remote URL the image was fetched from, when ingested by URL.
    #[sqlx(rename = "original_url")]
    pub source_url: Option<String>,

    #[sqlx(rename = "created_at")]
    pub stored_at: DateTime<Utc>,
}
