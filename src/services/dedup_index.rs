//! Fingerprint → stored image index backed by the `images` table.

use crate::{
    errors::{IngestError, IngestResult},
    models::image::{Fingerprint, ImageAsset},
};
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;

/// Outcome of recording a new asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    /// This asset is now the canonical one for its fingerprint.
    Inserted(String),
    /// Another upload recorded the fingerprint first; carries its URL.
    Existing(String),
}

#[async_trait]
pub trait DedupIndex: Send + Sync {
    /// Previously stored asset with this fingerprint, if any.
    async fn lookup(&self, fingerprint: &Fingerprint) -> IngestResult<Option<ImageAsset>>;

    /// Insert `asset` unless its fingerprint is already present. The check
    /// and the insert are one statement.
    async fn record(&self, asset: &ImageAsset) -> IngestResult<Recorded>;
}

#[derive(Clone)]
pub struct SqliteDedupIndex {
    db: Arc<SqlitePool>,
}

impl SqliteDedupIndex {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    async fn fetch_by_md5(&self, md5: &str) -> IngestResult<Option<ImageAsset>> {
        let asset = sqlx::query_as::<_, ImageAsset>(
            "SELECT md5, url, content_type, original_url, created_at
             FROM images WHERE md5 = ?",
        )
        .bind(md5)
        .fetch_optional(&*self.db)
        .await?;
        Ok(asset)
    }
}

#[async_trait]
impl DedupIndex for SqliteDedupIndex {
    async fn lookup(&self, fingerprint: &Fingerprint) -> IngestResult<Option<ImageAsset>> {
        self.fetch_by_md5(&fingerprint.to_string()).await
    }

    async fn record(&self, asset: &ImageAsset) -> IngestResult<Recorded> {
        let result = sqlx::query(
            "INSERT INTO images (url, md5, original_url, content_type, created_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(md5) DO NOTHING",
        )
        .bind(&asset.canonical_url)
        .bind(&asset.fingerprint)
        .bind(asset.source_url.as_deref())
        .bind(&asset.content_type)
        .bind(asset.stored_at)
        .execute(&*self.db)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(Recorded::Inserted(asset.canonical_url.clone()));
        }

        let existing = self.fetch_by_md5(&asset.fingerprint).await?.ok_or_else(|| {
            IngestError::StoreFailed(format!(
                "fingerprint {} conflicted but no row was found",
                asset.fingerprint
            ))
        })?;
        Ok(Recorded::Existing(existing.canonical_url))
    }
}
