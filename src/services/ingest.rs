//! The deduplicating ingestion pipeline.
//!
//! Every upload runs the same sequence: short-circuit own URLs, fetch and
//! validate, charge the client's quota, look the content up by fingerprint,
//! and only on a miss write the object and index it. Remote sources are not
//! fetched for a client whose quota is already used up.

use crate::{
    errors::{IngestError, IngestResult},
    models::{
        image::ImageAsset,
        upload::{FetchedContent, UploadRequest},
    },
    services::{
        clock::Clock,
        content_type::{extension_for, is_image},
        dedup_index::{DedupIndex, Recorded},
        fetcher::SourceFetcher,
        hasher::fingerprint,
        object_store::ObjectStore,
        rate_limiter::{RateLimiter, client_bucket},
    },
};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Orchestrates fetch, admission, dedup and storage for one upload at a time.
///
/// Cheap to clone; all collaborators are shared.
#[derive(Clone)]
pub struct IngestionPipeline {
    pub fetcher: Arc<dyn SourceFetcher>,
    pub limiter: Arc<dyn RateLimiter>,
    pub index: Arc<dyn DedupIndex>,
    pub objects: Arc<dyn ObjectStore>,
    pub clock: Arc<dyn Clock>,
    pub key_prefix: String,
    pub max_bytes: usize,
}

impl IngestionPipeline {
    /// Ingest one upload and return its canonical URL.
    ///
    /// Rejected requests are never charged to `client`; accepted ones are
    /// charged exactly once, dedup hit or not.
    #[tracing::instrument(skip(self, request))]
    pub async fn ingest(
        &self,
        request: UploadRequest,
        client: Option<&str>,
    ) -> IngestResult<String> {
        let client = client_bucket(client);

        let (content, source_url) = match request {
            UploadRequest::FromUrl { source_url } => {
                if self.objects.owns_url(source_url.trim()) {
                    debug!(url = %source_url, "source is already a canonical URL");
                    return Ok(source_url.trim().to_string());
                }
                if !self.limiter.has_quota(client).await? {
                    info!(client, "remote upload refused before fetch: daily limit reached");
                    return Err(IngestError::RateLimited);
                }
                let content = self.fetcher.fetch(&source_url).await?;
                (content, Some(source_url))
            }
            UploadRequest::FromBody {
                raw_bytes,
                declared_content_type,
            } => {
                let content = FetchedContent {
                    bytes: raw_bytes,
                    content_type: declared_content_type,
                };
                (content, None)
            }
        };
        self.validate(&content)?;

        if !self.limiter.admit(client).await? {
            info!(client, "upload refused: daily limit reached");
            return Err(IngestError::RateLimited);
        }

        let digest = fingerprint(&content.bytes);
        if let Some(existing) = self.index.lookup(&digest).await? {
            info!(fingerprint = %digest, url = %existing.canonical_url, "dedup hit");
            return Ok(existing.canonical_url);
        }

        let key = self.object_key(&content.content_type)?;
        let url = self
            .objects
            .put(&key, content.bytes.clone(), &content.content_type)
            .await?;

        let asset = ImageAsset {
            fingerprint: digest.to_string(),
            canonical_url: url,
            content_type: content.content_type,
            source_url,
            stored_at: self.clock.now(),
        };

        match self.index.record(&asset).await {
            Ok(Recorded::Inserted(url)) => {
                info!(
                    fingerprint = %digest,
                    key = %key,
                    size_bytes = content.bytes.len(),
                    "stored new image"
                );
                Ok(url)
            }
            Ok(Recorded::Existing(url)) => {
                info!(fingerprint = %digest, url = %url, "lost dedup race, discarding duplicate object");
                self.discard(&key).await;
                Ok(url)
            }
            Err(err) => {
                warn!(fingerprint = %digest, key = %key, error = %err, "index write failed");
                self.discard(&key).await;
                Err(match err {
                    IngestError::StoreFailed(_) => err,
                    other => IngestError::StoreFailed(other.to_string()),
                })
            }
        }
    }

    /// Content checks shared by both entry points. Remote sources were
    /// already checked by the fetcher; bodies by the handler. This is the
    /// pipeline's own guard.
    fn validate(&self, content: &FetchedContent) -> IngestResult<()> {
        if !is_image(&content.content_type) {
            return Err(IngestError::InvalidFormat);
        }
        if content.bytes.len() > self.max_bytes {
            return Err(IngestError::TooLarge);
        }
        if content.bytes.is_empty() {
            return Err(IngestError::InvalidInput("Empty image".into()));
        }
        Ok(())
    }

    /// `{prefix}{unix_millis}-{random}.{ext}`, unique independent of content.
    fn object_key(&self, content_type: &str) -> IngestResult<String> {
        let ext = extension_for(Some(content_type))?;
        let suffix = Uuid::new_v4().simple().to_string();
        Ok(format!(
            "{}{}-{}.{}",
            self.key_prefix,
            self.clock.now().timestamp_millis(),
            &suffix[..8],
            ext
        ))
    }

    async fn discard(&self, key: &str) {
        if let Err(err) = self.objects.delete(key).await {
            warn!(key, error = %err, "failed to remove orphaned object");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::memory_pool,
        services::{
            clock::testing::FixedClock,
            dedup_index::SqliteDedupIndex,
            fetcher::testing::FakeFetcher,
            object_store::testing::MemoryObjectStore,
            rate_limiter::SqliteRateLimiter,
        },
    };
    use async_trait::async_trait;
    use bytes::Bytes;
    use chrono::NaiveDate;
    use sqlx::SqlitePool;

    const BASE: &str = "https://img.example.com/images";
    const JPEG: &[u8] = b"\xff\xd8\xff\xe0jpeg-body";
    const PNG: &[u8] = b"\x89PNG\r\n\x1a\npng-body";

    struct Harness {
        pipeline: IngestionPipeline,
        fetcher: Arc<FakeFetcher>,
        objects: Arc<MemoryObjectStore>,
        db: Arc<SqlitePool>,
    }

    impl Harness {
        async fn new(fetcher: FakeFetcher, max_daily: u32) -> Self {
            let db = Arc::new(memory_pool().await);
            let clock = Arc::new(FixedClock::at("2024-05-01T12:00:00Z"));
            let fetcher = Arc::new(fetcher);
            let objects = Arc::new(MemoryObjectStore::new(BASE));
            let pipeline = IngestionPipeline {
                fetcher: fetcher.clone(),
                limiter: Arc::new(SqliteRateLimiter::new(db.clone(), clock.clone(), max_daily)),
                index: Arc::new(SqliteDedupIndex::new(db.clone())),
                objects: objects.clone(),
                clock,
                key_prefix: "uploads/".into(),
                max_bytes: 64,
            };
            Self {
                pipeline,
                fetcher,
                objects,
                db,
            }
        }

        async fn charged(&self, client: &str) -> i64 {
            sqlx::query_scalar("SELECT COUNT(*) FROM uploads WHERE ip = ? AND date = ?")
                .bind(client)
                .bind(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap().to_string())
                .fetch_one(&*self.db)
                .await
                .unwrap()
        }
    }

    fn body(bytes: &'static [u8], content_type: &str) -> UploadRequest {
        UploadRequest::FromBody {
            raw_bytes: Bytes::from_static(bytes),
            declared_content_type: content_type.into(),
        }
    }

    #[tokio::test]
    async fn identical_bodies_store_once() {
        let h = Harness::new(FakeFetcher::default(), 10).await;

        let first = h.pipeline.ingest(body(JPEG, "image/jpeg"), Some("1.1.1.1")).await.unwrap();
        let second = h.pipeline.ingest(body(JPEG, "image/jpeg"), Some("1.1.1.1")).await.unwrap();

        assert_eq!(first, second);
        assert!(first.starts_with("https://img.example.com/images/uploads/"));
        assert!(first.ends_with(".jpg"));
        assert_eq!(h.objects.put_count(), 1);
        // Dedup hits are still accepted uploads.
        assert_eq!(h.charged("1.1.1.1").await, 2);
    }

    #[tokio::test]
    async fn stored_url_is_found_by_fingerprint() {
        let h = Harness::new(FakeFetcher::default(), 10).await;

        let url = h.pipeline.ingest(body(PNG, "image/png"), None).await.unwrap();
        let asset = h.pipeline.index.lookup(&fingerprint(PNG)).await.unwrap().unwrap();

        assert_eq!(asset.canonical_url, url);
        assert_eq!(asset.content_type, "image/png");
        assert_eq!(asset.source_url, None);
    }

    #[tokio::test]
    async fn concurrent_identical_uploads_keep_one_object() {
        let h = Harness::new(FakeFetcher::default(), 10).await;

        let (a, b) = tokio::join!(
            h.pipeline.ingest(body(PNG, "image/png"), Some("1.1.1.1")),
            h.pipeline.ingest(body(PNG, "image/png"), Some("2.2.2.2")),
        );

        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(h.objects.object_count(), 1);
    }

    #[tokio::test]
    async fn limit_applies_regardless_of_content() {
        let h = Harness::new(FakeFetcher::default(), 2).await;

        h.pipeline.ingest(body(PNG, "image/png"), Some("9.9.9.9")).await.unwrap();
        h.pipeline.ingest(body(JPEG, "image/jpeg"), Some("9.9.9.9")).await.unwrap();
        let third = h.pipeline.ingest(body(PNG, "image/png"), Some("9.9.9.9")).await;

        assert_eq!(third.unwrap_err(), IngestError::RateLimited);
        assert_eq!(h.charged("9.9.9.9").await, 2);
    }

    #[tokio::test]
    async fn rejected_requests_are_not_charged() {
        let h = Harness::new(FakeFetcher::default(), 5).await;

        let not_image = h.pipeline.ingest(body(b"hello", "text/plain"), Some("3.3.3.3")).await;
        assert_eq!(not_image.unwrap_err(), IngestError::InvalidFormat);

        let too_big = h
            .pipeline
            .ingest(body(&[0u8; 65], "image/png"), Some("3.3.3.3"))
            .await;
        assert_eq!(too_big.unwrap_err(), IngestError::TooLarge);

        assert_eq!(h.charged("3.3.3.3").await, 0);
        assert_eq!(h.objects.put_count(), 0);
    }

    #[tokio::test]
    async fn url_upload_records_source() {
        let fetcher =
            FakeFetcher::default().with_image("https://origin.test/cat.png", PNG, "image/png");
        let h = Harness::new(fetcher, 5).await;

        let url = h
            .pipeline
            .ingest(
                UploadRequest::FromUrl {
                    source_url: "https://origin.test/cat.png".into(),
                },
                Some("4.4.4.4"),
            )
            .await
            .unwrap();

        let asset = h.pipeline.index.lookup(&fingerprint(PNG)).await.unwrap().unwrap();
        assert_eq!(asset.canonical_url, url);
        assert_eq!(asset.source_url.as_deref(), Some("https://origin.test/cat.png"));
        assert_eq!(h.fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn canonical_url_short_circuits() {
        let fetcher =
            FakeFetcher::default().with_image("https://origin.test/cat.png", PNG, "image/png");
        let h = Harness::new(fetcher, 5).await;

        let url = h
            .pipeline
            .ingest(
                UploadRequest::FromUrl {
                    source_url: "https://origin.test/cat.png".into(),
                },
                Some("5.5.5.5"),
            )
            .await
            .unwrap();

        let again = h
            .pipeline
            .ingest(UploadRequest::FromUrl { source_url: url.clone() }, Some("5.5.5.5"))
            .await
            .unwrap();

        assert_eq!(again, url);
        assert_eq!(h.fetcher.calls(), 1);
        assert_eq!(h.charged("5.5.5.5").await, 1);
    }

    #[tokio::test]
    async fn exhausted_quota_skips_remote_fetch() {
        let fetcher =
            FakeFetcher::default().with_image("https://origin.test/cat.png", PNG, "image/png");
        let h = Harness::new(fetcher, 1).await;

        h.pipeline.ingest(body(JPEG, "image/jpeg"), Some("7.7.7.7")).await.unwrap();
        let result = h
            .pipeline
            .ingest(
                UploadRequest::FromUrl {
                    source_url: "https://origin.test/cat.png".into(),
                },
                Some("7.7.7.7"),
            )
            .await;

        assert_eq!(result.unwrap_err(), IngestError::RateLimited);
        assert_eq!(h.fetcher.calls(), 0);
        assert_eq!(h.charged("7.7.7.7").await, 1);
    }

    #[tokio::test]
    async fn fetch_failure_is_surfaced_without_charge() {
        let fetcher = FakeFetcher::default()
            .with_error("https://origin.test/slow.png", IngestError::FetchFailed("request timed out".into()));
        let h = Harness::new(fetcher, 5).await;

        let result = h
            .pipeline
            .ingest(
                UploadRequest::FromUrl {
                    source_url: "https://origin.test/slow.png".into(),
                },
                Some("6.6.6.6"),
            )
            .await;

        assert!(matches!(result, Err(IngestError::FetchFailed(_))));
        assert_eq!(h.charged("6.6.6.6").await, 0);
    }

    #[tokio::test]
    async fn store_failure_leaves_no_index_row() {
        let h = Harness::new(FakeFetcher::default(), 5).await;
        h.objects.fail_puts(true);

        let result = h.pipeline.ingest(body(PNG, "image/png"), None).await;

        assert!(matches!(result, Err(IngestError::StoreFailed(_))));
        assert!(h.pipeline.index.lookup(&fingerprint(PNG)).await.unwrap().is_none());
    }

    struct BrokenIndex;

    #[async_trait]
    impl DedupIndex for BrokenIndex {
        async fn lookup(
            &self,
            _fingerprint: &crate::models::image::Fingerprint,
        ) -> IngestResult<Option<ImageAsset>> {
            Ok(None)
        }

        async fn record(&self, _asset: &ImageAsset) -> IngestResult<Recorded> {
            Err(IngestError::StoreFailed("database is locked".into()))
        }
    }

    #[tokio::test]
    async fn index_failure_removes_stored_object() {
        let mut h = Harness::new(FakeFetcher::default(), 5).await;
        h.pipeline.index = Arc::new(BrokenIndex);

        let result = h.pipeline.ingest(body(PNG, "image/png"), None).await;

        assert!(matches!(result, Err(IngestError::StoreFailed(_))));
        assert_eq!(h.objects.put_count(), 1);
        assert_eq!(h.objects.object_count(), 0);
    }

    #[tokio::test]
    async fn unknown_image_types_get_sentinel_extension() {
        let h = Harness::new(FakeFetcher::default(), 5).await;

        let url = h.pipeline.ingest(body(b"heic-bytes", "image/heic"), None).await.unwrap();
        assert!(url.ends_with(".unknown"));
        assert_eq!(h.charged("unknown").await, 1);
        assert_eq!(h.objects.keys().len(), 1);
    }
}
