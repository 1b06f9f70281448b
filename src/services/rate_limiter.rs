//! Per-client daily upload quota backed by the `uploads` table.

use crate::{
    errors::IngestResult,
    models::upload::UploadRecord,
    services::clock::Clock,
};
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::debug;

/// Bucket shared by every client whose address could not be determined.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Admission control for uploads.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Charge one upload to `client` for today, or refuse without charging
    /// once the daily maximum is reached.
    async fn admit(&self, client: &str) -> IngestResult<bool>;

    /// Whether `client` still has quota left today. Never charges; callers
    /// use it to skip expensive work, `admit` remains the deciding check.
    async fn has_quota(&self, client: &str) -> IngestResult<bool>;
}

/// Normalize an optional client identifier to its quota bucket.
pub fn client_bucket(client: Option<&str>) -> &str {
    match client.map(str::trim) {
        Some(id) if !id.is_empty() => id,
        _ => UNKNOWN_CLIENT,
    }
}

/// Daily quota counted in SQLite, one `uploads` row per accepted request.
///
/// The compare and the increment are one conditional INSERT, so concurrent
/// requests from the same client cannot both slip in at the limit.
#[derive(Clone)]
pub struct SqliteRateLimiter {
    db: Arc<SqlitePool>,
    clock: Arc<dyn Clock>,
    max_per_day: u32,
}

impl SqliteRateLimiter {
    pub fn new(db: Arc<SqlitePool>, clock: Arc<dyn Clock>, max_per_day: u32) -> Self {
        Self {
            db,
            clock,
            max_per_day,
        }
    }

    fn record_for(&self, client: &str) -> UploadRecord {
        UploadRecord {
            client_identifier: client_bucket(Some(client)).to_string(),
            date: self.clock.today(),
        }
    }

    /// Accepted uploads recorded for the record's client and day.
    async fn count(&self, record: &UploadRecord) -> IngestResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM uploads WHERE ip = ? AND date = ?",
        )
        .bind(&record.client_identifier)
        .bind(record.date.to_string())
        .fetch_one(&*self.db)
        .await?;
        Ok(count)
    }

    /// Append `record` unless its client already reached the daily maximum.
    /// Returns whether the row was written.
    async fn insert_if_under_limit(&self, record: &UploadRecord) -> IngestResult<bool> {
        let date = record.date.to_string();
        let result = sqlx::query(
            "INSERT INTO uploads (ip, date, created_at)
             SELECT ?, ?, ?
             WHERE (SELECT COUNT(*) FROM uploads WHERE ip = ? AND date = ?) < ?",
        )
        .bind(&record.client_identifier)
        .bind(&date)
        .bind(self.clock.now())
        .bind(&record.client_identifier)
        .bind(&date)
        .bind(i64::from(self.max_per_day))
        .execute(&*self.db)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl RateLimiter for SqliteRateLimiter {
    async fn admit(&self, client: &str) -> IngestResult<bool> {
        let record = self.record_for(client);
        let admitted = self.insert_if_under_limit(&record).await?;
        debug!(
            client = %record.client_identifier,
            date = %record.date,
            admitted,
            "rate limit decision"
        );
        Ok(admitted)
    }

    async fn has_quota(&self, client: &str) -> IngestResult<bool> {
        let record = self.record_for(client);
        Ok(self.count(&record).await? < i64::from(self.max_per_day))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db::memory_pool, services::clock::testing::FixedClock};

    async fn charged(limiter: &SqliteRateLimiter, client: &str) -> i64 {
        let record = UploadRecord {
            client_identifier: client.to_string(),
            date: limiter.clock.today(),
        };
        limiter.count(&record).await.unwrap()
    }

    async fn limiter(max: u32) -> (SqliteRateLimiter, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::at("2024-05-01T12:00:00Z"));
        let db = Arc::new(memory_pool().await);
        (SqliteRateLimiter::new(db, clock.clone(), max), clock)
    }

    #[tokio::test]
    async fn refuses_after_daily_maximum() {
        let (limiter, _) = limiter(3).await;

        for i in 0..3 {
            assert!(limiter.admit("10.0.0.1").await.unwrap(), "upload {}", i + 1);
        }
        assert!(!limiter.admit("10.0.0.1").await.unwrap());

        // Refusals are not charged.
        assert_eq!(charged(&limiter, "10.0.0.1").await, 3);
    }

    #[tokio::test]
    async fn clients_have_separate_buckets() {
        let (limiter, _) = limiter(1).await;

        assert!(limiter.admit("10.0.0.1").await.unwrap());
        assert!(!limiter.admit("10.0.0.1").await.unwrap());
        assert!(limiter.admit("10.0.0.2").await.unwrap());
    }

    #[tokio::test]
    async fn new_day_resets_count() {
        let (limiter, clock) = limiter(1).await;

        assert!(limiter.admit("10.0.0.1").await.unwrap());
        assert!(!limiter.admit("10.0.0.1").await.unwrap());

        clock.advance(chrono::Duration::days(1));
        assert!(limiter.admit("10.0.0.1").await.unwrap());
    }

    #[tokio::test]
    async fn blank_identifiers_share_unknown_bucket() {
        let (limiter, _) = limiter(2).await;

        assert!(limiter.admit("").await.unwrap());
        assert!(limiter.admit("  ").await.unwrap());
        assert!(!limiter.admit(UNKNOWN_CLIENT).await.unwrap());
        assert_eq!(charged(&limiter, UNKNOWN_CLIENT).await, 2);
    }

    #[tokio::test]
    async fn concurrent_admissions_respect_limit() {
        let (limiter, _) = limiter(5).await;

        let attempts = (0..20).map(|_| limiter.admit("10.0.0.9"));
        let results = futures::future::join_all(attempts).await;
        let admitted = results.into_iter().filter(|r| *r.as_ref().unwrap()).count();

        assert_eq!(admitted, 5);
        assert_eq!(charged(&limiter, "10.0.0.9").await, 5);
    }

    #[tokio::test]
    async fn quota_check_does_not_charge() {
        let (limiter, _) = limiter(1).await;

        assert!(limiter.has_quota("10.0.0.3").await.unwrap());
        assert!(limiter.has_quota("10.0.0.3").await.unwrap());
        assert_eq!(charged(&limiter, "10.0.0.3").await, 0);

        assert!(limiter.admit("10.0.0.3").await.unwrap());
        assert!(!limiter.has_quota("10.0.0.3").await.unwrap());
        assert!(limiter.has_quota("10.0.0.4").await.unwrap());
    }

    #[test]
    fn client_bucket_defaults_to_unknown() {
        assert_eq!(client_bucket(None), UNKNOWN_CLIENT);
        assert_eq!(client_bucket(Some("")), UNKNOWN_CLIENT);
        assert_eq!(client_bucket(Some("1.2.3.4")), "1.2.3.4");
    }
}
