//! Shared application state handed to every handler.

use crate::{
    config::AppConfig,
    errors::{IngestError, IngestResult},
    services::{
        clock::SystemClock, dedup_index::SqliteDedupIndex, fetcher::HttpFetcher,
        ingest::IngestionPipeline, object_store::LocalObjectStore,
        rate_limiter::SqliteRateLimiter,
    },
};
use sqlx::SqlitePool;
use std::{sync::Arc, time::Duration};

/// Storage runtime: metadata database, object store and the pipeline over
/// them.
#[derive(Clone)]
pub struct Backend {
    pub db: Arc<SqlitePool>,
    pub objects: Arc<LocalObjectStore>,
    pub pipeline: IngestionPipeline,
}

impl Backend {
    pub fn new(db: Arc<SqlitePool>, cfg: &AppConfig) -> IngestResult<Self> {
        let clock = Arc::new(SystemClock::new(cfg.timezone));
        let objects = Arc::new(LocalObjectStore::new(
            cfg.storage_dir.clone(),
            cfg.public_base_url.clone(),
        ));
        let fetcher = HttpFetcher::new(
            Duration::from_secs(cfg.fetch_timeout_secs),
            cfg.max_body_size,
        )?;

        let pipeline = IngestionPipeline {
            fetcher: Arc::new(fetcher),
            limiter: Arc::new(SqliteRateLimiter::new(
                db.clone(),
                clock.clone(),
                cfg.max_daily_uploads,
            )),
            index: Arc::new(SqliteDedupIndex::new(db.clone())),
            objects: objects.clone(),
            clock,
            key_prefix: cfg.key_prefix.clone(),
            max_bytes: cfg.max_body_size,
        };

        Ok(Self {
            db,
            objects,
            pipeline,
        })
    }
}

#[derive(Clone)]
pub struct AppState {
    /// `None` when storage is not configured; uploads then answer 501.
    pub backend: Option<Backend>,
    pub max_body_size: usize,
    pub trust_proxy: bool,
}

impl AppState {
    pub fn backend(&self) -> IngestResult<&Backend> {
        self.backend.as_ref().ok_or(IngestError::UnsupportedRuntime)
    }
}
