//! Ingestion services: the pipeline and the collaborators it is wired from.

pub mod clock;
pub mod content_type;
pub mod dedup_index;
pub mod fetcher;
pub mod hasher;
pub mod ingest;
pub mod object_store;
pub mod rate_limiter;
