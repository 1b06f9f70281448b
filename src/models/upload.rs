//! Inbound upload requests and the accepted-upload ledger.

use bytes::Bytes;
use chrono::NaiveDate;

/// One ingestion call, built per HTTP request and consumed by the pipeline.
#[derive(Debug, Clone)]
pub enum UploadRequest {
    /// Fetch the image from a remote URL.
    FromUrl { source_url: String },
    /// The image arrived as the request body.
    FromBody {
        raw_bytes: Bytes,
        declared_content_type: String,
    },
}

/// Validated image bytes with the content type they were declared as.
#[derive(Debug, Clone)]
pub struct FetchedContent {
    pub bytes: Bytes,
    pub content_type: String,
}

/// One accepted upload attempt, kept only for quota counting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRecord {
    pub client_identifier: String,
    pub date: NaiveDate,
}
