//! Retrieval and validation of image bytes, from a remote URL or from the
//! inbound request body.
//!
//! Both paths check the declared `content-type` and `content-length` before
//! touching the body, then read the body with a hard cutoff at the byte
//! ceiling so an understated or missing length header cannot smuggle in a
//! larger payload.

use crate::{
    errors::{IngestError, IngestResult},
    models::upload::FetchedContent,
    services::content_type::is_image,
};
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{HeaderMap, header},
};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use reqwest::{Client, Url};
use std::time::Duration;
use tracing::debug;

/// Source of remote images.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> IngestResult<FetchedContent>;
}

/// Parse and check a caller-supplied source URL.
pub fn parse_source_url(raw: &str) -> IngestResult<Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(IngestError::InvalidInput("Missing URL".into()));
    }
    let url = Url::parse(trimmed)
        .map_err(|err| IngestError::InvalidInput(format!("Invalid URL: {}", err)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(IngestError::InvalidInput(format!(
            "Unsupported URL scheme `{}`",
            url.scheme()
        )));
    }
    Ok(url)
}

/// Validate a declared content type and length against the ceiling.
///
/// Returns the content type to store the image with.
pub fn check_declared(
    content_type: Option<&str>,
    content_length: Option<u64>,
    max_bytes: usize,
) -> IngestResult<String> {
    let content_type = match content_type.map(str::trim) {
        Some(ct) if !ct.is_empty() => ct,
        _ => return Err(IngestError::InvalidFormat),
    };
    if !is_image(content_type) {
        return Err(IngestError::InvalidFormat);
    }
    if content_length.is_some_and(|len| len > max_bytes as u64) {
        return Err(IngestError::TooLarge);
    }
    Ok(content_type.to_string())
}

/// Fetches images over HTTP(S) with a request timeout.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    max_bytes: usize,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, max_bytes: usize) -> IngestResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| IngestError::FetchFailed(err.to_string()))?;
        Ok(Self { client, max_bytes })
    }
}

#[async_trait]
impl SourceFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> IngestResult<FetchedContent> {
        let url = parse_source_url(url)?;
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(fetch_failed)?;

        if !resp.status().is_success() {
            return Err(IngestError::FetchFailed(format!(
                "upstream returned {}",
                resp.status()
            )));
        }

        let declared_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let content_type =
            check_declared(declared_type.as_deref(), resp.content_length(), self.max_bytes)?;

        let mut buf = BytesMut::new();
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(fetch_failed)?;
            if buf.len() + chunk.len() > self.max_bytes {
                return Err(IngestError::TooLarge);
            }
            buf.extend_from_slice(&chunk);
        }

        debug!(%url, size_bytes = buf.len(), %content_type, "fetched source image");
        Ok(FetchedContent {
            bytes: buf.freeze(),
            content_type,
        })
    }
}

fn fetch_failed(err: reqwest::Error) -> IngestError {
    if err.is_timeout() {
        IngestError::FetchFailed("request timed out".into())
    } else {
        IngestError::FetchFailed(err.to_string())
    }
}

/// Validate the inbound request headers and read the body.
///
/// A missing `content-type` is an input error here, unlike a remote source
/// that simply did not declare one.
pub async fn read_body(
    headers: &HeaderMap,
    body: Body,
    max_bytes: usize,
) -> IngestResult<FetchedContent> {
    let declared_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| IngestError::InvalidInput("Missing content type".into()))?;

    let declared_length = match headers.get(header::CONTENT_LENGTH) {
        Some(value) => Some(
            value
                .to_str()
                .ok()
                .and_then(|v| v.trim().parse::<u64>().ok())
                .ok_or_else(|| IngestError::InvalidInput("Invalid content length".into()))?,
        ),
        None => None,
    };

    let content_type = check_declared(Some(declared_type), declared_length, max_bytes)?;

    let bytes: Bytes = axum::body::to_bytes(body, max_bytes)
        .await
        .map_err(|_| IngestError::TooLarge)?;
    if bytes.is_empty() {
        return Err(IngestError::InvalidInput("Empty request body".into()));
    }

    Ok(FetchedContent {
        bytes,
        content_type,
    })
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::{
        collections::HashMap,
        sync::{
            Mutex,
            atomic::{AtomicUsize, Ordering},
        },
    };

    /// Serves canned responses and counts calls.
    #[derive(Default)]
    pub struct FakeFetcher {
        responses: Mutex<HashMap<String, IngestResult<FetchedContent>>>,
        calls: AtomicUsize,
    }

    impl FakeFetcher {
        pub fn with_image(self, url: &str, bytes: &'static [u8], content_type: &str) -> Self {
            self.responses.lock().unwrap().insert(
                url.to_string(),
                Ok(FetchedContent {
                    bytes: Bytes::from_static(bytes),
                    content_type: content_type.to_string(),
                }),
            );
            self
        }

        pub fn with_error(self, url: &str, err: IngestError) -> Self {
            self.responses
                .lock()
                .unwrap()
                .insert(url.to_string(), Err(err));
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SourceFetcher for FakeFetcher {
        async fn fetch(&self, url: &str) -> IngestResult<FetchedContent> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .unwrap_or_else(|| Err(IngestError::FetchFailed("upstream returned 404".into())))
        }
    }
}
