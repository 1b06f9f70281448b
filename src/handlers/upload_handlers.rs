//! HTTP handlers for the two ingestion entry points.
//!
//! - `POST /upload-from-url`  -> `{ "url": ... }` body or `?url=` query
//! - `POST /upload-from-body` -> raw image bytes
//!
//! Both answer `{ "success": true, "url": ... }` or an `AppError` body.

use crate::{
    errors::{AppError, IngestError},
    models::upload::UploadRequest,
    services::fetcher::read_body,
    state::AppState,
};
use axum::{
    Json,
    body::{Body, Bytes},
    extract::{ConnectInfo, FromRequestParts, Query, State},
    http::{HeaderMap, request::Parts},
};
use serde::{Deserialize, Serialize};
use std::{
    convert::Infallible,
    net::{IpAddr, SocketAddr},
};

/// Query params accepted by `/upload-from-url`.
#[derive(Debug, Deserialize)]
pub struct UrlQuery {
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UrlPayload {
    url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub success: bool,
    pub url: String,
}

/// Address used to bucket the caller's upload quota.
#[derive(Debug, Clone, Copy)]
pub struct ClientIp(pub Option<IpAddr>);

impl ClientIp {
    fn identifier(&self) -> Option<String> {
        self.0.map(|ip| ip.to_string())
    }
}

impl FromRequestParts<AppState> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let remote_addr = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(ClientIp(extract_client_ip(
            remote_addr,
            &parts.headers,
            state.trust_proxy,
        )))
    }
}

/// Client IP from proxy headers (when trusted) or the socket peer.
fn extract_client_ip(
    remote_addr: Option<SocketAddr>,
    headers: &HeaderMap,
    trust_proxy: bool,
) -> Option<IpAddr> {
    if trust_proxy {
        // Leftmost X-Forwarded-For entry is the original client
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|ip| ip.trim().parse::<IpAddr>().ok());
        if forwarded.is_some() {
            return forwarded;
        }

        let real_ip = headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .and_then(|ip| ip.trim().parse::<IpAddr>().ok());
        if real_ip.is_some() {
            return real_ip;
        }
    }

    remote_addr.map(|addr| addr.ip())
}

/// `POST /upload-from-url`
pub async fn upload_from_url(
    State(state): State<AppState>,
    client: ClientIp,
    Query(query): Query<UrlQuery>,
    body: Bytes,
) -> Result<Json<UploadResponse>, AppError> {
    let backend = state.backend()?;

    // A body that is not JSON only matters when the query names no URL.
    let parsed = (!body.is_empty()).then(|| serde_json::from_slice::<UrlPayload>(&body));
    let from_body = parsed
        .as_ref()
        .and_then(|payload| payload.as_ref().ok())
        .and_then(|payload| payload.url.clone());
    let query_url = query.url.filter(|url| !url.trim().is_empty());

    let source_url = match from_body.filter(|url| !url.trim().is_empty()).or(query_url) {
        Some(url) => url,
        None if matches!(parsed, Some(Err(_))) => {
            return Err(IngestError::InvalidInput("Invalid JSON body".into()).into());
        }
        None => return Err(IngestError::InvalidInput("Missing URL".into()).into()),
    };

    let url = backend
        .pipeline
        .ingest(
            UploadRequest::FromUrl { source_url },
            client.identifier().as_deref(),
        )
        .await?;

    Ok(Json(UploadResponse { success: true, url }))
}

/// `POST /upload-from-body`
pub async fn upload_from_body(
    State(state): State<AppState>,
    client: ClientIp,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<UploadResponse>, AppError> {
    let backend = state.backend()?;

    let content = read_body(&headers, body, state.max_body_size).await?;
    let request = UploadRequest::FromBody {
        raw_bytes: content.bytes,
        declared_content_type: content.content_type,
    };

    let url = backend
        .pipeline
        .ingest(request, client.identifier().as_deref())
        .await?;

    Ok(Json(UploadResponse { success: true, url }))
}
