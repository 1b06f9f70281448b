//! Serves stored images so canonical URLs resolve when the public base URL
//! points back at this server.

use crate::{
    errors::AppError,
    services::content_type::ImageKind,
    state::AppState,
};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderValue, StatusCode, header},
    response::Response,
};
use tokio_util::io::ReaderStream;

/// `GET /images/{*key}` as a streaming response.
pub async fn get_image(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Response, AppError> {
    let backend = state.backend()?;
    let file = backend
        .objects
        .open(&key)
        .await?
        .ok_or_else(|| AppError::not_found(format!("image `{}` not found", key)))?;

    let content_type = key
        .rsplit_once('.')
        .and_then(|(_, ext)| ImageKind::from_extension(ext))
        .map(ImageKind::mime)
        .unwrap_or("application/octet-stream");

    let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    // Keys are never reused, so stored objects never change.
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=31536000, immutable"),
    );
    Ok(response)
}
