//! Defines routes for the ingestion proxy.
//!
//! ## Structure
//! - **Upload endpoints**
//!   - `POST /upload-from-url`  — ingest an image by remote URL
//!   - `POST /upload-from-body` — ingest the raw request body
//!
//! - **Serving**
//!   - `GET /images/{*key}` — stream a stored image
//!
//! - **Probes**
//!   - `GET /healthz`, `GET /readyz`

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        image_handlers::get_image,
        upload_handlers::{upload_from_body, upload_from_url},
    },
    state::AppState,
};
use axum::{
    Router,
    routing::{get, post},
};

/// Build and return the router. Handlers share `AppState`.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/upload-from-url", post(upload_from_url))
        .route("/upload-from-body", post(upload_from_body))
        .route("/images/{*key}", get(get_image))
}
