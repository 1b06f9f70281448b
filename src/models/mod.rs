//! Core data models for the image ingestion proxy.
//!
//! `ImageAsset` maps to the `images` table via `sqlx::FromRow`; the upload
//! types only live for the duration of one request.

pub mod image;
pub mod upload;
