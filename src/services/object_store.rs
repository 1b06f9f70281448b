//! Durable image storage.
//!
//! Objects live at `base_path/{key}` on local disk and are published under
//! `base_url/{key}`. Writes go to a temporary file that is fsynced and then
//! renamed into place, so a key either resolves to the full payload or to
//! nothing.

use crate::errors::{IngestError, IngestResult};
use async_trait::async_trait;
use bytes::Bytes;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

const MAX_OBJECT_KEY_LEN: usize = 1024;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write `bytes` under `key` and return its public URL. The write is
    /// durable once this returns.
    async fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> IngestResult<String>;

    /// Remove an object. Missing objects are not an error.
    async fn delete(&self, key: &str) -> IngestResult<()>;

    /// Base every public URL starts with, without a trailing slash.
    fn base_url(&self) -> &str;

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url(), key)
    }

    /// True when `url` is one this store handed out.
    fn owns_url(&self, url: &str) -> bool {
        url.strip_prefix(self.base_url())
            .and_then(|rest| rest.strip_prefix('/'))
            .is_some_and(|key| !key.is_empty())
    }
}

/// Reject keys that could escape the storage root.
pub fn ensure_key_safe(key: &str) -> IngestResult<()> {
    let invalid = key.is_empty()
        || key.len() > MAX_OBJECT_KEY_LEN
        || key.starts_with('/')
        || key.contains("..")
        || key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0');
    if invalid {
        return Err(IngestError::InvalidInput(format!(
            "invalid object key `{}`",
            key
        )));
    }
    Ok(())
}

/// Local-disk object store.
#[derive(Clone, Debug)]
pub struct LocalObjectStore {
    base_path: PathBuf,
    base_url: String,
}

impl LocalObjectStore {
    pub fn new(base_path: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_path: base_path.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.base_path.join(key)
    }

    /// Open a stored object for reading.
    pub async fn open(&self, key: &str) -> IngestResult<Option<File>> {
        ensure_key_safe(key)?;
        match File::open(self.object_path(key)).await {
            Ok(file) => Ok(Some(file)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(store_failed(err)),
        }
    }

    async fn write_durably(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        let parent = path.parent().map(Path::to_path_buf).ok_or_else(|| {
            io::Error::new(ErrorKind::Other, "object path missing parent directory")
        })?;
        fs::create_dir_all(&parent).await?;

        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let result = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(bytes).await?;
            file.flush().await?;
            file.sync_all().await?;
            fs::rename(&tmp_path, path).await
        }
        .await;

        if result.is_err() {
            let _ = fs::remove_file(&tmp_path).await;
        }
        result
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> IngestResult<String> {
        ensure_key_safe(key)?;
        let path = self.object_path(key);
        self.write_durably(&path, &bytes)
            .await
            .map_err(store_failed)?;

        debug!(
            key,
            content_type,
            size_bytes = bytes.len(),
            "stored object {}",
            path.display()
        );
        Ok(self.public_url(key))
    }

    async fn delete(&self, key: &str) -> IngestResult<()> {
        ensure_key_safe(key)?;
        let path = self.object_path(key);
        match fs::remove_file(&path).await {
            Ok(_) => debug!("removed object {}", path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("object {} already missing", path.display());
            }
            Err(err) => return Err(store_failed(err)),
        }
        Ok(())
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }
}

fn store_failed(err: io::Error) -> IngestError {
    IngestError::StoreFailed(err.to_string())
}
