//! Object storage collaborator and the bounded gateway services talk to.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::config::StorageConfig;

pub const LOGO_FOLDER: &str = "logos";
pub const ID_PHOTO_FOLDER: &str = "ids";
pub const LICENSE_PHOTO_FOLDER: &str = "licenses";

/// Image types accepted for logos and document photos.
pub const ALLOWED_IMAGE_TYPES: [&str; 4] = ["image/jpeg", "image/png", "image/webp", "image/gif"];

/// File received from a client, not yet stored.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for ImageUpload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageUpload")
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl ImageUpload {
    pub fn new(
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            bytes: bytes.into(),
        }
    }

    /// Checked before any storage call so bad input never reaches the bucket.
    pub fn validate(&self, max_bytes: usize) -> Result<(), UploadRejection> {
        let essence = self
            .content_type
            .parse::<mime::Mime>()
            .map(|parsed| parsed.essence_str().to_ascii_lowercase())
            .map_err(|_| UploadRejection::UnsupportedType(self.content_type.clone()))?;

        if !ALLOWED_IMAGE_TYPES.contains(&essence.as_str()) {
            return Err(UploadRejection::UnsupportedType(self.content_type.clone()));
        }
        if self.bytes.is_empty() {
            return Err(UploadRejection::Empty);
        }
        if self.bytes.len() > max_bytes {
            return Err(UploadRejection::TooLarge {
                size: self.bytes.len(),
                limit: max_bytes,
            });
        }
        Ok(())
    }
}

/// Client-side problems with an upload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UploadRejection {
    #[error("Incorrect image type '{0}', expected one of jpeg, png, webp, gif")]
    UnsupportedType(String),
    #[error("File is empty")]
    Empty,
    #[error("File is too large ({size} bytes, limit {limit})")]
    TooLarge { size: usize, limit: usize },
}

/// Failures of the storage backend itself.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("upload failed: {0}")]
    Upload(String),
    #[error("delete failed: {0}")]
    Delete(String),
    #[error("storage {operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Store `file` under `folder` and return its public URL. Keys are unique
    /// even when file names collide.
    async fn upload(&self, file: ImageUpload, folder: &str) -> Result<String, StorageError>;

    async fn delete(&self, url: &str) -> Result<(), StorageError>;

    async fn delete_many(&self, urls: &[String]) -> Result<(), StorageError> {
        let mut failures = Vec::new();
        for url in urls {
            if let Err(err) = self.delete(url).await {
                failures.push(err.to_string());
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(StorageError::Delete(failures.join("; ")))
        }
    }
}

/// Storage access with per-call timeouts and the upload size limit applied.
pub struct AssetGateway<O> {
    storage: Arc<O>,
    timeout: Duration,
    max_upload_bytes: usize,
}

impl<O> Clone for AssetGateway<O> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
            timeout: self.timeout,
            max_upload_bytes: self.max_upload_bytes,
        }
    }
}

impl<O> AssetGateway<O>
where
    O: ObjectStorage + 'static,
{
    pub fn new(storage: Arc<O>, config: &StorageConfig) -> Self {
        Self {
            storage,
            timeout: config.timeout,
            max_upload_bytes: config.max_upload_bytes,
        }
    }

    pub fn check(&self, upload: &ImageUpload) -> Result<(), UploadRejection> {
        upload.validate(self.max_upload_bytes)
    }

    pub async fn upload(&self, file: ImageUpload, folder: &str) -> Result<String, StorageError> {
        tokio::time::timeout(self.timeout, self.storage.upload(file, folder))
            .await
            .map_err(|_| StorageError::Timeout {
                operation: "upload",
                after: self.timeout,
            })?
    }

    /// Upload several files in order. If one fails, the ones already stored
    /// are discarded before the error is returned.
    pub async fn upload_all(
        &self,
        files: Vec<(ImageUpload, &'static str)>,
    ) -> Result<Vec<String>, StorageError> {
        let mut stored = Vec::with_capacity(files.len());
        for (file, folder) in files {
            match self.upload(file, folder).await {
                Ok(url) => stored.push(url),
                Err(err) => {
                    self.discard(&stored).await;
                    return Err(err);
                }
            }
        }
        Ok(stored)
    }

    pub async fn delete_many(&self, urls: &[String]) -> Result<(), StorageError> {
        tokio::time::timeout(self.timeout, self.storage.delete_many(urls))
            .await
            .map_err(|_| StorageError::Timeout {
                operation: "delete",
                after: self.timeout,
            })?
    }

    /// Best-effort cleanup: failures are logged, never surfaced.
    pub async fn discard(&self, urls: &[String]) {
        if urls.is_empty() {
            return;
        }
        if let Err(err) = self.delete_many(urls).await {
            warn!(error = %err, assets = ?urls, "asset cleanup failed");
        }
    }
}
