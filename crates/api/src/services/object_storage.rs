//! Object storage clients for export artifacts.
//!
//! `local` writes files under a directory; `http` PUTs to an S3-compatible
//! endpoint. Both return `{public_base_url}/{key}` on success.

use async_trait::async_trait;
use domain::services::{public_object_url, validate_object_key, ObjectStorage, StorageError};
use reqwest::{header::CONTENT_TYPE, Client};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{ObjectStorageConfig, ObjectStorageProvider};

/// Response bodies of rejected uploads are cut to this many characters.
const MAX_REJECTION_BODY: usize = 200;

/// Builds the configured storage client.
pub fn build_object_storage(
    config: &ObjectStorageConfig,
) -> Result<Arc<dyn ObjectStorage>, StorageError> {
    let storage: Arc<dyn ObjectStorage> = match config.provider {
        ObjectStorageProvider::Local => Arc::new(LocalObjectStorage::new(
            &config.local_root,
            &config.public_base_url,
        )),
        ObjectStorageProvider::Http => Arc::new(HttpObjectStorage::new(config)?),
    };
    Ok(storage)
}

/// Filesystem storage rooted at a directory.
#[derive(Debug, Clone)]
pub struct LocalObjectStorage {
    root: PathBuf,
    public_base_url: String,
}

impl LocalObjectStorage {
    pub fn new(root: impl Into<PathBuf>, public_base_url: &str) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.to_string(),
        }
    }
}

#[async_trait]
impl ObjectStorage for LocalObjectStorage {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<String, StorageError> {
        validate_object_key(key)?;
        let path = self.root.join(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::Io(format!("{}: {}", parent.display(), e)))?;
        }

        // Write then rename so a reader never sees a partial file.
        let partial = path.with_extension("part");
        tokio::fs::write(&partial, &bytes)
            .await
            .map_err(|e| StorageError::Io(format!("{}: {}", partial.display(), e)))?;
        tokio::fs::rename(&partial, &path)
            .await
            .map_err(|e| StorageError::Io(format!("{}: {}", path.display(), e)))?;

        Ok(public_object_url(&self.public_base_url, key))
    }
}

/// S3-compatible HTTP storage.
#[derive(Debug, Clone)]
pub struct HttpObjectStorage {
    client: Client,
    endpoint: String,
    bucket: String,
    public_base_url: String,
    access_token: Option<String>,
}

impl HttpObjectStorage {
    pub fn new(config: &ObjectStorageConfig) -> Result<Self, StorageError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| StorageError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            bucket: config.bucket.clone(),
            public_base_url: config.public_base_url.clone(),
            access_token: Some(config.access_token.clone()).filter(|t| !t.is_empty()),
        })
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint, self.bucket, key)
    }
}

#[async_trait]
impl ObjectStorage for HttpObjectStorage {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StorageError> {
        validate_object_key(key)?;

        let mut request = self
            .client
            .put(self.object_url(key))
            .header(CONTENT_TYPE, content_type)
            .header("x-amz-acl", "public-read")
            .body(bytes);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| StorageError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::Rejected {
                status: status.as_u16(),
                body: body.chars().take(MAX_REJECTION_BODY).collect(),
            });
        }

        tracing::debug!(key = %key, status = status.as_u16(), "Object uploaded");
        Ok(public_object_url(&self.public_base_url, key))
    }
}
