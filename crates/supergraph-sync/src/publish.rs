//! Versioned artifact publication.
//!
//! A publish writes the immutable `supergraph-<version>.graphql` first and
//! only then overwrites `supergraph-latest.graphql` with the same bytes. A
//! reader of the latest key therefore never sees a missing or half-published
//! supergraph: either the previous one or the new one.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{error, info, instrument};

use crate::artifact::{SupergraphArtifact, LATEST_KEY};
use crate::diagnostic::SyncError;
use crate::tools::{run_tool, ToolError};

#[derive(Debug, Error)]
#[error("{0}")]
pub struct StoreError(pub String);

impl From<ToolError> for StoreError {
    fn from(err: ToolError) -> Self {
        Self(err.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self(err.to_string())
    }
}

/// Durable storage addressed by key.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Writes `content` under `key`, replacing what was there. A reader must
    /// see either the old or the new content, never a partial write.
    async fn put(&self, key: &str, content: &[u8]) -> Result<(), StoreError>;

    /// Externally visible address of `key`.
    fn location(&self, key: &str) -> String;
}

/// Google Cloud Storage through `gsutil`.
#[derive(Debug, Clone)]
pub struct GcsStore {
    bucket: String,
    timeout: Duration,
}

impl GcsStore {
    /// `bucket` is a `gs://bucket[/prefix]` URL.
    pub fn new(bucket: impl Into<String>, timeout: Duration) -> Self {
        Self {
            bucket: bucket.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    fn args(&self, source: &str, key: &str) -> Vec<String> {
        let mut args = vec![
            "-q".to_string(),
            "-h".to_string(),
            "Content-Type:text/plain; charset=utf-8".to_string(),
        ];
        // The gateway polls the pointer; a cached copy would hide a publish.
        if key == LATEST_KEY {
            args.push("-h".to_string());
            args.push("Cache-Control:no-cache, max-age=0".to_string());
        }
        args.extend(["cp".to_string(), source.to_string(), self.location(key)]);
        args
    }
}

#[async_trait]
impl ArtifactStore for GcsStore {
    async fn put(&self, key: &str, content: &[u8]) -> Result<(), StoreError> {
        let staged = tempfile::NamedTempFile::new()?;
        tokio::fs::write(staged.path(), content).await?;
        let source = staged.path().display().to_string();

        run_tool("gsutil", &self.args(&source, key), self.timeout).await?;
        Ok(())
    }

    fn location(&self, key: &str) -> String {
        format!("{}/{}", self.bucket, key)
    }
}

/// A local directory. Writes go to a temp file that is renamed into place.
#[derive(Debug, Clone)]
pub struct LocalStore {
    dir: PathBuf,
}

impl LocalStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl ArtifactStore for LocalStore {
    async fn put(&self, key: &str, content: &[u8]) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let staging = self.dir.join(format!(".{}.partial", key));
        tokio::fs::write(&staging, content).await?;
        tokio::fs::rename(&staging, self.dir.join(key)).await?;
        Ok(())
    }

    fn location(&self, key: &str) -> String {
        self.dir.join(key).display().to_string()
    }
}

/// Where a publish put the supergraph. Both paths hold identical bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedArtifactRefs {
    pub version_key: String,
    pub versioned_path: String,
    pub latest_path: String,
}

/// Publishes composed supergraphs to an [`ArtifactStore`].
#[derive(Clone)]
pub struct Publisher {
    store: Arc<dyn ArtifactStore>,
}

impl Publisher {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self { store }
    }

    /// Writes the versioned copy, then moves the latest pointer.
    ///
    /// Neither write is retried. A failed latest write is reported as
    /// [`SyncError::StaleLatest`], separate from a failed versioned write.
    #[instrument(skip_all, fields(version = %artifact.version_key()))]
    pub async fn publish(&self, artifact: &SupergraphArtifact) -> Result<PublishedArtifactRefs, SyncError> {
        let versioned_key = artifact.versioned_key();
        let versioned_path = self.store.location(&versioned_key);
        let latest_path = self.store.location(LATEST_KEY);

        self.store
            .put(&versioned_key, artifact.content())
            .await
            .map_err(|e| SyncError::VersionedPublishFailed {
                path: versioned_path.clone(),
                message: e.to_string(),
            })?;
        info!(path = %versioned_path, bytes = artifact.content().len(), "versioned artifact written");

        if let Err(e) = self.store.put(LATEST_KEY, artifact.content()).await {
            error!(
                versioned_path = %versioned_path,
                latest_path = %latest_path,
                error = %e,
                "latest pointer is stale"
            );
            return Err(SyncError::StaleLatest {
                versioned_path,
                latest_path,
                message: e.to_string(),
            });
        }
        info!(path = %latest_path, "latest pointer updated");

        Ok(PublishedArtifactRefs {
            version_key: artifact.version_key().to_string(),
            versioned_path,
            latest_path,
        })
    }
}
