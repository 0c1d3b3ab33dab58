//! Transient artifact storage for worker-produced documents.
//!
//! A worker that materializes a transcript inline hands the body to this
//! store; the download subsystem reads it back through `GET /artifacts/{id}`
//! while the transfer runs. The reclaimer releases the entry once the
//! consuming download reaches a terminal state, so buffers never outlive the
//! transfer that reads them and never leak when a batch runs long.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use object_store::{ObjectStore, path::Path as StoragePath};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact not found: {0}")]
    NotFound(String),

    #[error("object store error: {0}")]
    ObjectStore(#[from] object_store::Error),
}

pub type Result<T> = std::result::Result<T, ArtifactError>;

/// Releases one artifact; implemented by `ArtifactStore` and by test
/// doubles that count release calls.
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    async fn release(&self, artifact_id: &str);
}

/// In-memory artifact store over an `object_store` backend.
#[derive(Clone)]
pub struct ArtifactStore {
    store: Arc<dyn ObjectStore>,
}

impl ArtifactStore {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(object_store::memory::InMemory::new()),
        }
    }

    fn path(artifact_id: &str) -> StoragePath {
        StoragePath::from(format!("artifacts/{artifact_id}"))
    }

    /// Store a document body and return its artifact id.
    pub async fn put(&self, body: Bytes) -> Result<String> {
        let artifact_id = Uuid::new_v4().to_string();
        let size = body.len();
        self.store
            .put(&Self::path(&artifact_id), body.into())
            .await?;
        debug!(artifact_id, size, "Artifact stored");
        Ok(artifact_id)
    }

    /// Fetch an artifact body for serving to the download subsystem.
    pub async fn get(&self, artifact_id: &str) -> Result<Bytes> {
        let result = self.store.get(&Self::path(artifact_id)).await.map_err(|e| {
            match e {
                object_store::Error::NotFound { .. } => {
                    ArtifactError::NotFound(artifact_id.to_string())
                }
                other => ArtifactError::ObjectStore(other),
            }
        })?;
        Ok(result.bytes().await?)
    }
}

#[async_trait]
impl ArtifactSink for ArtifactStore {
    async fn release(&self, artifact_id: &str) {
        match self.store.delete(&Self::path(artifact_id)).await {
            Ok(()) => debug!(artifact_id, "Artifact released"),
            Err(object_store::Error::NotFound { .. }) => {
                debug!(artifact_id, "Artifact already released")
            }
            Err(e) => tracing::warn!(artifact_id, error = %e, "Artifact release failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_release() {
        let store = ArtifactStore::in_memory();
        let id = store.put(Bytes::from_static(b"{\"title\":\"t\"}")).await.unwrap();

        let body = store.get(&id).await.unwrap();
        assert_eq!(&body[..], b"{\"title\":\"t\"}");

        store.release(&id).await;
        assert!(matches!(store.get(&id).await, Err(ArtifactError::NotFound(_))));

        // Releasing again is a no-op.
        store.release(&id).await;
    }
}
