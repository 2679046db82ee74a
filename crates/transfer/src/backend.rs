//! Remote object storage contract and the process-wide backend registry.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use futures_util::Stream;

use crate::TransferError;

/// Errors reported by a transfer backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rejected: {0}")]
    Rejected(String),

    #[error("unavailable: {0}")]
    Unavailable(String),
}

/// Body of a resumable download.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, BackendError>> + Send>>;

/// A download started at some offset of the remote object.
pub struct DownloadStream {
    /// Size of the whole remote object, not of the remaining body.
    pub total_size: u64,
    pub body: ByteStream,
}

/// Chunk staging, commit and offset-resumable download against a remote
/// object store. Retries and timeouts are the backend's own business.
#[async_trait]
pub trait TransferBackend: Send + Sync {
    /// Stages one chunk under `remote_chunk_id`. The chunk is not visible
    /// as part of the object until [`commit`](Self::commit).
    async fn stage_chunk(
        &self,
        container: &str,
        object: &str,
        remote_chunk_id: &str,
        data: Vec<u8>,
    ) -> Result<(), BackendError>;

    /// Assembles previously staged chunks, in the given order, into the
    /// final object.
    async fn commit(
        &self,
        container: &str,
        object: &str,
        remote_chunk_ids: &[String],
    ) -> Result<(), BackendError>;

    /// Streams the object starting at `start_offset`.
    async fn download_from(
        &self,
        container: &str,
        object: &str,
        start_offset: u64,
    ) -> Result<DownloadStream, BackendError>;
}

/// Backends available to handlers, keyed by the name stored on each
/// transfer record.
///
/// A transfer created in one process may be resumed by another; the
/// registry only has to know the name again, not the original instance.
#[derive(Default)]
pub struct BackendRegistry {
    backends: RwLock<HashMap<String, Arc<dyn TransferBackend>>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `backend` under `name`, replacing any previous entry.
    pub fn register(&self, name: impl Into<String>, backend: Arc<dyn TransferBackend>) {
        let name = name.into();
        tracing::debug!(backend = %name, "registered transfer backend");
        self.backends
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name, backend);
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.backends
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name)
            .is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.backends
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(name)
    }

    /// Looks up the backend for a transfer.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn TransferBackend>, TransferError> {
        self.backends
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
            .ok_or_else(|| TransferError::UnresolvedBackend(name.to_string()))
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let backends = self.backends.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<_> = backends.keys().collect();
        names.sort();
        f.debug_struct("BackendRegistry")
            .field("backends", &names)
            .finish()
    }
}
