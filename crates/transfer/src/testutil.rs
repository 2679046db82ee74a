//! In-process collaborators for handler tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream;
use tokio::sync::Semaphore;

use blobferry_protocol::{
    Constraints, ErrorKind, LocalLocator, NewTransfer, TransferId, TransferKind,
};

use crate::accessor::{AccessMode, AccessorProvider, ContentAccessor};
use crate::backend::{BackendError, BackendRegistry, DownloadStream, TransferBackend};
use crate::chunked::plan_chunks;
use crate::config::EngineConfig;
use crate::handler::HandlerContext;
use crate::listener::TransferListener;
use crate::memory::MemoryStore;
use crate::store::MetadataStore;
use crate::TransferError;

pub(crate) const BACKEND: &str = "scripted";
const DOWNLOAD_PIECE: usize = 10;

/// Polls `cond` until it holds, panicking after five seconds.
pub(crate) async fn wait_until(cond: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

// ---------------------------------------------------------------------------
// ScriptedBackend
// ---------------------------------------------------------------------------

/// Backend that counts, optionally gates and optionally fails operations.
///
/// When gated, every stage operation and every download piece waits for a
/// permit handed out with [`release`](Self::release). Scripted chunk
/// failures happen immediately, before the gate.
#[derive(Default)]
pub(crate) struct ScriptedBackend {
    gate: Option<Arc<Semaphore>>,
    failing: Mutex<HashSet<String>>,
    pub started: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    blocks: Mutex<HashMap<String, Vec<u8>>>,
    staged: Mutex<Vec<String>>,
    pub commits: Mutex<Vec<Vec<String>>>,
    pub fail_commit: AtomicBool,
    object: Mutex<Arc<Vec<u8>>>,
    pub download_fail_at: Mutex<Option<usize>>,
    pub download_truncate_at: Mutex<Option<usize>>,
    pub download_offsets: Mutex<Vec<u64>>,
}

impl ScriptedBackend {
    pub fn gated() -> Self {
        Self {
            gate: Some(Arc::new(Semaphore::new(0))),
            ..Default::default()
        }
    }

    pub fn release(&self, permits: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(permits);
        }
    }

    pub fn fail_chunk(&self, remote_chunk_id: &str) {
        self.failing.lock().unwrap().insert(remote_chunk_id.to_string());
    }

    /// Stores a block as if an earlier run had staged it.
    pub fn preload(&self, remote_chunk_id: &str, data: Vec<u8>) {
        self.blocks
            .lock()
            .unwrap()
            .insert(remote_chunk_id.to_string(), data);
    }

    pub fn staged_ids(&self) -> Vec<String> {
        self.staged.lock().unwrap().clone()
    }

    /// Bytes of the object assembled by the `index`th commit.
    pub fn assembled(&self, index: usize) -> Vec<u8> {
        let commits = self.commits.lock().unwrap();
        let blocks = self.blocks.lock().unwrap();
        commits[index]
            .iter()
            .flat_map(|id| blocks[id].iter().copied())
            .collect()
    }

    pub fn set_object(&self, data: Vec<u8>) {
        *self.object.lock().unwrap() = Arc::new(data);
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl TransferBackend for ScriptedBackend {
    async fn stage_chunk(
        &self,
        _container: &str,
        _object: &str,
        remote_chunk_id: &str,
        data: Vec<u8>,
    ) -> Result<(), BackendError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        // Also released when the operation is aborted at the gate.
        let _in_flight = InFlight(&self.in_flight);

        if self.failing.lock().unwrap().contains(remote_chunk_id) {
            return Err(BackendError::Unavailable("scripted failure".into()));
        }

        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|_| BackendError::Unavailable("gate closed".into()))?
                .forget();
        } else {
            tokio::task::yield_now().await;
        }

        self.blocks
            .lock()
            .unwrap()
            .insert(remote_chunk_id.to_string(), data);
        self.staged.lock().unwrap().push(remote_chunk_id.to_string());
        Ok(())
    }

    async fn commit(
        &self,
        _container: &str,
        _object: &str,
        remote_chunk_ids: &[String],
    ) -> Result<(), BackendError> {
        if self.fail_commit.load(Ordering::SeqCst) {
            return Err(BackendError::Rejected("scripted commit failure".into()));
        }
        self.commits.lock().unwrap().push(remote_chunk_ids.to_vec());
        Ok(())
    }

    async fn download_from(
        &self,
        _container: &str,
        _object: &str,
        start_offset: u64,
    ) -> Result<DownloadStream, BackendError> {
        self.download_offsets.lock().unwrap().push(start_offset);

        let data = Arc::clone(&self.object.lock().unwrap());
        let total_size = data.len() as u64;
        let end = self.download_truncate_at.lock().unwrap().unwrap_or(data.len());
        let fail_at = *self.download_fail_at.lock().unwrap();
        let gate = self.gate.clone();

        let body = stream::unfold(start_offset as usize, move |pos| {
            let data = Arc::clone(&data);
            let gate = gate.clone();
            async move {
                if pos >= end {
                    return None;
                }
                if let Some(gate) = gate {
                    gate.acquire().await.ok()?.forget();
                }
                if fail_at.is_some_and(|at| pos >= at) {
                    let err = BackendError::Unavailable("connection reset".into());
                    return Some((Err(err), end));
                }
                let next = (pos + DOWNLOAD_PIECE).min(end);
                Some((Ok(data[pos..next].to_vec()), next))
            }
        });

        Ok(DownloadStream {
            total_size,
            body: Box::pin(body),
        })
    }
}

// ---------------------------------------------------------------------------
// In-memory content
// ---------------------------------------------------------------------------

pub(crate) struct MemoryAccessor {
    data: Arc<Mutex<Vec<u8>>>,
    closed: AtomicBool,
}

impl MemoryAccessor {
    fn check_open(&self) -> Result<(), TransferError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(TransferError::AccessorClosed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ContentAccessor for MemoryAccessor {
    async fn length(&self) -> Result<u64, TransferError> {
        self.check_open()?;
        Ok(self.data.lock().unwrap().len() as u64)
    }

    async fn read_range(&self, offset: u64, size: u64) -> Result<Vec<u8>, TransferError> {
        self.check_open()?;
        let data = self.data.lock().unwrap();
        let (start, end) = (offset as usize, (offset + size) as usize);
        data.get(start..end).map(<[u8]>::to_vec).ok_or_else(|| {
            TransferError::Io(std::io::Error::from(std::io::ErrorKind::UnexpectedEof))
        })
    }

    async fn write_range(&self, offset: u64, bytes: &[u8]) -> Result<(), TransferError> {
        self.check_open()?;
        let mut data = self.data.lock().unwrap();
        let (start, end) = (offset as usize, offset as usize + bytes.len());
        if data.len() < end {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(bytes);
        Ok(())
    }

    async fn close(&self) -> Result<(), TransferError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(TransferError::AccessorClosed);
        }
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct MemoryAccessorProvider {
    contents: Mutex<HashMap<String, Arc<Mutex<Vec<u8>>>>>,
}

impl MemoryAccessorProvider {
    pub fn put(&self, location: &str, data: Vec<u8>) {
        self.contents
            .lock()
            .unwrap()
            .insert(location.to_string(), Arc::new(Mutex::new(data)));
    }

    pub fn get(&self, location: &str) -> Vec<u8> {
        let contents = self.contents.lock().unwrap();
        contents[location].lock().unwrap().clone()
    }
}

#[async_trait]
impl AccessorProvider for MemoryAccessorProvider {
    async fn open(
        &self,
        locator: &LocalLocator,
        mode: AccessMode,
    ) -> Result<Arc<dyn ContentAccessor>, TransferError> {
        let mut contents = self.contents.lock().unwrap();
        let data = match (contents.get(&locator.location), mode) {
            (Some(data), _) => Arc::clone(data),
            (None, AccessMode::Read) => {
                return Err(TransferError::ContentNotFound(locator.location.clone()));
            }
            (None, AccessMode::Write) => {
                let data = Arc::new(Mutex::new(Vec::new()));
                contents.insert(locator.location.clone(), Arc::clone(&data));
                data
            }
        };
        Ok(Arc::new(MemoryAccessor {
            data,
            closed: AtomicBool::new(false),
        }))
    }
}

// ---------------------------------------------------------------------------
// RecordingListener
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Recorded {
    Progress(u64, u64),
    UserPaused,
    SystemPaused,
    Resumed,
    Complete,
    Error(ErrorKind),
}

#[derive(Default)]
pub(crate) struct RecordingListener {
    events: Mutex<Vec<Recorded>>,
}

impl RecordingListener {
    fn push(&self, event: Recorded) {
        self.events.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<Recorded> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    pub fn last(&self) -> Option<Recorded> {
        self.events.lock().unwrap().last().cloned()
    }

    pub fn contains(&self, event: &Recorded) -> bool {
        self.events.lock().unwrap().contains(event)
    }

    pub fn count(&self, event: &Recorded) -> usize {
        self.events.lock().unwrap().iter().filter(|e| *e == event).count()
    }

    pub fn errors(&self) -> Vec<ErrorKind> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                Recorded::Error(kind) => Some(*kind),
                _ => None,
            })
            .collect()
    }
}

impl TransferListener for RecordingListener {
    fn on_progress(&self, total_bytes: u64, transferred_bytes: u64) {
        self.push(Recorded::Progress(total_bytes, transferred_bytes));
    }

    fn on_user_paused(&self) {
        self.push(Recorded::UserPaused);
    }

    fn on_system_paused(&self) {
        self.push(Recorded::SystemPaused);
    }

    fn on_resumed(&self) {
        self.push(Recorded::Resumed);
    }

    fn on_complete(&self) {
        self.push(Recorded::Complete);
    }

    fn on_error(&self, error: &TransferError) {
        self.push(Recorded::Error(error.kind()));
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// Store, scripted backend, in-memory content and a recording listener.
#[derive(Clone)]
pub(crate) struct Harness {
    pub store: Arc<MemoryStore>,
    pub backend: Arc<ScriptedBackend>,
    pub backends: Arc<BackendRegistry>,
    pub accessors: Arc<MemoryAccessorProvider>,
    pub listener: Arc<RecordingListener>,
    pub config: EngineConfig,
}

impl Harness {
    pub fn new(concurrency: usize) -> Self {
        Self::with_backend(ScriptedBackend::default(), concurrency)
    }

    pub fn gated(concurrency: usize) -> Self {
        Self::with_backend(ScriptedBackend::gated(), concurrency)
    }

    fn with_backend(backend: ScriptedBackend, concurrency: usize) -> Self {
        let backend = Arc::new(backend);
        let backends = Arc::new(BackendRegistry::new());
        backends.register(BACKEND, Arc::clone(&backend) as Arc<dyn TransferBackend>);
        Self {
            store: Arc::new(MemoryStore::new()),
            backend,
            backends,
            accessors: Arc::new(MemoryAccessorProvider::default()),
            listener: Arc::new(RecordingListener::default()),
            config: EngineConfig {
                upload_concurrency: concurrency,
                ..Default::default()
            },
        }
    }

    pub fn ctx(&self) -> HandlerContext {
        HandlerContext {
            store: Arc::clone(&self.store) as Arc<dyn MetadataStore>,
            backends: Arc::clone(&self.backends),
            accessors: Arc::clone(&self.accessors) as Arc<dyn AccessorProvider>,
            config: self.config.clone(),
        }
    }

    /// Creates an upload of `data`, stored as in-memory content "content".
    pub async fn seed_upload(&self, data: &[u8], chunk_size: u64) -> TransferId {
        self.seed_upload_with_backend(data, chunk_size, BACKEND).await
    }

    pub async fn seed_upload_with_backend(
        &self,
        data: &[u8],
        chunk_size: u64,
        backend_id: &str,
    ) -> TransferId {
        self.accessors.put("content", data.to_vec());
        let size = data.len() as u64;
        self.store
            .create_transfer_with_chunks(
                NewTransfer {
                    kind: TransferKind::Upload,
                    container_name: "bucket".into(),
                    object_name: "object.bin".into(),
                    backend_id: backend_id.into(),
                    locator: LocalLocator::path("content"),
                    total_size: Some(size),
                    constraints: Constraints::default(),
                },
                plan_chunks(size, chunk_size),
            )
            .await
            .unwrap()
    }

    /// Creates a download of `object` into in-memory content "download".
    pub async fn seed_download(&self, object: Vec<u8>) -> TransferId {
        self.backend.set_object(object);
        self.store
            .create_transfer_with_chunks(
                NewTransfer {
                    kind: TransferKind::Download,
                    container_name: "bucket".into(),
                    object_name: "object.bin".into(),
                    backend_id: BACKEND.into(),
                    locator: LocalLocator::path("download"),
                    total_size: None,
                    constraints: Constraints::default(),
                },
                Vec::new(),
            )
            .await
            .unwrap()
    }
}
