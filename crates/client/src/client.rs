//! The outward-facing transfer client.
//!
//! Every bookkeeping operation (create, pause, cancel, resume, remove)
//! runs on one [`SerialExecutor`] lane, so concurrent callers never
//! interleave their record reads and writes.

use std::sync::Arc;

use tracing::{debug, info};

use blobferry_protocol::{
    DownloadRequest, InterruptState, NewTransfer, TransferEvent, TransferId, TransferKind,
    TransferRecord, TransferState, UploadRequest,
};
use blobferry_transfer::{
    AccessMode, AccessorProvider, BackendRegistry, EngineConfig, MetadataStore, TransferBackend,
    TransferEngine, TransferError, plan_chunks,
};

use crate::error::{ClientError, TerminalReason, not_found};
use crate::events::{EventHub, Subscription};
use crate::runner::EngineRunner;
use crate::scheduler::{DeviceMonitor, LocalScheduler, Scheduler, TransferRunner, WorkRequest};
use crate::serial::SerialExecutor;
use crate::validation::{Validated, validate_download, validate_upload};

type SchedulerFactory = Box<dyn FnOnce(Arc<dyn TransferRunner>) -> Arc<dyn Scheduler> + Send>;

/// Creates, controls and observes transfers.
pub struct TransferClient {
    engine: TransferEngine,
    scheduler: Arc<dyn Scheduler>,
    events: EventHub,
    lane: SerialExecutor,
}

/// Builder for [`TransferClient`].
pub struct TransferClientBuilder {
    store: Option<Arc<dyn MetadataStore>>,
    accessors: Option<Arc<dyn AccessorProvider>>,
    backends: Arc<BackendRegistry>,
    config: EngineConfig,
    device: Option<DeviceMonitor>,
    scheduler: Option<SchedulerFactory>,
}

impl TransferClientBuilder {
    pub fn store(mut self, store: Arc<dyn MetadataStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn accessors(mut self, accessors: Arc<dyn AccessorProvider>) -> Self {
        self.accessors = Some(accessors);
        self
    }

    pub fn backend(self, name: impl Into<String>, backend: Arc<dyn TransferBackend>) -> Self {
        self.backends.register(name, backend);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Device conditions for the built-in [`LocalScheduler`].
    pub fn device_monitor(mut self, device: DeviceMonitor) -> Self {
        self.device = Some(device);
        self
    }

    /// Replaces the built-in scheduler. The factory receives the runner
    /// that executes handlers.
    pub fn scheduler<F>(mut self, factory: F) -> Self
    where
        F: FnOnce(Arc<dyn TransferRunner>) -> Arc<dyn Scheduler> + Send + 'static,
    {
        self.scheduler = Some(Box::new(factory));
        self
    }

    /// Builds the client. Must be called inside a tokio runtime.
    pub fn build(self) -> Result<TransferClient, ClientError> {
        let store = self
            .store
            .ok_or(ClientError::MissingComponent("metadata store"))?;
        let accessors = self
            .accessors
            .ok_or(ClientError::MissingComponent("content accessor provider"))?;
        self.config.validate().map_err(ClientError::InvalidConfig)?;

        let engine = TransferEngine::new(store, self.backends, accessors, self.config);
        let events = EventHub::new();
        let lane = SerialExecutor::new();
        let runner: Arc<dyn TransferRunner> = Arc::new(EngineRunner::new(
            engine.clone(),
            events.clone(),
            lane.clone(),
        ));
        let scheduler = match self.scheduler {
            Some(factory) => factory(runner),
            None => Arc::new(LocalScheduler::new(
                runner,
                self.device.unwrap_or_default(),
            )),
        };

        Ok(TransferClient {
            engine,
            scheduler,
            events,
            lane,
        })
    }
}

impl TransferClient {
    pub fn builder() -> TransferClientBuilder {
        TransferClientBuilder {
            store: None,
            accessors: None,
            backends: Arc::new(BackendRegistry::new()),
            config: EngineConfig::default(),
            device: None,
            scheduler: None,
        }
    }

    /// Makes `backend` available to transfers created with `name` as
    /// their backend id, including transfers created by earlier processes.
    pub fn register_backend(&self, name: impl Into<String>, backend: Arc<dyn TransferBackend>) {
        self.engine.backends().register(name, backend);
    }

    /// Creates an upload and schedules it. Returns once the records exist.
    pub async fn upload(&self, request: UploadRequest) -> Result<TransferId, ClientError> {
        let valid = validate_upload(&request)?;
        let engine = self.engine.clone();
        let constraints = valid.constraints;

        let id = self
            .lane
            .run(async move {
                let accessor = engine
                    .accessors()
                    .open(&valid.locator, AccessMode::Read)
                    .await?;
                let length = accessor.length().await;
                if let Err(e) = accessor.close().await {
                    debug!(error = %e, "closing upload content");
                }
                let size = length?;

                let chunks = plan_chunks(size, engine.config().chunk_size);
                let id = engine
                    .store()
                    .create_transfer_with_chunks(
                        new_transfer(TransferKind::Upload, valid, Some(size)),
                        chunks,
                    )
                    .await?;
                Ok::<_, ClientError>(id)
            })
            .await??;

        info!(transfer = %id, "upload created");
        self.scheduler.submit(WorkRequest {
            transfer_id: id,
            kind: TransferKind::Upload,
            constraints,
        });
        Ok(id)
    }

    /// Creates a download and schedules it. Returns once the record exists.
    pub async fn download(&self, request: DownloadRequest) -> Result<TransferId, ClientError> {
        let valid = validate_download(&request)?;
        let store = Arc::clone(self.engine.store());
        let constraints = valid.constraints;

        let id = self
            .lane
            .run(async move {
                let id = store
                    .create_transfer_with_chunks(
                        new_transfer(TransferKind::Download, valid, None),
                        Vec::new(),
                    )
                    .await?;
                Ok::<_, ClientError>(id)
            })
            .await??;

        info!(transfer = %id, "download created");
        self.scheduler.submit(WorkRequest {
            transfer_id: id,
            kind: TransferKind::Download,
            constraints,
        });
        Ok(id)
    }

    /// Marks the transfer user-paused and stops its handler. A transfer
    /// with no pending or running handler is reported paused right away.
    pub async fn pause(&self, id: TransferId) -> Result<(), ClientError> {
        let store = Arc::clone(self.engine.store());
        let scheduler = Arc::clone(&self.scheduler);

        let signalled = self
            .lane
            .run(async move {
                let record = store.get_transfer(id).await.map_err(not_found(id))?;
                ensure_active(&record)?;
                store
                    .update_interrupt_state(id, InterruptState::UserPaused)
                    .await?;
                Ok::<_, ClientError>(scheduler.stop(id))
            })
            .await??;

        info!(transfer = %id, running = signalled, "pause requested");
        if !signalled {
            self.events.publish(TransferEvent::UserPaused { transfer_id: id });
        }
        Ok(())
    }

    /// Cancels the transfer for good. A scheduled run purges it when it
    /// parks or, failing that, once it is settled; otherwise it is purged
    /// here.
    pub async fn cancel(&self, id: TransferId) -> Result<(), ClientError> {
        let store = Arc::clone(self.engine.store());
        let scheduler = Arc::clone(&self.scheduler);

        let signalled = self
            .lane
            .run(async move {
                let record = store.get_transfer(id).await.map_err(not_found(id))?;
                if record.interrupt_state.is_cancelled() {
                    return Err(terminated(id, TerminalReason::Cancelled));
                }
                if record.state == TransferState::Completed {
                    return Err(terminated(id, TerminalReason::Completed));
                }

                store
                    .update_interrupt_state(id, InterruptState::UserCancelled)
                    .await?;
                if scheduler.stop(id) {
                    return Ok(true);
                }
                store
                    .update_interrupt_state(id, InterruptState::Purge)
                    .await?;
                Ok::<_, ClientError>(false)
            })
            .await??;

        info!(transfer = %id, running = signalled, "cancel requested");
        if !signalled {
            let error = TransferError::Cancelled;
            self.events.publish(TransferEvent::Failed {
                transfer_id: id,
                kind: error.kind(),
                message: error.to_string(),
            });
        }
        Ok(())
    }

    /// Clears a pause and schedules the transfer again.
    pub async fn resume(&self, id: TransferId) -> Result<(), ClientError> {
        let store = Arc::clone(self.engine.store());

        let record = self
            .lane
            .run(async move {
                let record = store.get_transfer(id).await.map_err(not_found(id))?;
                ensure_active(&record)?;
                if record.interrupt_state == InterruptState::UserPaused {
                    store
                        .update_interrupt_state(id, InterruptState::None)
                        .await?;
                }
                Ok::<_, ClientError>(record)
            })
            .await??;

        info!(transfer = %id, "resume requested");
        self.scheduler.submit(WorkRequest {
            transfer_id: id,
            kind: record.kind,
            constraints: record.constraints,
        });
        Ok(())
    }

    /// Deletes a finished or cancelled transfer and its chunks.
    pub async fn remove(&self, id: TransferId) -> Result<(), ClientError> {
        let store = Arc::clone(self.engine.store());
        let scheduler = Arc::clone(&self.scheduler);

        self.lane
            .run(async move {
                let record = store.get_transfer(id).await.map_err(not_found(id))?;
                let finished =
                    record.state.is_terminal() || record.interrupt_state.is_cancelled();
                if !finished || scheduler.is_scheduled(id) {
                    return Err(ClientError::InvalidRequest(format!(
                        "transfer {id} is still active; cancel it first"
                    )));
                }
                store.delete_transfer(id).await?;
                Ok::<_, ClientError>(())
            })
            .await??;

        info!(transfer = %id, "transfer removed");
        Ok(())
    }

    pub async fn transfer(&self, id: TransferId) -> Result<TransferRecord, ClientError> {
        let store = Arc::clone(self.engine.store());
        self.lane
            .run(async move { store.get_transfer(id).await.map_err(not_found(id)) })
            .await?
    }

    pub async fn transfers(&self) -> Result<Vec<TransferRecord>, ClientError> {
        let store = Arc::clone(self.engine.store());
        self.lane
            .run(async move { store.list_transfers().await.map_err(ClientError::from) })
            .await?
    }

    /// Attaches an observer to the transfer's events.
    pub fn subscribe(&self, id: TransferId) -> Subscription {
        self.events.subscribe(id)
    }

    pub fn config(&self) -> &EngineConfig {
        self.engine.config()
    }
}

fn new_transfer(kind: TransferKind, valid: Validated, total_size: Option<u64>) -> NewTransfer {
    NewTransfer {
        kind,
        container_name: valid.container_name,
        object_name: valid.object_name,
        backend_id: valid.backend_id,
        locator: valid.locator,
        total_size,
        constraints: valid.constraints,
    }
}

fn terminated(id: TransferId, reason: TerminalReason) -> ClientError {
    ClientError::AlreadyTerminated { id, reason }
}

/// Rejects transfers that can no longer run: cancelled ones first, so
/// that cancellation stays final regardless of the state it left behind.
fn ensure_active(record: &TransferRecord) -> Result<(), ClientError> {
    if record.interrupt_state.is_cancelled() {
        return Err(terminated(record.id, TerminalReason::Cancelled));
    }
    match record.state {
        TransferState::Completed => Err(terminated(record.id, TerminalReason::Completed)),
        TransferState::Failed => Err(terminated(record.id, TerminalReason::Failed)),
        TransferState::WaitToBegin | TransferState::InProgress => Ok(()),
    }
}
