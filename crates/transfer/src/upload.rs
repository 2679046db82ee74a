//! Upload handler.
//!
//! One run drives a transfer through INIT, STAGING and COMMITTING. Chunk
//! operations execute on spawned tasks; their completions come back over
//! the handler's own queue and are handled one at a time, so the handler
//! state needs no locking. At most `upload_concurrency` chunks are in
//! flight, and the commit is issued only once every chunk is COMPLETED.
//! Chunk tasks belong to the run: whatever is still in flight when the run
//! ends is aborted and awaited before [`UploadHandler::run`] returns, so a
//! later run never overlaps stage operations of an earlier one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use blobferry_protocol::{ChunkRecord, TransferId, TransferRecord, TransferState};

use crate::accessor::{AccessMode, ContentAccessor};
use crate::backend::TransferBackend;
use crate::enumerator::ChunkEnumerator;
use crate::handler::{self, Flow, HandlerContext, HandlerOutcome, Start};
use crate::listener::TransferListener;
use crate::stop::StopToken;
use crate::TransferError;

/// Completion of one chunk operation.
struct ChunkDone {
    remote_chunk_id: String,
    result: Result<(), TransferError>,
}

pub struct UploadHandler {
    ctx: HandlerContext,
    transfer_id: TransferId,
    stop: StopToken,
    listener: Arc<dyn TransferListener>,
    /// Stage operations started by this run.
    tasks: Mutex<JoinSet<()>>,
}

/// State of one STAGING phase.
struct Staging {
    record: TransferRecord,
    backend: Arc<dyn TransferBackend>,
    accessor: Arc<dyn ContentAccessor>,
    enumerator: ChunkEnumerator,
    in_flight: HashMap<String, ChunkRecord>,
    tx: mpsc::UnboundedSender<ChunkDone>,
    rx: mpsc::UnboundedReceiver<ChunkDone>,
    total: u64,
    uploaded: u64,
}

impl UploadHandler {
    pub fn new(
        ctx: HandlerContext,
        transfer_id: TransferId,
        stop: StopToken,
        listener: Arc<dyn TransferListener>,
    ) -> Self {
        Self {
            ctx,
            transfer_id,
            stop,
            listener,
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// Runs the transfer until it completes, fails or parks.
    pub async fn run(self) -> HandlerOutcome {
        let result = self.drive().await;
        let outcome = handler::finish(
            self.ctx.store.as_ref(),
            self.transfer_id,
            self.listener.as_ref(),
            result,
        )
        .await;

        // Completions of these tasks would be dropped anyway.
        let mut tasks = self.tasks.into_inner().unwrap_or_else(|e| e.into_inner());
        if !tasks.is_empty() {
            debug!(transfer = %self.transfer_id, tasks = tasks.len(), "aborting in-flight chunks");
        }
        tasks.shutdown().await;
        outcome
    }

    async fn drive(&self) -> Result<Flow, TransferError> {
        let store = self.ctx.store.as_ref();
        let listener = self.listener.as_ref();

        let record =
            match handler::start(store, self.transfer_id, &self.stop, listener).await? {
                Start::Ready(record) => record,
                Start::Finished(flow) => return Ok(flow),
            };

        let backend = self.ctx.backends.resolve(&record.backend_id)?;
        let accessor = self
            .ctx
            .accessors
            .open(&record.locator, AccessMode::Read)
            .await?;

        let result = self.stage_and_commit(record, backend, Arc::clone(&accessor)).await;
        if let Err(e) = accessor.close().await {
            debug!(transfer = %self.transfer_id, error = %e, "closing upload content");
        }
        result
    }

    async fn stage_and_commit(
        &self,
        record: TransferRecord,
        backend: Arc<dyn TransferBackend>,
        accessor: Arc<dyn ContentAccessor>,
    ) -> Result<Flow, TransferError> {
        let store = self.ctx.store.as_ref();
        let listener = self.listener.as_ref();
        let id = record.id;

        let total = record.total_size.unwrap_or(0);
        let length = accessor.length().await?;
        if length != total {
            return Err(TransferError::ContentModified {
                expected: total,
                actual: length,
            });
        }

        handler::mark_in_progress(store, &record, listener).await?;

        let uploaded = store.sum_chunk_sizes(id, TransferState::Completed).await?;
        info!(transfer = %id, total, uploaded, "upload started");
        listener.on_progress(total, uploaded);

        let concurrency = self.ctx.config.upload_concurrency;
        let mut enumerator = ChunkEnumerator::new(
            Arc::clone(&self.ctx.store),
            id,
            &[TransferState::Completed],
        );
        let batch = enumerator.next(concurrency).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let mut staging = Staging {
            record,
            backend,
            accessor,
            enumerator,
            in_flight: HashMap::with_capacity(concurrency),
            tx,
            rx,
            total,
            uploaded,
        };

        for chunk in batch {
            if !self.launch(&mut staging, chunk).await? {
                return Ok(Flow::Stopped);
            }
        }

        if !staging.in_flight.is_empty() {
            if let Some(flow) = self.pump(&mut staging).await? {
                return Ok(flow);
            }
        }

        self.commit(&staging).await
    }

    /// Starts the stage operation for `chunk`. Returns `false` when the
    /// stop token was observed instead.
    async fn launch(
        &self,
        staging: &mut Staging,
        chunk: ChunkRecord,
    ) -> Result<bool, TransferError> {
        if self.stop.is_stopped() {
            return Ok(false);
        }

        self.ctx
            .store
            .update_chunk_state(chunk.id, TransferState::InProgress, None)
            .await?;

        debug!(
            transfer = %staging.record.id,
            chunk = %chunk.remote_chunk_id,
            offset = chunk.offset,
            size = chunk.size,
            "staging chunk"
        );

        let tx = staging.tx.clone();
        let backend = Arc::clone(&staging.backend);
        let accessor = Arc::clone(&staging.accessor);
        let container = staging.record.container_name.clone();
        let object = staging.record.object_name.clone();
        let remote_chunk_id = chunk.remote_chunk_id.clone();
        let (offset, size) = (chunk.offset, chunk.size);

        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .spawn(async move {
                let result = async {
                    let data = accessor.read_range(offset, size).await?;
                    backend
                        .stage_chunk(&container, &object, &remote_chunk_id, data)
                        .await
                        .map_err(|e| TransferError::chunk(&remote_chunk_id, offset, e))
                }
                .await;
                // The handler may have terminated; its queue is then gone.
                let _ = tx.send(ChunkDone {
                    remote_chunk_id,
                    result,
                });
            });

        staging
            .in_flight
            .insert(chunk.remote_chunk_id.clone(), chunk);
        Ok(true)
    }

    /// Handles completions until the in-flight set drains. Returns a flow
    /// when the run ends before COMMITTING.
    async fn pump(&self, staging: &mut Staging) -> Result<Option<Flow>, TransferError> {
        let store = self.ctx.store.as_ref();

        while !staging.in_flight.is_empty() {
            let done = tokio::select! {
                biased;
                _ = self.stop.stopped() => return Ok(Some(Flow::Stopped)),
                done = staging.rx.recv() => done,
            };
            // The handler keeps a sender, so the queue never closes here.
            let Some(done) = done else {
                return Ok(Some(Flow::Stopped));
            };

            let Some(chunk) = staging.in_flight.remove(&done.remote_chunk_id) else {
                debug!(chunk = %done.remote_chunk_id, "dropping stale completion");
                continue;
            };

            match done.result {
                Ok(()) => {
                    store
                        .update_chunk_state(chunk.id, TransferState::Completed, None)
                        .await?;
                    staging.uploaded += chunk.size;
                    self.listener.on_progress(staging.total, staging.uploaded);

                    let next = staging.enumerator.next(1).await?;
                    if let Some(next) = next.into_iter().next() {
                        if !self.launch(staging, next).await? {
                            return Ok(Some(Flow::Stopped));
                        }
                    }
                }
                Err(error) => {
                    warn!(
                        transfer = %staging.record.id,
                        chunk = %chunk.remote_chunk_id,
                        error = %error,
                        "chunk failed"
                    );
                    store
                        .update_chunk_state(chunk.id, TransferState::Failed, Some(error.to_string()))
                        .await?;
                    return Err(error);
                }
            }
        }

        Ok(None)
    }

    async fn commit(&self, staging: &Staging) -> Result<Flow, TransferError> {
        if self.stop.is_stopped() {
            return Ok(Flow::Stopped);
        }

        let store = self.ctx.store.as_ref();
        let record = &staging.record;

        let chunks = store.get_chunks(record.id, &[]).await?;
        let pending = chunks
            .iter()
            .filter(|c| c.state != TransferState::Completed)
            .count();
        if pending > 0 {
            return Err(TransferError::IncompleteChunks(pending));
        }

        let ids: Vec<String> = chunks.into_iter().map(|c| c.remote_chunk_id).collect();
        debug!(transfer = %record.id, chunks = ids.len(), "committing");
        staging
            .backend
            .commit(&record.container_name, &record.object_name, &ids)
            .await
            .map_err(|e| TransferError::CommitFailed(e.to_string()))?;

        store
            .update_transfer_state(record.id, TransferState::Completed, None)
            .await?;
        info!(transfer = %record.id, bytes = staging.total, "upload completed");
        self.listener.on_progress(staging.total, staging.total);
        self.listener.on_complete();
        Ok(Flow::Completed)
    }
}
