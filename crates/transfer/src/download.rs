//! Download handler.
//!
//! Unlike uploads, the remote side offers a single offset-resumable
//! stream, so a run drives one long-lived stream instead of a chunk pool.
//! Progress is reported per received piece, but only the resume
//! checkpoint (`base_offset`) is persisted: when the stream fails, when
//! the run parks, and optionally every `download_checkpoint_bytes`.

use std::sync::Arc;

use futures_util::StreamExt;
use tracing::{debug, info, warn};

use blobferry_protocol::{TransferId, TransferRecord, TransferState};

use crate::accessor::{AccessMode, ContentAccessor};
use crate::backend::TransferBackend;
use crate::handler::{self, Flow, HandlerContext, HandlerOutcome, Start};
use crate::listener::TransferListener;
use crate::stop::StopToken;
use crate::store::StoreError;
use crate::TransferError;

pub struct DownloadHandler {
    ctx: HandlerContext,
    transfer_id: TransferId,
    stop: StopToken,
    listener: Arc<dyn TransferListener>,
}

impl DownloadHandler {
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
        }
    }

    /// Runs the transfer until it completes, fails or parks.
    pub async fn run(self) -> HandlerOutcome {
        let result = self.drive().await;
        handler::finish(
            self.ctx.store.as_ref(),
            self.transfer_id,
            self.listener.as_ref(),
            result,
        )
        .await
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
            .open(&record.locator, AccessMode::Write)
            .await?;

        handler::mark_in_progress(store, &record, listener).await?;

        let mut written = record.base_offset;
        let result = self
            .stream(&record, backend.as_ref(), accessor.as_ref(), &mut written)
            .await;

        match result {
            Ok(total) => {
                accessor.close().await?;
                store
                    .update_transfer_state(record.id, TransferState::Completed, None)
                    .await?;
                info!(transfer = %record.id, bytes = total, "download completed");
                listener.on_progress(total, total);
                listener.on_complete();
                Ok(Flow::Completed)
            }
            Err(Interrupted::Stopped) => {
                self.checkpoint(accessor.as_ref(), record.id, written).await;
                Ok(Flow::Stopped)
            }
            Err(Interrupted::Failed(error)) => {
                self.checkpoint(accessor.as_ref(), record.id, written).await;
                Err(error)
            }
        }
    }

    /// Pumps the remote stream into local content. Returns the object size.
    async fn stream(
        &self,
        record: &TransferRecord,
        backend: &dyn TransferBackend,
        accessor: &dyn ContentAccessor,
        written: &mut u64,
    ) -> Result<u64, Interrupted> {
        let store = self.ctx.store.as_ref();
        let id = record.id;

        let download = backend
            .download_from(&record.container_name, &record.object_name, *written)
            .await
            .map_err(|e| TransferError::stream(*written, &e))?;

        let total = download.total_size;
        if record.total_size != Some(total) {
            store.update_total_size(id, total).await?;
        }

        info!(transfer = %id, total, offset = *written, "download started");
        self.listener.on_progress(total, *written);

        let checkpoint_every = self.ctx.config.download_checkpoint_bytes;
        let mut since_checkpoint = 0u64;
        let mut body = download.body;

        loop {
            let next = tokio::select! {
                biased;
                _ = self.stop.stopped() => return Err(Interrupted::Stopped),
                next = body.next() => next,
            };

            match next {
                Some(Ok(bytes)) => {
                    accessor.write_range(*written, &bytes).await?;
                    *written += bytes.len() as u64;

                    if let Some(every) = checkpoint_every {
                        since_checkpoint += bytes.len() as u64;
                        if since_checkpoint >= every {
                            accessor.flush().await?;
                            store.update_base_offset(id, *written).await?;
                            since_checkpoint = 0;
                            debug!(transfer = %id, offset = *written, "checkpoint");
                        }
                    }

                    self.listener.on_progress(total, *written);
                }
                Some(Err(e)) => return Err(TransferError::stream(*written, &e).into()),
                None if *written < total => {
                    return Err(TransferError::StreamTransferFailed {
                        offset: *written,
                        reason: format!("stream ended {} bytes early", total - *written),
                    }
                    .into());
                }
                None => return Ok(total),
            }
        }
    }

    /// Closes the content and persists `offset` as the resume point. The
    /// checkpoint is skipped when the close fails, since the written bytes
    /// may then not be durable.
    async fn checkpoint(&self, accessor: &dyn ContentAccessor, id: TransferId, offset: u64) {
        if let Err(e) = accessor.close().await {
            warn!(transfer = %id, error = %e, "closing download content failed; keeping old checkpoint");
            return;
        }
        if let Err(e) = self.ctx.store.update_base_offset(id, offset).await {
            warn!(transfer = %id, error = %e, "failed to persist download checkpoint");
        } else {
            debug!(transfer = %id, offset, "checkpoint");
        }
    }
}

enum Interrupted {
    Stopped,
    Failed(TransferError),
}

impl From<TransferError> for Interrupted {
    fn from(e: TransferError) -> Self {
        Self::Failed(e)
    }
}

impl From<StoreError> for Interrupted {
    fn from(e: StoreError) -> Self {
        Self::Failed(e.into())
    }
}
