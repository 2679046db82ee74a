//! Pieces shared by the upload and download handlers: collaborators,
//! outcomes, the INIT short-circuits and the park/fail terminations.

use std::sync::Arc;

use tracing::{info, warn};

use blobferry_protocol::{InterruptState, TransferId, TransferRecord, TransferState};

use crate::accessor::AccessorProvider;
use crate::backend::BackendRegistry;
use crate::config::EngineConfig;
use crate::listener::TransferListener;
use crate::stop::StopToken;
use crate::store::MetadataStore;
use crate::TransferError;

/// Collaborators a handler runs against.
#[derive(Clone)]
pub struct HandlerContext {
    pub store: Arc<dyn MetadataStore>,
    pub backends: Arc<BackendRegistry>,
    pub accessors: Arc<dyn AccessorProvider>,
    pub config: EngineConfig,
}

/// Why a handler stopped without reaching a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParkReason {
    /// Stopped from outside with no interrupt marker, e.g. constraints lost.
    SystemPaused,
    UserPaused,
    /// Cancelled by the user; the transfer is now purged.
    Cancelled,
}

/// How a handler run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    Completed,
    Failed,
    Parked(ParkReason),
}

impl HandlerOutcome {
    /// Whether a later run may continue the transfer.
    pub fn is_resumable(self) -> bool {
        matches!(
            self,
            Self::Parked(ParkReason::SystemPaused) | Self::Parked(ParkReason::UserPaused)
        )
    }
}

/// Where a handler's state machine ended, before termination reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Completed,
    Stopped,
    /// The record was already purged at INIT.
    Purged,
}

pub(crate) enum Start {
    Ready(TransferRecord),
    Finished(Flow),
}

/// INIT short-circuits shared by both handlers.
pub(crate) async fn start(
    store: &dyn MetadataStore,
    id: TransferId,
    stop: &StopToken,
    listener: &dyn TransferListener,
) -> Result<Start, TransferError> {
    let record = store.get_transfer(id).await?;

    if record.interrupt_state == InterruptState::Purge {
        return Ok(Start::Finished(Flow::Purged));
    }

    if record.state == TransferState::Completed {
        let total = record.total_size.unwrap_or(record.base_offset);
        info!(transfer = %id, "already completed");
        listener.on_progress(total, total);
        listener.on_complete();
        return Ok(Start::Finished(Flow::Completed));
    }

    if stop.is_stopped() || record.interrupt_state != InterruptState::None {
        return Ok(Start::Finished(Flow::Stopped));
    }

    Ok(Start::Ready(record))
}

/// Persists IN_PROGRESS, reporting a resume when a previous run had
/// already started the transfer.
pub(crate) async fn mark_in_progress(
    store: &dyn MetadataStore,
    record: &TransferRecord,
    listener: &dyn TransferListener,
) -> Result<(), TransferError> {
    let resumed = record.state == TransferState::InProgress;
    store
        .update_transfer_state(record.id, TransferState::InProgress, None)
        .await?;
    if resumed {
        info!(transfer = %record.id, "resuming transfer");
        listener.on_resumed();
    }
    Ok(())
}

/// Reports how a run ended and returns the matching outcome.
pub(crate) async fn finish(
    store: &dyn MetadataStore,
    id: TransferId,
    listener: &dyn TransferListener,
    result: Result<Flow, TransferError>,
) -> HandlerOutcome {
    match result {
        Ok(Flow::Completed) => HandlerOutcome::Completed,
        Ok(Flow::Stopped) => park(store, id, listener).await,
        Ok(Flow::Purged) => {
            warn!(transfer = %id, "transfer is purged");
            listener.on_error(&TransferError::Cancelled);
            HandlerOutcome::Failed
        }
        Err(error) => fail(store, id, listener, error).await,
    }
}

/// Terminates a stopped run according to the interrupt marker.
///
/// A user cancel is the only case that mutates: the marker becomes PURGE.
async fn park(
    store: &dyn MetadataStore,
    id: TransferId,
    listener: &dyn TransferListener,
) -> HandlerOutcome {
    let interrupt = match store.get_interrupt_state(id).await {
        Ok(state) => state,
        Err(e) => {
            let error = TransferError::from(e);
            warn!(transfer = %id, error = %error, "failed to read interrupt state while parking");
            listener.on_error(&error);
            return HandlerOutcome::Failed;
        }
    };

    match interrupt {
        InterruptState::None => {
            info!(transfer = %id, "system paused");
            listener.on_system_paused();
            HandlerOutcome::Parked(ParkReason::SystemPaused)
        }
        InterruptState::UserPaused => {
            info!(transfer = %id, "paused by user");
            listener.on_user_paused();
            HandlerOutcome::Parked(ParkReason::UserPaused)
        }
        InterruptState::UserCancelled | InterruptState::Purge => {
            if interrupt == InterruptState::UserCancelled {
                if let Err(e) = store.update_interrupt_state(id, InterruptState::Purge).await {
                    warn!(transfer = %id, error = %e, "failed to persist purge marker");
                }
            }
            info!(transfer = %id, "cancelled by user");
            listener.on_error(&TransferError::Cancelled);
            HandlerOutcome::Parked(ParkReason::Cancelled)
        }
    }
}

/// Persists FAILED with the error and reports it once.
async fn fail(
    store: &dyn MetadataStore,
    id: TransferId,
    listener: &dyn TransferListener,
    error: TransferError,
) -> HandlerOutcome {
    warn!(transfer = %id, error = %error, "transfer failed");
    if let Err(e) = store
        .update_transfer_state(id, TransferState::Failed, Some(error.to_string()))
        .await
    {
        warn!(transfer = %id, error = %e, "failed to persist failure");
    }
    listener.on_error(&error);
    HandlerOutcome::Failed
}
