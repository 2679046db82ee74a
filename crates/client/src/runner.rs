use std::sync::Arc;

use futures_util::future::BoxFuture;
use tracing::{info, warn};

use blobferry_protocol::{InterruptState, TransferEvent, TransferId, TransferKind};
use blobferry_transfer::{
    EventListener, HandlerOutcome, ParkReason, StopToken, TransferEngine, TransferError,
};

use crate::ClientError;
use crate::events::EventHub;
use crate::scheduler::TransferRunner;
use crate::serial::SerialExecutor;

/// Runs handlers on a [`TransferEngine`], publishing their callbacks to
/// an [`EventHub`].
#[derive(Clone)]
pub struct EngineRunner {
    engine: TransferEngine,
    events: EventHub,
    lane: SerialExecutor,
}

impl EngineRunner {
    /// `lane` must be the lane the client runs its bookkeeping on.
    pub fn new(engine: TransferEngine, events: EventHub, lane: SerialExecutor) -> Self {
        Self {
            engine,
            events,
            lane,
        }
    }
}

impl TransferRunner for EngineRunner {
    fn run(
        &self,
        id: TransferId,
        kind: TransferKind,
        stop: StopToken,
    ) -> BoxFuture<'static, HandlerOutcome> {
        let engine = self.engine.clone();
        let events = self.events.clone();
        Box::pin(async move {
            let listener = EventListener::new(id, move |event: TransferEvent| events.publish(event));
            engine.run(id, kind, stop, Arc::new(listener)).await
        })
    }

    /// Reports an interrupt that arrived after the handler had read its
    /// marker: a cancel is purged here, and a pause that the run parked
    /// through as a system pause is announced.
    fn settle(&self, id: TransferId, outcome: HandlerOutcome) -> BoxFuture<'static, ()> {
        let store = Arc::clone(self.engine.store());
        let events = self.events.clone();
        let lane = self.lane.clone();
        Box::pin(async move {
            let settled = lane
                .run(async move {
                    let record = store.get_transfer(id).await?;
                    let event = match record.interrupt_state {
                        InterruptState::UserCancelled => {
                            store
                                .update_interrupt_state(id, InterruptState::Purge)
                                .await?;
                            let error = TransferError::Cancelled;
                            Some(TransferEvent::Failed {
                                transfer_id: id,
                                kind: error.kind(),
                                message: error.to_string(),
                            })
                        }
                        InterruptState::UserPaused
                            if outcome == HandlerOutcome::Parked(ParkReason::SystemPaused) =>
                        {
                            Some(TransferEvent::UserPaused { transfer_id: id })
                        }
                        _ => None,
                    };
                    Ok::<_, ClientError>(event)
                })
                .await
                .and_then(|r| r);

            match settled {
                Ok(Some(event)) => {
                    info!(transfer = %id, ?outcome, "interrupt arrived after the run parked");
                    events.publish(event);
                }
                Ok(None) => {}
                Err(e) => warn!(transfer = %id, error = %e, "failed to settle interrupt"),
            }
        })
    }
}
