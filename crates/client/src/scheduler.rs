//! Deciding when a transfer runs.
//!
//! The client hands every runnable transfer to a [`Scheduler`]. The
//! bundled [`LocalScheduler`] waits until the device satisfies the
//! transfer's constraints, runs its handler, stops the handler when the
//! constraints are lost and runs it again once they hold again.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio::sync::watch;
use tracing::{debug, info};

use blobferry_protocol::{Constraints, DeviceState, TransferId, TransferKind};
use blobferry_transfer::{HandlerOutcome, ParkReason, StopToken};

/// A transfer ready to run once its constraints are met.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkRequest {
    pub transfer_id: TransferId,
    pub kind: TransferKind,
    pub constraints: Constraints,
}

/// Runs one handler invocation.
pub trait TransferRunner: Send + Sync + 'static {
    fn run(
        &self,
        id: TransferId,
        kind: TransferKind,
        stop: StopToken,
    ) -> BoxFuture<'static, HandlerOutcome>;

    /// Called with the outcome of the last run once the transfer is no
    /// longer scheduled, so that a stop signalled after the handler read
    /// its interrupt marker still gets reported.
    fn settle(&self, _id: TransferId, _outcome: HandlerOutcome) -> BoxFuture<'static, ()> {
        Box::pin(async {})
    }
}

pub trait Scheduler: Send + Sync {
    /// Schedules a run. A transfer that is already pending or running and
    /// has not been stopped is left alone.
    fn submit(&self, request: WorkRequest);

    /// Signals the stop token of a pending or running run of `id`.
    /// Returns `false` when nothing is scheduled, in which case no handler
    /// will report the stop.
    fn stop(&self, id: TransferId) -> bool;

    /// Whether a run of `id` is pending or running and not stopped.
    fn is_scheduled(&self, id: TransferId) -> bool;
}

// ---------------------------------------------------------------------------
// DeviceMonitor
// ---------------------------------------------------------------------------

/// Current device conditions, fed by the embedding application.
#[derive(Clone)]
pub struct DeviceMonitor {
    tx: Arc<watch::Sender<DeviceState>>,
}

impl Default for DeviceMonitor {
    fn default() -> Self {
        Self::new(DeviceState::unconstrained())
    }
}

impl DeviceMonitor {
    pub fn new(initial: DeviceState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    pub fn set(&self, state: DeviceState) {
        debug!(?state, "device state changed");
        self.tx.send_replace(state);
    }

    pub fn current(&self) -> DeviceState {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DeviceState> {
        self.tx.subscribe()
    }
}

// ---------------------------------------------------------------------------
// LocalScheduler
// ---------------------------------------------------------------------------

struct Entry {
    generation: u64,
    stop: StopToken,
    /// Held by whichever run of this transfer is active.
    lane: Arc<tokio::sync::Mutex<()>>,
}

struct Inner {
    runner: Arc<dyn TransferRunner>,
    device: DeviceMonitor,
    entries: Mutex<HashMap<TransferId, Entry>>,
    next_generation: AtomicU64,
}

/// In-process constraint-aware scheduler. At most one handler per
/// transfer runs at a time; a resubmitted transfer waits for the previous
/// run to finish.
#[derive(Clone)]
pub struct LocalScheduler {
    inner: Arc<Inner>,
}

impl LocalScheduler {
    pub fn new(runner: Arc<dyn TransferRunner>, device: DeviceMonitor) -> Self {
        Self {
            inner: Arc::new(Inner {
                runner,
                device,
                entries: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    pub fn device(&self) -> &DeviceMonitor {
        &self.inner.device
    }
}

impl Scheduler for LocalScheduler {
    fn submit(&self, request: WorkRequest) {
        let id = request.transfer_id;
        let (generation, stop, lane) = {
            let mut entries = self.inner.entries.lock().unwrap_or_else(|e| e.into_inner());
            let lane = match entries.get(&id) {
                Some(entry) if !entry.stop.is_stopped() => {
                    debug!(transfer = %id, "already scheduled");
                    return;
                }
                Some(entry) => Arc::clone(&entry.lane),
                None => Arc::new(tokio::sync::Mutex::new(())),
            };
            let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
            let stop = StopToken::new();
            entries.insert(
                id,
                Entry {
                    generation,
                    stop: stop.clone(),
                    lane: Arc::clone(&lane),
                },
            );
            (generation, stop, lane)
        };

        debug!(transfer = %id, kind = %request.kind, generation, "scheduled");
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let _active = lane.lock().await;
            let outcome = inner.drive(&request, &stop).await;
            // A newer submission owns the markers from here on.
            if inner.finish(id, generation) {
                inner.runner.settle(id, outcome).await;
            }
        });
    }

    fn stop(&self, id: TransferId) -> bool {
        let entries = self.inner.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(&id) {
            Some(entry) => {
                entry.stop.stop();
                true
            }
            None => false,
        }
    }

    fn is_scheduled(&self, id: TransferId) -> bool {
        let entries = self.inner.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(&id).is_some_and(|e| !e.stop.is_stopped())
    }
}

impl Inner {
    /// Runs the transfer until it ends in anything but a system pause that
    /// the user did not ask for, and returns how the last run ended.
    async fn drive(&self, request: &WorkRequest, stop: &StopToken) -> HandlerOutcome {
        let id = request.transfer_id;
        let constraints = &request.constraints;
        let mut device = self.device.subscribe();

        loop {
            // A stop while waiting still runs the handler, so that it parks
            // and reports the interrupt.
            tokio::select! {
                biased;
                _ = stop.stopped() => {}
                _ = device.wait_for(|d| constraints.satisfied_by(d)).map(|r| r.is_ok()) => {}
            }

            let run_stop = StopToken::new();
            if stop.is_stopped() {
                run_stop.stop();
            }

            let run = self.runner.run(id, request.kind, run_stop.clone());
            tokio::pin!(run);
            let mut watching = true;
            let outcome = loop {
                tokio::select! {
                    outcome = &mut run => break outcome,
                    _ = stop.stopped(), if watching => {
                        run_stop.stop();
                        watching = false;
                    }
                    lost = device.wait_for(|d| !constraints.satisfied_by(d)).map(|r| r.is_ok()), if watching => {
                        if lost {
                            info!(transfer = %id, "constraints no longer satisfied");
                            run_stop.stop();
                        }
                        watching = false;
                    }
                }
            };

            debug!(transfer = %id, ?outcome, "run finished");
            if outcome == HandlerOutcome::Parked(ParkReason::SystemPaused) && !stop.is_stopped() {
                info!(transfer = %id, "waiting for constraints to resume");
                continue;
            }
            break outcome;
        }
    }

    /// Drops the entry of `generation`. Returns `false` when a newer
    /// submission replaced it.
    fn finish(&self, id: TransferId, generation: u64) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.get(&id).is_some_and(|e| e.generation == generation) {
            entries.remove(&id);
            return true;
        }
        false
    }
}
