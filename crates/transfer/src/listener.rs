//! Handler callbacks and their conversion into [`TransferEvent`]s.

use blobferry_protocol::{TransferEvent, TransferId};

use crate::TransferError;
use crate::progress::ThroughputMeter;

/// Receives the state transitions of one handler run.
///
/// A handler invokes its listener from a single task, one call at a time
/// and in transition order. Every run ends with exactly one of
/// `on_complete`, `on_error`, `on_user_paused` or `on_system_paused`.
pub trait TransferListener: Send + Sync {
    fn on_progress(&self, total_bytes: u64, transferred_bytes: u64);
    fn on_user_paused(&self);
    fn on_system_paused(&self);
    fn on_resumed(&self);
    fn on_complete(&self);
    fn on_error(&self, error: &TransferError);
}

/// Listener that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl TransferListener for NoopListener {
    fn on_progress(&self, _total_bytes: u64, _transferred_bytes: u64) {}
    fn on_user_paused(&self) {}
    fn on_system_paused(&self) {}
    fn on_resumed(&self) {}
    fn on_complete(&self) {}
    fn on_error(&self, _error: &TransferError) {}
}

/// Listener that turns callbacks into [`TransferEvent`]s for `sink`,
/// adding a throughput estimate to progress events.
pub struct EventListener<F> {
    transfer_id: TransferId,
    sink: F,
    meter: ThroughputMeter,
}

impl<F> EventListener<F>
where
    F: Fn(TransferEvent) + Send + Sync,
{
    pub fn new(transfer_id: TransferId, sink: F) -> Self {
        Self {
            transfer_id,
            sink,
            meter: ThroughputMeter::default(),
        }
    }

    fn emit(&self, event: TransferEvent) {
        (self.sink)(event);
    }
}

impl<F> TransferListener for EventListener<F>
where
    F: Fn(TransferEvent) + Send + Sync,
{
    fn on_progress(&self, total_bytes: u64, transferred_bytes: u64) {
        self.meter.observe(transferred_bytes);
        let remaining = total_bytes.saturating_sub(transferred_bytes);
        self.emit(TransferEvent::Progress {
            transfer_id: self.transfer_id,
            total_bytes,
            transferred_bytes,
            bytes_per_second: self.meter.bytes_per_second(),
            eta_secs: self.meter.eta(remaining).map(|d| d.as_secs_f64()),
        });
    }

    fn on_user_paused(&self) {
        self.emit(TransferEvent::UserPaused {
            transfer_id: self.transfer_id,
        });
    }

    fn on_system_paused(&self) {
        self.emit(TransferEvent::SystemPaused {
            transfer_id: self.transfer_id,
        });
    }

    fn on_resumed(&self) {
        self.emit(TransferEvent::Resumed {
            transfer_id: self.transfer_id,
        });
    }

    fn on_complete(&self) {
        self.emit(TransferEvent::Completed {
            transfer_id: self.transfer_id,
        });
    }

    fn on_error(&self, error: &TransferError) {
        self.emit(TransferEvent::Failed {
            transfer_id: self.transfer_id,
            kind: error.kind(),
            message: error.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use blobferry_protocol::ErrorKind;

    use super::*;

    fn collecting() -> (Arc<Mutex<Vec<TransferEvent>>>, impl Fn(TransferEvent) + Send + Sync) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let events = Arc::clone(&events);
            move |e: TransferEvent| events.lock().unwrap().push(e)
        };
        (events, sink)
    }

    #[test]
    fn progress_events_carry_totals() {
        let (events, sink) = collecting();
        let listener = EventListener::new(TransferId(3), sink);
        listener.on_progress(100, 0);
        listener.on_progress(100, 40);

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 2);
        match &events[1] {
            TransferEvent::Progress {
                transfer_id,
                total_bytes,
                transferred_bytes,
                ..
            } => {
                assert_eq!(*transfer_id, TransferId(3));
                assert_eq!(*total_bytes, 100);
                assert_eq!(*transferred_bytes, 40);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(events[1].percentage(), Some(40.0));
    }

    #[test]
    fn first_report_has_no_speed() {
        let (events, sink) = collecting();
        let listener = EventListener::new(TransferId(1), sink);
        listener.on_progress(10, 5);

        match &events.lock().unwrap()[0] {
            TransferEvent::Progress {
                bytes_per_second,
                eta_secs,
                ..
            } => {
                assert_eq!(*bytes_per_second, 0.0);
                assert!(eta_secs.is_none());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn error_maps_kind() {
        let (events, sink) = collecting();
        let listener = EventListener::new(TransferId(9), sink);
        listener.on_error(&TransferError::Cancelled);

        assert_eq!(
            events.lock().unwrap()[0],
            TransferEvent::Failed {
                transfer_id: TransferId(9),
                kind: ErrorKind::TransferCancelled,
                message: "transfer cancelled".into(),
            }
        );
    }

    #[test]
    fn lifecycle_events() {
        let (events, sink) = collecting();
        let listener = EventListener::new(TransferId(2), sink);
        listener.on_resumed();
        listener.on_system_paused();
        listener.on_user_paused();
        listener.on_complete();

        let id = TransferId(2);
        assert_eq!(
            *events.lock().unwrap(),
            vec![
                TransferEvent::Resumed { transfer_id: id },
                TransferEvent::SystemPaused { transfer_id: id },
                TransferEvent::UserPaused { transfer_id: id },
                TransferEvent::Completed { transfer_id: id },
            ]
        );
    }
}
