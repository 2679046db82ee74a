//! Per-transfer event fan-out.
//!
//! Every observer of a transfer gets its own [`Subscription`] on a shared
//! topic. Topics exist only while subscribed: the last subscription to be
//! dropped removes the topic, and events published with no subscriber are
//! discarded.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tracing::warn;

use blobferry_protocol::{TransferEvent, TransferId};

const TOPIC_CAPACITY: usize = 64;

struct Topic {
    tx: broadcast::Sender<TransferEvent>,
    subscribers: usize,
    last: Option<TransferEvent>,
}

/// Reference-counted registry of per-transfer event topics.
#[derive(Clone, Default)]
pub struct EventHub {
    topics: Arc<Mutex<HashMap<TransferId, Topic>>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a new observer to `id`. The most recent event of an
    /// existing topic is delivered first.
    pub fn subscribe(&self, id: TransferId) -> Subscription {
        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        let topic = topics.entry(id).or_insert_with(|| Topic {
            tx: broadcast::channel(TOPIC_CAPACITY).0,
            subscribers: 0,
            last: None,
        });
        topic.subscribers += 1;

        Subscription {
            transfer_id: id,
            rx: topic.tx.subscribe(),
            replay: topic.last.clone(),
            hub: self.clone(),
        }
    }

    pub fn publish(&self, event: TransferEvent) {
        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(topic) = topics.get_mut(&event.transfer_id()) {
            topic.last = Some(event.clone());
            let _ = topic.tx.send(event);
        }
    }

    /// Number of live subscriptions for `id`.
    pub fn subscriber_count(&self, id: TransferId) -> usize {
        self.topics
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .map_or(0, |t| t.subscribers)
    }

    fn release(&self, id: TransferId) {
        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(topic) = topics.get_mut(&id) {
            topic.subscribers -= 1;
            if topic.subscribers == 0 {
                topics.remove(&id);
            }
        }
    }
}

/// One observer's view of a transfer's events. Dropping it unsubscribes.
pub struct Subscription {
    transfer_id: TransferId,
    rx: broadcast::Receiver<TransferEvent>,
    replay: Option<TransferEvent>,
    hub: EventHub,
}

impl Subscription {
    pub fn transfer_id(&self) -> TransferId {
        self.transfer_id
    }

    /// Waits for the next event. Slow observers skip events they lagged
    /// behind on rather than failing.
    pub async fn recv(&mut self) -> Option<TransferEvent> {
        if let Some(event) = self.replay.take() {
            return Some(event);
        }
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(transfer = %self.transfer_id, skipped, "subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Waits for `Completed` or `Failed`, skipping everything else.
    pub async fn terminal(&mut self) -> Option<TransferEvent> {
        while let Some(event) = self.recv().await {
            if event.is_terminal() {
                return Some(event);
            }
        }
        None
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.release(self.transfer_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(id: u64, done: u64) -> TransferEvent {
        TransferEvent::Progress {
            transfer_id: TransferId(id),
            total_bytes: 100,
            transferred_bytes: done,
            bytes_per_second: 0.0,
            eta_secs: None,
        }
    }

    #[tokio::test]
    async fn observers_share_one_stream() {
        let hub = EventHub::new();
        let mut a = hub.subscribe(TransferId(1));
        let mut b = hub.subscribe(TransferId(1));

        hub.publish(progress(1, 10));
        hub.publish(TransferEvent::Completed {
            transfer_id: TransferId(1),
        });

        for sub in [&mut a, &mut b] {
            assert_eq!(sub.recv().await, Some(progress(1, 10)));
            assert!(sub.recv().await.unwrap().is_terminal());
        }
    }

    #[tokio::test]
    async fn late_subscriber_gets_last_event_first() {
        let hub = EventHub::new();
        let _early = hub.subscribe(TransferId(2));
        hub.publish(progress(2, 10));
        hub.publish(progress(2, 20));

        let mut late = hub.subscribe(TransferId(2));
        assert_eq!(late.recv().await, Some(progress(2, 20)));

        hub.publish(progress(2, 30));
        assert_eq!(late.recv().await, Some(progress(2, 30)));
    }

    #[tokio::test]
    async fn topics_are_isolated() {
        let hub = EventHub::new();
        let mut one = hub.subscribe(TransferId(1));
        let _two = hub.subscribe(TransferId(2));

        hub.publish(progress(2, 50));
        hub.publish(progress(1, 5));
        assert_eq!(one.recv().await, Some(progress(1, 5)));
    }

    #[test]
    fn last_drop_removes_topic() {
        let hub = EventHub::new();
        let a = hub.subscribe(TransferId(3));
        let b = hub.subscribe(TransferId(3));
        assert_eq!(hub.subscriber_count(TransferId(3)), 2);

        drop(a);
        assert_eq!(hub.subscriber_count(TransferId(3)), 1);
        drop(b);
        assert_eq!(hub.subscriber_count(TransferId(3)), 0);

        // Without subscribers nothing is retained for replay.
        hub.publish(progress(3, 1));
        let mut c = hub.subscribe(TransferId(3));
        assert!(c.replay.take().is_none());
    }

    #[tokio::test]
    async fn terminal_skips_progress() {
        let hub = EventHub::new();
        let mut sub = hub.subscribe(TransferId(4));
        hub.publish(progress(4, 1));
        hub.publish(TransferEvent::UserPaused {
            transfer_id: TransferId(4),
        });
        hub.publish(TransferEvent::Completed {
            transfer_id: TransferId(4),
        });
        assert_eq!(
            sub.terminal().await,
            Some(TransferEvent::Completed {
                transfer_id: TransferId(4)
            })
        );
    }
}
