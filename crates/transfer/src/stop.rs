use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::CancellationToken;

/// One-shot cooperative stop signal for a running handler.
///
/// `stop` may be called from any task or thread, any number of times.
/// Handlers poll [`is_stopped`](Self::is_stopped) at their checkpoints
/// and may await [`stopped`](Self::stopped) alongside other work.
#[derive(Debug, Clone, Default)]
pub struct StopToken {
    flag: Arc<AtomicBool>,
    notify: CancellationToken,
}

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals the stop. Returns `true` only for the first call.
    pub fn stop(&self) -> bool {
        let first = !self.flag.swap(true, Ordering::AcqRel);
        if first {
            self.notify.cancel();
        }
        first
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Resolves once [`stop`](Self::stop) has been called.
    pub async fn stopped(&self) {
        self.notify.cancelled().await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn stop_is_idempotent() {
        let token = StopToken::new();
        assert!(!token.is_stopped());
        assert!(token.stop());
        assert!(!token.stop());
        assert!(token.is_stopped());
    }

    #[test]
    fn clones_share_state() {
        let token = StopToken::new();
        let other = token.clone();
        other.stop();
        assert!(token.is_stopped());
    }

    #[tokio::test]
    async fn stopped_wakes_waiter() {
        let token = StopToken::new();
        let waiter = {
            let t = token.clone();
            tokio::spawn(async move { t.stopped().await })
        };

        let remote = token.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            remote.stop();
        });

        tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[tokio::test]
    async fn stopped_after_stop_returns_immediately() {
        let token = StopToken::new();
        token.stop();
        tokio::time::timeout(Duration::from_millis(100), token.stopped())
            .await
            .unwrap();
    }
}
