use std::future::Future;
use std::pin::Pin;

use tokio::sync::{mpsc, oneshot};

use crate::ClientError;

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// FIFO lane that runs submitted futures one at a time on a single tokio
/// task, so bookkeeping from concurrent callers never interleaves.
#[derive(Clone)]
pub struct SerialExecutor {
    tx: mpsc::UnboundedSender<Job>,
}

impl SerialExecutor {
    /// Starts the lane. Must be called inside a tokio runtime.
    pub fn new() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job.await;
            }
        });
        Self { tx }
    }

    /// Queues `fut` behind everything submitted earlier and waits for its
    /// result.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, ClientError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let job: Job = Box::pin(async move {
            let _ = done_tx.send(fut.await);
        });
        self.tx.send(job).map_err(|_| ClientError::LaneClosed)?;
        done_rx.await.map_err(|_| ClientError::LaneClosed)
    }
}

impl Default for SerialExecutor {
    fn default() -> Self {
        Self::new()
    }
}
