//! Client surface of blobferry.
//!
//! [`TransferClient`] validates requests, creates records, schedules
//! handlers under execution constraints and fans their callbacks out to
//! subscribers. Pause, resume and cancel are plain record updates plus a
//! stop signal, so they survive process restarts.

mod client;
mod error;
mod events;
mod runner;
mod scheduler;
mod serial;
mod validation;

pub use client::{TransferClient, TransferClientBuilder};
pub use error::{ClientError, TerminalReason};
pub use events::{EventHub, Subscription};
pub use runner::EngineRunner;
pub use scheduler::{DeviceMonitor, LocalScheduler, Scheduler, TransferRunner, WorkRequest};
pub use serial::SerialExecutor;
