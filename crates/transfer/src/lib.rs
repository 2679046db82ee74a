//! Resumable chunked transfer engine.
//!
//! Uploads are split into fixed-size chunks that are staged independently
//! and committed once all of them completed; downloads stream the remote
//! object from a persisted resume offset. All progress lives in a
//! [`MetadataStore`], so a stopped or crashed transfer resumes where the
//! last run left off.

mod accessor;
mod backend;
mod chunked;
mod config;
mod download;
mod engine;
mod enumerator;
mod error;
mod fs_backend;
mod handler;
mod listener;
mod memory;
mod progress;
mod stop;
mod store;
mod upload;
mod validation;

#[cfg(test)]
mod testutil;

pub use accessor::{AccessMode, AccessorProvider, ContentAccessor, FsAccessor, FsAccessorProvider};
pub use backend::{BackendError, BackendRegistry, ByteStream, DownloadStream, TransferBackend};
pub use chunked::{ChunkRange, generate_remote_chunk_id, partition, plan_chunks};
pub use config::EngineConfig;
pub use download::DownloadHandler;
pub use engine::TransferEngine;
pub use enumerator::ChunkEnumerator;
pub use error::TransferError;
pub use fs_backend::FsBackend;
pub use handler::{HandlerContext, HandlerOutcome, ParkReason};
pub use listener::{EventListener, NoopListener, TransferListener};
pub use memory::MemoryStore;
pub use progress::ThroughputMeter;
pub use stop::StopToken;
pub use store::{MetadataStore, StoreError, StoreResult};
pub use upload::UploadHandler;
pub use validation::validate_relative_name;

/// Default chunk size: 4 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 4 * 1024 * 1024;

/// Default number of concurrent chunk operations per upload.
pub const DEFAULT_UPLOAD_CONCURRENCY: usize = 3;
