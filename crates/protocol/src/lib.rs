//! Shared data model for blobferry.
//!
//! Everything that is persisted by a metadata store, passed into the
//! transfer client, or published to event subscribers lives here so the
//! engine, the client and outer adapters agree on one serde shape.

pub mod constraints;
pub mod events;
pub mod messages;
pub mod types;

pub use constraints::{Constraints, DeviceState, NetworkRequirement, NetworkState};
pub use events::{ErrorKind, TransferEvent};
pub use messages::{DownloadRequest, UploadRequest};
pub use types::{
    ChunkId, ChunkRecord, InterruptState, LocalLocator, NewChunk, NewTransfer, TransferId,
    TransferKind, TransferRecord, TransferState,
};
