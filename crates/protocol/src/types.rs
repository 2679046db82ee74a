use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constraints::Constraints;

/// Identifier of a transfer, assigned by the metadata store at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(pub u64);

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Metadata-store key of a chunk record (not the remote chunk id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(pub u64);

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Direction of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferKind {
    Upload,
    Download,
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upload => f.write_str("upload"),
            Self::Download => f.write_str("download"),
        }
    }
}

/// Lifecycle state shared by transfer and chunk records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TransferState {
    #[default]
    #[serde(rename = "wait_to_begin")]
    WaitToBegin,
    #[serde(rename = "in_progress")]
    InProgress,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "failed")]
    Failed,
}

impl TransferState {
    /// Returns `true` for `Completed` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Why a transfer's handler was asked to stop.
///
/// `Purge` marks a cancelled transfer that can never be resumed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptState {
    #[default]
    None,
    UserPaused,
    UserCancelled,
    Purge,
}

impl InterruptState {
    /// Returns `true` once a cancel has been requested or completed.
    pub fn is_cancelled(self) -> bool {
        matches!(self, Self::UserCancelled | Self::Purge)
    }
}

/// Opaque reference to the local content taking part in a transfer.
///
/// With `uses_resolved_access` unset, `location` is a filesystem path.
/// Otherwise it is a handle that an accessor provider resolves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalLocator {
    pub location: String,
    #[serde(default)]
    pub uses_resolved_access: bool,
}

impl LocalLocator {
    /// Locator for a plain filesystem path.
    pub fn path(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            uses_resolved_access: false,
        }
    }

    /// Locator for a handle resolved by the accessor provider.
    pub fn resolved(handle: impl Into<String>) -> Self {
        Self {
            location: handle.into(),
            uses_resolved_access: true,
        }
    }
}

/// One upload or download operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRecord {
    pub id: TransferId,
    pub kind: TransferKind,
    pub container_name: String,
    pub object_name: String,
    /// Name of the transfer backend this record is bound to.
    pub backend_id: String,
    pub locator: LocalLocator,
    /// Known at creation for uploads; learned from the remote for downloads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_size: Option<u64>,
    /// Download resume point: bytes `[0, base_offset)` are durable locally.
    #[serde(default)]
    pub base_offset: u64,
    pub state: TransferState,
    #[serde(default)]
    pub interrupt_state: InterruptState,
    #[serde(default)]
    pub constraints: Constraints,
    /// Transient; only set when the record failed in the current process.
    #[serde(skip)]
    pub last_error: Option<String>,
}

/// A contiguous byte range of an upload, staged independently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkRecord {
    pub id: ChunkId,
    pub transfer_id: TransferId,
    pub offset: u64,
    pub size: u64,
    /// Opaque token the backend uses to identify this chunk at commit time.
    pub remote_chunk_id: String,
    pub state: TransferState,
    #[serde(skip)]
    pub error: Option<String>,
}

impl ChunkRecord {
    /// Exclusive end offset of the chunk.
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// Transfer fields supplied at creation; the store assigns id and state.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransfer {
    pub kind: TransferKind,
    pub container_name: String,
    pub object_name: String,
    pub backend_id: String,
    pub locator: LocalLocator,
    pub total_size: Option<u64>,
    pub constraints: Constraints,
}

/// Chunk fields supplied at creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChunk {
    pub offset: u64,
    pub size: u64,
    pub remote_chunk_id: String,
}
