//! Events published to transfer subscribers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::TransferId;

/// Classification of a transfer failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidRequest,
    UnresolvedBackendHandle,
    ChunkTransferFailed,
    StreamTransferFailed,
    CommitFailed,
    TransferCancelled,
    AlreadyTerminated,
    NotFound,
    ContentUnavailable,
    Store,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InvalidRequest => "invalid request",
            Self::UnresolvedBackendHandle => "unresolved backend handle",
            Self::ChunkTransferFailed => "chunk transfer failed",
            Self::StreamTransferFailed => "stream transfer failed",
            Self::CommitFailed => "commit failed",
            Self::TransferCancelled => "transfer cancelled",
            Self::AlreadyTerminated => "already terminated",
            Self::NotFound => "not found",
            Self::ContentUnavailable => "content unavailable",
            Self::Store => "metadata store error",
        };
        f.write_str(s)
    }
}

/// A progress, park or terminal notification for one transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransferEvent {
    #[serde(rename_all = "camelCase")]
    Progress {
        transfer_id: TransferId,
        total_bytes: u64,
        transferred_bytes: u64,
        /// Sliding-window throughput estimate (0 until two samples exist).
        #[serde(default)]
        bytes_per_second: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        eta_secs: Option<f64>,
    },
    #[serde(rename_all = "camelCase")]
    UserPaused { transfer_id: TransferId },
    #[serde(rename_all = "camelCase")]
    SystemPaused { transfer_id: TransferId },
    #[serde(rename_all = "camelCase")]
    Resumed { transfer_id: TransferId },
    #[serde(rename_all = "camelCase")]
    Completed { transfer_id: TransferId },
    #[serde(rename_all = "camelCase")]
    Failed {
        transfer_id: TransferId,
        kind: ErrorKind,
        message: String,
    },
}

impl TransferEvent {
    /// The transfer this event belongs to.
    pub fn transfer_id(&self) -> TransferId {
        match self {
            Self::Progress { transfer_id, .. }
            | Self::UserPaused { transfer_id }
            | Self::SystemPaused { transfer_id }
            | Self::Resumed { transfer_id }
            | Self::Completed { transfer_id }
            | Self::Failed { transfer_id, .. } => *transfer_id,
        }
    }

    /// Returns `true` for `Completed` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }

    /// Progress as a percentage (0-100), for `Progress` events only.
    pub fn percentage(&self) -> Option<f64> {
        match self {
            Self::Progress {
                total_bytes,
                transferred_bytes,
                ..
            } => {
                if *total_bytes == 0 {
                    return Some(0.0);
                }
                Some(*transferred_bytes as f64 / *total_bytes as f64 * 100.0)
            }
            _ => None,
        }
    }
}
