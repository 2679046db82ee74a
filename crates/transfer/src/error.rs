//! Transfer engine error types.

use blobferry_protocol::ErrorKind;

use crate::backend::BackendError;
use crate::store::StoreError;

/// Errors produced by the transfer engine and its collaborators.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("metadata store error: {0}")]
    Store(#[from] StoreError),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("content not found: {0}")]
    ContentNotFound(String),

    #[error("content length unknown: {0}")]
    LengthUnknown(String),

    #[error("content changed since the transfer was created: expected {expected} bytes, found {actual}")]
    ContentModified { expected: u64, actual: u64 },

    #[error("content accessor already closed")]
    AccessorClosed,

    #[error("no transfer backend registered under {0:?}")]
    UnresolvedBackend(String),

    #[error("chunk {remote_chunk_id} at offset {offset} failed: {reason}")]
    ChunkTransferFailed {
        remote_chunk_id: String,
        offset: u64,
        reason: String,
    },

    #[error("download stream failed at offset {offset}: {reason}")]
    StreamTransferFailed { offset: u64, reason: String },

    #[error("commit failed: {0}")]
    CommitFailed(String),

    #[error("commit refused: {0} chunks are not completed")]
    IncompleteChunks(usize),

    #[error("transfer cancelled")]
    Cancelled,
}

impl TransferError {
    /// Maps the error onto the public failure taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Store(StoreError::NotFound(_)) => ErrorKind::NotFound,
            Self::Store(_) => ErrorKind::Store,
            Self::Io(_)
            | Self::InvalidPath(_)
            | Self::ContentNotFound(_)
            | Self::LengthUnknown(_)
            | Self::ContentModified { .. }
            | Self::AccessorClosed => ErrorKind::ContentUnavailable,
            Self::UnresolvedBackend(_) => ErrorKind::UnresolvedBackendHandle,
            Self::ChunkTransferFailed { .. } => ErrorKind::ChunkTransferFailed,
            Self::StreamTransferFailed { .. } => ErrorKind::StreamTransferFailed,
            Self::CommitFailed(_) | Self::IncompleteChunks(_) => ErrorKind::CommitFailed,
            Self::Cancelled => ErrorKind::TransferCancelled,
        }
    }

    pub(crate) fn chunk(remote_chunk_id: &str, offset: u64, reason: impl ToString) -> Self {
        Self::ChunkTransferFailed {
            remote_chunk_id: remote_chunk_id.to_string(),
            offset,
            reason: reason.to_string(),
        }
    }

    pub(crate) fn stream(offset: u64, reason: &BackendError) -> Self {
        Self::StreamTransferFailed {
            offset,
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds() {
        assert_eq!(
            TransferError::Store(StoreError::NotFound("transfer 1".into())).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            TransferError::UnresolvedBackend("x".into()).kind(),
            ErrorKind::UnresolvedBackendHandle
        );
        assert_eq!(TransferError::IncompleteChunks(2).kind(), ErrorKind::CommitFailed);
        assert_eq!(TransferError::Cancelled.kind(), ErrorKind::TransferCancelled);
    }

    #[test]
    fn chunk_failure_message() {
        let err = TransferError::chunk("AAAA", 10, "503 service unavailable");
        assert_eq!(
            err.to_string(),
            "chunk AAAA at offset 10 failed: 503 service unavailable"
        );
    }
}
