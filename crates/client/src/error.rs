use blobferry_protocol::{ErrorKind, TransferId};
use blobferry_transfer::{StoreError, TransferError};

/// Terminal state that makes a transfer ineligible for an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalReason {
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for TerminalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => f.write_str("completed"),
            Self::Failed => f.write_str("failed"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Errors returned by the transfer client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("transfer {0} not found")]
    NotFound(TransferId),

    #[error("transfer {id} already {reason}")]
    AlreadyTerminated {
        id: TransferId,
        reason: TerminalReason,
    },

    #[error("missing required component: {0}")]
    MissingComponent(&'static str),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("metadata store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error("bookkeeping lane closed")]
    LaneClosed,
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRequest(_) | Self::MissingComponent(_) | Self::InvalidConfig(_) => {
                ErrorKind::InvalidRequest
            }
            Self::NotFound(_) | Self::Store(StoreError::NotFound(_)) => ErrorKind::NotFound,
            Self::AlreadyTerminated { .. } => ErrorKind::AlreadyTerminated,
            Self::Store(_) | Self::LaneClosed => ErrorKind::Store,
            Self::Transfer(e) => e.kind(),
        }
    }

    /// The terminal sub-kind of an [`AlreadyTerminated`](Self::AlreadyTerminated) error.
    pub fn terminal_reason(&self) -> Option<TerminalReason> {
        match self {
            Self::AlreadyTerminated { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

/// Maps a store lookup failure for `id` onto [`ClientError::NotFound`].
pub(crate) fn not_found(id: TransferId) -> impl FnOnce(StoreError) -> ClientError {
    move |e| match e {
        StoreError::NotFound(_) => ClientError::NotFound(id),
        other => ClientError::Store(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds() {
        assert_eq!(
            ClientError::InvalidRequest("x".into()).kind(),
            ErrorKind::InvalidRequest
        );
        assert_eq!(
            ClientError::MissingComponent("metadata store").kind(),
            ErrorKind::InvalidRequest
        );
        assert_eq!(ClientError::NotFound(TransferId(1)).kind(), ErrorKind::NotFound);
        assert_eq!(
            ClientError::Transfer(TransferError::Cancelled).kind(),
            ErrorKind::TransferCancelled
        );
    }

    #[test]
    fn already_terminated_message() {
        let err = ClientError::AlreadyTerminated {
            id: TransferId(4),
            reason: TerminalReason::Cancelled,
        };
        assert_eq!(err.to_string(), "transfer 4 already cancelled");
        assert_eq!(err.terminal_reason(), Some(TerminalReason::Cancelled));
        assert_eq!(err.kind(), ErrorKind::AlreadyTerminated);
    }

    #[test]
    fn store_not_found_maps_to_transfer_id() {
        let err = not_found(TransferId(8))(StoreError::NotFound("transfer 8".into()));
        assert!(matches!(err, ClientError::NotFound(TransferId(8))));
    }
}
