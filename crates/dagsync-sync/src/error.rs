//! Error types for the sync module.

use thiserror::Error;

use dagsync_core::CoreError;
use dagsync_store::StoreError;

use crate::coordinator::TransferFailure;
use crate::messages::{ErrorCode, SessionId};

/// Errors that can occur during sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The peer could not be reached or the call failed in flight.
    #[error("transport error during {op}: {message}")]
    Transport { op: &'static str, message: String },

    /// Malformed request, bad DAGInfo or unexpected reply.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The peer does not hold the requested DAG or block.
    #[error("not found: {0}")]
    NotFound(String),

    /// The peer does not service deletions.
    #[error("remove not supported")]
    RemoveNotSupported,

    /// Session unknown, already completed or expired.
    #[error("no such session: {0}")]
    NoSuchSession(String),

    /// A receiver hook refused the request.
    #[error("rejected: {0}")]
    Rejected(String),

    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Content addressing or DAGInfo validation failed.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Pinning a completed DAG failed; the session stays open.
    #[error("finalize of session {session} failed: {source}")]
    Finalize {
        session: SessionId,
        #[source]
        source: StoreError,
    },

    /// Peer reported an error with no closer local equivalent.
    #[error("peer error ({code:?}): {message}")]
    Remote { code: ErrorCode, message: String },

    /// A multi-block transfer did not complete.
    #[error(transparent)]
    Transfer(Box<TransferFailure>),

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// Broken internal state (poisoned lock).
    #[error("internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Whether the failed operation may succeed if repeated unchanged.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { .. } | SyncError::Store(_) | SyncError::Finalize { .. } => true,
            SyncError::Remote { code, .. } => code.is_retryable(),
            _ => false,
        }
    }
}

impl From<TransferFailure> for SyncError {
    fn from(failure: TransferFailure) -> Self {
        SyncError::Transfer(Box::new(failure))
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(SyncError::Transport {
            op: "fetch_block",
            message: "timeout".into()
        }
        .is_retryable());
        assert!(SyncError::Store(StoreError::WriteRejected("disk full".into())).is_retryable());
        assert!(!SyncError::RemoveNotSupported.is_retryable());
        assert!(!SyncError::NoSuchSession("gone".into()).is_retryable());
        assert!(!SyncError::Protocol("bad".into()).is_retryable());
    }
}
