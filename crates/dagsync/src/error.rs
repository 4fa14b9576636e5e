//! Error types for the DagSync node.

use dagsync_core::CoreError;
use dagsync_store::StoreError;
use dagsync_sync::SyncError;
use thiserror::Error;

/// Errors that can occur during DagSync operations.
#[derive(Debug, Error)]
pub enum DagSyncError {
    /// Block encoding or content-address error.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Sync error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The node has been shut down.
    #[error("node is shut down")]
    Shutdown,
}

impl DagSyncError {
    /// Whether the failed operation may succeed if repeated.
    pub fn is_retryable(&self) -> bool {
        match self {
            DagSyncError::Sync(e) => e.is_retryable(),
            DagSyncError::Store(_) => true,
            _ => false,
        }
    }

    /// Whether the peer refused a removal because it does not support one.
    pub fn is_remove_not_supported(&self) -> bool {
        matches!(self, DagSyncError::Sync(SyncError::RemoveNotSupported))
    }
}

/// Result type for DagSync operations.
pub type Result<T> = std::result::Result<T, DagSyncError>;
