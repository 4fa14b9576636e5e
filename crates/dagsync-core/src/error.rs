//! Error types for dagsync core.

use thiserror::Error;

use crate::types::BlockId;

/// Core errors that can occur while handling blocks and manifests.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Payload does not hash to the identifier it was presented under.
    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: BlockId, actual: BlockId },

    #[error("invalid block id: {0}")]
    InvalidId(String),

    /// A DAGInfo failed structural validation.
    #[error("malformed dag info: {0}")]
    MalformedDagInfo(String),

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error: {0}")]
    DecodingError(String),
}
