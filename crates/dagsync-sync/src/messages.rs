//! Wire types for the five remote operations.
//!
//! Every transport carries the same envelopes. Failures always travel as a
//! [`WireError`] with a numeric [`ErrorCode`], so a caller can recover the
//! exact condition (in particular [`ErrorCode::RemoveNotSupported`]) without
//! looking at message text.

use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use dagsync_core::{BlockId, CoreError, DagInfo, Manifest};
use dagsync_store::StoreError;

use crate::error::SyncError;

/// Opaque caller metadata (auth tokens, routing hints) passed with requests.
pub type Meta = BTreeMap<String, String>;

/// Size limits enforced on inbound requests.
pub mod limits {
    /// Default cap on a single pushed block.
    pub const MAX_BLOCK_SIZE: usize = 4 * 1024 * 1024;
    /// Max metadata entries on a request.
    pub const MAX_META_ENTRIES: usize = 32;
    /// Max length of a metadata key or value.
    pub const MAX_META_LEN: usize = 1024;
}

/// Identifier of a receive session at one receiver.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh random session ID (16 bytes, hex).
    pub fn random() -> Self {
        use rand::Rng;
        let bytes: [u8; 16] = rand::thread_rng().gen();
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Error codes for programmatic handling across the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum ErrorCode {
    /// Unknown/unspecified error.
    Unknown = 0,
    /// Malformed request or protocol violation.
    InvalidRequest = 1,
    /// DAG or block not held by the peer.
    NotFound = 2,
    /// The peer does not service deletions.
    RemoveNotSupported = 3,
    /// Session unknown, completed or expired.
    NoSuchSession = 4,
    /// Block bytes do not hash to the claimed ID.
    HashMismatch = 5,
    /// Peer refused the request (quota, auth).
    Rejected = 6,
    /// Transient failure; the same request may succeed later.
    Unavailable = 7,
    /// Internal error on peer.
    Internal = 8,
}

impl ErrorCode {
    /// Whether a request failing with this code may be retried as-is.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorCode::Unavailable)
    }

    pub fn to_u16(self) -> u16 {
        self as u16
    }

    pub fn from_u16(code: u16) -> Self {
        match code {
            1 => ErrorCode::InvalidRequest,
            2 => ErrorCode::NotFound,
            3 => ErrorCode::RemoveNotSupported,
            4 => ErrorCode::NoSuchSession,
            5 => ErrorCode::HashMismatch,
            6 => ErrorCode::Rejected,
            7 => ErrorCode::Unavailable,
            8 => ErrorCode::Internal,
            _ => ErrorCode::Unknown,
        }
    }
}

/// A failure as it travels between peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub code: ErrorCode,
    pub message: String,
}

impl WireError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Rebuild the typed error on the caller's side. Only the code decides
    /// the variant; the message is carried along for diagnostics.
    pub fn into_error(self) -> SyncError {
        match self.code {
            ErrorCode::NotFound => SyncError::NotFound(self.message),
            ErrorCode::RemoveNotSupported => SyncError::RemoveNotSupported,
            ErrorCode::NoSuchSession => SyncError::NoSuchSession(self.message),
            ErrorCode::Rejected => SyncError::Rejected(self.message),
            ErrorCode::InvalidRequest | ErrorCode::HashMismatch => {
                SyncError::Protocol(self.message)
            }
            ErrorCode::Unavailable => SyncError::Transport {
                op: "remote",
                message: self.message,
            },
            ErrorCode::Internal | ErrorCode::Unknown => SyncError::Remote {
                code: self.code,
                message: self.message,
            },
        }
    }
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl From<&SyncError> for WireError {
    fn from(err: &SyncError) -> Self {
        let code = match err {
            SyncError::Transport { .. } => ErrorCode::Unavailable,
            SyncError::Protocol(_) => ErrorCode::InvalidRequest,
            SyncError::NotFound(_) => ErrorCode::NotFound,
            SyncError::RemoveNotSupported => ErrorCode::RemoveNotSupported,
            SyncError::NoSuchSession(_) => ErrorCode::NoSuchSession,
            SyncError::Rejected(_) => ErrorCode::Rejected,
            SyncError::Core(CoreError::HashMismatch { .. }) => ErrorCode::HashMismatch,
            SyncError::Core(_) => ErrorCode::InvalidRequest,
            SyncError::Store(StoreError::BlockNotFound(_)) => ErrorCode::NotFound,
            SyncError::Store(_) | SyncError::Finalize { .. } => ErrorCode::Unavailable,
            SyncError::Remote { code, .. } => *code,
            SyncError::Transfer(_) | SyncError::Cancelled | SyncError::Internal(_) => {
                ErrorCode::Internal
            }
        };
        WireError::new(code, err.to_string())
    }
}

/// Per-block result of a push or fetch.
///
/// Every submitted block resolves to exactly one outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferOutcome {
    /// The block is durably held by the destination.
    Stored(BlockId),
    /// Transient failure; resubmitting may succeed.
    Retryable { id: BlockId, cause: WireError },
    /// Must not be retried; the transfer cannot complete.
    Fatal { id: BlockId, cause: WireError },
}

impl TransferOutcome {
    /// Classify an error raised while transferring `id`.
    pub fn from_error(id: BlockId, err: &SyncError) -> Self {
        let cause = WireError::from(err);
        if cause.code.is_retryable() {
            TransferOutcome::Retryable { id, cause }
        } else {
            TransferOutcome::Fatal { id, cause }
        }
    }

    pub fn id(&self) -> &BlockId {
        match self {
            TransferOutcome::Stored(id) => id,
            TransferOutcome::Retryable { id, .. } | TransferOutcome::Fatal { id, .. } => id,
        }
    }

    pub fn is_stored(&self) -> bool {
        matches!(self, TransferOutcome::Stored(_))
    }
}

/// A remote operation, as sent by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    OpenSession {
        info: DagInfo,
        pin_on_complete: bool,
        meta: Meta,
    },
    PushBlock {
        session: SessionId,
        id: BlockId,
        data: Bytes,
    },
    GetDagInfo {
        root: BlockId,
        meta: Meta,
    },
    GetBlock {
        id: BlockId,
    },
    RemoveDag {
        root: BlockId,
        meta: Meta,
    },
}

/// The answer to a [`Request`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    SessionOpened { session: SessionId, diff: Manifest },
    Pushed(TransferOutcome),
    DagInfo(DagInfo),
    Block(Bytes),
    Removed,
    Error(WireError),
}

impl Request {
    /// Operation name used in logs and transport errors.
    pub fn op(&self) -> &'static str {
        match self {
            Request::OpenSession { .. } => "open_receive_session",
            Request::PushBlock { .. } => "push_block",
            Request::GetDagInfo { .. } => "fetch_dag_info",
            Request::GetBlock { .. } => "fetch_block",
            Request::RemoveDag { .. } => "remove_dag",
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, SyncError> {
        encode(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SyncError> {
        decode(bytes)
    }
}

impl Response {
    pub fn to_bytes(&self) -> Result<Vec<u8>, SyncError> {
        encode(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SyncError> {
        decode(bytes)
    }

    fn unexpected(self, wanted: &str) -> SyncError {
        match self {
            Response::Error(err) => err.into_error(),
            other => SyncError::Protocol(format!("expected {wanted}, got {other:?}")),
        }
    }

    pub fn into_session(self) -> Result<(SessionId, Manifest), SyncError> {
        match self {
            Response::SessionOpened { session, diff } => Ok((session, diff)),
            other => Err(other.unexpected("SessionOpened")),
        }
    }

    pub fn into_dag_info(self) -> Result<DagInfo, SyncError> {
        match self {
            Response::DagInfo(info) => Ok(info),
            other => Err(other.unexpected("DagInfo")),
        }
    }

    pub fn into_block(self) -> Result<Bytes, SyncError> {
        match self {
            Response::Block(data) => Ok(data),
            other => Err(other.unexpected("Block")),
        }
    }

    pub fn into_removed(self) -> Result<(), SyncError> {
        match self {
            Response::Removed => Ok(()),
            other => Err(other.unexpected("Removed")),
        }
    }

    pub fn into_outcome(self, id: BlockId) -> TransferOutcome {
        match self {
            Response::Pushed(outcome) => outcome,
            other => TransferOutcome::from_error(id, &other.unexpected("Pushed")),
        }
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, SyncError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf)
        .map_err(|e| SyncError::Protocol(format!("encode failed: {e}")))?;
    Ok(buf)
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, SyncError> {
    ciborium::from_reader(bytes).map_err(|e| SyncError::Protocol(format!("decode failed: {e}")))
}

/// Check metadata against [`limits`].
pub fn validate_meta(meta: &Meta) -> Result<(), SyncError> {
    if meta.len() > limits::MAX_META_ENTRIES {
        return Err(SyncError::Protocol("too many metadata entries".into()));
    }
    if meta
        .iter()
        .any(|(k, v)| k.len() > limits::MAX_META_LEN || v.len() > limits::MAX_META_LEN)
    {
        return Err(SyncError::Protocol("metadata entry too long".into()));
    }
    Ok(())
}
