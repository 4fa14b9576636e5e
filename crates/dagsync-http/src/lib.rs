//! # dagsync HTTP
//!
//! The remote operations over plain HTTP, on a single route:
//!
//! | Request | Operation | Success |
//! |---|---|---|
//! | `POST /?pin=<bool>&<meta>`, JSON DAGInfo body | open session | 200, `sid` header, JSON diff |
//! | `PUT /?sid=<session>&hash=<id>`, raw block body | push block | 200 |
//! | `GET /?manifest=<root>&<meta>` | fetch DAGInfo | 200, JSON DAGInfo |
//! | `GET /?block=<id>` | fetch block | 200, raw bytes |
//! | `DELETE /?cid=<root>&<meta>` | remove DAG | 200 |
//!
//! Failures carry a JSON [`WireError`](dagsync_sync::WireError) body. 503 and
//! other 5xx replies are retryable, except 501 which means the peer does not
//! service deletions. Any query parameter not listed above is passed through
//! as request metadata.

use axum::http::StatusCode;
use dagsync_sync::ErrorCode;

pub mod client;
pub mod server;

pub use client::HttpClient;
pub use server::{router, router_with_limit, serve};

/// Response header carrying the new session's ID.
pub const SESSION_HEADER: &str = "sid";

pub const PARAM_PIN: &str = "pin";
pub const PARAM_SID: &str = "sid";
pub const PARAM_HASH: &str = "hash";
pub const PARAM_MANIFEST: &str = "manifest";
pub const PARAM_BLOCK: &str = "block";
pub const PARAM_CID: &str = "cid";

/// Query parameters that are never treated as metadata.
pub const RESERVED_PARAMS: &[&str] = &[
    PARAM_PIN,
    PARAM_SID,
    PARAM_HASH,
    PARAM_MANIFEST,
    PARAM_BLOCK,
    PARAM_CID,
];

/// HTTP status for a wire error code.
pub fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::InvalidRequest => StatusCode::BAD_REQUEST,
        ErrorCode::HashMismatch => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorCode::NotFound | ErrorCode::NoSuchSession => StatusCode::NOT_FOUND,
        ErrorCode::RemoveNotSupported => StatusCode::NOT_IMPLEMENTED,
        ErrorCode::Rejected => StatusCode::FORBIDDEN,
        ErrorCode::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCode::Internal | ErrorCode::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
