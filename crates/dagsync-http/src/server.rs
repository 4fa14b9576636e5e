//! axum server exposing a [`Transport`] on a single route.

use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use dagsync_core::{BlockId, DagInfo};
use dagsync_sync::{limits, ErrorCode, Meta, SyncError, Transport, TransferOutcome, WireError};

use crate::{
    status_for, PARAM_BLOCK, PARAM_CID, PARAM_HASH, PARAM_MANIFEST, PARAM_PIN, PARAM_SID,
    RESERVED_PARAMS, SESSION_HEADER,
};

type Peer = Arc<dyn Transport>;
type Params = Query<BTreeMap<String, String>>;

/// Room for the JSON framing around the largest block.
const BODY_SLACK: usize = 64 * 1024;

/// Build the router serving `peer` with the default block size limit.
pub fn router(peer: Peer) -> Router {
    router_with_limit(peer, limits::MAX_BLOCK_SIZE)
}

/// Build the router serving `peer`, accepting blocks up to `max_block_size`.
///
/// Must be at least the peer's own limit, or large blocks are refused with
/// a bare 413 before the peer can classify them.
pub fn router_with_limit(peer: Peer, max_block_size: usize) -> Router {
    Router::new()
        .route(
            "/",
            post(open_session)
                .put(push_block)
                .get(fetch)
                .delete(remove_dag),
        )
        .layer(DefaultBodyLimit::max(max_block_size.saturating_add(BODY_SLACK)))
        .with_state(peer)
}

/// Serve `peer` on `listener` until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    peer: Peer,
    max_block_size: usize,
    shutdown: CancellationToken,
) -> io::Result<()> {
    info!(addr = ?listener.local_addr().ok(), max_block_size, "dagsync http server listening");
    axum::serve(listener, router_with_limit(peer, max_block_size))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

async fn open_session(State(peer): State<Peer>, Query(params): Params, body: Bytes) -> Response {
    let pin = params
        .get(PARAM_PIN)
        .is_some_and(|v| v == "true" || v == "1");
    let info: DagInfo = match serde_json::from_slice(&body) {
        Ok(info) => info,
        Err(err) => return bad_request(format!("invalid DAGInfo: {err}")),
    };

    match peer.open_receive_session(&info, pin, &meta(&params)).await {
        Ok((session, diff)) => {
            debug!(session = %session, missing = diff.len(), "session opened over http");
            ([(SESSION_HEADER, session.to_string())], Json(diff)).into_response()
        }
        Err(err) => error_response(&err),
    }
}

async fn push_block(State(peer): State<Peer>, Query(params): Params, body: Bytes) -> Response {
    let Some(session) = params.get(PARAM_SID) else {
        return bad_request("missing sid");
    };
    let id = match block_param(&params, PARAM_HASH) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match peer.push_block(&session.as_str().into(), &id, body).await {
        TransferOutcome::Stored(_) => StatusCode::OK.into_response(),
        TransferOutcome::Retryable { cause, .. } => {
            (StatusCode::SERVICE_UNAVAILABLE, Json(cause)).into_response()
        }
        TransferOutcome::Fatal { cause, .. } => wire_response(cause),
    }
}

async fn fetch(State(peer): State<Peer>, Query(params): Params) -> Response {
    if params.contains_key(PARAM_MANIFEST) {
        let root = match block_param(&params, PARAM_MANIFEST) {
            Ok(id) => id,
            Err(resp) => return resp,
        };
        return match peer.fetch_dag_info(&root, &meta(&params)).await {
            Ok(info) => Json(info).into_response(),
            Err(err) => error_response(&err),
        };
    }

    if params.contains_key(PARAM_BLOCK) {
        let id = match block_param(&params, PARAM_BLOCK) {
            Ok(id) => id,
            Err(resp) => return resp,
        };
        return match peer.fetch_block(&id).await {
            Ok(data) => ([(header::CONTENT_TYPE, "application/octet-stream")], data).into_response(),
            Err(err) => error_response(&err),
        };
    }

    bad_request("expected `manifest` or `block` parameter")
}

async fn remove_dag(State(peer): State<Peer>, Query(params): Params) -> Response {
    let root = match block_param(&params, PARAM_CID) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match peer.remove_dag(&root, &meta(&params)).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => error_response(&err),
    }
}

fn meta(params: &BTreeMap<String, String>) -> Meta {
    params
        .iter()
        .filter(|(k, _)| !RESERVED_PARAMS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

#[allow(clippy::result_large_err)]
fn block_param(params: &BTreeMap<String, String>, name: &str) -> Result<BlockId, Response> {
    let value = params
        .get(name)
        .ok_or_else(|| bad_request(format!("missing {name}")))?;
    value
        .parse()
        .map_err(|_| bad_request(format!("{name} is not a block id")))
}

fn bad_request(message: impl Into<String>) -> Response {
    wire_response(WireError::new(ErrorCode::InvalidRequest, message))
}

fn error_response(err: &SyncError) -> Response {
    wire_response(WireError::from(err))
}

fn wire_response(err: WireError) -> Response {
    (status_for(err.code), Json(err)).into_response()
}
