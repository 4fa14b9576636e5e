//! Transport abstraction for the remote operations.
//!
//! A [`Transport`] is anything that can service the five remote calls: an
//! HTTP client, an in-process [`memory::MemoryTransport`], or a
//! [`Receiver`](crate::Receiver) used directly.

use async_trait::async_trait;
use bytes::Bytes;

use dagsync_core::{BlockId, DagInfo, Manifest};

use crate::error::Result;
use crate::messages::{Meta, Request, Response, SessionId, TransferOutcome, WireError};

/// The remote operations a peer offers.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Announce a DAG and open a receive session.
    ///
    /// Returns the session and the blocks the peer still needs, in DAGInfo
    /// order. An empty diff means the peer already holds everything.
    async fn open_receive_session(
        &self,
        info: &DagInfo,
        pin_on_complete: bool,
        meta: &Meta,
    ) -> Result<(SessionId, Manifest)>;

    /// Deliver one block of an open session.
    async fn push_block(&self, session: &SessionId, id: &BlockId, data: Bytes)
        -> TransferOutcome;

    /// Describe the DAG rooted at `root` as the peer holds it.
    async fn fetch_dag_info(&self, root: &BlockId, meta: &Meta) -> Result<DagInfo>;

    /// Fetch one block's bytes.
    async fn fetch_block(&self, id: &BlockId) -> Result<Bytes>;

    /// Ask the peer to drop the DAG rooted at `root`.
    async fn remove_dag(&self, root: &BlockId, meta: &Meta) -> Result<()>;
}

/// Answer a [`Request`] by calling the matching operation on `handler`.
///
/// Errors are folded into [`Response::Error`]; this never fails.
pub async fn serve<T: Transport + ?Sized>(handler: &T, request: Request) -> Response {
    let op = request.op();
    let response = match request {
        Request::OpenSession {
            info,
            pin_on_complete,
            meta,
        } => handler
            .open_receive_session(&info, pin_on_complete, &meta)
            .await
            .map(|(session, diff)| Response::SessionOpened { session, diff }),
        Request::PushBlock { session, id, data } => {
            Ok(Response::Pushed(handler.push_block(&session, &id, data).await))
        }
        Request::GetDagInfo { root, meta } => handler
            .fetch_dag_info(&root, &meta)
            .await
            .map(Response::DagInfo),
        Request::GetBlock { id } => handler.fetch_block(&id).await.map(Response::Block),
        Request::RemoveDag { root, meta } => handler
            .remove_dag(&root, &meta)
            .await
            .map(|()| Response::Removed),
    };

    response.unwrap_or_else(|err| {
        tracing::debug!(op, error = %err, "request failed");
        Response::Error(WireError::from(&err))
    })
}

/// An in-process transport for testing.
///
/// Every call is CBOR-encoded and decoded on both legs, so it exercises the
/// same envelopes a network transport would carry.
pub mod memory {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use crate::error::SyncError;

    /// In-memory transport to a single peer.
    pub struct MemoryTransport {
        peer: Arc<dyn Transport>,
        online: AtomicBool,
    }

    impl MemoryTransport {
        /// Connect to `peer`, typically a [`Receiver`](crate::Receiver).
        pub fn new(peer: Arc<dyn Transport>) -> Self {
            Self {
                peer,
                online: AtomicBool::new(true),
            }
        }

        /// Simulate the peer going away or coming back.
        pub fn set_online(&self, online: bool) {
            self.online.store(online, Ordering::SeqCst);
        }

        async fn call(&self, request: Request) -> Result<Response> {
            let op = request.op();
            if !self.online.load(Ordering::SeqCst) {
                return Err(SyncError::Transport {
                    op,
                    message: "peer unreachable".into(),
                });
            }

            let request = Request::from_bytes(&request.to_bytes()?)?;
            let response = serve(self.peer.as_ref(), request).await;
            Response::from_bytes(&response.to_bytes()?)
        }
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn open_receive_session(
            &self,
            info: &DagInfo,
            pin_on_complete: bool,
            meta: &Meta,
        ) -> Result<(SessionId, Manifest)> {
            self.call(Request::OpenSession {
                info: info.clone(),
                pin_on_complete,
                meta: meta.clone(),
            })
            .await?
            .into_session()
        }

        async fn push_block(
            &self,
            session: &SessionId,
            id: &BlockId,
            data: Bytes,
        ) -> TransferOutcome {
            let request = Request::PushBlock {
                session: session.clone(),
                id: *id,
                data,
            };
            match self.call(request).await {
                Ok(response) => response.into_outcome(*id),
                Err(err) => TransferOutcome::from_error(*id, &err),
            }
        }

        async fn fetch_dag_info(&self, root: &BlockId, meta: &Meta) -> Result<DagInfo> {
            self.call(Request::GetDagInfo {
                root: *root,
                meta: meta.clone(),
            })
            .await?
            .into_dag_info()
        }

        async fn fetch_block(&self, id: &BlockId) -> Result<Bytes> {
            self.call(Request::GetBlock { id: *id }).await?.into_block()
        }

        async fn remove_dag(&self, root: &BlockId, meta: &Meta) -> Result<()> {
            self.call(Request::RemoveDag {
                root: *root,
                meta: meta.clone(),
            })
            .await?
            .into_removed()
        }
    }
}
