//! The receiving side of every remote operation.
//!
//! [`Receiver`] answers open/push/fetch/remove requests against a local
//! [`BlockStore`]. Network servers wrap it; in-process callers can use it as a
//! [`Transport`] directly.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use dagsync_core::{Block, BlockId, DagInfo, LinkCodec, Manifest};
use dagsync_store::{BlockStore, StoreError, StoreExt};

use crate::error::{Result, SyncError};
use crate::messages::{limits, validate_meta, Meta, SessionId, TransferOutcome};
use crate::session::{SessionConfig, SessionManager, SessionStatus};
use crate::transport::Transport;

/// Receiver policy.
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// Ask for every block of an announced DAG, even ones already held.
    pub require_all_blocks: bool,
    /// Largest block accepted by `push_block`.
    pub max_block_size: usize,
    pub sessions: SessionConfig,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            require_all_blocks: false,
            max_block_size: limits::MAX_BLOCK_SIZE,
            sessions: SessionConfig::default(),
        }
    }
}

/// Caller-supplied policy hooks.
///
/// The defaults accept every announcement, describe DAGs by walking the
/// store and refuse removal.
#[async_trait]
pub trait ReceiverHooks: Send + Sync {
    /// Vet an announced DAG before a session is opened.
    async fn pre_check(&self, _info: &DagInfo, _meta: &Meta) -> Result<()> {
        Ok(())
    }

    /// Supply the DAGInfo for `root` instead of traversing the store.
    async fn dag_info(&self, _root: &BlockId, _meta: &Meta) -> Result<Option<DagInfo>> {
        Ok(None)
    }

    /// Authorize removal of `root`. Removal is unsupported unless overridden.
    async fn authorize_remove(&self, _root: &BlockId, _meta: &Meta) -> Result<()> {
        Err(SyncError::RemoveNotSupported)
    }
}

/// The default hooks.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHooks;

impl ReceiverHooks for DefaultHooks {}

/// Hooks that allow any caller to unpin a DAG.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowRemove;

#[async_trait]
impl ReceiverHooks for AllowRemove {
    async fn authorize_remove(&self, _root: &BlockId, _meta: &Meta) -> Result<()> {
        Ok(())
    }
}

/// Serves remote operations from a local store.
pub struct Receiver<S> {
    store: Arc<S>,
    codec: Arc<dyn LinkCodec>,
    sessions: Arc<SessionManager>,
    hooks: Arc<dyn ReceiverHooks>,
    config: ReceiverConfig,
}

impl<S: BlockStore + 'static> Receiver<S> {
    pub fn new(store: Arc<S>, codec: Arc<dyn LinkCodec>, config: ReceiverConfig) -> Self {
        Self {
            store,
            codec,
            sessions: Arc::new(SessionManager::new(config.sessions.clone())),
            hooks: Arc::new(DefaultHooks),
            config,
        }
    }

    /// Replace the policy hooks.
    pub fn with_hooks(mut self, hooks: Arc<dyn ReceiverHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn config(&self) -> &ReceiverConfig {
        &self.config
    }

    pub fn session_status(&self, session: &SessionId) -> Result<SessionStatus> {
        self.sessions.status(session)
    }

    /// Retry finalization of a complete session whose pin failed earlier.
    pub async fn finalize(&self, session: &SessionId) -> Result<bool> {
        self.sessions.finalize(session, self.store.as_ref()).await
    }

    async fn accept_block(&self, session: &SessionId, id: &BlockId, data: Bytes) -> Result<()> {
        if data.len() > self.config.max_block_size {
            return Err(SyncError::Protocol(format!(
                "block {id} is {} bytes, limit is {}",
                data.len(),
                self.config.max_block_size
            )));
        }

        self.sessions.expects(session, id)?;
        let block = Block::verified(*id, data)?;
        self.store.put(block.id(), block.data().clone()).await?;

        let recorded = self.sessions.record_block(session, id)?;
        tracing::trace!(session = %session, block = %id, new = recorded.newly_recorded, "block stored");
        if recorded.complete {
            self.finalize(session).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<S: BlockStore + 'static> Transport for Receiver<S> {
    async fn open_receive_session(
        &self,
        info: &DagInfo,
        pin_on_complete: bool,
        meta: &Meta,
    ) -> Result<(SessionId, Manifest)> {
        validate_meta(meta)?;
        info.validate()
            .map_err(|e| SyncError::Protocol(e.to_string()))?;
        self.hooks.pre_check(info, meta).await?;

        let diff = if self.config.require_all_blocks {
            info.to_manifest()
        } else {
            self.store.missing_blocks(info).await?
        };

        let session = self
            .sessions
            .create(info.root, &diff, pin_on_complete, meta.clone())?;
        tracing::info!(
            session = %session,
            root = %info.root,
            blocks = info.len(),
            missing = diff.len(),
            "receive session opened"
        );

        if diff.is_empty() {
            self.finalize(&session).await?;
        }
        Ok((session, diff))
    }

    async fn push_block(&self, session: &SessionId, id: &BlockId, data: Bytes) -> TransferOutcome {
        match self.accept_block(session, id, data).await {
            Ok(()) => TransferOutcome::Stored(*id),
            Err(err) => {
                tracing::debug!(session = %session, block = %id, error = %err, "push failed");
                TransferOutcome::from_error(*id, &err)
            }
        }
    }

    async fn fetch_dag_info(&self, root: &BlockId, meta: &Meta) -> Result<DagInfo> {
        validate_meta(meta)?;
        if let Some(info) = self.hooks.dag_info(root, meta).await? {
            return Ok(info);
        }

        match self.store.dag_info(self.codec.as_ref(), root).await {
            Ok(info) => Ok(info),
            Err(StoreError::BlockNotFound(missing)) if missing == *root => {
                Err(SyncError::NotFound(format!("dag {root}")))
            }
            Err(StoreError::BlockNotFound(missing)) => Err(SyncError::NotFound(format!(
                "dag {root} is incomplete, block {missing} is missing"
            ))),
            Err(StoreError::Codec(e)) => Err(SyncError::Core(e)),
            Err(e) => Err(e.into()),
        }
    }

    async fn fetch_block(&self, id: &BlockId) -> Result<Bytes> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("block {id}")))
    }

    async fn remove_dag(&self, root: &BlockId, meta: &Meta) -> Result<()> {
        validate_meta(meta)?;
        self.hooks.authorize_remove(root, meta).await?;
        let was_pinned = self.store.unpin(root).await?;
        tracing::info!(root = %root, was_pinned, "dag removed");
        Ok(())
    }
}
