//! The DagSync node: unified API over store, receiver and sync engine.
//!
//! A node plays both roles at once. Its [`Receiver`] answers peers that push
//! to or pull from it; its engine pushes to and pulls from other peers.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use dagsync_core::{Block, BlockId, DagInfo, DagNode, LenientCodec, LinkCodec, NodeCodec};
use dagsync_http::HttpClient;
use dagsync_store::{BlockStore, StoreExt};
use dagsync_sync::{
    CoordinatorConfig, Meta, PullReport, PushReport, Receiver, ReceiverConfig, ReceiverHooks,
    SessionId, SessionStatus, SyncEngine, TransferOptions, Transport,
};

use crate::error::{DagSyncError, Result};

/// Configuration for a DagSync node.
#[derive(Debug, Clone)]
pub struct DagSyncConfig {
    /// Receiving side: diff policy, block size limit, session lifetimes.
    pub receiver: ReceiverConfig,
    /// Sending side: concurrency, retries, backoff.
    pub coordinator: CoordinatorConfig,
    /// How often the session reaper runs.
    pub reap_interval: Duration,
    /// Treat blocks that are not DAG nodes as leaves instead of failing.
    pub lenient_codec: bool,
}

impl Default for DagSyncConfig {
    fn default() -> Self {
        Self {
            receiver: ReceiverConfig::default(),
            coordinator: CoordinatorConfig::default(),
            reap_interval: Duration::from_secs(30),
            lenient_codec: false,
        }
    }
}

impl DagSyncConfig {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.coordinator.concurrency = concurrency;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.coordinator.max_retries = max_retries;
        self
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.coordinator.initial_backoff = initial;
        self.coordinator.max_backoff = max;
        self
    }

    pub fn with_idle_ttl(mut self, ttl: Duration) -> Self {
        self.receiver.sessions.idle_ttl = ttl;
        self
    }

    pub fn with_require_all_blocks(mut self, require: bool) -> Self {
        self.receiver.require_all_blocks = require;
        self
    }

    pub fn with_reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = interval;
        self
    }

    pub fn with_lenient_codec(mut self, lenient: bool) -> Self {
        self.lenient_codec = lenient;
        self
    }

    /// Reject settings that would stall or spin.
    pub fn validate(&self) -> Result<()> {
        if self.coordinator.concurrency == 0 {
            return Err(DagSyncError::Config("concurrency must be at least 1".into()));
        }
        if self.coordinator.initial_backoff > self.coordinator.max_backoff {
            return Err(DagSyncError::Config(
                "initial backoff exceeds max backoff".into(),
            ));
        }
        if self.receiver.max_block_size == 0 {
            return Err(DagSyncError::Config("max block size must be non-zero".into()));
        }
        if self.receiver.sessions.idle_ttl.is_zero() || self.reap_interval.is_zero() {
            return Err(DagSyncError::Config(
                "session ttl and reap interval must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// A peer that holds DAGs and syncs them with other peers.
pub struct DagSync<S> {
    store: Arc<S>,
    codec: Arc<dyn LinkCodec>,
    receiver: Arc<Receiver<S>>,
    engine: SyncEngine<S>,
    config: DagSyncConfig,
    shutdown: CancellationToken,
}

impl<S: BlockStore + 'static> DagSync<S> {
    /// Create a node over `store`.
    pub fn new(store: S, config: DagSyncConfig) -> Result<Self> {
        Self::from_shared(Arc::new(store), config)
    }

    /// Create a node over a store shared with other components.
    pub fn from_shared(store: Arc<S>, config: DagSyncConfig) -> Result<Self> {
        config.validate()?;
        let codec: Arc<dyn LinkCodec> = if config.lenient_codec {
            Arc::new(LenientCodec)
        } else {
            Arc::new(NodeCodec)
        };

        let receiver = Arc::new(Receiver::new(
            store.clone(),
            codec.clone(),
            config.receiver.clone(),
        ));
        let engine = SyncEngine::new(store.clone(), codec.clone(), config.coordinator.clone());

        Ok(Self {
            store,
            codec,
            receiver,
            engine,
            config,
            shutdown: CancellationToken::new(),
        })
    }

    /// Install receiver policy hooks. Call before serving or spawning the
    /// reaper; open sessions are discarded.
    pub fn with_hooks(mut self, hooks: Arc<dyn ReceiverHooks>) -> Self {
        self.receiver = Arc::new(
            Receiver::new(
                self.store.clone(),
                self.codec.clone(),
                self.config.receiver.clone(),
            )
            .with_hooks(hooks),
        );
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &DagSyncConfig {
        &self.config
    }

    /// The receiving side of this node.
    pub fn receiver(&self) -> Arc<Receiver<S>> {
        self.receiver.clone()
    }

    /// This node as a transport, for in-process peers.
    pub fn as_transport(&self) -> Arc<dyn Transport> {
        self.receiver.clone()
    }

    /// A transport to a peer serving HTTP at `url`.
    pub fn http_peer(url: impl Into<String>) -> Arc<dyn Transport> {
        Arc::new(HttpClient::new(url))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Block Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Encode and store a DAG node. Returns its ID.
    pub async fn add_node(&self, links: Vec<BlockId>, data: impl Into<Bytes>) -> Result<BlockId> {
        let block = DagNode::new(links, data).to_block()?;
        self.put_block(&block).await?;
        Ok(*block.id())
    }

    /// Store a block.
    pub async fn put_block(&self, block: &Block) -> Result<()> {
        self.store.put_block(block).await?;
        Ok(())
    }

    pub async fn get_block(&self, id: &BlockId) -> Result<Option<Bytes>> {
        Ok(self.store.get(id).await?)
    }

    /// DAGInfo of a locally held DAG.
    pub async fn dag_info(&self, root: &BlockId) -> Result<DagInfo> {
        Ok(self.engine.local_dag_info(root).await?)
    }

    pub async fn pin(&self, root: &BlockId) -> Result<()> {
        Ok(self.store.pin(root).await?)
    }

    pub async fn unpin(&self, root: &BlockId) -> Result<bool> {
        Ok(self.store.unpin(root).await?)
    }

    pub async fn is_pinned(&self, root: &BlockId) -> Result<bool> {
        Ok(self.store.is_pinned(root).await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sync Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Push the DAG rooted at `root` to `remote`.
    pub async fn push<T>(
        &self,
        remote: Arc<T>,
        root: &BlockId,
        options: TransferOptions,
    ) -> Result<PushReport>
    where
        T: Transport + ?Sized + 'static,
    {
        self.ensure_running()?;
        tokio::select! {
            _ = self.shutdown.cancelled() => Err(DagSyncError::Shutdown),
            report = self.engine.push(remote, root, options) => Ok(report?),
        }
    }

    /// Pull the DAG rooted at `root` from `remote`.
    pub async fn pull<T>(
        &self,
        remote: Arc<T>,
        root: &BlockId,
        options: TransferOptions,
    ) -> Result<PullReport>
    where
        T: Transport + ?Sized + 'static,
    {
        self.ensure_running()?;
        tokio::select! {
            _ = self.shutdown.cancelled() => Err(DagSyncError::Shutdown),
            report = self.engine.pull(remote, root, options) => Ok(report?),
        }
    }

    /// Ask `remote` to drop the DAG rooted at `root`.
    pub async fn remove<T>(&self, remote: &T, root: &BlockId, meta: &Meta) -> Result<()>
    where
        T: Transport + ?Sized,
    {
        self.ensure_running()?;
        Ok(self.engine.remove(remote, root, meta).await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sessions & Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    pub fn session_status(&self, session: &SessionId) -> Result<SessionStatus> {
        Ok(self.receiver.session_status(session)?)
    }

    /// Retry finalization of a complete session whose pin failed.
    pub async fn finalize_session(&self, session: &SessionId) -> Result<bool> {
        Ok(self.receiver.finalize(session).await?)
    }

    /// Periodically discard idle sessions until the node shuts down.
    pub fn spawn_session_reaper(&self) -> JoinHandle<()> {
        let sessions = self.receiver.sessions().clone();
        let shutdown = self.shutdown.clone();
        let mut ticker = tokio::time::interval(self.config.reap_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => match sessions.reap_idle() {
                        Ok(0) => {}
                        Ok(reaped) => tracing::info!(reaped, "expired idle sessions"),
                        Err(e) => tracing::warn!(error = %e, "session reap failed"),
                    },
                }
            }
            tracing::debug!("session reaper stopped");
        })
    }

    /// Serve this node over HTTP on `listener` until shutdown.
    pub async fn serve_http(&self, listener: TcpListener) -> io::Result<()> {
        dagsync_http::serve(
            listener,
            self.as_transport(),
            self.config.receiver.max_block_size,
            self.shutdown.child_token(),
        )
        .await
    }

    /// Stop the reaper and HTTP server, abandon running transfers and drop
    /// every session.
    pub fn shutdown(&self) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Ok(());
        }
        self.shutdown.cancel();
        self.receiver.sessions().clear()?;
        tracing::info!("dagsync node shut down");
        Ok(())
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    fn ensure_running(&self) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(DagSyncError::Shutdown);
        }
        Ok(())
    }
}

impl<S> Drop for DagSync<S> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
