//! Push, pull and remove against a remote peer.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use dagsync_core::{Block, BlockId, DagInfo, LinkCodec, Manifest, ManifestEntry};
use dagsync_store::{BlockStore, StoreExt};

use crate::coordinator::{
    missing_locally, CoordinatorConfig, Progress, TransferCoordinator, TransferReport,
};
use crate::error::{Result, SyncError};
use crate::messages::{Meta, SessionId, TransferOutcome};
use crate::transport::Transport;

/// Per-call options for push and pull.
#[derive(Debug, Default)]
pub struct TransferOptions {
    /// Pin the root once the DAG is complete at the destination.
    pub pin: bool,
    /// Opaque metadata forwarded to the peer.
    pub meta: Meta,
    /// Cancels the transfer; in-flight blocks are abandoned.
    pub cancel: CancellationToken,
    /// Receives progress updates.
    pub progress: Option<watch::Sender<Progress>>,
}

impl TransferOptions {
    pub fn pinned() -> Self {
        Self {
            pin: true,
            ..Self::default()
        }
    }
}

/// Result of a successful push.
#[derive(Debug, Clone)]
pub struct PushReport {
    pub root: BlockId,
    pub session: SessionId,
    /// Blocks in the DAG.
    pub blocks: usize,
    /// Blocks the peer already held.
    pub skipped: usize,
    pub transfer: TransferReport,
}

/// Result of a successful pull.
#[derive(Debug, Clone)]
pub struct PullReport {
    pub root: BlockId,
    pub blocks: usize,
    /// Blocks already held locally.
    pub skipped: usize,
    pub transfer: TransferReport,
    pub pinned: bool,
}

/// Moves DAGs between the local store and remote peers.
pub struct SyncEngine<S> {
    store: Arc<S>,
    codec: Arc<dyn LinkCodec>,
    config: CoordinatorConfig,
}

impl<S: BlockStore + 'static> SyncEngine<S> {
    pub fn new(store: Arc<S>, codec: Arc<dyn LinkCodec>, config: CoordinatorConfig) -> Self {
        Self {
            store,
            codec,
            config,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// DAGInfo of a locally held DAG.
    pub async fn local_dag_info(&self, root: &BlockId) -> Result<DagInfo> {
        Ok(self.store.dag_info(self.codec.as_ref(), root).await?)
    }

    fn coordinator(&self, progress: Option<watch::Sender<Progress>>) -> TransferCoordinator {
        let coordinator = TransferCoordinator::new(self.config.clone());
        match progress {
            Some(sender) => coordinator.with_progress(sender),
            None => coordinator,
        }
    }

    /// Push the DAG rooted at `root` to `remote`.
    ///
    /// Succeeds only once the peer has stored every block it asked for. If
    /// the peer stops recognising the session mid-transfer (a redelivered
    /// block already completed it, or it expired), a new session is opened
    /// and the push resumes from the peer's fresh diff.
    pub async fn push<T>(
        &self,
        remote: Arc<T>,
        root: &BlockId,
        options: TransferOptions,
    ) -> Result<PushReport>
    where
        T: Transport + ?Sized + 'static,
    {
        let info = self.local_dag_info(root).await?;
        let cancel = options.cancel.clone();
        let coordinator = self.coordinator(options.progress);

        let (mut session, mut diff) =
            open_session(remote.as_ref(), &info, options.pin, &options.meta, &cancel).await?;
        let skipped = info.len() - diff.len();

        tracing::info!(
            root = %root,
            session = %session,
            blocks = info.len(),
            missing = diff.len(),
            "pushing dag"
        );

        let mut transfer = TransferReport::default();
        let mut seen = HashSet::new();
        let mut reopened = 0;
        loop {
            let store = self.store.clone();
            let (peer, sid) = (remote.clone(), session.clone());
            let round = coordinator
                .run(&diff, &cancel, move |entry: ManifestEntry| {
                    let (store, peer, sid) = (store.clone(), peer.clone(), sid.clone());
                    async move {
                        match store.get(&entry.id).await {
                            Ok(Some(data)) => peer.push_block(&sid, &entry.id, data).await,
                            Ok(None) => missing_locally(entry.id),
                            Err(err) => {
                                TransferOutcome::from_error(entry.id, &SyncError::Store(err))
                            }
                        }
                    }
                })
                .await;

            match round {
                Ok(report) => {
                    for id in &report.stored {
                        if seen.insert(*id) {
                            transfer.stored.push(*id);
                        }
                    }
                    transfer.bytes += report.bytes;
                    transfer.retries += report.retries;
                    break;
                }
                Err(failure) if failure.is_session_lost() && reopened < self.config.max_retries => {
                    reopened += 1;
                    let sizes: HashMap<BlockId, u64> =
                        diff.entries.iter().map(|e| (e.id, e.size)).collect();
                    for id in &failure.stored {
                        if seen.insert(*id) {
                            transfer.stored.push(*id);
                            transfer.bytes += sizes.get(id).copied().unwrap_or(0);
                        }
                    }
                    transfer.retries += 1;

                    tracing::warn!(
                        root = %root,
                        session = %session,
                        reopened,
                        outstanding = failure.outstanding.len(),
                        "peer lost the session, reopening"
                    );
                    (session, diff) =
                        open_session(remote.as_ref(), &info, options.pin, &options.meta, &cancel)
                            .await?;
                }
                Err(mut failure) => {
                    let this_round: HashSet<BlockId> = failure.stored.iter().copied().collect();
                    let earlier: Vec<BlockId> = transfer
                        .stored
                        .into_iter()
                        .filter(|id| !this_round.contains(id))
                        .collect();
                    failure.stored.splice(0..0, earlier);
                    return Err(failure.into());
                }
            }
        }

        tracing::info!(root = %root, session = %session, stored = transfer.stored.len(), "push complete");
        Ok(PushReport {
            root: *root,
            session,
            blocks: info.len(),
            skipped,
            transfer,
        })
    }

    /// Pull the DAG rooted at `root` from `remote` into the local store.
    pub async fn pull<T>(
        &self,
        remote: Arc<T>,
        root: &BlockId,
        options: TransferOptions,
    ) -> Result<PullReport>
    where
        T: Transport + ?Sized + 'static,
    {
        let cancel = options.cancel.clone();
        let info = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SyncError::Cancelled),
            info = remote.fetch_dag_info(root, &options.meta) => info?,
        };
        if info.root != *root {
            return Err(SyncError::Protocol(format!(
                "asked for dag {root}, peer described {}",
                info.root
            )));
        }
        info.validate()
            .map_err(|e| SyncError::Protocol(e.to_string()))?;

        let diff = self.store.missing_blocks(&info).await?;
        tracing::info!(root = %root, blocks = info.len(), missing = diff.len(), "pulling dag");

        let store = self.store.clone();
        let transfer = self
            .coordinator(options.progress)
            .run(&diff, &cancel, move |entry: ManifestEntry| {
                let (store, remote) = (store.clone(), remote.clone());
                async move { fetch_into(store.as_ref(), remote.as_ref(), entry.id).await }
            })
            .await?;

        if options.pin {
            self.store.pin(root).await?;
        }

        tracing::info!(root = %root, stored = transfer.stored.len(), pinned = options.pin, "pull complete");
        Ok(PullReport {
            root: *root,
            blocks: info.len(),
            skipped: info.len() - diff.len(),
            transfer,
            pinned: options.pin,
        })
    }

    /// Ask `remote` to drop the DAG rooted at `root`.
    ///
    /// Fails with [`SyncError::RemoveNotSupported`] if the peer does not
    /// service deletions.
    pub async fn remove<T>(&self, remote: &T, root: &BlockId, meta: &Meta) -> Result<()>
    where
        T: Transport + ?Sized,
    {
        remote.remove_dag(root, meta).await?;
        tracing::info!(root = %root, "remote dag removed");
        Ok(())
    }
}

async fn open_session<T>(
    remote: &T,
    info: &DagInfo,
    pin: bool,
    meta: &Meta,
    cancel: &CancellationToken,
) -> Result<(SessionId, Manifest)>
where
    T: Transport + ?Sized,
{
    let (session, diff) = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(SyncError::Cancelled),
        opened = remote.open_receive_session(info, pin, meta) => opened?,
    };
    check_diff(info, &diff)?;
    Ok((session, diff))
}

/// A peer's diff may only name distinct blocks of the DAG being pushed.
fn check_diff(info: &DagInfo, diff: &Manifest) -> Result<()> {
    let listed: HashSet<&BlockId> = info.ids().collect();
    let mut seen = HashSet::with_capacity(diff.len());
    for entry in &diff.entries {
        if !listed.contains(&entry.id) {
            return Err(SyncError::Protocol(format!(
                "peer asked for block {} which is not in dag {}",
                entry.id, info.root
            )));
        }
        if !seen.insert(entry.id) {
            return Err(SyncError::Protocol(format!(
                "peer listed block {} twice in its diff",
                entry.id
            )));
        }
    }
    Ok(())
}

async fn fetch_into<S, T>(store: &S, remote: &T, id: BlockId) -> TransferOutcome
where
    S: BlockStore + ?Sized,
    T: Transport + ?Sized,
{
    let data = match remote.fetch_block(&id).await {
        Ok(data) => data,
        Err(err) => return TransferOutcome::from_error(id, &err),
    };
    let block = match Block::verified(id, data) {
        Ok(block) => block,
        Err(err) => return TransferOutcome::from_error(id, &SyncError::Core(err)),
    };
    match store.put(block.id(), block.data().clone()).await {
        Ok(_) => TransferOutcome::Stored(id),
        Err(err) => TransferOutcome::from_error(id, &SyncError::Store(err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::FailureCause;
    use crate::messages::{ErrorCode, WireError};
    use crate::receiver::{Receiver, ReceiverConfig};
    use crate::session::SessionStatus;
    use dagsync_core::{DagNode, NodeCodec};
    use dagsync_store::MemoryStore;

    async fn seeded_store() -> (Arc<MemoryStore>, Vec<Block>) {
        let store = Arc::new(MemoryStore::new());
        let c = DagNode::leaf(&b"c"[..]).to_block().unwrap();
        let b = DagNode::leaf(&b"b"[..]).to_block().unwrap();
        let a = DagNode::new(vec![*c.id()], &b"a"[..]).to_block().unwrap();
        let root = DagNode::new(vec![*a.id(), *b.id()], &b"root"[..])
            .to_block()
            .unwrap();
        let blocks = vec![root, a, c, b];
        for block in &blocks {
            store.put_block(block).await.unwrap();
        }
        (store, blocks)
    }

    fn engine(store: Arc<MemoryStore>) -> SyncEngine<MemoryStore> {
        SyncEngine::new(store, Arc::new(NodeCodec), CoordinatorConfig::default())
    }

    fn receiver(store: Arc<MemoryStore>) -> Arc<Receiver<MemoryStore>> {
        Arc::new(Receiver::new(
            store,
            Arc::new(NodeCodec),
            ReceiverConfig::default(),
        ))
    }

    #[tokio::test]
    async fn test_push_full_dag() {
        let (local, blocks) = seeded_store().await;
        let remote_store = Arc::new(MemoryStore::new());
        let remote = receiver(remote_store.clone());
        let root = *blocks[0].id();

        let report = engine(local)
            .push(remote.clone(), &root, TransferOptions::pinned())
            .await
            .unwrap();

        assert_eq!(report.blocks, 4);
        assert_eq!(report.skipped, 0);
        assert_eq!(report.transfer.stored.len(), 4);
        assert_eq!(remote_store.len(), 4);
        assert!(remote_store.is_pinned(&root).await.unwrap());
        assert_eq!(
            remote.session_status(&report.session).unwrap(),
            SessionStatus::Complete
        );
    }

    #[tokio::test]
    async fn test_push_skips_blocks_peer_holds() {
        let (local, blocks) = seeded_store().await;
        let remote_store = Arc::new(MemoryStore::new());
        remote_store.put_block(&blocks[2]).await.unwrap();

        let report = engine(local)
            .push(receiver(remote_store.clone()), blocks[0].id(), TransferOptions::default())
            .await
            .unwrap();

        assert_eq!(report.skipped, 1);
        assert!(!report.transfer.stored.contains(blocks[2].id()));
        assert_eq!(remote_store.len(), 4);
    }

    #[tokio::test]
    async fn test_push_unknown_root() {
        let (local, _) = seeded_store().await;
        let err = engine(local)
            .push(
                receiver(Arc::new(MemoryStore::new())),
                &BlockId::of(b"absent"),
                TransferOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Store(_)));
    }

    #[tokio::test]
    async fn test_pull_full_dag() {
        let (remote_store, blocks) = seeded_store().await;
        let local = Arc::new(MemoryStore::new());
        let root = *blocks[0].id();

        let report = engine(local.clone())
            .pull(receiver(remote_store), &root, TransferOptions::pinned())
            .await
            .unwrap();

        assert_eq!(report.transfer.stored.len(), 4);
        assert!(report.pinned);
        assert!(local.is_pinned(&root).await.unwrap());
        let info = engine(local).local_dag_info(&root).await.unwrap();
        assert_eq!(info.len(), 4);
    }

    #[tokio::test]
    async fn test_pull_missing_dag() {
        let err = engine(Arc::new(MemoryStore::new()))
            .pull(
                receiver(Arc::new(MemoryStore::new())),
                &BlockId::of(b"absent"),
                TransferOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)));
    }

    /// Serves a DAG whose blocks are all swapped for garbage.
    struct Corrupting(Arc<Receiver<MemoryStore>>);

    #[async_trait::async_trait]
    impl Transport for Corrupting {
        async fn open_receive_session(
            &self,
            info: &DagInfo,
            pin: bool,
            meta: &Meta,
        ) -> Result<(SessionId, dagsync_core::Manifest)> {
            self.0.open_receive_session(info, pin, meta).await
        }

        async fn push_block(&self, s: &SessionId, id: &BlockId, d: bytes::Bytes) -> TransferOutcome {
            self.0.push_block(s, id, d).await
        }

        async fn fetch_dag_info(&self, root: &BlockId, meta: &Meta) -> Result<DagInfo> {
            self.0.fetch_dag_info(root, meta).await
        }

        async fn fetch_block(&self, _id: &BlockId) -> Result<bytes::Bytes> {
            Ok(bytes::Bytes::from_static(b"garbage"))
        }

        async fn remove_dag(&self, root: &BlockId, meta: &Meta) -> Result<()> {
            self.0.remove_dag(root, meta).await
        }
    }

    #[tokio::test]
    async fn test_pull_rejects_corrupt_blocks() {
        let (remote_store, blocks) = seeded_store().await;
        let local = Arc::new(MemoryStore::new());
        let remote = Arc::new(Corrupting(receiver(remote_store)));

        let err = engine(local.clone())
            .pull(remote, blocks[0].id(), TransferOptions::default())
            .await
            .unwrap_err();

        match err {
            SyncError::Transfer(failure) => assert!(matches!(
                failure.cause,
                FailureCause::Block { cause: WireError { code: ErrorCode::HashMismatch, .. }, .. }
            )),
            other => panic!("unexpected error: {other}"),
        }
        assert!(local.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_open() {
        let (local, blocks) = seeded_store().await;
        let options = TransferOptions::default();
        options.cancel.cancel();

        let err = engine(local)
            .push(receiver(Arc::new(MemoryStore::new())), blocks[0].id(), options)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Cancelled));
    }

    #[tokio::test]
    async fn test_remove_not_supported() {
        let (local, blocks) = seeded_store().await;
        let remote = receiver(Arc::new(MemoryStore::new()));
        let err = engine(local)
            .remove(remote.as_ref(), blocks[0].id(), &Meta::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::RemoveNotSupported));
    }

    /// Lists every block of the diff twice.
    struct Duplicating(Arc<Receiver<MemoryStore>>);

    #[async_trait::async_trait]
    impl Transport for Duplicating {
        async fn open_receive_session(
            &self,
            info: &DagInfo,
            pin: bool,
            meta: &Meta,
        ) -> Result<(SessionId, Manifest)> {
            let (session, mut diff) = self.0.open_receive_session(info, pin, meta).await?;
            let again = diff.entries.clone();
            diff.entries.extend(again);
            Ok((session, diff))
        }

        async fn push_block(&self, s: &SessionId, id: &BlockId, d: bytes::Bytes) -> TransferOutcome {
            self.0.push_block(s, id, d).await
        }

        async fn fetch_dag_info(&self, root: &BlockId, meta: &Meta) -> Result<DagInfo> {
            self.0.fetch_dag_info(root, meta).await
        }

        async fn fetch_block(&self, id: &BlockId) -> Result<bytes::Bytes> {
            self.0.fetch_block(id).await
        }

        async fn remove_dag(&self, root: &BlockId, meta: &Meta) -> Result<()> {
            self.0.remove_dag(root, meta).await
        }
    }

    #[tokio::test]
    async fn test_push_rejects_duplicate_diff_entries() {
        let (local, blocks) = seeded_store().await;
        let remote_store = Arc::new(MemoryStore::new());
        let remote = Arc::new(Duplicating(receiver(remote_store.clone())));

        let err = engine(local)
            .push(remote, blocks[0].id(), TransferOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Protocol(_)));
        assert!(remote_store.is_empty());
    }

    /// Drops the session at the peer the first time `target` is pushed.
    struct Expiring {
        inner: Arc<Receiver<MemoryStore>>,
        target: BlockId,
        fired: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl Transport for Expiring {
        async fn open_receive_session(
            &self,
            info: &DagInfo,
            pin: bool,
            meta: &Meta,
        ) -> Result<(SessionId, Manifest)> {
            self.inner.open_receive_session(info, pin, meta).await
        }

        async fn push_block(&self, s: &SessionId, id: &BlockId, d: bytes::Bytes) -> TransferOutcome {
            if *id == self.target && !self.fired.swap(true, std::sync::atomic::Ordering::SeqCst) {
                self.inner.sessions().abort(s).unwrap();
            }
            self.inner.push_block(s, id, d).await
        }

        async fn fetch_dag_info(&self, root: &BlockId, meta: &Meta) -> Result<DagInfo> {
            self.inner.fetch_dag_info(root, meta).await
        }

        async fn fetch_block(&self, id: &BlockId) -> Result<bytes::Bytes> {
            self.inner.fetch_block(id).await
        }

        async fn remove_dag(&self, root: &BlockId, meta: &Meta) -> Result<()> {
            self.inner.remove_dag(root, meta).await
        }
    }

    #[tokio::test]
    async fn test_push_resumes_after_session_lost() {
        let (local, blocks) = seeded_store().await;
        let remote_store = Arc::new(MemoryStore::new());
        let inner = receiver(remote_store.clone());
        let remote = Arc::new(Expiring {
            inner: inner.clone(),
            target: *blocks[2].id(),
            fired: Default::default(),
        });
        let root = *blocks[0].id();

        let report = engine(local)
            .push(remote, &root, TransferOptions::pinned())
            .await
            .unwrap();

        assert_eq!(remote_store.len(), 4);
        assert!(remote_store.is_pinned(&root).await.unwrap());
        assert!(report.transfer.stored.contains(blocks[2].id()));
        assert!(report.transfer.retries >= 1);
        assert_eq!(
            inner.session_status(&report.session).unwrap(),
            SessionStatus::Complete
        );
    }

    #[tokio::test]
    async fn test_push_gives_up_when_sessions_keep_vanishing() {
        let (local, blocks) = seeded_store().await;
        let remote = receiver(Arc::new(MemoryStore::new()));
        let config = CoordinatorConfig {
            max_retries: 0,
            ..CoordinatorConfig::default()
        };
        let remote = Arc::new(Expiring {
            inner: remote,
            target: *blocks[1].id(),
            fired: Default::default(),
        });

        let err = SyncEngine::new(local, Arc::new(NodeCodec), config)
            .push(remote, blocks[0].id(), TransferOptions::default())
            .await
            .unwrap_err();

        match err {
            SyncError::Transfer(failure) => assert!(failure.is_session_lost()),
            other => panic!("unexpected error: {other}"),
        }
    }
}
