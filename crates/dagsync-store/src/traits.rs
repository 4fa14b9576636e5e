//! BlockStore trait: the abstract interface for block persistence and pinning.
//!
//! The sync engine never persists bytes itself. It talks to whatever
//! implements this trait: SQLite, memory, or an external node.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dagsync_core::{diff_against, Block, BlockId, DagEntry, DagInfo, LinkCodec, Manifest};

use crate::error::{Result, StoreError};

/// Result of writing a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutResult {
    /// Block was stored.
    Inserted,
    /// Block already present (idempotent - not an error).
    AlreadyExists,
}

/// The BlockStore trait: async interface for block persistence.
///
/// # Design Notes
///
/// - **Content-addressed writes**: `put` of an ID already present is a no-op,
///   so concurrent writers of the same block need no coordination.
/// - **No verification**: the store trusts the caller's ID. Hash checks happen
///   before bytes reach the store.
/// - **Pins are per root**: pinning marks a DAG as protected from garbage
///   collection; the store decides what that means for descendants.
#[async_trait]
pub trait BlockStore: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Block Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Check if a block exists.
    async fn has(&self, id: &BlockId) -> Result<bool>;

    /// Get a block's bytes.
    async fn get(&self, id: &BlockId) -> Result<Option<Bytes>>;

    /// Store a block's bytes under `id`.
    async fn put(&self, id: &BlockId, data: Bytes) -> Result<PutResult>;

    // ─────────────────────────────────────────────────────────────────────────
    // Pin Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Pin the DAG rooted at `root`. Pinning twice is a no-op.
    async fn pin(&self, root: &BlockId) -> Result<()>;

    /// Unpin `root`. Returns whether it was pinned.
    async fn unpin(&self, root: &BlockId) -> Result<bool>;

    /// Check if `root` is pinned.
    async fn is_pinned(&self, root: &BlockId) -> Result<bool>;

    /// All pinned roots, ordered by ID.
    async fn pins(&self) -> Result<Vec<BlockId>>;
}

#[async_trait]
impl<S: BlockStore + ?Sized> BlockStore for Arc<S> {
    async fn has(&self, id: &BlockId) -> Result<bool> {
        (**self).has(id).await
    }

    async fn get(&self, id: &BlockId) -> Result<Option<Bytes>> {
        (**self).get(id).await
    }

    async fn put(&self, id: &BlockId, data: Bytes) -> Result<PutResult> {
        (**self).put(id, data).await
    }

    async fn pin(&self, root: &BlockId) -> Result<()> {
        (**self).pin(root).await
    }

    async fn unpin(&self, root: &BlockId) -> Result<bool> {
        (**self).unpin(root).await
    }

    async fn is_pinned(&self, root: &BlockId) -> Result<bool> {
        (**self).is_pinned(root).await
    }

    async fn pins(&self) -> Result<Vec<BlockId>> {
        (**self).pins().await
    }
}

/// Extension trait for common store patterns.
pub trait StoreExt: BlockStore {
    /// Store a verified block.
    fn put_block(
        &self,
        block: &Block,
    ) -> impl std::future::Future<Output = Result<PutResult>> + Send;

    /// The blocks of `info` this store lacks, in DAGInfo order.
    fn missing_blocks(
        &self,
        info: &DagInfo,
    ) -> impl std::future::Future<Output = Result<Manifest>> + Send;

    /// Build the DAGInfo of the DAG rooted at `root` by walking local blocks.
    ///
    /// Entries come out in depth-first pre-order. Fails with
    /// [`StoreError::BlockNotFound`] if any reachable block is absent.
    fn dag_info(
        &self,
        codec: &dyn LinkCodec,
        root: &BlockId,
    ) -> impl std::future::Future<Output = Result<DagInfo>> + Send;
}

impl<S: BlockStore + ?Sized> StoreExt for S {
    async fn put_block(&self, block: &Block) -> Result<PutResult> {
        self.put(block.id(), block.data().clone()).await
    }

    async fn missing_blocks(&self, info: &DagInfo) -> Result<Manifest> {
        let mut held = HashSet::new();
        for id in info.ids() {
            if !held.contains(id) && self.has(id).await? {
                held.insert(*id);
            }
        }
        Ok(diff_against(info, &held))
    }

    async fn dag_info(&self, codec: &dyn LinkCodec, root: &BlockId) -> Result<DagInfo> {
        let mut entries = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![*root];

        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }

            let data = self
                .get(&id)
                .await?
                .ok_or(StoreError::BlockNotFound(id))?;
            let links = codec.links(&data)?;

            // Reverse so the first link is visited first.
            for link in links.iter().rev() {
                if !seen.contains(link) {
                    stack.push(*link);
                }
            }

            entries.push(DagEntry {
                id,
                size: data.len() as u64,
                links,
            });
        }

        Ok(DagInfo::new(*root, entries))
    }
}
