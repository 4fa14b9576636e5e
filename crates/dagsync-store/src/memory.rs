//! In-memory implementation of the BlockStore trait.
//!
//! Used by tests and by nodes that don't need persistence. Same semantics
//! as SQLite, nothing survives a drop.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use bytes::Bytes;

use dagsync_core::BlockId;

use crate::error::{Result, StoreError};
use crate::traits::{BlockStore, PutResult};

/// In-memory store implementation.
///
/// Thread-safe via RwLock.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// Block bytes indexed by ID.
    blocks: HashMap<BlockId, Bytes>,

    /// Pinned roots with pin time (Unix ms).
    pins: BTreeMap<BlockId, i64>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
        }
    }

    /// Number of blocks held.
    pub fn len(&self) -> usize {
        self.read().map(|inner| inner.blocks.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner
            .read()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner
            .write()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlockStore for MemoryStore {
    async fn has(&self, id: &BlockId) -> Result<bool> {
        Ok(self.read()?.blocks.contains_key(id))
    }

    async fn get(&self, id: &BlockId) -> Result<Option<Bytes>> {
        Ok(self.read()?.blocks.get(id).cloned())
    }

    async fn put(&self, id: &BlockId, data: Bytes) -> Result<PutResult> {
        let mut inner = self.write()?;
        if inner.blocks.contains_key(id) {
            return Ok(PutResult::AlreadyExists);
        }
        inner.blocks.insert(*id, data);
        Ok(PutResult::Inserted)
    }

    async fn pin(&self, root: &BlockId) -> Result<()> {
        self.write()?.pins.entry(*root).or_insert_with(now_millis);
        Ok(())
    }

    async fn unpin(&self, root: &BlockId) -> Result<bool> {
        Ok(self.write()?.pins.remove(root).is_some())
    }

    async fn is_pinned(&self, root: &BlockId) -> Result<bool> {
        Ok(self.read()?.pins.contains_key(root))
    }

    async fn pins(&self) -> Result<Vec<BlockId>> {
        Ok(self.read()?.pins.keys().copied().collect())
    }
}

/// Get current time in milliseconds.
fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::StoreExt;
    use dagsync_core::{Block, DagNode, LenientCodec, NodeCodec};

    #[tokio::test]
    async fn test_memory_store_basic() {
        let store = MemoryStore::new();
        let block = Block::new(&b"hello"[..]);

        let result = store.put_block(&block).await.unwrap();
        assert_eq!(result, PutResult::Inserted);

        assert!(store.has(block.id()).await.unwrap());
        let data = store.get(block.id()).await.unwrap().unwrap();
        assert_eq!(&data[..], b"hello");
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_memory_store_idempotent() {
        let store = MemoryStore::new();
        let block = Block::new(&b"twice"[..]);

        assert_eq!(store.put_block(&block).await.unwrap(), PutResult::Inserted);
        assert_eq!(
            store.put_block(&block).await.unwrap(),
            PutResult::AlreadyExists
        );
    }

    #[tokio::test]
    async fn test_pins() {
        let store = MemoryStore::new();
        let root = BlockId::of(b"root");

        assert!(!store.is_pinned(&root).await.unwrap());
        store.pin(&root).await.unwrap();
        store.pin(&root).await.unwrap();
        assert!(store.is_pinned(&root).await.unwrap());
        assert_eq!(store.pins().await.unwrap(), vec![root]);

        assert!(store.unpin(&root).await.unwrap());
        assert!(!store.unpin(&root).await.unwrap());
    }

    #[tokio::test]
    async fn test_dag_info_preorder() {
        let store = MemoryStore::new();

        // root -> (a -> c), (b -> c)
        let c = DagNode::leaf(&b"c"[..]).to_block().unwrap();
        let a = DagNode::new(vec![*c.id()], &b"a"[..]).to_block().unwrap();
        let b = DagNode::new(vec![*c.id()], &b"b"[..]).to_block().unwrap();
        let root = DagNode::new(vec![*a.id(), *b.id()], &b"r"[..])
            .to_block()
            .unwrap();
        for block in [&root, &a, &b, &c] {
            store.put_block(block).await.unwrap();
        }

        let info = store.dag_info(&NodeCodec, root.id()).await.unwrap();
        info.validate().unwrap();
        let order: Vec<BlockId> = info.ids().copied().collect();
        assert_eq!(order, vec![*root.id(), *a.id(), *c.id(), *b.id()]);
        assert_eq!(info.entry(root.id()).unwrap().links.len(), 2);
        assert_eq!(info.total_bytes(), root.size() + a.size() + b.size() + c.size());
    }

    #[tokio::test]
    async fn test_dag_info_missing_child() {
        let store = MemoryStore::new();
        let missing = BlockId::of(b"never stored");
        let root = DagNode::new(vec![missing], &b"r"[..]).to_block().unwrap();
        store.put_block(&root).await.unwrap();

        let err = store.dag_info(&LenientCodec, root.id()).await.unwrap_err();
        assert!(matches!(err, StoreError::BlockNotFound(id) if id == missing));
    }

    #[tokio::test]
    async fn test_missing_blocks() {
        let store = MemoryStore::new();
        let leaf = DagNode::leaf(&b"leaf"[..]).to_block().unwrap();
        let root = DagNode::new(vec![*leaf.id()], &b"r"[..]).to_block().unwrap();

        let source = MemoryStore::new();
        source.put_block(&root).await.unwrap();
        source.put_block(&leaf).await.unwrap();
        let info = source.dag_info(&NodeCodec, root.id()).await.unwrap();

        store.put_block(&leaf).await.unwrap();
        let missing = store.missing_blocks(&info).await.unwrap();
        assert_eq!(missing.ids(), vec![*root.id()]);

        store.put_block(&root).await.unwrap();
        assert!(store.missing_blocks(&info).await.unwrap().is_empty());
    }
}
