//! Test fixtures and helpers.
//!
//! Common setup code for integration tests: DAGs of known shape held in a
//! memory store, and receivers seeded with part of them.

use std::sync::Arc;

use dagsync_core::{Block, BlockId, DagInfo, DagNode, NodeCodec};
use dagsync_store::{MemoryStore, StoreExt};
use dagsync_sync::{Receiver, ReceiverConfig};

/// A DAG held in its own memory store.
///
/// `blocks` is in DAGInfo order, so `blocks[0]` is always the root.
pub struct DagFixture {
    pub store: Arc<MemoryStore>,
    pub info: DagInfo,
    pub blocks: Vec<Block>,
}

impl DagFixture {
    /// Build from nodes listed children-first; the last node is the root.
    pub async fn from_nodes(nodes: Vec<Block>) -> Self {
        let store = Arc::new(MemoryStore::new());
        for block in &nodes {
            store.put_block(block).await.unwrap();
        }
        let root = *nodes.last().expect("at least one node").id();
        let info = store.dag_info(&NodeCodec, &root).await.unwrap();

        let blocks = info
            .ids()
            .map(|id| {
                nodes
                    .iter()
                    .find(|b| b.id() == id)
                    .cloned()
                    .expect("node listed in DAGInfo")
            })
            .collect();
        Self {
            store,
            info,
            blocks,
        }
    }

    /// Root `a` linking leaves `b` and `c`.
    pub async fn three() -> Self {
        let b = node(&[], "b");
        let c = node(&[], "c");
        let a = node(&[b.id(), c.id()], "a");
        Self::from_nodes(vec![b, c, a]).await
    }

    /// `root -> left -> shared` and `root -> right -> shared`.
    pub async fn diamond() -> Self {
        let shared = node(&[], "shared");
        let left = node(&[shared.id()], "left");
        let right = node(&[shared.id()], "right");
        let root = node(&[left.id(), right.id()], "root");
        Self::from_nodes(vec![shared, left, right, root]).await
    }

    /// A linked list of `len` blocks.
    pub async fn chain(len: usize) -> Self {
        let mut nodes: Vec<Block> = Vec::with_capacity(len);
        for i in 0..len.max(1) {
            let links: Vec<&BlockId> = nodes.last().map(|b| b.id()).into_iter().collect();
            let block = node(&links, &format!("chain {i}"));
            nodes.push(block);
        }
        Self::from_nodes(nodes).await
    }

    /// A complete tree with `fanout` children per interior node.
    pub async fn tree(depth: u32, fanout: usize) -> Self {
        fn level(depth: u32, fanout: usize, path: String, out: &mut Vec<Block>) -> BlockId {
            let mut links = Vec::new();
            if depth > 0 {
                for i in 0..fanout {
                    links.push(level(depth - 1, fanout, format!("{path}/{i}"), out));
                }
            }
            let block = DagNode::new(links, path.into_bytes()).to_block().unwrap();
            let id = *block.id();
            out.push(block);
            id
        }

        let mut nodes = Vec::new();
        level(depth, fanout, "tree".into(), &mut nodes);
        Self::from_nodes(nodes).await
    }

    pub fn root(&self) -> &BlockId {
        &self.info.root
    }

    /// Block by DAGInfo position.
    pub fn block(&self, index: usize) -> &Block {
        &self.blocks[index]
    }

    pub fn ids(&self) -> Vec<BlockId> {
        self.blocks.iter().map(|b| *b.id()).collect()
    }

    /// A fresh memory store holding the blocks at `indices`.
    pub async fn partial_store(&self, indices: &[usize]) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for &i in indices {
            store.put_block(&self.blocks[i]).await.unwrap();
        }
        store
    }
}

/// Build a node block linking `links`.
pub fn node(links: &[&BlockId], data: &str) -> Block {
    DagNode::new(links.iter().map(|id| **id).collect(), data.as_bytes().to_vec())
        .to_block()
        .unwrap()
}

/// A receiver over `store` with the default node codec.
pub fn receiver(store: Arc<MemoryStore>, config: ReceiverConfig) -> Arc<Receiver<MemoryStore>> {
    Arc::new(Receiver::new(store, Arc::new(NodeCodec), config))
}

/// Install a test-writer tracing subscriber once per process.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_three_is_preorder() {
        let fixture = DagFixture::three().await;
        assert_eq!(fixture.blocks.len(), 3);
        assert_eq!(fixture.block(0).id(), fixture.root());
    }

    #[tokio::test]
    async fn test_diamond_lists_shared_once() {
        let fixture = DagFixture::diamond().await;
        assert_eq!(fixture.info.len(), 4);
        fixture.info.validate().unwrap();
    }

    #[tokio::test]
    async fn test_tree_size() {
        let fixture = DagFixture::tree(2, 3).await;
        assert_eq!(fixture.info.len(), 1 + 3 + 9);
    }

    #[tokio::test]
    async fn test_chain_order() {
        let fixture = DagFixture::chain(5).await;
        assert_eq!(fixture.info.len(), 5);
        for (i, entry) in fixture.info.entries.iter().enumerate().take(4) {
            assert_eq!(entry.links, vec![fixture.info.entries[i + 1].id]);
        }
    }
}
