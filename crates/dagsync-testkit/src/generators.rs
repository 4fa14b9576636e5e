//! Proptest generators for property-based testing.

use proptest::prelude::*;

use dagsync_core::{Block, BlockId, DagNode};

/// Generate a random BlockId.
pub fn block_id() -> impl Strategy<Value = BlockId> {
    any::<[u8; 32]>().prop_map(BlockId::from_bytes)
}

/// Generate payload bytes of specified max length.
pub fn payload(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}

/// The shape of a random DAG.
///
/// Node `i` links only to nodes with a higher index and every node other
/// than 0 has a parent with a lower index, so node 0 is a root reaching all
/// of them.
#[derive(Debug, Clone)]
pub struct DagShape {
    pub payloads: Vec<Vec<u8>>,
    pub links: Vec<Vec<usize>>,
}

impl DagShape {
    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }

    /// Encode every node, children first. The root is last.
    pub fn build(&self) -> Vec<Block> {
        let n = self.len();
        let mut ids: Vec<Option<BlockId>> = vec![None; n];
        let mut blocks = Vec::with_capacity(n);

        for i in (0..n).rev() {
            let links = self.links[i]
                .iter()
                .filter_map(|&child| ids[child])
                .collect();
            // Index prefix keeps identical payloads from colliding.
            let mut data = i.to_le_bytes().to_vec();
            data.extend_from_slice(&self.payloads[i]);
            let block = DagNode::new(links, data).to_block().unwrap();
            ids[i] = Some(*block.id());
            blocks.push(block);
        }
        blocks
    }
}

/// Generate a connected DAG of 1..=`max_nodes` nodes.
pub fn dag_shape(max_nodes: usize) -> impl Strategy<Value = DagShape> {
    (1..=max_nodes.max(1)).prop_flat_map(|n| {
        let payloads = prop::collection::vec(payload(32), n);
        let parents: Vec<_> = (1..n).map(|i| 0..i).collect();
        let extra = prop::collection::vec((0..n, 0..n), 0..=n);
        (payloads, parents, extra).prop_map(move |(payloads, parents, extra)| {
            let mut links = vec![Vec::new(); n];
            for (child, parent) in (1..n).zip(parents) {
                links[parent].push(child);
            }
            for (a, b) in extra {
                let (from, to) = (a.min(b), a.max(b));
                if from != to && !links[from].contains(&to) {
                    links[from].push(to);
                }
            }
            DagShape { payloads, links }
        })
    })
}

/// Which of `n` blocks a peer already holds.
pub fn held_mask(n: usize) -> impl Strategy<Value = Vec<bool>> {
    prop::collection::vec(any::<bool>(), n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    proptest! {
        #[test]
        fn test_shapes_are_connected(shape in dag_shape(12)) {
            let blocks = shape.build();
            let ids: HashSet<BlockId> = blocks.iter().map(|b| *b.id()).collect();
            prop_assert_eq!(ids.len(), shape.len());

            let mut reached = vec![false; shape.len()];
            let mut stack = vec![0usize];
            while let Some(i) = stack.pop() {
                if !std::mem::replace(&mut reached[i], true) {
                    stack.extend(shape.links[i].iter().copied());
                }
            }
            prop_assert!(reached.iter().all(|r| *r));
        }
    }
}
