//! DAG metadata: the structural manifest of a whole DAG and the
//! transfer manifest a receiver asks for.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::BlockId;

/// One block of a DAG as seen from its manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DagEntry {
    /// The block's identifier.
    pub id: BlockId,
    /// Payload size in bytes.
    pub size: u64,
    /// Child blocks, in link order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<BlockId>,
}

/// Metadata describing every block of a DAG rooted at `root`.
///
/// Entries are in depth-first pre-order starting at the root, each block
/// listed once. A `DagInfo` is never patched: when the DAG changes a new
/// one is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DagInfo {
    pub root: BlockId,
    pub entries: Vec<DagEntry>,
}

impl DagInfo {
    pub fn new(root: BlockId, entries: Vec<DagEntry>) -> Self {
        Self { root, entries }
    }

    /// Number of blocks in the DAG.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of all block sizes.
    pub fn total_bytes(&self) -> u64 {
        self.entries.iter().map(|e| e.size).sum()
    }

    /// Look up an entry by block ID.
    pub fn entry(&self, id: &BlockId) -> Option<&DagEntry> {
        self.entries.iter().find(|e| &e.id == id)
    }

    /// Iterate block IDs in manifest order.
    pub fn ids(&self) -> impl Iterator<Item = &BlockId> {
        self.entries.iter().map(|e| &e.id)
    }

    /// The full DAG as a transfer manifest.
    pub fn to_manifest(&self) -> Manifest {
        Manifest::new(
            self.entries
                .iter()
                .map(|e| ManifestEntry {
                    id: e.id,
                    size: e.size,
                })
                .collect(),
        )
    }

    /// Check structural well-formedness.
    ///
    /// A valid DAGInfo lists its root first, names each block once, and every
    /// link resolves to a listed block.
    pub fn validate(&self) -> Result<(), CoreError> {
        let first = self
            .entries
            .first()
            .ok_or_else(|| CoreError::MalformedDagInfo("no entries".into()))?;

        if first.id != self.root {
            return Err(CoreError::MalformedDagInfo(format!(
                "first entry {} is not the root {}",
                first.id, self.root
            )));
        }

        let mut seen = HashSet::with_capacity(self.entries.len());
        for entry in &self.entries {
            if !seen.insert(entry.id) {
                return Err(CoreError::MalformedDagInfo(format!(
                    "duplicate entry {}",
                    entry.id
                )));
            }
        }

        for entry in &self.entries {
            if let Some(missing) = entry.links.iter().find(|l| !seen.contains(*l)) {
                return Err(CoreError::MalformedDagInfo(format!(
                    "entry {} links to unlisted block {}",
                    entry.id, missing
                )));
            }
        }

        Ok(())
    }
}

/// A block named by a transfer manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub id: BlockId,
    pub size: u64,
}

/// The blocks a transfer must move, in DAGInfo order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn new(entries: Vec<ManifestEntry>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &BlockId) -> bool {
        self.entries.iter().any(|e| &e.id == id)
    }

    pub fn total_bytes(&self) -> u64 {
        self.entries.iter().map(|e| e.size).sum()
    }

    pub fn ids(&self) -> Vec<BlockId> {
        self.entries.iter().map(|e| e.id).collect()
    }

    /// Size of a listed block.
    pub fn size_of(&self, id: &BlockId) -> Option<u64> {
        self.entries.iter().find(|e| &e.id == id).map(|e| e.size)
    }
}
