//! Manifest diffing: which blocks of a DAG does a peer lack?
//!
//! The diff preserves DAGInfo order. Order carries no parent/child delivery
//! guarantee (every block is independently verifiable), but it makes diffs
//! reproducible: the same DAGInfo against the same block set always yields
//! the same manifest.

use std::collections::HashSet;

use crate::dag::{DagInfo, Manifest, ManifestEntry};
use crate::types::BlockId;

/// Compute the blocks of `info` for which `has` returns false.
///
/// `has` is called at most once per distinct block ID.
pub fn diff<F>(info: &DagInfo, mut has: F) -> Manifest
where
    F: FnMut(&BlockId) -> bool,
{
    let mut seen = HashSet::with_capacity(info.entries.len());
    let entries = info
        .entries
        .iter()
        .filter(|e| seen.insert(e.id))
        .filter(|e| !has(&e.id))
        .map(|e| ManifestEntry {
            id: e.id,
            size: e.size,
        })
        .collect();

    Manifest::new(entries)
}

/// Diff against an in-memory set of held blocks.
pub fn diff_against(info: &DagInfo, held: &HashSet<BlockId>) -> Manifest {
    diff(info, |id| held.contains(id))
}
