//! # dagsync Core
//!
//! Pure primitives for DAG synchronization: block identity, DAG manifests,
//! manifest diffing and the node codec.
//!
//! This crate contains no I/O, no storage, no networking. It is pure
//! computation over content-addressed data.
//!
//! ## Key Types
//!
//! - [`BlockId`] - Content-addressed identifier (Blake3 hash of block bytes)
//! - [`Block`] - Immutable bytes known to hash to their ID
//! - [`DagInfo`] - Every block of a DAG with sizes and links
//! - [`Manifest`] - The blocks a single transfer must move
//!
//! ## Diffing
//!
//! [`diff`] answers "which of these blocks does the peer lack?", preserving
//! DAGInfo order so diffs are reproducible.

pub mod block;
pub mod codec;
pub mod dag;
pub mod diff;
pub mod error;
pub mod types;

pub use block::Block;
pub use codec::{DagNode, LenientCodec, LinkCodec, NodeCodec};
pub use dag::{DagEntry, DagInfo, Manifest, ManifestEntry};
pub use diff::{diff, diff_against};
pub use error::CoreError;
pub use types::BlockId;
