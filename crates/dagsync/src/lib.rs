//! # dagsync
//!
//! Synchronize content-addressed DAGs between peers that share no storage.
//!
//! ## Overview
//!
//! dagsync moves a DAG of immutable, hash-identified blocks from one peer to
//! another, sending only the blocks the destination lacks:
//!
//! - **Push**: announce a DAG, receive the diff, deliver the missing blocks
//! - **Pull**: fetch the peer's DAGInfo, diff locally, fetch the missing blocks
//! - **Pin**: protect a completed DAG at the destination
//! - **Remove**: ask a peer to drop a DAG, if it services deletions
//!
//! Every block is verified against its ID before it is stored. Transfers run
//! with bounded concurrency, retry transient failures and either store every
//! block or report exactly which blocks are outstanding.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use dagsync::{DagSync, DagSyncConfig, TransferOptions};
//! use dagsync::store::{MemoryStore, SqliteStore};
//!
//! async fn example() {
//!     let local = DagSync::new(SqliteStore::open("blocks.db").unwrap(), DagSyncConfig::default())
//!         .unwrap();
//!     let remote = DagSync::new(MemoryStore::new(), DagSyncConfig::default()).unwrap();
//!
//!     let leaf = local.add_node(vec![], &b"hello"[..]).await.unwrap();
//!     let root = local.add_node(vec![leaf], &b"root"[..]).await.unwrap();
//!
//!     let report = local
//!         .push(remote.as_transport(), &root, TransferOptions::pinned())
//!         .await
//!         .unwrap();
//!     println!("sent {} of {} blocks", report.transfer.stored.len(), report.blocks);
//!
//!     // Over HTTP instead:
//!     let peer = DagSync::<MemoryStore>::http_peer("http://127.0.0.1:8080/");
//!     local.pull(peer, &root, TransferOptions::default()).await.unwrap();
//! }
//! ```
//!
//! ## Re-exports
//!
//! This crate re-exports the component crates for convenience:
//!
//! - `dagsync::core` - Block IDs, DAGInfo, manifests, the differ and node codec
//! - `dagsync::store` - Storage abstraction, SQLite and memory stores
//! - `dagsync::sync` - Sessions, receiver, transfer coordinator and engine
//! - `dagsync::http` - HTTP server and client transport

pub mod error;
pub mod node;

// Re-export component crates
pub use dagsync_core as core;
pub use dagsync_http as http;
pub use dagsync_store as store;
pub use dagsync_sync as sync;

// Re-export main types for convenience
pub use error::{DagSyncError, Result};
pub use node::{DagSync, DagSyncConfig};

// Re-export commonly used types
pub use dagsync_core::{Block, BlockId, DagInfo, DagNode, Manifest};
pub use dagsync_sync::{
    CancellationToken, Meta, Progress, PullReport, PushReport, SessionId, SessionStatus,
    TransferOptions, Transport,
};
