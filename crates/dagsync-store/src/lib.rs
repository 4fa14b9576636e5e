//! # dagsync Store
//!
//! Storage abstraction for dagsync. Provides a trait-based interface for
//! block persistence and pinning with SQLite and in-memory implementations.
//!
//! ## Overview
//!
//! The sync engine never owns block bytes. It reads and writes through the
//! [`BlockStore`] trait, so any content-addressed store can sit underneath.
//! The durable implementation is [`SqliteStore`], with [`MemoryStore`] for
//! tests and ephemeral nodes.
//!
//! ## Key Types
//!
//! - [`BlockStore`] - The async trait for block and pin operations
//! - [`StoreExt`] - DAGInfo traversal and store-backed diffing
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage
//!
//! ## Usage
//!
//! ```rust,no_run
//! use dagsync_core::{DagNode, NodeCodec};
//! use dagsync_store::{BlockStore, SqliteStore, StoreExt};
//!
//! async fn example() {
//!     let store = SqliteStore::open("blocks.db").unwrap();
//!
//!     let leaf = DagNode::leaf(&b"hello"[..]).to_block().unwrap();
//!     store.put_block(&leaf).await.unwrap();
//!
//!     let info = store.dag_info(&NodeCodec, leaf.id()).await.unwrap();
//!     store.pin(&info.root).await.unwrap();
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Idempotent writes**: Storing the same block twice returns `AlreadyExists`
//! - **Unverified writes**: Callers check content addresses before `put`
//! - **Root pins**: Pins are recorded per DAG root

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{BlockStore, PutResult, StoreExt};
