//! # dagsync Sync
//!
//! Session-based transfer of content-addressed DAGs between peers.
//!
//! ## Overview
//!
//! A sender announces a DAG by its [`DagInfo`](dagsync_core::DagInfo). The
//! receiver answers with the blocks it lacks and a session to deliver them
//! into. The sender pushes those blocks through a [`TransferCoordinator`],
//! which bounds concurrency and retries transient failures. When the last
//! block lands the receiver finalizes the session, pinning the root if asked.
//!
//! Pulling is the mirror image: fetch the peer's DAGInfo, diff against the
//! local store, fetch and verify each missing block.
//!
//! ## Key Properties
//!
//! - **Verified**: Every block is hashed before it is stored, on both sides
//! - **Minimal**: Only blocks the destination lacks are moved
//! - **All-or-nothing**: A transfer reports success only when every block is stored
//! - **Exactly-once finalize**: A session pins its root at most once
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dagsync_core::{BlockId, NodeCodec};
//! use dagsync_store::MemoryStore;
//! use dagsync_sync::{
//!     CoordinatorConfig, Receiver, ReceiverConfig, SyncEngine, TransferOptions,
//! };
//!
//! async fn example(root: BlockId) {
//!     let local = Arc::new(MemoryStore::new());
//!     let remote = Arc::new(Receiver::new(
//!         Arc::new(MemoryStore::new()),
//!         Arc::new(NodeCodec),
//!         ReceiverConfig::default(),
//!     ));
//!
//!     let engine = SyncEngine::new(local, Arc::new(NodeCodec), CoordinatorConfig::default());
//!     let report = engine.push(remote, &root, TransferOptions::pinned()).await.unwrap();
//!     println!("pushed {} blocks", report.transfer.stored.len());
//! }
//! ```
//!
//! ## Message Flow
//!
//! ```text
//! Sender                                Receiver
//!   |-------- OpenSession(DagInfo) ---->|
//!   |<------- SessionOpened(diff) ------|
//!   |-------- PushBlock --------------->|   (up to N in flight)
//!   |<------- Pushed(Stored) -----------|
//!   |             ...                   |   last block: pin root
//!
//! Puller                                Peer
//!   |-------- GetDagInfo -------------->|
//!   |<------- DagInfo ------------------|
//!   |-------- GetBlock ---------------->|   (missing blocks only)
//!   |<------- Block --------------------|
//! ```

pub mod coordinator;
pub mod engine;
pub mod error;
pub mod messages;
pub mod receiver;
pub mod session;
pub mod transport;

pub use coordinator::{
    CoordinatorConfig, FailureCause, Progress, TransferCoordinator, TransferFailure,
    TransferReport,
};
pub use engine::{PullReport, PushReport, SyncEngine, TransferOptions};
pub use error::{Result, SyncError};
pub use messages::{
    limits, ErrorCode, Meta, Request, Response, SessionId, TransferOutcome, WireError,
};
pub use receiver::{AllowRemove, DefaultHooks, Receiver, ReceiverConfig, ReceiverHooks};
pub use session::{Recorded, SessionConfig, SessionManager, SessionStatus};
pub use transport::{memory::MemoryTransport, serve, Transport};
pub use tokio_util::sync::CancellationToken;
