//! # dagsync Testkit
//!
//! Testing utilities for dagsync.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: DAGs of known shape (three-block, diamond, chain, tree) held in a memory store
//! - **Faults**: A transport that drops, delays or corrupts chosen blocks, and a store that
//!   counts calls and fails pins on demand
//! - **Generators**: Proptest strategies for random DAGs and held-block sets
//!
//! ## Test Fixtures
//!
//! ```rust,ignore
//! use dagsync_testkit::fixtures::DagFixture;
//!
//! let dag = DagFixture::three().await;
//! let peer_store = dag.partial_store(&[1]).await;
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use dagsync_testkit::generators::dag_shape;
//!
//! proptest! {
//!     #[test]
//!     fn root_is_last(shape in dag_shape(16)) {
//!         let blocks = shape.build();
//!         prop_assert_eq!(blocks.len(), shape.len());
//!     }
//! }
//! ```

pub mod faults;
pub mod fixtures;
pub mod generators;

pub use faults::{CountingStore, FlakyTransport};
pub use fixtures::{init_tracing, node, receiver, DagFixture};
pub use generators::{dag_shape, held_mask, DagShape};
