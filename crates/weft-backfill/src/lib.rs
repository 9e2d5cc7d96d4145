//! # weft-backfill
//!
//! Reconciliation engine for ATProto-style repo backfills.
//!
//! A federated network exposes two views of each actor's repo: bulk CAR
//! snapshots and a live commit firehose. The two race. This crate makes
//! the downstream consumer see every record exactly once and in a
//! consistent per-repo order, by:
//!
//! - **Job lifecycle**: one job per repo DID moves through
//!   enqueued → in-progress → complete, carrying a monotonic revision
//!   cursor
//! - **Live-event buffering**: commits for repos that have not caught up
//!   are captured in revision order and replayed atomically once the
//!   snapshot lands
//! - **Concurrent import**: snapshot bundles stream through a pluggable
//!   decoder and fan out to parallel record workers, with a global rate
//!   limit on upstream fetches
//!
//! ## Guarantees
//!
//! - Within one repo, ops within a commit apply in source order and
//!   commits apply in non-decreasing revision order
//! - Across repos, no ordering is promised
//! - Snapshot records for a repo apply before any buffered ops newer
//!   than the snapshot
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use tokio_util::sync::CancellationToken;
//! use weft_backfill::prelude::*;
//!
//! let backfiller = Arc::new(Backfiller::new(
//!     "search-ingest",
//!     Arc::new(MemoryStore::new()),
//!     handler,  // your RecordHandler
//!     decoder,  // your CAR SnapshotDecoder
//!     BackfillOptions::default(),
//! )?);
//!
//! let cancel = CancellationToken::new();
//! tokio::spawn(Arc::clone(&backfiller).start(cancel.clone()));
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod backfiller;
pub mod backoff;
pub mod config;
pub mod error;
pub mod event;
pub mod handler;
pub mod job;
pub mod metrics;
pub mod op;
pub mod repo;
pub mod store;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::backfiller::Backfiller;
    pub use crate::backoff::{MAX_RETRIES, can_retry, retry_delay};
    pub use crate::config::{BackfillOptions, MagicHeader};
    pub use crate::error::{Error, Result};
    pub use crate::event::{CommitEvent, CommitOp};
    pub use crate::handler::RecordHandler;
    pub use crate::job::{Job, JobState};
    pub use crate::metrics::BackfillMetrics;
    pub use crate::op::{BufferedOp, CommitOps, OpKind};
    pub use crate::repo::{RepoSnapshot, SnapshotDecoder};
    pub use crate::store::Store;
    pub use crate::store::memory::MemoryStore;
}
