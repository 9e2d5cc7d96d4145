//! Pluggable storage for backfill jobs.
//!
//! The [`Store`] trait defines the persistence layer for jobs, revision
//! cursors, and buffered-op queues.
//!
//! ## Design Principles
//!
//! - **Per-job atomicity**: mutations of one job's state, cursor, and
//!   buffer must be linearizable; the engine relies on it
//! - **Separation of concerns**: the engine never sees how jobs are
//!   stored or locked
//! - **Testability**: an in-memory implementation for tests and
//!   single-process deployments, a durable store for production

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;

use weft_core::id::{Did, Rev};

use crate::error::Result;
use crate::job::Job;

/// Storage abstraction holding one [`Job`] per repo.
///
/// ## Thread Safety
///
/// All methods are `Send + Sync` to support concurrent access from the
/// dispatcher loop, import tasks, and the event handler.
#[async_trait]
pub trait Store: Send + Sync {
    /// Looks up the job for a repo.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::JobNotFound`] when no job exists.
    async fn get_job(&self, repo: &Did) -> Result<Arc<dyn Job>>;

    /// Takes the next enqueued job, atomically marking it in-progress.
    ///
    /// Returns `None` when nothing is enqueued. The same job must never
    /// be handed to two workers, and ordering must avoid starving any
    /// enqueued job.
    ///
    /// # Errors
    ///
    /// Fails only on storage errors.
    async fn get_next_enqueued_job(&self) -> Result<Option<Arc<dyn Job>>>;

    /// Advances a repo's revision cursor directly.
    ///
    /// Shortcut for the complete-job bypass in event handling, where ops
    /// are applied without touching the buffer.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::JobNotFound`] when no job exists.
    async fn update_rev(&self, repo: &Did, rev: Rev) -> Result<()>;

    /// Creates a job in the enqueued state if none exists; idempotent.
    ///
    /// Re-enqueues failed jobs so an external retry scheduler and the
    /// flusher's gap recovery can both reuse this entry point.
    ///
    /// # Errors
    ///
    /// Fails only on storage errors.
    async fn enqueue_job(&self, repo: &Did) -> Result<()>;

    /// Increments a job's retry counter, returning the new value.
    ///
    /// The engine only reads the counter; the external retry scheduler
    /// owns the write path.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::JobNotFound`] when no job exists.
    async fn increment_retry_count(&self, repo: &Did) -> Result<u32>;
}
