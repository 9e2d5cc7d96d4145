//! Job state and the per-repo job contract.
//!
//! This module provides:
//! - [`JobState`]: The lifecycle state machine for a backfill job
//! - [`Job`]: The contract a persisted job exposes to the engine
//!
//! One job exists per repo DID. The job owns the repo's revision cursor
//! and the buffer of live ops captured while the snapshot import has not
//! completed yet.

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use weft_core::id::{Did, Rev};

use crate::error::{Error, Result};
use crate::op::BufferedOp;

/// Lifecycle state of a backfill job.
///
/// ```text
/// ┌──────────┐ dispatcher ┌─────────────┐ import ok  ┌──────────┐
/// │ ENQUEUED │───────────►│ IN_PROGRESS │───────────►│ COMPLETE │
/// └──────────┘            └─────────────┘            └──────────┘
///      ▲                        │
///      │   flush gap /          │ import error
///      │   external retry       ▼
///      │                  ┌────────────┐
///      └──────────────────│ FAILED (..)│
///                         └────────────┘
/// ```
///
/// `Complete` is terminal. `Failed` is terminal for the current attempt;
/// an external scheduler may re-enqueue it subject to the retry policy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum JobState {
    /// Waiting for the dispatcher to pick the job up.
    Enqueued,
    /// A snapshot import is running.
    InProgress,
    /// Snapshot imported and buffer flushed; live events bypass the buffer.
    Complete,
    /// The current attempt failed, with a human-readable reason tag.
    Failed(String),
}

impl JobState {
    /// Creates a failed state with the given reason tag.
    #[must_use]
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }

    /// Returns true once the job has fully caught up.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(self, Self::Complete)
    }

    /// Returns true if the current attempt failed.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Returns true while the buffer still accepts new ops.
    #[must_use]
    pub const fn accepts_buffered_ops(&self) -> bool {
        matches!(self, Self::Enqueued | Self::InProgress)
    }

    /// Returns a label suitable for metrics and logs.
    #[must_use]
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::Enqueued => "enqueued",
            Self::InProgress => "in_progress",
            Self::Complete => "complete",
            Self::Failed(_) => "failed",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Enqueued => write!(f, "enqueued"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Complete => write!(f, "complete"),
            Self::Failed(reason) => write!(f, "failed ({reason})"),
        }
    }
}

impl From<JobState> for String {
    fn from(state: JobState) -> Self {
        state.to_string()
    }
}

impl TryFrom<String> for JobState {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl std::str::FromStr for JobState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "enqueued" => Ok(Self::Enqueued),
            "in_progress" => Ok(Self::InProgress),
            "complete" => Ok(Self::Complete),
            other => other
                .strip_prefix("failed (")
                .and_then(|rest| rest.strip_suffix(')'))
                .map(Self::failed)
                .ok_or_else(|| Error::InvalidJobState {
                    value: other.to_string(),
                }),
        }
    }
}

/// Callback invoked once per buffered op during a flush.
///
/// The callback is infallible by construction: downstream handler errors
/// are logged by the flusher, never surfaced, so a job implementation
/// always fully drains its buffer.
pub type FlushCallback<'a> = dyn FnMut(Rev, BufferedOp) -> BoxFuture<'static, ()> + Send + 'a;

/// The contract a persisted backfill job exposes to the engine.
///
/// Implementations abstract away how state, the revision cursor, and the
/// buffered-op queue are stored and locked. The engine assumes operations
/// on a single job are linearizable.
#[async_trait]
pub trait Job: Send + Sync {
    /// The repo this job backfills.
    fn repo(&self) -> Did;

    /// The current lifecycle state.
    fn state(&self) -> JobState;

    /// The highest revision whose records have been applied downstream.
    ///
    /// Empty before any commit has been applied. Non-decreasing over the
    /// lifetime of the job.
    fn rev(&self) -> Rev;

    /// How many times the job has been re-attempted.
    fn retry_count(&self) -> u32;

    /// Persists a new lifecycle state.
    ///
    /// # Errors
    ///
    /// Fails only on storage errors; the engine, not the job, enforces
    /// transition discipline.
    async fn set_state(&self, state: JobState) -> Result<()>;

    /// Persists a new revision cursor.
    ///
    /// Implementations must keep the cursor non-decreasing.
    ///
    /// # Errors
    ///
    /// Fails only on storage errors.
    async fn set_rev(&self, rev: Rev) -> Result<()>;

    /// Appends one commit's ops to the buffer as an atomic group.
    ///
    /// Returns `Ok(true)` when the group was buffered.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyProcessed`] when `rev` is not newer than what the
    ///   job has applied or buffered (idempotent replay; nothing appended)
    /// - [`Error::JobComplete`] when the job no longer buffers; the caller
    ///   applies the ops directly instead
    /// - [`Error::EventGap`] when `since` does not extend the chain formed
    ///   by the job's revision cursor and previously buffered groups
    /// - [`Error::Storage`] on persistence failures
    async fn buffer_ops(
        &self,
        since: Option<Rev>,
        rev: Rev,
        ops: Vec<BufferedOp>,
    ) -> Result<bool>;

    /// Invokes `cb` for each buffered op in insertion order, then clears
    /// the buffer and advances the revision cursor past the replayed
    /// groups.
    ///
    /// Transitioning to `Complete` afterwards is the flusher's
    /// responsibility, not the job's.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EventGap`] when a buffered group's `since` lies
    /// ahead of the revision the snapshot landed at; groups before the gap
    /// are drained, the rest are retained for the next attempt.
    async fn flush_buffered_ops(&self, cb: &mut FlushCallback<'_>) -> Result<()>;

    /// Discards all buffered ops without invoking callbacks.
    ///
    /// Used when an import attempt fails and the buffer is stale.
    ///
    /// # Errors
    ///
    /// Fails only on storage errors.
    async fn clear_buffered_ops(&self) -> Result<()>;
}
