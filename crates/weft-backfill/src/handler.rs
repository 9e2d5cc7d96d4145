//! Downstream record callbacks.
//!
//! The engine delivers every record it reconciles through a
//! [`RecordHandler`]. Handlers are external collaborators: they own
//! persistence, idempotence, and their own retries. Handler errors are
//! logged by the engine but never fail a job or abort an iteration.

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use weft_core::id::{Cid, Did, RecordPath, Rev};

use crate::error::Result;

/// Receives reconciled record mutations.
///
/// ## Thread Safety
///
/// The engine invokes handlers from many tasks simultaneously; all
/// methods must be safe for concurrent invocation.
///
/// ## Cancellation
///
/// Every call carries the cancellation token of the work it belongs to
/// (an import task or a firehose delivery). Handlers doing slow work
/// should return early once `cancel` fires; the engine additionally
/// races snapshot-path calls against the same token, so a handler that
/// ignores it is abandoned rather than awaited on abort.
///
/// ## Idempotence
///
/// The same record can legitimately be delivered more than once (for
/// example when a live event raced the snapshot that already contained
/// it); deduplication is the handler's contract.
#[async_trait]
pub trait RecordHandler: Send + Sync {
    /// A record was created at `path`.
    ///
    /// # Errors
    ///
    /// Errors are logged by the caller and do not abort processing.
    async fn handle_create(
        &self,
        cancel: &CancellationToken,
        repo: &Did,
        rev: &Rev,
        path: &RecordPath,
        rec: &Bytes,
        cid: &Cid,
    ) -> Result<()>;

    /// A record was overwritten at `path`.
    ///
    /// # Errors
    ///
    /// Errors are logged by the caller and do not abort processing.
    async fn handle_update(
        &self,
        cancel: &CancellationToken,
        repo: &Did,
        rev: &Rev,
        path: &RecordPath,
        rec: &Bytes,
        cid: &Cid,
    ) -> Result<()>;

    /// The record at `path` was removed.
    ///
    /// # Errors
    ///
    /// Errors are logged by the caller and do not abort processing.
    async fn handle_delete(
        &self,
        cancel: &CancellationToken,
        repo: &Did,
        rev: &Rev,
        path: &RecordPath,
    ) -> Result<()>;
}
