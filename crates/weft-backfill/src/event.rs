//! Live firehose commit events.
//!
//! The external firehose client parses wire frames and hands the engine
//! one [`CommitEvent`] per commit. The engine does not serialize calls
//! for the same repo; the firehose client must deliver a repo's commits
//! one at a time.

use bytes::Bytes;

use weft_core::id::{Cid, Did, RecordPath, Rev};

use crate::op::OpKind;

/// One mutation within a live commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitOp {
    /// The action the commit applied to the record.
    pub action: OpKind,
    /// The record's location within the repo.
    pub path: RecordPath,
    /// Content identifier of the record block; absent for deletes.
    pub cid: Option<Cid>,
}

impl CommitOp {
    /// Creates a create/update op pointing at a record block.
    #[must_use]
    pub const fn new(action: OpKind, path: RecordPath, cid: Option<Cid>) -> Self {
        Self { action, path, cid }
    }
}

/// A live commit from the firehose.
#[derive(Debug, Clone)]
pub struct CommitEvent {
    /// The repo the commit belongs to.
    pub repo: Did,
    /// The commit's revision label.
    pub rev: Rev,
    /// The prior revision this commit claims to extend, if it named one.
    pub since: Option<Rev>,
    /// The record mutations, in commit order.
    pub ops: Vec<CommitOp>,
    /// CAR-encoded blocks carrying the commit's records.
    pub blocks: Bytes,
}
