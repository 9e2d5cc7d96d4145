//! A record handler that captures everything it receives.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use weft_backfill::error::{Error, Result};
use weft_backfill::handler::RecordHandler;
use weft_backfill::op::OpKind;
use weft_core::id::{Cid, Did, RecordPath, Rev};

/// One delivered record mutation, as the downstream saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandledOp {
    /// Which handler method was invoked.
    pub kind: OpKind,
    /// The repo the op belongs to.
    pub repo: Did,
    /// The revision the op was delivered at.
    pub rev: Rev,
    /// The record's path.
    pub path: RecordPath,
    /// Record bytes; `None` for deletes.
    pub rec: Option<Bytes>,
    /// Record CID; `None` for deletes.
    pub cid: Option<Cid>,
}

/// A [`RecordHandler`] that records every successful delivery.
///
/// Paths registered via [`RecordingHandler::fail_path`] error instead of
/// recording, simulating a downstream that rejects specific records.
#[derive(Debug, Default)]
pub struct RecordingHandler {
    ops: Mutex<Vec<HandledOp>>,
    fail_paths: Mutex<HashSet<String>>,
}

impl RecordingHandler {
    /// Creates a handler that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes create/update/delete calls for `path` fail.
    pub fn fail_path(&self, path: &str) {
        self.fail_paths
            .lock()
            .expect("fail_paths lock")
            .insert(path.to_string());
    }

    /// Everything delivered so far, in delivery order.
    #[must_use]
    pub fn ops(&self) -> Vec<HandledOp> {
        self.ops.lock().expect("ops lock").clone()
    }

    /// Delivered ops of one kind, in delivery order.
    #[must_use]
    pub fn ops_of(&self, kind: OpKind) -> Vec<HandledOp> {
        self.ops()
            .into_iter()
            .filter(|op| op.kind == kind)
            .collect()
    }

    /// Total deliveries so far.
    #[must_use]
    pub fn count(&self) -> usize {
        self.ops.lock().expect("ops lock").len()
    }

    /// Paths delivered so far, in delivery order.
    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        self.ops()
            .into_iter()
            .map(|op| op.path.as_str().to_string())
            .collect()
    }

    fn deliver(&self, op: HandledOp) -> Result<()> {
        let rejected = self
            .fail_paths
            .lock()
            .expect("fail_paths lock")
            .contains(op.path.as_str());
        if rejected {
            return Err(Error::storage(format!("downstream rejected {}", op.path)));
        }

        self.ops.lock().expect("ops lock").push(op);
        Ok(())
    }
}

#[async_trait]
impl RecordHandler for RecordingHandler {
    async fn handle_create(
        &self,
        _cancel: &CancellationToken,
        repo: &Did,
        rev: &Rev,
        path: &RecordPath,
        rec: &Bytes,
        cid: &Cid,
    ) -> Result<()> {
        self.deliver(HandledOp {
            kind: OpKind::Create,
            repo: repo.clone(),
            rev: rev.clone(),
            path: path.clone(),
            rec: Some(rec.clone()),
            cid: Some(cid.clone()),
        })
    }

    async fn handle_update(
        &self,
        _cancel: &CancellationToken,
        repo: &Did,
        rev: &Rev,
        path: &RecordPath,
        rec: &Bytes,
        cid: &Cid,
    ) -> Result<()> {
        self.deliver(HandledOp {
            kind: OpKind::Update,
            repo: repo.clone(),
            rev: rev.clone(),
            path: path.clone(),
            rec: Some(rec.clone()),
            cid: Some(cid.clone()),
        })
    }

    async fn handle_delete(
        &self,
        _cancel: &CancellationToken,
        repo: &Did,
        rev: &Rev,
        path: &RecordPath,
    ) -> Result<()> {
        self.deliver(HandledOp {
            kind: OpKind::Delete,
            repo: repo.clone(),
            rev: rev.clone(),
            path: path.clone(),
            rec: None,
            cid: None,
        })
    }
}
