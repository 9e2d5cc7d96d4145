//! The buffered-op model.
//!
//! While a repo's snapshot import has not completed, live commits are
//! captured as [`BufferedOp`]s grouped per commit ([`CommitOps`]). The
//! group is the atomicity unit: a commit's ops are replayed together, in
//! their source order, or not at all.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use weft_core::id::{Cid, RecordPath, Rev};

use crate::error::{Error, Result};

/// The kind of mutation an op performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    /// A record was created.
    Create,
    /// A record was overwritten.
    Update,
    /// A record was removed.
    Delete,
}

impl OpKind {
    /// Returns the wire-level action string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    /// Returns true if the op carries record bytes.
    #[must_use]
    pub const fn carries_record(&self) -> bool {
        matches!(self, Self::Create | Self::Update)
    }
}

impl std::fmt::Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OpKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(Error::InvalidOpAction {
                action: other.to_string(),
            }),
        }
    }
}

/// One record mutation captured from a live commit.
///
/// Deletes omit the record bytes and CID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferedOp {
    /// What the op does.
    pub kind: OpKind,
    /// The record's location within the repo.
    pub path: RecordPath,
    /// Raw encoded record bytes; `None` for deletes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rec: Option<Bytes>,
    /// Content identifier of the record block; `None` for deletes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cid: Option<Cid>,
}

impl BufferedOp {
    /// Creates a buffered create op.
    #[must_use]
    pub fn create(path: RecordPath, rec: Bytes, cid: Cid) -> Self {
        Self {
            kind: OpKind::Create,
            path,
            rec: Some(rec),
            cid: Some(cid),
        }
    }

    /// Creates a buffered update op.
    #[must_use]
    pub fn update(path: RecordPath, rec: Bytes, cid: Cid) -> Self {
        Self {
            kind: OpKind::Update,
            path,
            rec: Some(rec),
            cid: Some(cid),
        }
    }

    /// Creates a buffered delete op.
    #[must_use]
    pub fn delete(path: RecordPath) -> Self {
        Self {
            kind: OpKind::Delete,
            path,
            rec: None,
            cid: None,
        }
    }
}

/// One commit's ops, buffered as an atomic group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitOps {
    /// The commit's revision label.
    pub rev: Rev,
    /// The prior revision the commit claims to extend, if it named one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<Rev>,
    /// The ops, in the commit's source order.
    pub ops: Vec<BufferedOp>,
}
