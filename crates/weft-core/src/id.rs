//! Strongly-typed identifiers for weft entities.
//!
//! All identifiers in weft are:
//! - **Strongly typed**: Prevents mixing up different identifier kinds at
//!   compile time
//! - **Opaque**: The network assigns them; weft never synthesizes or
//!   interprets their internal structure beyond what the protocol defines
//!
//! # Example
//!
//! ```rust
//! use weft_core::id::{Did, RecordPath};
//!
//! let repo = Did::new("did:plc:ewvi7nxzyoun6zhxrhs64oiz");
//! let path = RecordPath::new("app.bsky.feed.post/3jt6walwmos2y");
//!
//! assert_eq!(path.collection(), "app.bsky.feed.post");
//! // DIDs and paths are different types - this won't compile:
//! // let wrong: Did = path;
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// A decentralized identifier naming a repo.
///
/// One DID identifies one actor's content repository. weft treats the
/// string as opaque; resolution and verification are the network's
/// concern.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Did(String);

impl Did {
    /// Wraps a DID string.
    #[must_use]
    pub fn new(did: impl Into<String>) -> Self {
        Self(did.into())
    }

    /// Returns the DID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Did {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// An opaque commit revision label.
///
/// Revisions are totally ordered within a single repo by lexicographic
/// comparison; comparing revisions from different repos is undefined.
/// The empty revision sorts before every real revision and marks a job
/// that has not applied any commit yet.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Rev(String);

impl Rev {
    /// Wraps a revision string.
    #[must_use]
    pub fn new(rev: impl Into<String>) -> Self {
        Self(rev.into())
    }

    /// The empty revision, ordered before any commit.
    #[must_use]
    pub fn empty() -> Self {
        Self(String::new())
    }

    /// Returns true if no commit has been applied at this revision.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the revision as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Rev {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Rev {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A record's location within a repo, of the form `<collection>/<rkey>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordPath(String);

impl RecordPath {
    /// Wraps a record path string.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// Returns the path as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The collection (NSID) segment, up to the first `/`.
    ///
    /// Returns the whole path when no separator is present.
    #[must_use]
    pub fn collection(&self) -> &str {
        self.0.split('/').next().unwrap_or(&self.0)
    }

    /// The record key segment, after the first `/`.
    #[must_use]
    pub fn rkey(&self) -> Option<&str> {
        self.0.split_once('/').map(|(_, rkey)| rkey)
    }

    /// Returns true if the path matches a collection-prefix filter.
    ///
    /// An empty prefix matches every path.
    #[must_use]
    pub fn matches_prefix(&self, prefix: &str) -> bool {
        prefix.is_empty() || self.0.starts_with(prefix)
    }
}

impl fmt::Display for RecordPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RecordPath {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A content identifier naming an immutable block.
///
/// Equality-comparable and opaque; values come from the snapshot block
/// store or the firehose. Merkle verification is the decoder's concern.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cid(String);

impl Cid {
    /// Wraps a CID string.
    #[must_use]
    pub fn new(cid: impl Into<String>) -> Self {
        Self(cid.into())
    }

    /// Returns the CID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Cid {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}
