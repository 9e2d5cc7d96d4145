//! The block decoder contract.
//!
//! Snapshot bundles and live-event block payloads arrive as CAR streams.
//! Decoding them is an external collaborator's job; this module defines
//! the seam the engine consumes:
//!
//! - [`SnapshotDecoder`]: turns a byte stream into a [`RepoSnapshot`]
//! - [`RepoSnapshot`]: a decoded repo with a signed root commit, a block
//!   store, and a record iterator
//!
//! ## Design Principles
//!
//! - **Trust at this seam**: CIDs supplied by a decoded bundle are
//!   treated as authoritative; Merkle verification is the decoder's
//!   responsibility, not the engine's
//! - **Streaming**: decoders consume an `AsyncRead` so snapshot bodies
//!   never need to be fully buffered
//! - **Testability**: in-memory fakes implement the same traits the
//!   production CAR decoder does

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use tokio::io::AsyncRead;

use weft_core::id::{Cid, RecordPath, Rev};

use crate::error::Result;

/// A boxed byte source a decoder consumes.
pub type CarReader = Pin<Box<dyn AsyncRead + Send>>;

/// Decodes a CAR byte stream into a repo snapshot.
#[async_trait]
pub trait SnapshotDecoder: Send + Sync {
    /// Reads a repo from a CAR stream.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::Decode`] when the stream is not a
    /// well-formed repo CAR.
    async fn read_repo(&self, car: CarReader) -> Result<Arc<dyn RepoSnapshot>>;
}

/// A decoded repo: a signed root commit plus an indexable block store.
#[async_trait]
pub trait RepoSnapshot: Send + Sync {
    /// The revision of the repo's signed root commit.
    fn rev(&self) -> Rev;

    /// Fetches a block's raw bytes by CID.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::Decode`] when the block is not
    /// present in the snapshot.
    async fn block(&self, cid: &Cid) -> Result<Bytes>;

    /// Streams `(path, cid)` pairs for every record whose path starts
    /// with `prefix`, in tree order. An empty prefix yields all records.
    ///
    /// The filter is applied here, at iteration, so unrelated collections
    /// never incur block fetches.
    fn records<'a>(&'a self, prefix: &str) -> BoxStream<'a, Result<(RecordPath, Cid)>>;

    /// Re-derives a record's CID and bytes by walking the tree to `path`.
    ///
    /// This is the untrusted fallback to [`RepoSnapshot::block`]; it is
    /// only exercised when the engine is configured not to trust CIDs
    /// supplied by live events.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::Decode`] when no record exists at
    /// the path.
    async fn record_bytes(&self, path: &RecordPath) -> Result<(Cid, Bytes)>;
}
