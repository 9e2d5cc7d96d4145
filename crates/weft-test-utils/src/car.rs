//! Deterministic fake repo bundles.
//!
//! Real deployments decode CAR streams; tests use a transparent JSON
//! encoding behind the same [`SnapshotDecoder`] seam, so the engine is
//! exercised end-to-end without a Merkle tree in sight.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;

use weft_backfill::error::{Error, Result};
use weft_backfill::event::{CommitEvent, CommitOp};
use weft_backfill::op::OpKind;
use weft_backfill::repo::{CarReader, RepoSnapshot, SnapshotDecoder};
use weft_core::id::{Cid, Did, RecordPath, Rev};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FixtureRecord {
    path: String,
    cid: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FixtureRepo {
    rev: String,
    records: Vec<FixtureRecord>,
    blocks: HashMap<String, Vec<u8>>,
}

/// Builder for a fake repo bundle at a single revision.
#[derive(Debug, Clone)]
pub struct CarFixture {
    repo: FixtureRepo,
}

impl CarFixture {
    /// Starts an empty bundle whose root commit carries `rev`.
    #[must_use]
    pub fn new(rev: &str) -> Self {
        Self {
            repo: FixtureRepo {
                rev: rev.to_string(),
                records: Vec::new(),
                blocks: HashMap::new(),
            },
        }
    }

    /// The CID the fixture derives for a record path.
    #[must_use]
    pub fn cid_for(path: &str) -> Cid {
        Cid::new(format!("cid-{path}"))
    }

    /// Adds a record with a derived CID.
    #[must_use]
    pub fn with_record(self, path: &str, rec: &[u8]) -> Self {
        let cid = Self::cid_for(path);
        self.with_record_cid(path, cid.as_str(), rec)
    }

    /// Adds a record with an explicit CID.
    #[must_use]
    pub fn with_record_cid(mut self, path: &str, cid: &str, rec: &[u8]) -> Self {
        self.repo.records.push(FixtureRecord {
            path: path.to_string(),
            cid: cid.to_string(),
        });
        self.repo.blocks.insert(cid.to_string(), rec.to_vec());
        self
    }

    /// Serializes the bundle into the bytes [`FixtureDecoder`] expects.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        Bytes::from(serde_json::to_vec(&self.repo).expect("fixture repo serializes"))
    }

    /// Builds a live commit event whose blocks are this bundle.
    ///
    /// Create and update ops point at the fixture's derived CID for the
    /// path; deletes carry none.
    #[must_use]
    pub fn commit_event(
        &self,
        repo: &str,
        since: Option<&str>,
        ops: &[(OpKind, &str)],
    ) -> CommitEvent {
        let ops = ops
            .iter()
            .map(|(kind, path)| {
                let cid = kind.carries_record().then(|| {
                    self.repo
                        .records
                        .iter()
                        .find(|r| r.path == *path)
                        .map_or_else(|| Self::cid_for(path), |r| Cid::new(&*r.cid))
                });
                CommitOp::new(*kind, RecordPath::new(*path), cid)
            })
            .collect();

        CommitEvent {
            repo: Did::new(repo),
            rev: Rev::new(&*self.repo.rev),
            since: since.map(Rev::new),
            ops,
            blocks: self.encode(),
        }
    }
}

/// Decodes [`CarFixture`] bundles behind the production decoder seam.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixtureDecoder;

#[async_trait]
impl SnapshotDecoder for FixtureDecoder {
    async fn read_repo(&self, mut car: CarReader) -> Result<Arc<dyn RepoSnapshot>> {
        let mut raw = Vec::new();
        car.read_to_end(&mut raw)
            .await
            .map_err(|e| Error::decode(format!("failed to read fixture stream: {e}")))?;

        let repo: FixtureRepo = serde_json::from_slice(&raw)
            .map_err(|e| Error::decode(format!("failed to parse fixture repo: {e}")))?;

        Ok(Arc::new(FixtureSnapshot { repo }))
    }
}

struct FixtureSnapshot {
    repo: FixtureRepo,
}

#[async_trait]
impl RepoSnapshot for FixtureSnapshot {
    fn rev(&self) -> Rev {
        Rev::new(&*self.repo.rev)
    }

    async fn block(&self, cid: &Cid) -> Result<Bytes> {
        self.repo
            .blocks
            .get(cid.as_str())
            .map(|raw| Bytes::copy_from_slice(raw))
            .ok_or_else(|| Error::decode(format!("block not found: {cid}")))
    }

    fn records<'a>(&'a self, prefix: &str) -> BoxStream<'a, Result<(RecordPath, Cid)>> {
        let items: Vec<Result<(RecordPath, Cid)>> = self
            .repo
            .records
            .iter()
            .filter(|record| prefix.is_empty() || record.path.starts_with(prefix))
            .map(|record| Ok((RecordPath::new(&*record.path), Cid::new(&*record.cid))))
            .collect();
        futures::stream::iter(items).boxed()
    }

    async fn record_bytes(&self, path: &RecordPath) -> Result<(Cid, Bytes)> {
        let record = self
            .repo
            .records
            .iter()
            .find(|record| record.path == path.as_str())
            .ok_or_else(|| Error::decode(format!("no record at path: {path}")))?;

        let cid = Cid::new(&*record.cid);
        let rec = self.block(&cid).await?;
        Ok((cid, rec))
    }
}
