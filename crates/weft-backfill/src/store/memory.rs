//! In-memory store implementation.
//!
//! This module provides [`MemoryStore`], a lock-based implementation of
//! the [`Store`] trait suitable for tests and single-process
//! deployments.
//!
//! ## Limitations
//!
//! - **No durability**: jobs and buffers are lost when the process exits
//! - **Single-process only**: state is not shared across processes

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use weft_core::id::{Did, Rev};

use super::Store;
use crate::error::{Error, Result};
use crate::job::{FlushCallback, Job, JobState};
use crate::op::{BufferedOp, CommitOps};

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("lock poisoned")
}

#[derive(Debug)]
struct JobInner {
    state: JobState,
    rev: Rev,
    retry_count: u32,
    buffer: VecDeque<CommitOps>,
    /// Rev of the newest buffered group, if any groups are buffered.
    last_buffered_rev: Option<Rev>,
    updated_at: DateTime<Utc>,
}

/// An in-memory backfill job.
///
/// All mutations go through a single mutex, which gives the per-job
/// linearizability the engine assumes.
#[derive(Debug)]
pub struct MemoryJob {
    repo: Did,
    created_at: DateTime<Utc>,
    inner: Mutex<JobInner>,
}

impl MemoryJob {
    fn new(repo: Did) -> Self {
        let now = Utc::now();
        Self {
            repo,
            created_at: now,
            inner: Mutex::new(JobInner {
                state: JobState::Enqueued,
                rev: Rev::empty(),
                retry_count: 0,
                buffer: VecDeque::new(),
                last_buffered_rev: None,
                updated_at: now,
            }),
        }
    }

    /// When the job was first created.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// When the job last changed.
    ///
    /// The external retry scheduler measures backoff delays from this.
    #[must_use]
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.inner
            .lock()
            .map(|inner| inner.updated_at)
            .unwrap_or(self.created_at)
    }

    /// Number of ops currently buffered.
    #[must_use]
    pub fn buffered_op_count(&self) -> usize {
        self.inner
            .lock()
            .map(|inner| inner.buffer.iter().map(|g| g.ops.len()).sum())
            .unwrap_or(0)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, JobInner>> {
        self.inner.lock().map_err(poison_err)
    }
}

#[async_trait]
impl Job for MemoryJob {
    fn repo(&self) -> Did {
        self.repo.clone()
    }

    fn state(&self) -> JobState {
        self.inner
            .lock()
            .map(|inner| inner.state.clone())
            .unwrap_or_else(|_| JobState::failed("lock poisoned"))
    }

    fn rev(&self) -> Rev {
        self.inner
            .lock()
            .map(|inner| inner.rev.clone())
            .unwrap_or_else(|_| Rev::empty())
    }

    fn retry_count(&self) -> u32 {
        self.inner.lock().map(|inner| inner.retry_count).unwrap_or(0)
    }

    async fn set_state(&self, state: JobState) -> Result<()> {
        let mut inner = self.lock()?;
        inner.state = state;
        inner.updated_at = Utc::now();
        Ok(())
    }

    async fn set_rev(&self, rev: Rev) -> Result<()> {
        let mut inner = self.lock()?;
        if rev > inner.rev {
            inner.rev = rev;
        }
        inner.updated_at = Utc::now();
        Ok(())
    }

    async fn buffer_ops(
        &self,
        since: Option<Rev>,
        rev: Rev,
        ops: Vec<BufferedOp>,
    ) -> Result<bool> {
        let mut inner = self.lock()?;

        // Replays of anything already applied or already buffered are
        // idempotent no-ops.
        if rev <= inner.rev {
            return Err(Error::AlreadyProcessed);
        }
        if let Some(last) = &inner.last_buffered_rev {
            if rev <= *last {
                return Err(Error::AlreadyProcessed);
            }
        }

        if inner.state.is_complete() {
            return Err(Error::JobComplete);
        }

        // The chain rule: a commit must extend the newest buffered group,
        // or the applied cursor when nothing is buffered. With an empty
        // cursor there is no baseline to check against yet; divergence is
        // caught at flush time instead.
        if let Some(since) = &since {
            if !inner.rev.is_empty() {
                let baseline = inner
                    .last_buffered_rev
                    .clone()
                    .unwrap_or_else(|| inner.rev.clone());
                if *since != baseline {
                    return Err(Error::EventGap);
                }
            }
        }

        inner.last_buffered_rev = Some(rev.clone());
        inner.buffer.push_back(CommitOps { rev, since, ops });
        inner.updated_at = Utc::now();
        Ok(true)
    }

    async fn flush_buffered_ops(&self, cb: &mut FlushCallback<'_>) -> Result<()> {
        loop {
            let group = {
                let mut inner = self.lock()?;
                let Some(group) = inner.buffer.pop_front() else {
                    inner.last_buffered_rev = None;
                    inner.updated_at = Utc::now();
                    return Ok(());
                };

                // A group whose `since` lies ahead of the applied cursor
                // cannot be replayed without skipping commits: the
                // snapshot landed at an older rev than the group assumed.
                // Groups already drained stay applied; the rest wait for
                // the next import attempt.
                let gapped = group
                    .since
                    .as_ref()
                    .is_some_and(|since| !inner.rev.is_empty() && *since > inner.rev);
                if gapped {
                    inner.buffer.push_front(group);
                    return Err(Error::EventGap);
                }

                group
            };

            for op in group.ops {
                cb(group.rev.clone(), op).await;
            }

            let mut inner = self.lock()?;
            if group.rev > inner.rev {
                inner.rev = group.rev;
            }
            inner.updated_at = Utc::now();
        }
    }

    async fn clear_buffered_ops(&self) -> Result<()> {
        let mut inner = self.lock()?;
        inner.buffer.clear();
        inner.last_buffered_rev = None;
        inner.updated_at = Utc::now();
        Ok(())
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    jobs: HashMap<Did, Arc<MemoryJob>>,
    /// FIFO of repos awaiting dispatch; keeps intake order so no
    /// enqueued job starves.
    queue: VecDeque<Did>,
}

/// In-memory store holding one [`MemoryJob`] per repo.
///
/// ## Example
///
/// ```rust
/// use weft_backfill::store::memory::MemoryStore;
///
/// let store = MemoryStore::new();
/// // Use store in tests...
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<StoreInner>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of jobs currently stored.
    ///
    /// # Errors
    ///
    /// Fails if the lock is poisoned.
    pub fn job_count(&self) -> Result<usize> {
        let count = {
            let inner = self.inner.read().map_err(poison_err)?;
            inner.jobs.len()
        };
        Ok(count)
    }

    /// Looks up the concrete in-memory job for a repo.
    ///
    /// Unlike [`Store::get_job`] this exposes [`MemoryJob`]'s inspection
    /// helpers (buffered counts, timestamps).
    #[must_use]
    pub fn job(&self, repo: &Did) -> Option<Arc<MemoryJob>> {
        self.inner
            .read()
            .ok()
            .and_then(|inner| inner.jobs.get(repo).cloned())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_job(&self, repo: &Did) -> Result<Arc<dyn Job>> {
        let job = {
            let inner = self.inner.read().map_err(poison_err)?;
            inner.jobs.get(repo).cloned()
        };
        job.map(|j| j as Arc<dyn Job>).ok_or_else(|| Error::JobNotFound {
            repo: repo.clone(),
        })
    }

    async fn get_next_enqueued_job(&self) -> Result<Option<Arc<dyn Job>>> {
        let mut inner = self.inner.write().map_err(poison_err)?;
        while let Some(repo) = inner.queue.pop_front() {
            let Some(job) = inner.jobs.get(&repo).cloned() else {
                continue;
            };

            let mut job_inner = job.lock()?;
            if job_inner.state != JobState::Enqueued {
                continue;
            }
            job_inner.state = JobState::InProgress;
            job_inner.updated_at = Utc::now();
            drop(job_inner);

            return Ok(Some(job as Arc<dyn Job>));
        }
        Ok(None)
    }

    async fn update_rev(&self, repo: &Did, rev: Rev) -> Result<()> {
        let job = self.get_job(repo).await?;
        job.set_rev(rev).await
    }

    async fn enqueue_job(&self, repo: &Did) -> Result<()> {
        let mut inner = self.inner.write().map_err(poison_err)?;

        if let Some(job) = inner.jobs.get(repo).cloned() {
            let mut job_inner = job.lock()?;
            // In-flight or caught up; nothing to requeue.
            if matches!(job_inner.state, JobState::InProgress | JobState::Complete) {
                return Ok(());
            }
            if job_inner.state.is_failed() {
                job_inner.state = JobState::Enqueued;
                job_inner.updated_at = Utc::now();
            }
            drop(job_inner);

            if !inner.queue.contains(repo) {
                inner.queue.push_back(repo.clone());
            }
            return Ok(());
        }

        let job = Arc::new(MemoryJob::new(repo.clone()));
        inner.jobs.insert(repo.clone(), job);
        inner.queue.push_back(repo.clone());
        Ok(())
    }

    async fn increment_retry_count(&self, repo: &Did) -> Result<u32> {
        let job = {
            let inner = self.inner.read().map_err(poison_err)?;
            inner.jobs.get(repo).cloned()
        }
        .ok_or_else(|| Error::JobNotFound {
            repo: repo.clone(),
        })?;

        let mut job_inner = job.lock()?;
        job_inner.retry_count += 1;
        job_inner.updated_at = Utc::now();
        Ok(job_inner.retry_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use weft_core::id::{Cid, RecordPath};

    fn did(s: &str) -> Did {
        Did::new(s)
    }

    fn create_op(path: &str) -> BufferedOp {
        BufferedOp::create(
            RecordPath::new(path),
            Bytes::from_static(b"record"),
            Cid::new("cid-1"),
        )
    }

    async fn enqueued_job(store: &MemoryStore, repo: &Did) -> Arc<dyn Job> {
        store.enqueue_job(repo).await.expect("enqueue");
        store.get_job(repo).await.expect("job exists")
    }

    #[tokio::test]
    async fn missing_job_is_reported() {
        let store = MemoryStore::new();
        let result = store.get_job(&did("did:plc:nobody")).await;
        assert!(matches!(result, Err(Error::JobNotFound { .. })));
    }

    #[tokio::test]
    async fn enqueue_is_idempotent() {
        let store = MemoryStore::new();
        let repo = did("did:plc:abc");
        store.enqueue_job(&repo).await.expect("first");
        store.enqueue_job(&repo).await.expect("second");
        assert_eq!(store.job_count().expect("count"), 1);

        // Only one dispatch despite the double enqueue.
        assert!(store.get_next_enqueued_job().await.expect("next").is_some());
        assert!(store.get_next_enqueued_job().await.expect("next").is_none());
    }

    #[tokio::test]
    async fn next_enqueued_marks_in_progress_and_is_fifo() {
        let store = MemoryStore::new();
        store.enqueue_job(&did("did:plc:first")).await.expect("enqueue");
        store.enqueue_job(&did("did:plc:second")).await.expect("enqueue");

        let first = store
            .get_next_enqueued_job()
            .await
            .expect("next")
            .expect("some");
        assert_eq!(first.repo(), did("did:plc:first"));
        assert_eq!(first.state(), JobState::InProgress);

        let second = store
            .get_next_enqueued_job()
            .await
            .expect("next")
            .expect("some");
        assert_eq!(second.repo(), did("did:plc:second"));
        assert!(store.get_next_enqueued_job().await.expect("next").is_none());
    }

    #[tokio::test]
    async fn buffering_appends_commit_groups_in_order() {
        let store = MemoryStore::new();
        let repo = did("did:plc:abc");
        let job = enqueued_job(&store, &repo).await;

        let buffered = job
            .buffer_ops(None, Rev::new("r1"), vec![create_op("app.bsky.feed.post/a")])
            .await
            .expect("buffer");
        assert!(buffered);

        let buffered = job
            .buffer_ops(
                Some(Rev::new("r1")),
                Rev::new("r2"),
                vec![create_op("app.bsky.feed.post/b")],
            )
            .await
            .expect("chained group");
        assert!(buffered);
    }

    #[tokio::test]
    async fn stale_rev_maps_to_already_processed() {
        let store = MemoryStore::new();
        let repo = did("did:plc:abc");
        let job = enqueued_job(&store, &repo).await;
        job.set_rev(Rev::new("r5")).await.expect("set rev");

        let err = job
            .buffer_ops(None, Rev::new("r3"), vec![create_op("app.bsky.feed.post/a")])
            .await
            .expect_err("stale");
        assert!(matches!(err, Error::AlreadyProcessed));
    }

    #[tokio::test]
    async fn replayed_buffered_rev_maps_to_already_processed() {
        let store = MemoryStore::new();
        let repo = did("did:plc:abc");
        let job = enqueued_job(&store, &repo).await;

        job.buffer_ops(None, Rev::new("r1"), vec![create_op("app.bsky.feed.post/a")])
            .await
            .expect("buffer");
        let err = job
            .buffer_ops(None, Rev::new("r1"), vec![create_op("app.bsky.feed.post/a")])
            .await
            .expect_err("duplicate");
        assert!(matches!(err, Error::AlreadyProcessed));
    }

    #[tokio::test]
    async fn complete_job_rejects_new_ops() {
        let store = MemoryStore::new();
        let repo = did("did:plc:abc");
        let job = enqueued_job(&store, &repo).await;
        job.set_rev(Rev::new("r1")).await.expect("set rev");
        job.set_state(JobState::Complete).await.expect("set state");

        let err = job
            .buffer_ops(
                Some(Rev::new("r1")),
                Rev::new("r2"),
                vec![create_op("app.bsky.feed.post/a")],
            )
            .await
            .expect_err("complete");
        assert!(matches!(err, Error::JobComplete));
    }

    #[tokio::test]
    async fn mismatched_since_is_a_gap() {
        let store = MemoryStore::new();
        let repo = did("did:plc:abc");
        let job = enqueued_job(&store, &repo).await;
        job.set_rev(Rev::new("r1")).await.expect("set rev");

        job.buffer_ops(
            Some(Rev::new("r1")),
            Rev::new("r2"),
            vec![create_op("app.bsky.feed.post/a")],
        )
        .await
        .expect("chained");

        let err = job
            .buffer_ops(
                Some(Rev::new("r3")),
                Rev::new("r4"),
                vec![create_op("app.bsky.feed.post/b")],
            )
            .await
            .expect_err("gap");
        assert!(matches!(err, Error::EventGap));
    }

    #[tokio::test]
    async fn empty_cursor_accepts_unchained_groups() {
        let store = MemoryStore::new();
        let repo = did("did:plc:abc");
        let job = enqueued_job(&store, &repo).await;

        // No applied rev yet: there is no baseline to check against.
        let buffered = job
            .buffer_ops(
                Some(Rev::new("r9")),
                Rev::new("r10"),
                vec![create_op("app.bsky.feed.post/a")],
            )
            .await
            .expect("accepted optimistically");
        assert!(buffered);
    }

    #[tokio::test]
    async fn flush_replays_in_insertion_order_and_advances_rev() {
        let store = MemoryStore::new();
        let repo = did("did:plc:abc");
        let job = enqueued_job(&store, &repo).await;

        job.buffer_ops(None, Rev::new("r1"), vec![create_op("app.bsky.feed.post/a")])
            .await
            .expect("buffer");
        job.buffer_ops(
            Some(Rev::new("r1")),
            Rev::new("r2"),
            vec![
                create_op("app.bsky.feed.post/b"),
                BufferedOp::delete(RecordPath::new("app.bsky.feed.post/a")),
            ],
        )
        .await
        .expect("buffer");

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = Arc::clone(&seen);
        let mut cb = move |rev: Rev, op: BufferedOp| {
            let seen = Arc::clone(&seen_cb);
            Box::pin(async move {
                seen.lock().expect("seen").push((rev, op.kind, op.path));
            }) as futures::future::BoxFuture<'static, ()>
        };

        job.flush_buffered_ops(&mut cb).await.expect("flush");

        let seen = seen.lock().expect("seen");
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0].0, Rev::new("r1"));
        assert_eq!(seen[1].0, Rev::new("r2"));
        assert_eq!(seen[2].2, RecordPath::new("app.bsky.feed.post/a"));
        drop(seen);

        assert_eq!(job.rev(), Rev::new("r2"));
        // Fully drained: replays of flushed revs are now idempotent no-ops.
        let err = job
            .buffer_ops(
                Some(Rev::new("r1")),
                Rev::new("r2"),
                vec![create_op("app.bsky.feed.post/b")],
            )
            .await
            .expect_err("already applied");
        assert!(matches!(err, Error::AlreadyProcessed));
    }

    #[tokio::test]
    async fn flush_detects_divergent_chain() {
        let store = MemoryStore::new();
        let repo = did("did:plc:abc");
        let job = enqueued_job(&store, &repo).await;

        // Buffered while the cursor was empty, claiming baseline r3.
        job.buffer_ops(
            Some(Rev::new("r3")),
            Rev::new("r4"),
            vec![create_op("app.bsky.feed.post/a")],
        )
        .await
        .expect("buffer");

        // The snapshot landed at r1, behind the group's baseline.
        job.set_rev(Rev::new("r1")).await.expect("set rev");

        let mut cb = |_rev: Rev, _op: BufferedOp| {
            Box::pin(async { panic!("gap groups must not replay") })
                as futures::future::BoxFuture<'static, ()>
        };
        let err = job.flush_buffered_ops(&mut cb).await.expect_err("gap");
        assert!(matches!(err, Error::EventGap));

        // The group is retained for the next attempt.
        let memory_job = store.job(&repo).expect("job");
        assert_eq!(memory_job.buffered_op_count(), 1);
    }

    #[tokio::test]
    async fn clear_discards_without_callbacks() {
        let store = MemoryStore::new();
        let repo = did("did:plc:abc");
        let job = enqueued_job(&store, &repo).await;

        job.buffer_ops(None, Rev::new("r1"), vec![create_op("app.bsky.feed.post/a")])
            .await
            .expect("buffer");
        job.clear_buffered_ops().await.expect("clear");

        let mut cb = |_rev: Rev, _op: BufferedOp| {
            Box::pin(async { panic!("cleared buffers have nothing to flush") })
                as futures::future::BoxFuture<'static, ()>
        };
        job.flush_buffered_ops(&mut cb).await.expect("empty flush");
    }

    #[tokio::test]
    async fn enqueue_requeues_failed_jobs() {
        let store = MemoryStore::new();
        let repo = did("did:plc:abc");
        let job = enqueued_job(&store, &repo).await;

        let taken = store.get_next_enqueued_job().await.expect("next").expect("some");
        taken
            .set_state(JobState::failed("repo not found"))
            .await
            .expect("fail");

        store.enqueue_job(&repo).await.expect("requeue");
        assert_eq!(job.state(), JobState::Enqueued);
        assert!(store.get_next_enqueued_job().await.expect("next").is_some());
    }

    #[tokio::test]
    async fn retry_counter_increments_through_the_store() {
        let store = MemoryStore::new();
        let repo = did("did:plc:abc");
        let job = enqueued_job(&store, &repo).await;

        assert_eq!(job.retry_count(), 0);
        assert_eq!(store.increment_retry_count(&repo).await.expect("inc"), 1);
        assert_eq!(store.increment_retry_count(&repo).await.expect("inc"), 2);
        assert_eq!(job.retry_count(), 2);
    }

    #[tokio::test]
    async fn update_rev_is_monotonic() {
        let store = MemoryStore::new();
        let repo = did("did:plc:abc");
        let job = enqueued_job(&store, &repo).await;

        store.update_rev(&repo, Rev::new("r5")).await.expect("update");
        store.update_rev(&repo, Rev::new("r3")).await.expect("stale update");
        assert_eq!(job.rev(), Rev::new("r5"));
    }
}
