//! The backfill engine.
//!
//! [`Backfiller`] ties the pieces together:
//!
//! - **Event handling**: accepts live firehose commits and either buffers
//!   them or applies them directly ([`Backfiller::handle_event`])
//! - **Snapshot import**: fetches a repo's CAR bundle with global rate
//!   limiting and fans records out to parallel workers
//!   ([`Backfiller::backfill_repo`])
//! - **Buffer flushing**: replays captured ops once a snapshot lands
//!   ([`Backfiller::flush_buffer`])
//! - **Dispatching**: the long-running loop that drains enqueued jobs
//!   into bounded concurrent imports ([`Backfiller::start`])

use std::num::NonZeroU32;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::{StreamExt, TryStreamExt};
use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::{Mutex as AsyncMutex, Semaphore, mpsc, watch};
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use weft_core::id::{Cid, Did, RecordPath, Rev};

use crate::config::BackfillOptions;
use crate::error::{Error, Result};
use crate::event::{CommitEvent, CommitOp};
use crate::handler::RecordHandler;
use crate::job::{Job, JobState};
use crate::metrics::BackfillMetrics;
use crate::op::{BufferedOp, OpKind};
use crate::repo::{RepoSnapshot, SnapshotDecoder};
use crate::store::Store;

/// Total timeout for one snapshot fetch, body included.
const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(600);

/// How long the dispatcher sleeps when nothing is enqueued.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

type SyncLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

/// Reconciles repo snapshots with live firehose commits.
///
/// One `Backfiller` serves many repos: jobs move through the store, live
/// events buffer against jobs that have not caught up yet, and a bounded
/// pool of import tasks streams snapshots in.
///
/// ## Example
///
/// ```rust,ignore
/// let backfiller = Arc::new(Backfiller::new(
///     "search-ingest",
///     store,
///     handler,
///     decoder,
///     BackfillOptions::default(),
/// )?);
///
/// let cancel = CancellationToken::new();
/// tokio::spawn(Arc::clone(&backfiller).start(cancel.clone()));
/// // ... feed firehose commits into backfiller.handle_event(...)
/// backfiller.stop().await;
/// ```
pub struct Backfiller {
    name: String,
    store: Arc<dyn Store>,
    handler: Arc<dyn RecordHandler>,
    decoder: Arc<dyn SnapshotDecoder>,
    options: BackfillOptions,
    client: reqwest::Client,
    /// Global token bucket shared by every snapshot fetch.
    sync_limiter: Arc<SyncLimiter>,
    /// Bounds concurrent snapshot imports; drained on shutdown.
    import_permits: Arc<Semaphore>,
    metrics: BackfillMetrics,
    stop_token: CancellationToken,
    stopped_tx: watch::Sender<bool>,
}

impl Backfiller {
    /// Creates a backfiller.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] when the options are unusable
    /// (zero rate limit, HTTP client construction failure).
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn Store>,
        handler: Arc<dyn RecordHandler>,
        decoder: Arc<dyn SnapshotDecoder>,
        options: BackfillOptions,
    ) -> Result<Self> {
        let name = name.into();

        let rps = NonZeroU32::new(options.sync_requests_per_second)
            .ok_or_else(|| Error::configuration("sync_requests_per_second must be at least 1"))?;
        let quota = Quota::per_second(rps).allow_burst(NonZeroU32::MIN);

        let client = reqwest::Client::builder()
            .timeout(SNAPSHOT_TIMEOUT)
            .build()
            .map_err(|e| Error::configuration(format!("failed to build HTTP client: {e}")))?;

        let (stopped_tx, _) = watch::channel(false);

        Ok(Self {
            metrics: BackfillMetrics::new(name.clone()),
            import_permits: Arc::new(Semaphore::new(options.parallel_backfills.max(1))),
            sync_limiter: Arc::new(RateLimiter::direct(quota)),
            name,
            store,
            handler,
            decoder,
            options,
            client,
            stop_token: CancellationToken::new(),
            stopped_tx,
        })
    }

    /// This backfiller's instance name, used in the user-agent and on
    /// every metric series.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The configuration the backfiller runs with.
    #[must_use]
    pub const fn options(&self) -> &BackfillOptions {
        &self.options
    }

    // --- Event handling -------------------------------------------------

    /// Handles one live firehose commit.
    ///
    /// Ops are buffered against the repo's job, creating the job lazily
    /// for unknown repos. Once a job is complete the buffer is bypassed:
    /// ops apply straight through the record handler and the revision
    /// cursor advances.
    ///
    /// Calls for the same repo must be serialized by the firehose client;
    /// the engine does not order concurrent commits itself. `cancel` is
    /// the firehose client's cancellation token; record handlers invoked
    /// on the bypass path receive it.
    ///
    /// # Errors
    ///
    /// Fails when the event's blocks cannot be decoded, a referenced
    /// record block is missing, or storage fails. Replays of
    /// already-processed commits succeed silently.
    pub async fn handle_event(
        &self,
        cancel: &CancellationToken,
        event: &CommitEvent,
    ) -> Result<()> {
        let blocks = self
            .decoder
            .read_repo(Box::pin(std::io::Cursor::new(event.blocks.clone())))
            .await?;

        let mut ops = Vec::with_capacity(event.ops.len());
        for op in &event.ops {
            if op.action.carries_record() {
                let (cid, rec) = self.event_record(blocks.as_ref(), op).await?;
                ops.push(BufferedOp {
                    kind: op.action,
                    path: op.path.clone(),
                    rec: Some(rec),
                    cid: Some(cid),
                });
            } else {
                ops.push(BufferedOp::delete(op.path.clone()));
            }
        }

        let op_count = ops.len();
        match self
            .buffer_ops(&event.repo, event.since.clone(), event.rev.clone(), ops.clone())
            .await
        {
            Ok(true) => {
                self.metrics.add_ops_buffered(op_count);
                self.metrics.record_event_handled("buffered");
                Ok(())
            }
            Err(Error::AlreadyProcessed) => {
                self.metrics.record_event_handled("already_processed");
                Ok(())
            }
            Ok(false) | Err(Error::JobComplete) => {
                self.apply_ops(cancel, &event.repo, &event.rev, &ops).await?;
                self.store.update_rev(&event.repo, event.rev.clone()).await?;
                self.metrics.record_event_handled("applied");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Buffers one commit's ops against a repo's job, creating the job
    /// lazily when none exists yet.
    ///
    /// Returns `Ok(true)` when the ops were buffered.
    ///
    /// # Errors
    ///
    /// Propagates the job's buffering contract: [`Error::JobComplete`],
    /// [`Error::AlreadyProcessed`], [`Error::EventGap`], and storage
    /// failures.
    pub async fn buffer_ops(
        &self,
        repo: &Did,
        since: Option<Rev>,
        rev: Rev,
        ops: Vec<BufferedOp>,
    ) -> Result<bool> {
        let job = match self.store.get_job(repo).await {
            Ok(job) => job,
            Err(Error::JobNotFound { .. }) => {
                self.store.enqueue_job(repo).await?;
                self.store.get_job(repo).await?
            }
            Err(err) => return Err(err),
        };

        job.buffer_ops(since, rev, ops).await
    }

    /// Buffers a single op. Convenience wrapper over
    /// [`Backfiller::buffer_ops`].
    ///
    /// # Errors
    ///
    /// Same contract as [`Backfiller::buffer_ops`].
    pub async fn buffer_op(
        &self,
        repo: &Did,
        since: Option<Rev>,
        rev: Rev,
        op: BufferedOp,
    ) -> Result<bool> {
        self.buffer_ops(repo, since, rev, vec![op]).await
    }

    async fn event_record(
        &self,
        blocks: &dyn RepoSnapshot,
        op: &CommitOp,
    ) -> Result<(Cid, Bytes)> {
        if self.options.trust_event_blocks {
            let cid = op.cid.clone().ok_or_else(|| {
                Error::decode(format!("{} op for {} carried no cid", op.action, op.path))
            })?;
            let rec = blocks.block(&cid).await?;
            Ok((cid, rec))
        } else {
            blocks.record_bytes(&op.path).await
        }
    }

    async fn apply_ops(
        &self,
        cancel: &CancellationToken,
        repo: &Did,
        rev: &Rev,
        ops: &[BufferedOp],
    ) -> Result<()> {
        for op in ops {
            match op.kind {
                OpKind::Create | OpKind::Update => {
                    let (Some(rec), Some(cid)) = (op.rec.as_ref(), op.cid.as_ref()) else {
                        return Err(Error::decode(format!(
                            "{} op for {} is missing its record payload",
                            op.kind, op.path
                        )));
                    };
                    if op.kind == OpKind::Create {
                        self.handler
                            .handle_create(cancel, repo, rev, &op.path, rec, cid)
                            .await?;
                    } else {
                        self.handler
                            .handle_update(cancel, repo, rev, &op.path, rec, cid)
                            .await?;
                    }
                }
                OpKind::Delete => {
                    self.handler.handle_delete(cancel, repo, rev, &op.path).await?;
                }
            }
        }
        Ok(())
    }

    // --- Snapshot import ------------------------------------------------

    /// Imports one repo's snapshot and flushes its buffer.
    ///
    /// Fetches the repo bundle (incrementally when the job already has a
    /// revision cursor), streams it through the decoder, dispatches
    /// records to parallel workers, then replays buffered ops. The final
    /// lifecycle state is persisted by the flusher and returned.
    ///
    /// # Errors
    ///
    /// Transport, upstream-status, and decode failures abort the import;
    /// [`Error::failed_state`] describes the `Failed(..)` tag each maps
    /// to. Per-record errors are logged and skipped, never fatal.
    pub async fn backfill_repo(
        &self,
        job: &dyn Job,
        cancel: &CancellationToken,
    ) -> Result<JobState> {
        let start = Instant::now();
        let repo = job.repo();
        let retries = job.retry_count();
        if retries > 0 {
            info!(repo = %repo, retry_count = retries, "processing backfill");
        } else {
            info!(repo = %repo, "processing backfill");
        }

        let url = self.snapshot_url(&repo, &job.rev());

        tokio::select! {
            () = cancel.cancelled() => return Err(Error::Cancelled),
            () = self.sync_limiter.until_ready() => {}
        }

        let mut request = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/vnd.ipld.car")
            .header(
                reqwest::header::USER_AGENT,
                format!("atproto-backfill-{}/0.0.1", self.name),
            );
        if let Some(magic) = &self.options.magic_header {
            request = request.header(magic.name.as_str(), magic.value.as_str());
        }

        let response = tokio::select! {
            () = cancel.cancelled() => return Err(Error::Cancelled),
            sent = request.send() => sent.map_err(|e| Error::transport(e.to_string()))?,
        };

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(Error::UpstreamStatus {
                status: status.as_u16(),
                status_line: format!(
                    "{} {}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("unknown error")
                ),
            });
        }

        let body = StreamReader::new(response.bytes_stream().map_err(std::io::Error::other).boxed());
        let body = CountingReader::new(body, self.metrics.clone());

        let snapshot = tokio::select! {
            () = cancel.cancelled() => return Err(Error::Cancelled),
            decoded = self.decoder.read_repo(Box::pin(body)) => decoded?,
        };

        let snapshot_rev = snapshot.rev();
        let num_records = self
            .dispatch_records(&repo, &snapshot, &snapshot_rev, cancel)
            .await;

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        if let Err(err) = job.set_rev(snapshot_rev).await {
            error!(repo = %repo, error = %err, "failed to update rev after backfilling repo");
        }

        let num_buffered = self.flush_buffer(job, cancel).await;

        info!(
            repo = %repo,
            records_backfilled = num_records,
            buffered_records_processed = num_buffered,
            duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            "backfill complete"
        );

        Ok(job.state())
    }

    fn snapshot_url(&self, repo: &Did, since: &Rev) -> String {
        let mut url = format!("{}?did={}", self.options.checkout_path, repo);
        if !since.is_empty() {
            url.push_str("&since=");
            url.push_str(since.as_str());
        }
        url
    }

    /// Streams every matching record to a pool of dispatch workers.
    ///
    /// Returns how many records the producer enumerated.
    async fn dispatch_records(
        &self,
        repo: &Did,
        snapshot: &Arc<dyn RepoSnapshot>,
        rev: &Rev,
        cancel: &CancellationToken,
    ) -> usize {
        let fanout = self.options.parallel_record_creates.max(1);
        let (item_tx, item_rx) = mpsc::channel::<(RecordPath, Cid)>(fanout);
        let item_rx = Arc::new(AsyncMutex::new(item_rx));
        let (result_tx, mut result_rx) = mpsc::channel::<(RecordPath, Result<()>)>(fanout);

        // Producer: walk the record tree, filtering by collection prefix
        // at iteration so unrelated collections never fetch blocks.
        let producer = {
            let snapshot = Arc::clone(snapshot);
            let prefix = self.options.nsid_filter.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let mut count = 0usize;
                let mut records = snapshot.records(&prefix);
                loop {
                    let item = tokio::select! {
                        () = cancel.cancelled() => break,
                        item = records.next() => item,
                    };
                    match item {
                        Some(Ok(record)) => {
                            count += 1;
                            if item_tx.send(record).await.is_err() {
                                break;
                            }
                        }
                        Some(Err(err)) => {
                            error!(error = %err, "failed to iterate records in repo");
                            break;
                        }
                        None => break,
                    }
                }
                count
            })
        };

        // Consumers: fetch each record's block and hand it downstream.
        let mut consumers = Vec::with_capacity(fanout);
        for _ in 0..fanout {
            let item_rx = Arc::clone(&item_rx);
            let result_tx = result_tx.clone();
            let snapshot = Arc::clone(snapshot);
            let handler = Arc::clone(&self.handler);
            let metrics = self.metrics.clone();
            let cancel = cancel.clone();
            let repo = repo.clone();
            let rev = rev.clone();
            consumers.push(tokio::spawn(async move {
                loop {
                    let item = {
                        let mut rx = item_rx.lock().await;
                        tokio::select! {
                            () = cancel.cancelled() => None,
                            item = rx.recv() => item,
                        }
                    };
                    let Some((path, cid)) = item else { break };

                    // Block fetches and handler calls are suspension
                    // points too; abandon them as soon as the token
                    // fires instead of waiting them out.
                    let outcome = tokio::select! {
                        () = cancel.cancelled() => break,
                        outcome = async {
                            let block = snapshot.block(&cid).await?;
                            handler
                                .handle_create(&cancel, &repo, &rev, &path, &block, &cid)
                                .await
                        } => outcome,
                    };

                    if outcome.is_ok() {
                        metrics.record_record_processed();
                    }
                    if result_tx.send((path, outcome)).await.is_err() {
                        break;
                    }
                }
            }));
        }
        drop(result_tx);

        // Result drainer: per-record failures are logged and skipped.
        let drainer = tokio::spawn(async move {
            while let Some((path, outcome)) = result_rx.recv().await {
                if let Err(err) = outcome {
                    error!(record = %path, error = %err, "error processing record");
                }
            }
        });

        let count = producer.await.unwrap_or(0);
        for consumer in consumers {
            let _ = consumer.await;
        }
        let _ = drainer.await;
        count
    }

    // --- Buffer flushing ------------------------------------------------

    /// Replays a job's buffered ops through the record handler, then
    /// persists the job's final lifecycle state.
    ///
    /// Handler errors are logged and never interrupt the drain; the
    /// drain itself always completes, but every handler call receives
    /// `cancel` so a cooperative downstream can cut its own work short.
    /// When the buffered chain diverged from the revision the snapshot
    /// landed at, the job goes back to `Enqueued` and is re-queued for a
    /// fresh import; otherwise it completes.
    ///
    /// Returns how many buffered ops were replayed.
    pub async fn flush_buffer(&self, job: &dyn Job, cancel: &CancellationToken) -> usize {
        let repo = job.repo();
        let processed = Arc::new(AtomicUsize::new(0));

        let handler = Arc::clone(&self.handler);
        let metrics = self.metrics.clone();
        let cb_repo = repo.clone();
        let cb_cancel = cancel.clone();
        let cb_processed = Arc::clone(&processed);
        let mut cb = move |rev: Rev, op: BufferedOp| -> BoxFuture<'static, ()> {
            let handler = Arc::clone(&handler);
            let metrics = metrics.clone();
            let repo = cb_repo.clone();
            let cancel = cb_cancel.clone();
            let processed = Arc::clone(&cb_processed);
            Box::pin(async move {
                let outcome = match op.kind {
                    OpKind::Create | OpKind::Update => {
                        if let (Some(rec), Some(cid)) = (op.rec.as_ref(), op.cid.as_ref()) {
                            if op.kind == OpKind::Create {
                                handler
                                    .handle_create(&cancel, &repo, &rev, &op.path, rec, cid)
                                    .await
                            } else {
                                handler
                                    .handle_update(&cancel, &repo, &rev, &op.path, rec, cid)
                                    .await
                            }
                        } else {
                            Err(Error::decode(format!(
                                "buffered {} op for {} is missing its record payload",
                                op.kind, op.path
                            )))
                        }
                    }
                    OpKind::Delete => handler.handle_delete(&cancel, &repo, &rev, &op.path).await,
                };
                if let Err(err) = outcome {
                    error!(repo = %repo, path = %op.path, error = %err, "failed to handle buffered op");
                }
                metrics.sub_op_buffered();
                processed.fetch_add(1, Ordering::Relaxed);
            })
        };

        match job.flush_buffered_ops(&mut cb).await {
            Ok(()) => {}
            Err(Error::EventGap) => {
                warn!(
                    repo = %repo,
                    "buffered revs diverged from snapshot; re-enqueueing for a fresh import"
                );
                if let Err(err) = job.set_state(JobState::Enqueued).await {
                    error!(repo = %repo, error = %err, "failed to reset job state after gapped flush");
                }
                if let Err(err) = self.store.enqueue_job(&repo).await {
                    error!(repo = %repo, error = %err, "failed to re-enqueue job after gapped flush");
                }
                return processed.load(Ordering::Relaxed);
            }
            Err(err) => {
                error!(repo = %repo, error = %err, "failed to flush buffered ops");
            }
        }

        if let Err(err) = job.set_state(JobState::Complete).await {
            error!(repo = %repo, error = %err, "failed to set job state");
        }

        processed.load(Ordering::Relaxed)
    }

    // --- Dispatching ----------------------------------------------------

    /// Runs the backfill processor until [`Backfiller::stop`] is called.
    ///
    /// Pulls enqueued jobs from the store and fans them out to at most
    /// `parallel_backfills` concurrent import tasks. Every import runs
    /// under a child of `cancel`, so cancelling it aborts in-flight
    /// HTTP, block fetches, and record-handler calls promptly; a plain
    /// [`Backfiller::stop`] instead drains in-flight imports to
    /// completion.
    pub async fn start(self: Arc<Self>, cancel: CancellationToken) {
        info!(name = %self.name, "starting backfill processor");
        let max_permits =
            u32::try_from(self.options.parallel_backfills.max(1)).unwrap_or(u32::MAX);

        loop {
            if self.stop_token.is_cancelled() {
                info!(name = %self.name, "stopping backfill processor");
                // Drain: every in-flight import must hand its permit back.
                let _drain = self.import_permits.acquire_many(max_permits).await;
                info!(name = %self.name, "backfill processor stopped");
                self.stopped_tx.send_replace(true);
                return;
            }

            let job = match self.store.get_next_enqueued_job().await {
                Err(err) => {
                    error!(name = %self.name, error = %err, "failed to get next enqueued job");
                    self.idle(POLL_INTERVAL).await;
                    continue;
                }
                Ok(None) => {
                    self.idle(POLL_INTERVAL).await;
                    continue;
                }
                Ok(Some(job)) => job,
            };

            let repo = job.repo();
            if let Err(err) = job.set_state(JobState::InProgress).await {
                error!(repo = %repo, error = %err, "failed to set job state");
                continue;
            }

            let Ok(permit) = Arc::clone(&self.import_permits).acquire_owned().await else {
                return;
            };
            let this = Arc::clone(&self);
            let token = cancel.child_token();
            tokio::spawn(async move {
                let _permit = permit;
                let repo = job.repo();
                match this.backfill_repo(job.as_ref(), &token).await {
                    Ok(state) => {
                        info!(repo = %repo, state = %state, "backfill attempt finished");
                    }
                    Err(err) => {
                        error!(repo = %repo, error = %err, "failed to backfill repo");
                        if let Err(set_err) = job.set_state(err.failed_state()).await {
                            error!(repo = %repo, error = %set_err, "failed to set job state");
                        }
                        // Whatever was buffered is stale relative to the
                        // failed attempt.
                        if let Err(clear_err) = job.clear_buffered_ops().await {
                            error!(repo = %repo, error = %clear_err, "failed to clear buffered ops");
                        }
                    }
                }
                this.metrics.record_job_processed();
            });
        }
    }

    /// Signals the processor loop to stop and waits for in-flight
    /// imports to drain.
    ///
    /// Only meaningful once [`Backfiller::start`] is running.
    pub async fn stop(&self) {
        let mut stopped = self.stopped_tx.subscribe();
        self.stop_token.cancel();
        while !*stopped.borrow_and_update() {
            if stopped.changed().await.is_err() {
                break;
            }
        }
    }

    async fn idle(&self, duration: Duration) {
        tokio::select! {
            () = self.stop_token.cancelled() => {}
            () = tokio::time::sleep(duration) => {}
        }
    }
}

/// Counts snapshot body bytes into the bytes-processed metric as the
/// decoder pulls them through.
struct CountingReader<R> {
    inner: R,
    metrics: BackfillMetrics,
}

impl<R> CountingReader<R> {
    const fn new(inner: R, metrics: BackfillMetrics) -> Self {
        Self { inner, metrics }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for CountingReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let me = self.get_mut();
        let before = buf.filled().len();
        match Pin::new(&mut me.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                let read = buf.filled().len() - before;
                if read > 0 {
                    me.metrics.record_bytes_processed(read as u64);
                }
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}
