//! Property-based tests for backfill invariants.
//!
//! These tests use proptest to verify the buffering and lifecycle
//! invariants hold across randomly generated commit sequences.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use proptest::prelude::*;
use tokio_test::block_on;

use weft_backfill::error::Error;
use weft_backfill::job::Job;
use weft_backfill::op::{BufferedOp, OpKind};
use weft_backfill::store::Store;
use weft_backfill::store::memory::MemoryStore;
use weft_core::id::{Cid, Did, RecordPath, Rev};

/// Zero-padded revs sort lexicographically in numeric order.
fn rev(n: u32) -> Rev {
    Rev::new(format!("r{n:05}"))
}

fn op(kind: OpKind, path: &str) -> BufferedOp {
    match kind {
        OpKind::Create => BufferedOp::create(
            RecordPath::new(path),
            Bytes::from_static(b"rec"),
            Cid::new(format!("cid-{path}")),
        ),
        OpKind::Update => BufferedOp::update(
            RecordPath::new(path),
            Bytes::from_static(b"rec"),
            Cid::new(format!("cid-{path}")),
        ),
        OpKind::Delete => BufferedOp::delete(RecordPath::new(path)),
    }
}

fn arb_kind() -> impl Strategy<Value = OpKind> {
    prop::sample::select(vec![OpKind::Create, OpKind::Update, OpKind::Delete])
}

/// How a generated commit picks its `since` relative to the true chain.
#[derive(Debug, Clone, Copy)]
enum SinceChoice {
    /// No `since` at all.
    Omitted,
    /// Extends the chain correctly.
    Chained,
    /// Claims a baseline ahead of the chain.
    Ahead,
}

fn arb_since_choice() -> impl Strategy<Value = SinceChoice> {
    prop::sample::select(vec![
        SinceChoice::Omitted,
        SinceChoice::Chained,
        SinceChoice::Ahead,
    ])
}

proptest! {
    /// Successive observed values of a job's rev never decrease, no
    /// matter how set_rev and update_rev interleave.
    #[test]
    fn job_rev_is_monotonic(revs in prop::collection::vec(0u32..1000, 1..20)) {
        block_on(async move {
            let store = MemoryStore::new();
            let repo = Did::new("did:plc:prop");
            store.enqueue_job(&repo).await.expect("enqueue");
            let job = store.get_job(&repo).await.expect("job");

            let mut high_water = Rev::empty();
            for n in revs {
                job.set_rev(rev(n)).await.expect("set rev");
                let observed = job.rev();
                prop_assert!(observed >= high_water, "rev went backwards: {observed} < {high_water}");
                high_water = observed;
            }
            Ok(())
        })?;
    }

    /// A commit buffers successfully only when it extends the chain:
    /// its `since` names the newest buffered rev (or the job has no
    /// baseline yet), and its rev is strictly newer than everything
    /// seen. Anything older maps to AlreadyProcessed and appends
    /// nothing.
    #[test]
    fn buffered_commits_extend_the_chain(
        seed_applied in prop::bool::ANY,
        commits in prop::collection::vec((arb_since_choice(), 1u32..3), 1..12),
    ) {
        block_on(async move {
            let store = MemoryStore::new();
            let repo = Did::new("did:plc:prop");
            store.enqueue_job(&repo).await.expect("enqueue");
            let job = store.get_job(&repo).await.expect("job");

            let mut applied = Rev::empty();
            if seed_applied {
                applied = rev(10);
                job.set_rev(applied.clone()).await.expect("seed rev");
            }

            let mut last_buffered: Option<Rev> = None;
            let mut next = 11u32;
            let mut buffered_total = 0usize;

            for (choice, step) in commits {
                let commit_rev = rev(next);
                next += step;

                let baseline = last_buffered.clone().unwrap_or_else(|| applied.clone());
                let since = match choice {
                    SinceChoice::Omitted => None,
                    SinceChoice::Chained => Some(baseline.clone()),
                    SinceChoice::Ahead => Some(rev(next + 100)),
                };

                let expect_gap = matches!(choice, SinceChoice::Ahead) && !applied.is_empty();
                let result = job
                    .buffer_ops(since.clone(), commit_rev.clone(), vec![op(OpKind::Create, "c/p")])
                    .await;

                let job_handle = store.job(&repo).expect("memory job");
                if expect_gap {
                    prop_assert!(matches!(result, Err(Error::EventGap)));
                    prop_assert_eq!(job_handle.buffered_op_count(), buffered_total);
                } else {
                    prop_assert!(result.is_ok(), "chained commit must buffer: {result:?}");
                    buffered_total += 1;
                    prop_assert_eq!(job_handle.buffered_op_count(), buffered_total);
                    last_buffered = Some(commit_rev);
                }
            }
            Ok(())
        })?;
    }

    /// Replaying anything at or below the applied cursor is a no-op
    /// that appends nothing, regardless of job state.
    #[test]
    fn stale_revs_never_append(
        cursor in 5u32..50,
        offset in 0u32..5,
        complete in prop::bool::ANY,
    ) {
        block_on(async move {
            let store = MemoryStore::new();
            let repo = Did::new("did:plc:prop");
            store.enqueue_job(&repo).await.expect("enqueue");
            let job = store.get_job(&repo).await.expect("job");
            job.set_rev(rev(cursor)).await.expect("seed rev");
            if complete {
                job.set_state(weft_backfill::job::JobState::Complete)
                    .await
                    .expect("complete");
            }

            let stale = rev(cursor - offset);
            let result = job
                .buffer_ops(None, stale, vec![op(OpKind::Create, "c/p")])
                .await;

            prop_assert!(matches!(result, Err(Error::AlreadyProcessed)));
            prop_assert_eq!(store.job(&repo).expect("memory job").buffered_op_count(), 0);
            Ok(())
        })?;
    }

    /// The dispatcher queue hands every enqueued job out exactly once.
    #[test]
    fn enqueued_jobs_dispatch_exactly_once(count in 1usize..30) {
        block_on(async move {
            let store = MemoryStore::new();
            let mut expected = Vec::new();
            for i in 0..count {
                let repo = Did::new(format!("did:plc:prop{i:03}"));
                store.enqueue_job(&repo).await.expect("enqueue");
                // Double-enqueues must not double-dispatch.
                store.enqueue_job(&repo).await.expect("re-enqueue");
                expected.push(repo);
            }

            let mut taken = Vec::new();
            while let Some(job) = store.get_next_enqueued_job().await.expect("next") {
                taken.push(job.repo());
            }

            let mut sorted = taken.clone();
            sorted.sort();
            sorted.dedup();
            prop_assert_eq!(sorted.len(), taken.len(), "a job was dispatched twice");

            let mut expected_sorted = expected;
            expected_sorted.sort();
            let mut taken_sorted = taken;
            taken_sorted.sort();
            prop_assert_eq!(taken_sorted, expected_sorted);
            Ok(())
        })?;
    }

    /// Flushing a recorded buffer invokes the callback in insertion
    /// order with kinds preserved, empties the buffer, and lands the
    /// cursor on the newest replayed rev.
    #[test]
    fn flush_replays_the_buffer_verbatim(
        groups in prop::collection::vec(prop::collection::vec(arb_kind(), 1..4), 1..8),
    ) {
        block_on(async move {
            let store = MemoryStore::new();
            let repo = Did::new("did:plc:prop");
            store.enqueue_job(&repo).await.expect("enqueue");
            let job = store.get_job(&repo).await.expect("job");

            let mut expected = Vec::new();
            let mut last: Option<Rev> = None;
            for (i, kinds) in groups.iter().enumerate() {
                let commit_rev = rev(u32::try_from(i).unwrap() + 1);
                let ops: Vec<BufferedOp> = kinds
                    .iter()
                    .enumerate()
                    .map(|(j, kind)| op(*kind, &format!("c/p{i}-{j}")))
                    .collect();
                for o in &ops {
                    expected.push((commit_rev.clone(), o.kind, o.path.clone()));
                }
                job.buffer_ops(last.clone(), commit_rev.clone(), ops)
                    .await
                    .expect("buffer");
                last = Some(commit_rev);
            }

            let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
            let seen_cb = Arc::clone(&seen);
            let mut cb = move |commit_rev: Rev, flushed: BufferedOp| -> BoxFuture<'static, ()> {
                let seen = Arc::clone(&seen_cb);
                Box::pin(async move {
                    seen.lock()
                        .expect("seen lock")
                        .push((commit_rev, flushed.kind, flushed.path));
                })
            };
            job.flush_buffered_ops(&mut cb).await.expect("flush");
            drop(cb);

            let seen = Arc::try_unwrap(seen)
                .expect("sole owner")
                .into_inner()
                .expect("seen lock");
            prop_assert_eq!(seen, expected);

            let job_handle = store.job(&repo).expect("memory job");
            prop_assert_eq!(job_handle.buffered_op_count(), 0);
            prop_assert_eq!(job.rev(), last.unwrap());
            Ok(())
        })?;
    }
}
