//! Observability metrics for the backfill engine.
//!
//! Metrics are exposed via the `metrics` crate facade. To export to
//! Prometheus:
//!
//! ```rust,ignore
//! use metrics_exporter_prometheus::PrometheusBuilder;
//!
//! PrometheusBuilder::new()
//!     .with_http_listener(([0, 0, 0, 0], 9090))
//!     .install()
//!     .expect("failed to install Prometheus recorder");
//! ```
//!
//! ## Metrics Exported
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `weft_backfill_jobs_processed_total` | Counter | `name` | Import attempts completed (any outcome) |
//! | `weft_backfill_records_processed_total` | Counter | `name` | Records delivered from snapshots |
//! | `weft_backfill_bytes_processed_total` | Counter | `name` | Snapshot body bytes read |
//! | `weft_backfill_events_handled_total` | Counter | `name`, `outcome` | Live commits handled |
//! | `weft_backfill_ops_buffered` | Gauge | `name` | Ops currently sitting in buffers |

use metrics::{counter, gauge};

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: import attempts completed, whatever the outcome.
    pub const JOBS_PROCESSED_TOTAL: &str = "weft_backfill_jobs_processed_total";
    /// Counter: records delivered to the create handler from snapshots.
    pub const RECORDS_PROCESSED_TOTAL: &str = "weft_backfill_records_processed_total";
    /// Counter: snapshot response body bytes read.
    pub const BYTES_PROCESSED_TOTAL: &str = "weft_backfill_bytes_processed_total";
    /// Counter: live commits handled.
    pub const EVENTS_HANDLED_TOTAL: &str = "weft_backfill_events_handled_total";
    /// Gauge: ops currently buffered across all jobs.
    pub const OPS_BUFFERED: &str = "weft_backfill_ops_buffered";
}

/// Label keys used across metrics.
pub mod labels {
    /// The backfiller instance name.
    pub const NAME: &str = "name";
    /// Event-handling outcome (buffered, applied, already_processed).
    pub const OUTCOME: &str = "outcome";
}

/// High-level interface for recording backfill metrics.
///
/// Cheap to clone and share across tasks; every series carries the
/// backfiller's instance name.
#[derive(Debug, Clone)]
pub struct BackfillMetrics {
    name: String,
}

impl BackfillMetrics {
    /// Creates a recorder for the named backfiller instance.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Records a completed import attempt.
    pub fn record_job_processed(&self) {
        counter!(
            names::JOBS_PROCESSED_TOTAL,
            labels::NAME => self.name.clone(),
        )
        .increment(1);
    }

    /// Records one record delivered from a snapshot.
    pub fn record_record_processed(&self) {
        counter!(
            names::RECORDS_PROCESSED_TOTAL,
            labels::NAME => self.name.clone(),
        )
        .increment(1);
    }

    /// Records snapshot body bytes read.
    pub fn record_bytes_processed(&self, bytes: u64) {
        counter!(
            names::BYTES_PROCESSED_TOTAL,
            labels::NAME => self.name.clone(),
        )
        .increment(bytes);
    }

    /// Records a handled live commit with its outcome.
    pub fn record_event_handled(&self, outcome: &str) {
        counter!(
            names::EVENTS_HANDLED_TOTAL,
            labels::NAME => self.name.clone(),
            labels::OUTCOME => outcome.to_string(),
        )
        .increment(1);
    }

    /// Adjusts the buffered-ops gauge upward after buffering a commit.
    #[allow(clippy::cast_precision_loss)] // Gauge values are typically small
    pub fn add_ops_buffered(&self, count: usize) {
        gauge!(
            names::OPS_BUFFERED,
            labels::NAME => self.name.clone(),
        )
        .increment(count as f64);
    }

    /// Decrements the buffered-ops gauge as a flush replays one op.
    pub fn sub_op_buffered(&self) {
        gauge!(
            names::OPS_BUFFERED,
            labels::NAME => self.name.clone(),
        )
        .decrement(1.0);
    }
}
