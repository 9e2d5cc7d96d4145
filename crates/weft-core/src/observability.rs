//! Observability infrastructure for weft.
//!
//! Structured logging with consistent spans. This module provides
//! initialization helpers and span constructors for consistent
//! observability across backfill components.

use std::sync::Once;

use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times;
/// subsequent calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `weft_backfill=debug`)
///
/// # Example
///
/// ```rust
/// use weft_core::observability::{LogFormat, init_logging};
///
/// init_logging(LogFormat::Pretty);
/// ```
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json())
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().pretty())
                    .init();
            }
        }
    });
}

/// Creates a span for backfill operations with standard fields.
///
/// # Example
///
/// ```rust
/// use weft_core::observability::backfill_span;
///
/// let span = backfill_span("backfill_repo", "did:plc:abc123");
/// let _guard = span.enter();
/// // ... process the repo
/// ```
#[must_use]
pub fn backfill_span(operation: &str, repo: &str) -> Span {
    tracing::info_span!("backfill", op = operation, repo = repo)
}

/// Creates a span for firehose event handling.
#[must_use]
pub fn event_span(repo: &str, rev: &str) -> Span {
    tracing::info_span!("firehose_event", repo = repo, rev = rev)
}
