//! Shared test utilities for weft integration tests.
//!
//! This crate provides:
//! - [`CarFixture`]: builder for deterministic fake repo bundles
//! - [`FixtureDecoder`]: a [`weft_backfill::repo::SnapshotDecoder`] that
//!   reads the fixture encoding instead of real CAR
//! - [`RecordingHandler`]: a record handler that captures every call
//!
//! # Example
//!
//! ```rust,ignore
//! use weft_test_utils::{CarFixture, FixtureDecoder, RecordingHandler};
//!
//! let car = CarFixture::new("r1").with_record("app.bsky.feed.post/a", b"hello");
//! let body = car.encode();
//! // serve `body` from a mock snapshot endpoint ...
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
// Test utilities use expect/unwrap for cleaner test code - panics are acceptable in tests
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]

pub mod car;
pub mod recording;

pub use car::{CarFixture, FixtureDecoder};
pub use recording::{HandledOp, RecordingHandler};

/// Initialize test logging (call once per test module).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("weft=debug".parse().expect("valid directive")),
        )
        .with_test_writer()
        .try_init();
}
