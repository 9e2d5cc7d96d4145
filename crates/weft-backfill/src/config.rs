//! Backfiller configuration.
//!
//! All knobs default to values suitable for a single consumer of a
//! public relay; deployments override what they need.

use serde::{Deserialize, Serialize};

/// An opaque header pair attached to every snapshot fetch.
///
/// Treated as auth the engine does not interpret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MagicHeader {
    /// Header name.
    pub name: String,
    /// Header value.
    pub value: String,
}

/// Configuration for a [`crate::backfiller::Backfiller`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillOptions {
    /// Maximum concurrent snapshot imports.
    #[serde(default = "default_parallel_backfills")]
    pub parallel_backfills: usize,

    /// Record-dispatch worker fanout within one import.
    #[serde(default = "default_parallel_record_creates")]
    pub parallel_record_creates: usize,

    /// Collection-prefix filter, e.g. `app.bsky.feed.post/`.
    ///
    /// Empty means all records are backfilled.
    #[serde(default)]
    pub nsid_filter: String,

    /// Global cap on snapshot fetches per second, shared by every import.
    #[serde(default = "default_sync_requests_per_second")]
    pub sync_requests_per_second: u32,

    /// The snapshot endpoint.
    #[serde(default = "default_checkout_path")]
    pub checkout_path: String,

    /// Whether to trust CIDs supplied by live events.
    ///
    /// When false, record bytes are re-derived from the op's path by
    /// walking the event's block tree instead of fetching by CID.
    #[serde(default = "default_trust_event_blocks")]
    pub trust_event_blocks: bool,

    /// Optional opaque header pair sent with every snapshot fetch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub magic_header: Option<MagicHeader>,
}

const fn default_parallel_backfills() -> usize {
    10
}

const fn default_parallel_record_creates() -> usize {
    100
}

const fn default_sync_requests_per_second() -> u32 {
    2
}

fn default_checkout_path() -> String {
    "https://bsky.social/xrpc/com.atproto.sync.getRepo".to_string()
}

const fn default_trust_event_blocks() -> bool {
    true
}

impl Default for BackfillOptions {
    fn default() -> Self {
        Self {
            parallel_backfills: default_parallel_backfills(),
            parallel_record_creates: default_parallel_record_creates(),
            nsid_filter: String::new(),
            sync_requests_per_second: default_sync_requests_per_second(),
            checkout_path: default_checkout_path(),
            trust_event_blocks: default_trust_event_blocks(),
            magic_header: None,
        }
    }
}

impl BackfillOptions {
    /// Creates options with all defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum concurrent snapshot imports.
    #[must_use]
    pub const fn with_parallel_backfills(mut self, n: usize) -> Self {
        self.parallel_backfills = n;
        self
    }

    /// Sets the record-dispatch worker fanout.
    #[must_use]
    pub const fn with_parallel_record_creates(mut self, n: usize) -> Self {
        self.parallel_record_creates = n;
        self
    }

    /// Sets the collection-prefix filter.
    #[must_use]
    pub fn with_nsid_filter(mut self, prefix: impl Into<String>) -> Self {
        self.nsid_filter = prefix.into();
        self
    }

    /// Sets the global snapshot-fetch rate cap.
    #[must_use]
    pub const fn with_sync_requests_per_second(mut self, rps: u32) -> Self {
        self.sync_requests_per_second = rps;
        self
    }

    /// Sets the snapshot endpoint.
    #[must_use]
    pub fn with_checkout_path(mut self, url: impl Into<String>) -> Self {
        self.checkout_path = url.into();
        self
    }

    /// Sets whether live-event CIDs are trusted.
    #[must_use]
    pub const fn with_trust_event_blocks(mut self, trust: bool) -> Self {
        self.trust_event_blocks = trust;
        self
    }

    /// Attaches an opaque header pair to every snapshot fetch.
    #[must_use]
    pub fn with_magic_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.magic_header = Some(MagicHeader {
            name: name.into(),
            value: value.into(),
        });
        self
    }
}
