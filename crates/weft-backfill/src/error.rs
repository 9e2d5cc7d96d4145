//! Error types for the backfill domain.

use weft_core::id::Did;

use crate::job::JobState;

/// The result type used throughout weft-backfill.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in backfill operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No job exists for the repo.
    ///
    /// Expected during the first live event for a repo; the event handler
    /// recovers by enqueueing a job and retrying.
    #[error("job not found: {repo}")]
    JobNotFound {
        /// The repo that has no job.
        repo: Did,
    },

    /// The job is complete, so ops can no longer be buffered.
    ///
    /// A signal, not a failure: the caller applies the ops directly and
    /// advances the revision cursor.
    #[error("job is complete")]
    JobComplete,

    /// The event has already been accounted for (rev older than current).
    #[error("event already accounted for")]
    AlreadyProcessed,

    /// An event's `since` does not line up with the revision chain.
    #[error("buffered event revs did not line up")]
    EventGap,

    /// An op carried an action the protocol does not define.
    #[error("invalid op action: {action:?}")]
    InvalidOpAction {
        /// The unrecognized action string.
        action: String,
    },

    /// An HTTP request could not be created or sent.
    #[error("transport error: {message}")]
    Transport {
        /// Description of the transport failure.
        message: String,
    },

    /// The upstream answered with a non-200 status.
    #[error("upstream returned {status_line}")]
    UpstreamStatus {
        /// The numeric status code.
        status: u16,
        /// The full status line (e.g. `502 Bad Gateway`).
        status_line: String,
    },

    /// The snapshot or event block stream could not be decoded.
    #[error("decode error: {message}")]
    Decode {
        /// Description of the decode failure.
        message: String,
    },

    /// A storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// An invalid configuration value was provided.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },

    /// A persisted job state string could not be parsed.
    #[error("invalid job state: {value:?}")]
    InvalidJobState {
        /// The unrecognized state string.
        value: String,
    },

    /// The operation was cancelled by a shutdown signal.
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// Creates a new transport error.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates a new decode error.
    #[must_use]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Creates a new storage error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source cause.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// The `Failed(..)` job state a snapshot import error maps to.
    ///
    /// The reason tags mirror what operators see when listing jobs:
    /// `failed (repo not found)`, `failed (do request: ...)`, and so on.
    #[must_use]
    pub fn failed_state(&self) -> JobState {
        match self {
            Self::Transport { message } => JobState::failed(format!("do request: {message}")),
            Self::UpstreamStatus {
                status,
                status_line,
            } => {
                if *status == 400 {
                    JobState::failed("repo not found")
                } else {
                    JobState::failed(status_line.clone())
                }
            }
            Self::Decode { .. } => {
                JobState::failed("couldn't read repo CAR from response body")
            }
            Self::Cancelled => JobState::failed("cancelled"),
            other => JobState::failed(other.to_string()),
        }
    }
}
