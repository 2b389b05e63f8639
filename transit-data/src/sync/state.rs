//! Observable state of one dataset's sync service.

use std::{fmt, time::SystemTime};

/// Step a sync run is currently executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPhase {
    /// No run in progress.
    #[default]
    Idle,
    /// Waiting on the transit API.
    Fetching,
    /// Checking the downloaded payload.
    Validating,
    /// Writing validated records to the store.
    Writing,
}

/// Coarse classification of sync failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The network request failed; retryable.
    Network,
    /// The local rate limiter refused the request; retryable after a delay.
    RateLimited,
    /// The payload failed validation; not retried.
    InvalidPayload,
    /// The store rejected the write; previous data is retained.
    StorageFailure,
    /// The store schema could not be brought up to date.
    MigrationFailed,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Network => "network",
            Self::RateLimited => "rate limited",
            Self::InvalidPayload => "invalid payload",
            Self::StorageFailure => "storage failure",
            Self::MigrationFailed => "migration failed",
        })
    }
}

/// Snapshot of a dataset's sync progress.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SyncState {
    /// Whether a run is executing.
    pub in_progress: bool,
    /// Step of the current run, or [`SyncPhase::Idle`].
    pub phase: SyncPhase,
    /// Completion time of the last successful run in this process.
    pub last_success: Option<SystemTime>,
    /// Failure of the most recent run, cleared by the next success.
    pub last_error: Option<ErrorKind>,
}
