//! Retry and urgency settings for sync runs.

use std::time::Duration;

/// How a caller wants rate-limit denials handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncUrgency {
    /// A user is waiting; fail fast with `RateLimited`.
    Foreground,
    /// Nobody is waiting; sleep out the denial and retry the request once,
    /// within the attempt budget.
    Background,
}

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Retry budget and backoff curve for transient failures.
///
/// The budget applies to each request of a run on its own. Every attempt
/// counts against `max_attempts`, including one that ended in a rate-limit
/// wait. A request waits out at most one rate-limit denial whatever the
/// budget allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }
}

impl SyncPolicy {
    /// Set the attempt budget. Values below one are raised to one.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Set the first backoff delay and the ceiling it doubles towards.
    #[must_use]
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max.max(initial);
        self
    }

    /// Attempts allowed per run.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay after the failed attempt number `attempt` (1-based).
    #[must_use]
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let doublings = attempt.saturating_sub(1).min(31);
        self.initial_backoff
            .saturating_mul(1_u32 << doublings)
            .min(self.max_backoff)
    }
}
