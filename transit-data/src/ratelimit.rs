//! Fixed-window rate limiting for calls to the transit authority API.
//!
//! The limiter only counts: it never sleeps, never retries and never calls
//! out. Callers decide whether a denial means "fail now" or "wait
//! `retry_after` and try again".

use std::{
    fmt,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use thiserror::Error;
use tokio::time::Instant;

/// Source of monotonic time for the limiter.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current instant.
    fn now(&self) -> Instant;
}

/// [`Clock`] reading Tokio's clock, which honours paused test time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// [`Clock`] that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    /// Create a clock frozen at the current instant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(PoisonError::into_inner);
        *offset = offset.saturating_add(by);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let offset = *self.offset.lock().unwrap_or_else(PoisonError::into_inner);
        self.origin + offset
    }
}

/// Outcome of [`RateLimiter::try_acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireResult {
    /// The request may proceed; it has been counted.
    Allowed,
    /// The window is exhausted. Nothing was counted.
    Denied {
        /// Minimum wait before a retry might succeed. Always positive.
        retry_after: Duration,
    },
}

impl AcquireResult {
    /// Whether the request may proceed.
    #[must_use]
    pub const fn is_allowed(self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Copy of the limiter's current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitWindow {
    /// Start of the current window; `None` before the first request.
    pub window_start: Option<Instant>,
    /// Requests counted in the current window.
    pub request_count: u32,
    /// Requests allowed per window.
    pub limit: u32,
    /// Length of a window.
    pub window_duration: Duration,
}

/// Errors raised when configuring a [`RateLimiter`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RateLimiterError {
    /// A window must admit at least one request.
    #[error("rate limit must allow at least one request per window")]
    ZeroLimit,
    /// A window must have a positive length.
    #[error("rate limit window must be longer than zero")]
    ZeroWindow,
}

#[derive(Debug, Default)]
struct WindowState {
    start: Option<Instant>,
    count: u32,
}

/// Fixed-window request counter shared by every sync service.
///
/// # Examples
///
/// ```
/// use std::{sync::Arc, time::Duration};
/// use transit_data::ratelimit::{AcquireResult, ManualClock, RateLimiter};
///
/// let clock = Arc::new(ManualClock::new());
/// let limiter = RateLimiter::with_clock(2, Duration::from_secs(60), clock.clone())?;
/// assert!(limiter.try_acquire().is_allowed());
/// assert!(limiter.try_acquire().is_allowed());
/// assert!(!limiter.try_acquire().is_allowed());
///
/// clock.advance(Duration::from_secs(60));
/// assert_eq!(limiter.try_acquire(), AcquireResult::Allowed);
/// # Ok::<(), transit_data::ratelimit::RateLimiterError>(())
/// ```
#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    clock: Arc<dyn Clock>,
    state: Mutex<WindowState>,
}

impl RateLimiter {
    /// Create a limiter allowing `limit` requests per `window` on the system
    /// clock.
    pub fn new(limit: u32, window: Duration) -> Result<Self, RateLimiterError> {
        Self::with_clock(limit, window, Arc::new(SystemClock))
    }

    /// Create a limiter reading time from `clock`.
    pub fn with_clock(
        limit: u32,
        window: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, RateLimiterError> {
        if limit == 0 {
            return Err(RateLimiterError::ZeroLimit);
        }
        if window.is_zero() {
            return Err(RateLimiterError::ZeroWindow);
        }
        Ok(Self {
            limit,
            window,
            clock,
            state: Mutex::new(WindowState::default()),
        })
    }

    /// Count one request if the current window has room.
    ///
    /// An elapsed window is reset before deciding, so the first request of a
    /// new window is always allowed.
    pub fn try_acquire(&self) -> AcquireResult {
        self.try_acquire_many(1)
    }

    /// Count `count` requests at once, or none of them.
    ///
    /// A batch larger than the limit is never allowed; its `retry_after` is
    /// the rest of the current window.
    pub fn try_acquire_many(&self, count: u32) -> AcquireResult {
        let now = self.clock.now();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let elapsed = match state.start {
            Some(start) if now.saturating_duration_since(start) < self.window => {
                now.saturating_duration_since(start)
            }
            _ => {
                state.start = Some(now);
                state.count = 0;
                Duration::ZERO
            }
        };

        if count <= self.limit - state.count {
            state.count += count;
            AcquireResult::Allowed
        } else {
            AcquireResult::Denied {
                retry_after: self.window.saturating_sub(elapsed),
            }
        }
    }

    /// Copy of the current window.
    pub fn snapshot(&self) -> RateLimitWindow {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        RateLimitWindow {
            window_start: state.start,
            request_count: state.count,
            limit: self.limit,
            window_duration: self.window,
        }
    }
}
