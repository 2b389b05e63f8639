//! Network access and synchronisation for the transit reference data cache.
//!
//! Responsibilities:
//! - Decode and validate transit authority payloads.
//! - Guard every API request with the shared rate limiter.
//! - Run single-flight sync services that write each batch atomically.
//! - Compose the process context from its collaborators.
//!
//! Boundaries:
//! - Domain records and persistence live in `transit-core`.
//! - Keep blocking I/O off async executors; store work runs on
//!   `spawn_blocking`.
//!
//! Invariants:
//! - No global mutable state.
//! - A failed sync never removes previously committed data.

pub mod api;
pub mod context;
pub mod flags;
pub mod ratelimit;
pub mod sync;

pub use api::{ApiError, HttpTransitApi, HttpTransitApiConfig, TransitApi};
pub use context::{AppContext, ContextConfig, ContextError, compose, open_store};
pub use flags::{FeatureFlags, StaticFeatureFlags};
pub use ratelimit::{AcquireResult, RateLimitWindow, RateLimiter};
pub use sync::{
    ErrorKind, ParkRideIngestionManager, StopsIngestionManager, SyncError, SyncOutcome,
    SyncPolicy, SyncState, SyncUrgency,
};
