//! Refreshing local reference data from the transit authority.
//!
//! Each dataset has its own [`SyncService`]. Services for different datasets
//! share the rate limiter and the store but nothing else, so a slow stops
//! sync never blocks a park-and-ride sync beyond the store's write lock.

mod datasets;
mod policy;
mod service;
mod state;


pub use datasets::{
    ParkRideDataset, ParkRideIngestionManager, StopsBatch, StopsDataset, StopsIngestionManager,
};
pub use policy::{SyncPolicy, SyncUrgency};
pub use service::{
    Dataset, RequestGate, SyncError, SyncOutcome, SyncReport, SyncResources, SyncService,
};
pub use state::{ErrorKind, SyncPhase, SyncState};

/// Preference key holding the last successful sync of `dataset`, in
/// milliseconds since the Unix epoch.
#[must_use]
pub fn last_success_key(dataset: &str) -> String {
    format!("sync.{dataset}.last_success_ms")
}
