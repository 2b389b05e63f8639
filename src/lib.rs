//! Facade crate for the transit reference data cache.
//!
//! This crate re-exports the domain records and store interfaces, and
//! exposes the SQLite store and the sync services behind feature flags.

#![forbid(unsafe_code)]

pub use transit_core::{
    ParkRideFacility, RecordError, RouteRecord, StopRecord, StopStore, StoreError, TransportMode,
    UnknownTransportMode,
};

#[cfg(feature = "store-sqlite")]
pub use transit_core::{
    CURRENT_SCHEMA_VERSION, FileStoreDriver, MemoryStoreDriver, MigrationEngine, MigrationError,
    SchemaVersion, SqliteStore, StoreDriverFactory,
};

#[cfg(feature = "sync")]
pub use transit_data::{
    AcquireResult, AppContext, ContextConfig, ContextError, ErrorKind, FeatureFlags,
    HttpTransitApi, HttpTransitApiConfig, ParkRideIngestionManager, RateLimiter,
    StaticFeatureFlags, StopsIngestionManager, SyncError, SyncOutcome, SyncPolicy, SyncState,
    SyncUrgency, TransitApi, compose,
};
