//! Core domain types and persistence for the transit reference data cache.
//!
//! Records validate on construction so that nothing malformed reaches the
//! store. The [`store`] module defines the read-side [`StopStore`] trait and,
//! behind the `store-sqlite` feature, the schema-versioned SQLite store.

mod mode;
mod records;
pub mod store;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use mode::{TransportMode, UnknownTransportMode, decode_modes, encode_modes};
pub use records::{ParkRideFacility, RecordError, RouteRecord, StopRecord};
pub use store::{StopStore, StoreError};

#[cfg(feature = "store-sqlite")]
pub use store::{
    CURRENT_SCHEMA_VERSION, FileStoreDriver, LEGACY_SET_DELIMITER, MemoryStoreDriver, Migration,
    MigrationEngine, MigrationError, MigrationReport, MigrationStep, SchemaVersion, SqliteStore,
    StoreDriverFactory, StoreTransaction, shipped_migrations,
};
