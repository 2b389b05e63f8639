//! Persistence for transit reference data.
//!
//! [`StopStore`] is the read-side interface handed to trip-planning and map
//! features. The SQLite implementation ([`SqliteStore`]) adds the write path
//! used by ingestion, the preference tables and the schema migrations that
//! evolve the database across upgrades.

use geo::Rect;

use crate::StopRecord;

mod error;

#[cfg(feature = "store-sqlite")]
mod driver;
#[cfg(feature = "store-sqlite")]
mod migration;
#[cfg(feature = "store-sqlite")]
mod preferences;
#[cfg(feature = "store-sqlite")]
mod schema;
#[cfg(feature = "store-sqlite")]
mod sqlite;

pub use error::StoreError;

#[cfg(feature = "store-sqlite")]
pub use driver::{FileStoreDriver, MemoryStoreDriver, StoreDriverFactory};
#[cfg(feature = "store-sqlite")]
pub use migration::{
    Migration, MigrationEngine, MigrationError, MigrationReport, MigrationStep, SchemaVersion,
};
#[cfg(feature = "store-sqlite")]
pub use schema::{CURRENT_SCHEMA_VERSION, LEGACY_SET_DELIMITER, shipped_migrations};
#[cfg(feature = "store-sqlite")]
pub use sqlite::{SqliteStore, StoreTransaction};

/// Read access to persisted stops and preferences.
///
/// Results are owned snapshots consistent with the last committed write;
/// callers never hold references into the store.
///
/// Bounding boxes use WGS84 with `x = longitude` and `y = latitude`.
/// Containment includes boundary points. Regions crossing the antimeridian
/// must be split into two queries.
///
/// # Examples
///
/// ```rust
/// use std::collections::BTreeSet;
/// use geo::{Coord, Intersects, Rect};
/// use transit_core::{StopRecord, StopStore, StoreError};
///
/// struct MemoryStops(Vec<StopRecord>);
///
/// impl StopStore for MemoryStops {
///     fn stops_in_bbox(&self, bbox: &Rect<f64>) -> Result<Vec<StopRecord>, StoreError> {
///         Ok(self.0.iter().filter(|s| bbox.intersects(&s.location)).cloned().collect())
///     }
///
///     fn stop_by_id(&self, stop_id: &str) -> Result<Option<StopRecord>, StoreError> {
///         Ok(self.0.iter().find(|s| s.stop_id == stop_id).cloned())
///     }
///
///     fn preference(&self, _key: &str) -> Result<Option<String>, StoreError> {
///         Ok(None)
///     }
/// }
///
/// let stop = StopRecord::new("1", "Wharf", Coord { x: 0.0, y: 0.0 }, BTreeSet::new())?;
/// let store = MemoryStops(vec![stop.clone()]);
/// let bbox = Rect::new(Coord { x: -1.0, y: -1.0 }, Coord { x: 1.0, y: 1.0 });
/// assert_eq!(store.stops_in_bbox(&bbox)?, vec![stop]);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub trait StopStore {
    /// Return every stop inside `bbox`, sorted by stop id.
    fn stops_in_bbox(&self, bbox: &Rect<f64>) -> Result<Vec<StopRecord>, StoreError>;

    /// Look up one stop by its external identifier.
    fn stop_by_id(&self, stop_id: &str) -> Result<Option<StopRecord>, StoreError>;

    /// Read a preference value.
    fn preference(&self, key: &str) -> Result<Option<String>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::StopStore;
    use crate::{StopRecord, test_support::MemoryStopStore};
    use geo::{Coord, Rect};
    use rstest::rstest;
    use std::collections::BTreeSet;

    fn stop_at(id: &str, location: Coord<f64>) -> StopRecord {
        StopRecord::new(id, "Stop", location, BTreeSet::new()).expect("valid stop")
    }

    fn unit_box() -> Rect<f64> {
        Rect::new(Coord { x: -1.0, y: -1.0 }, Coord { x: 1.0, y: 1.0 })
    }

    #[rstest]
    #[case(Coord { x: -1.0, y: 0.0 })]
    #[case(Coord { x: 1.0, y: 0.0 })]
    #[case(Coord { x: 0.0, y: -1.0 })]
    #[case(Coord { x: 1.0, y: 1.0 })]
    fn includes_stop_on_bbox_boundary(#[case] location: Coord<f64>) {
        let store = MemoryStopStore::with_stops([stop_at("edge", location)]);
        let found = store.stops_in_bbox(&unit_box()).expect("query");
        assert_eq!(found.len(), 1);
    }

    #[rstest]
    #[case(Coord { x: -1.0000001, y: 0.0 })]
    #[case(Coord { x: 0.0, y: 1.0000001 })]
    fn excludes_stop_just_outside_bbox(#[case] location: Coord<f64>) {
        let store = MemoryStopStore::with_stops([stop_at("out", location)]);
        assert!(store.stops_in_bbox(&unit_box()).expect("query").is_empty());
    }

    #[rstest]
    fn memory_store_looks_up_by_id() {
        let stop = stop_at("7", Coord { x: 0.0, y: 0.0 });
        let store = MemoryStopStore::with_stops([stop.clone()]);
        assert_eq!(store.stop_by_id("7").expect("lookup"), Some(stop));
        assert_eq!(store.stop_by_id("8").expect("lookup"), None);
    }

    #[rstest]
    fn preferences_are_read_through_the_trait() {
        let store = MemoryStopStore::default().with_preference("sync.stops.last_success_ms", "42");
        let store: &dyn StopStore = &store;

        assert_eq!(
            store.preference("sync.stops.last_success_ms").expect("read"),
            Some("42".to_owned())
        );
        assert_eq!(store.preference("missing").expect("read"), None);
    }
}
