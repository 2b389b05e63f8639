//! SQLite-backed store for stops, routes, park-and-ride facilities and
//! preferences.
//!
//! A single connection sits behind a mutex: every write runs inside one
//! `IMMEDIATE` transaction and readers never observe uncommitted rows.

use std::{
    fmt,
    sync::{Mutex, MutexGuard, PoisonError},
};

use geo::{Coord, Rect};
use log::debug;
use rusqlite::{Connection, OptionalExtension, Row, Transaction, TransactionBehavior};

use crate::{
    ParkRideFacility, RouteRecord, StopRecord, TransportMode, decode_modes, encode_modes,
};

use super::{
    CURRENT_SCHEMA_VERSION, MigrationEngine, SchemaVersion, StopStore, StoreDriverFactory,
    StoreError, shipped_migrations,
};

const STOP_COLUMNS: &str = "stop_id, name, latitude, longitude, transport_modes";

/// Attach an operation name to `rusqlite` failures.
pub(super) trait SqliteContext<T> {
    fn during(self, operation: &'static str) -> Result<T, StoreError>;
}

impl<T> SqliteContext<T> for Result<T, rusqlite::Error> {
    fn during(self, operation: &'static str) -> Result<T, StoreError> {
        self.map_err(|source| StoreError::Sqlite { operation, source })
    }
}

/// Transactional store over the versioned SQLite schema.
///
/// # Examples
/// ```
/// use std::collections::BTreeSet;
/// use geo::{Coord, Rect};
/// use transit_core::{MemoryStoreDriver, SqliteStore, StopRecord, StopStore, TransportMode};
///
/// let store = SqliteStore::open(&MemoryStoreDriver)?;
/// let stop = StopRecord::new(
///     "s1",
///     "Circular Quay",
///     Coord { x: 151.2108, y: -33.8615 },
///     BTreeSet::from([TransportMode::Ferry]),
/// )?;
/// store.upsert_stops(&[stop.clone()])?;
///
/// let bbox = Rect::new(Coord { x: 151.0, y: -34.0 }, Coord { x: 152.0, y: -33.0 });
/// assert_eq!(store.stops_in_bbox(&bbox)?, vec![stop]);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct SqliteStore {
    connection: Mutex<Connection>,
    location: String,
}

impl fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteStore")
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

/// Write access scoped to one store transaction.
///
/// Obtained from [`SqliteStore::write`]; everything done through it commits
/// together or not at all.
pub struct StoreTransaction<'conn> {
    inner: Transaction<'conn>,
}

impl fmt::Debug for StoreTransaction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreTransaction").finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open the store and apply every shipped migration.
    pub fn open(driver: &dyn StoreDriverFactory) -> Result<Self, StoreError> {
        let engine = MigrationEngine::new(shipped_migrations())?;
        Self::open_with(driver, &engine, CURRENT_SCHEMA_VERSION)
    }

    /// Open the store and migrate it to `target` using `engine`.
    pub fn open_with(
        driver: &dyn StoreDriverFactory,
        engine: &MigrationEngine,
        target: SchemaVersion,
    ) -> Result<Self, StoreError> {
        let mut connection = driver.open()?;
        let report = engine.migrate(&mut connection, target)?;
        debug!(
            "opened store at {} (schema {} -> {})",
            driver.describe(),
            report.from,
            report.to
        );
        Ok(Self {
            connection: Mutex::new(connection),
            location: driver.describe(),
        })
    }

    /// Location reported by the driver that opened this store.
    #[must_use]
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Schema version recorded in the database.
    pub fn schema_version(&self) -> Result<SchemaVersion, StoreError> {
        let connection = self.lock();
        Ok(MigrationEngine::current_version(&connection)?)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A writer that unwinds drops its transaction, which rolls back, so
        // the connection behind a poisoned lock is still consistent.
        self.connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `work` inside one exclusive write transaction.
    ///
    /// The transaction commits only when `work` returns `Ok`; errors, panics
    /// and cancellation leave the previously committed data untouched.
    pub fn write<T, F>(&self, operation: &'static str, work: F) -> Result<T, StoreError>
    where
        F: FnOnce(&StoreTransaction<'_>) -> Result<T, StoreError>,
    {
        let mut connection = self.lock();
        let transaction = StoreTransaction {
            inner: connection
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .during("begin write transaction")?,
        };
        let value = work(&transaction)?;
        transaction.inner.commit().during("commit write transaction")?;
        debug!("committed {operation}");
        Ok(value)
    }

    /// Run `query` against the last committed state.
    pub(super) fn read<T, F>(&self, query: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        let connection = self.lock();
        query(&connection)
    }

    /// Upsert a batch of stops in a single transaction. Later entries win
    /// when the batch repeats a stop id.
    pub fn upsert_stops(&self, stops: &[StopRecord]) -> Result<usize, StoreError> {
        self.write("upsert stops", |transaction| transaction.upsert_stops(stops))
    }

    /// Upsert a batch of routes in a single transaction.
    pub fn upsert_routes(&self, routes: &[RouteRecord]) -> Result<usize, StoreError> {
        self.write("upsert routes", |transaction| {
            transaction.upsert_routes(routes)
        })
    }

    /// Upsert stops and the routes serving them in one transaction.
    pub fn upsert_stops_and_routes(
        &self,
        stops: &[StopRecord],
        routes: &[RouteRecord],
    ) -> Result<(usize, usize), StoreError> {
        self.write("upsert stops and routes", |transaction| {
            transaction.upsert_stops_and_routes(stops, routes)
        })
    }

    /// Upsert a batch of park-and-ride facilities in a single transaction.
    pub fn upsert_park_ride(&self, facilities: &[ParkRideFacility]) -> Result<usize, StoreError> {
        self.write("upsert park and ride facilities", |transaction| {
            transaction.upsert_park_ride(facilities)
        })
    }

    /// Number of stops held by the store.
    pub fn stop_count(&self) -> Result<usize, StoreError> {
        self.read(|connection| count_rows(connection, "SELECT COUNT(*) FROM stops"))
    }

    /// Number of park-and-ride facilities held by the store.
    pub fn park_ride_count(&self) -> Result<usize, StoreError> {
        self.read(|connection| {
            count_rows(connection, "SELECT COUNT(*) FROM park_ride_facilities")
        })
    }

    /// Number of routes held by the store.
    pub fn route_count(&self) -> Result<usize, StoreError> {
        self.read(|connection| count_rows(connection, "SELECT COUNT(*) FROM routes"))
    }

    /// Look up one route.
    pub fn route_by_id(&self, route_id: &str) -> Result<Option<RouteRecord>, StoreError> {
        self.read(|connection| {
            connection
                .query_row(
                    "SELECT route_id, short_name, long_name, mode FROM routes WHERE route_id = ?1",
                    [route_id],
                    RouteRow::from_row,
                )
                .optional()
                .during("read route")?
                .map(RouteRow::into_record)
                .transpose()
        })
    }

    /// Every park-and-ride facility, sorted by id.
    pub fn park_ride_facilities(&self) -> Result<Vec<ParkRideFacility>, StoreError> {
        self.read(|connection| {
            let mut statement = connection
                .prepare_cached(
                    "SELECT facility_id, name, latitude, longitude, capacity
                     FROM park_ride_facilities ORDER BY facility_id",
                )
                .during("prepare facility query")?;
            let rows = statement
                .query_map([], FacilityRow::from_row)
                .during("query facilities")?
                .collect::<Result<Vec<_>, _>>()
                .during("read facilities")?;
            rows.into_iter().map(FacilityRow::into_record).collect()
        })
    }

    /// Execute raw SQL outside any store invariants. Test harnesses use this
    /// to inject faults.
    #[cfg(any(test, feature = "test-support"))]
    pub fn execute_raw(&self, sql: &str) -> Result<(), StoreError> {
        self.lock().execute_batch(sql).during("execute raw SQL")
    }
}

impl StoreTransaction<'_> {
    /// Upsert stops keyed on `stop_id`.
    pub fn upsert_stops(&self, stops: &[StopRecord]) -> Result<usize, StoreError> {
        let mut statement = self
            .inner
            .prepare_cached(
                "INSERT INTO stops (stop_id, name, latitude, longitude, transport_modes)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(stop_id) DO UPDATE SET
                    name = excluded.name,
                    latitude = excluded.latitude,
                    longitude = excluded.longitude,
                    transport_modes = excluded.transport_modes",
            )
            .during("prepare stop upsert")?;
        for stop in stops {
            statement
                .execute((
                    stop.stop_id.as_str(),
                    stop.name.as_str(),
                    stop.location.y,
                    stop.location.x,
                    encode_modes(&stop.modes),
                ))
                .during("upsert stop")?;
        }
        Ok(stops.len())
    }

    /// Upsert routes keyed on `route_id`.
    pub fn upsert_routes(&self, routes: &[RouteRecord]) -> Result<usize, StoreError> {
        let mut statement = self
            .inner
            .prepare_cached(
                "INSERT INTO routes (route_id, short_name, long_name, mode)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(route_id) DO UPDATE SET
                    short_name = excluded.short_name,
                    long_name = excluded.long_name,
                    mode = excluded.mode",
            )
            .during("prepare route upsert")?;
        for route in routes {
            statement
                .execute((
                    route.route_id.as_str(),
                    route.short_name.as_str(),
                    route.long_name.as_deref(),
                    route.mode.code(),
                ))
                .during("upsert route")?;
        }
        Ok(routes.len())
    }

    /// Upsert stops and then routes. Returns the number of each written.
    pub fn upsert_stops_and_routes(
        &self,
        stops: &[StopRecord],
        routes: &[RouteRecord],
    ) -> Result<(usize, usize), StoreError> {
        Ok((self.upsert_stops(stops)?, self.upsert_routes(routes)?))
    }

    /// Upsert park-and-ride facilities keyed on `facility_id`.
    pub fn upsert_park_ride(&self, facilities: &[ParkRideFacility]) -> Result<usize, StoreError> {
        let mut statement = self
            .inner
            .prepare_cached(
                "INSERT INTO park_ride_facilities (facility_id, name, latitude, longitude, capacity)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(facility_id) DO UPDATE SET
                    name = excluded.name,
                    latitude = excluded.latitude,
                    longitude = excluded.longitude,
                    capacity = excluded.capacity",
            )
            .during("prepare facility upsert")?;
        for facility in facilities {
            statement
                .execute((
                    facility.facility_id.as_str(),
                    facility.name.as_str(),
                    facility.location.y,
                    facility.location.x,
                    facility.capacity,
                ))
                .during("upsert facility")?;
        }
        Ok(facilities.len())
    }

    pub(super) fn connection(&self) -> &Connection {
        &self.inner
    }
}

impl StopStore for SqliteStore {
    fn stops_in_bbox(&self, bbox: &Rect<f64>) -> Result<Vec<StopRecord>, StoreError> {
        let (min, max) = (bbox.min(), bbox.max());
        self.read(|connection| {
            let mut statement = connection
                .prepare_cached(&format!(
                    "SELECT {STOP_COLUMNS} FROM stops
                     WHERE longitude BETWEEN ?1 AND ?2 AND latitude BETWEEN ?3 AND ?4
                     ORDER BY stop_id"
                ))
                .during("prepare bounding box query")?;
            let rows = statement
                .query_map((min.x, max.x, min.y, max.y), StopRow::from_row)
                .during("query stops in bounding box")?
                .collect::<Result<Vec<_>, _>>()
                .during("read stops in bounding box")?;
            rows.into_iter().map(StopRow::into_record).collect()
        })
    }

    fn stop_by_id(&self, stop_id: &str) -> Result<Option<StopRecord>, StoreError> {
        self.read(|connection| {
            connection
                .query_row(
                    &format!("SELECT {STOP_COLUMNS} FROM stops WHERE stop_id = ?1"),
                    [stop_id],
                    StopRow::from_row,
                )
                .optional()
                .during("read stop")?
                .map(StopRow::into_record)
                .transpose()
        })
    }

    fn preference(&self, key: &str) -> Result<Option<String>, StoreError> {
        Self::preference(self, key)
    }
}

fn count_rows(connection: &Connection, sql: &str) -> Result<usize, StoreError> {
    let count: i64 = connection
        .query_row(sql, [], |row| row.get(0))
        .during("count rows")?;
    usize::try_from(count).map_err(|_| StoreError::OutOfRange {
        field: "row count",
        value: count,
    })
}

struct StopRow {
    stop_id: String,
    name: String,
    latitude: f64,
    longitude: f64,
    modes: i64,
}

impl StopRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            stop_id: row.get(0)?,
            name: row.get(1)?,
            latitude: row.get(2)?,
            longitude: row.get(3)?,
            modes: row.get(4)?,
        })
    }

    fn into_record(self) -> Result<StopRecord, StoreError> {
        StopRecord::new(
            self.stop_id,
            self.name,
            Coord {
                x: self.longitude,
                y: self.latitude,
            },
            decode_modes(self.modes),
        )
        .map_err(|source| StoreError::CorruptRow {
            table: "stops",
            source,
        })
    }
}

struct RouteRow {
    route_id: String,
    short_name: String,
    long_name: Option<String>,
    mode: String,
}

impl RouteRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            route_id: row.get(0)?,
            short_name: row.get(1)?,
            long_name: row.get(2)?,
            mode: row.get(3)?,
        })
    }

    fn into_record(self) -> Result<RouteRecord, StoreError> {
        let mode = self
            .mode
            .parse::<TransportMode>()
            .map_err(|source| StoreError::UnknownMode {
                route_id: self.route_id.clone(),
                source,
            })?;
        RouteRecord::new(self.route_id, self.short_name, self.long_name, mode).map_err(|source| {
            StoreError::CorruptRow {
                table: "routes",
                source,
            }
        })
    }
}

struct FacilityRow {
    facility_id: String,
    name: String,
    latitude: f64,
    longitude: f64,
    capacity: Option<i64>,
}

impl FacilityRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            facility_id: row.get(0)?,
            name: row.get(1)?,
            latitude: row.get(2)?,
            longitude: row.get(3)?,
            capacity: row.get(4)?,
        })
    }

    fn into_record(self) -> Result<ParkRideFacility, StoreError> {
        let capacity = self
            .capacity
            .map(|value| {
                u32::try_from(value).map_err(|_| StoreError::OutOfRange {
                    field: "capacity",
                    value,
                })
            })
            .transpose()?;
        ParkRideFacility::new(
            self.facility_id,
            self.name,
            Coord {
                x: self.longitude,
                y: self.latitude,
            },
            capacity,
        )
        .map_err(|source| StoreError::CorruptRow {
            table: "park_ride_facilities",
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Migration, MemoryStoreDriver, MigrationError};
    use rstest::{fixture, rstest};
    use std::collections::BTreeSet;
    use std::panic::{AssertUnwindSafe, catch_unwind};

    fn stop(id: &str, name: &str, x: f64, y: f64) -> StopRecord {
        StopRecord::new(id, name, Coord { x, y }, BTreeSet::from([TransportMode::Bus]))
            .expect("valid stop")
    }

    fn numbered_stops(range: std::ops::Range<u32>, name: &str) -> Vec<StopRecord> {
        range
            .map(|n| stop(&format!("stop-{n:03}"), name, f64::from(n) * 0.001, 0.0))
            .collect()
    }

    fn everything() -> Rect<f64> {
        Rect::new(Coord { x: -180.0, y: -90.0 }, Coord { x: 180.0, y: 90.0 })
    }

    #[fixture]
    fn store() -> SqliteStore {
        SqliteStore::open(&MemoryStoreDriver).expect("open in-memory store")
    }

    #[rstest]
    fn fresh_store_is_at_current_version_with_no_stops(store: SqliteStore) {
        assert_eq!(
            store.schema_version().expect("read version"),
            CURRENT_SCHEMA_VERSION
        );
        assert_eq!(store.stop_count().expect("count"), 0);
    }

    #[rstest]
    fn upsert_merges_updates_and_new_ids(store: SqliteStore) {
        store
            .upsert_stops(&numbered_stops(0..100, "original"))
            .expect("seed stops");

        let mut incoming = numbered_stops(50..100, "renamed");
        incoming.extend(numbered_stops(100..150, "new"));
        store.upsert_stops(&incoming).expect("ingest update");

        assert_eq!(store.stop_count().expect("count"), 150);
        let updated = store.stop_by_id("stop-075").expect("lookup").expect("present");
        assert_eq!(updated.name, "renamed");
        let untouched = store.stop_by_id("stop-010").expect("lookup").expect("present");
        assert_eq!(untouched.name, "original");
    }

    #[rstest]
    fn duplicate_ids_in_one_batch_keep_the_last(store: SqliteStore) {
        let batch = vec![
            stop("dup", "first", 1.0, 1.0),
            stop("other", "other", 2.0, 2.0),
            stop("dup", "last", 3.0, 3.0),
        ];
        store.upsert_stops(&batch).expect("upsert batch");

        assert_eq!(store.stop_count().expect("count"), 2);
        let kept = store.stop_by_id("dup").expect("lookup").expect("present");
        assert_eq!(kept.name, "last");
        assert_eq!(kept.location, Coord { x: 3.0, y: 3.0 });
    }

    #[rstest]
    fn failed_batch_leaves_previous_rows_untouched(store: SqliteStore) {
        let before = numbered_stops(0..3, "before");
        store.upsert_stops(&before).expect("seed stops");

        let err = store
            .write("interrupted batch", |transaction| {
                transaction.upsert_stops(&numbered_stops(0..10, "after"))?;
                Err::<(), _>(StoreError::OutOfRange {
                    field: "simulated fault",
                    value: 0,
                })
            })
            .expect_err("batch aborted");

        assert!(matches!(err, StoreError::OutOfRange { .. }));
        assert_eq!(store.stops_in_bbox(&everything()).expect("query"), before);
    }

    #[rstest]
    fn panicking_writer_rolls_back_and_store_stays_usable(store: SqliteStore) {
        let before = numbered_stops(0..2, "before");
        store.upsert_stops(&before).expect("seed stops");

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            store.write("cancelled batch", |transaction| -> Result<(), StoreError> {
                transaction.upsert_stops(&numbered_stops(0..5, "after"))?;
                panic!("simulated cancellation")
            })
        }));

        assert!(outcome.is_err());
        assert_eq!(store.stops_in_bbox(&everything()).expect("query"), before);
        store
            .upsert_stops(&numbered_stops(5..6, "later"))
            .expect("store accepts writes after the panic");
    }

    #[rstest]
    fn bbox_query_filters_and_sorts(store: SqliteStore) {
        store
            .upsert_stops(&[
                stop("c", "C", 0.5, 0.5),
                stop("a", "A", -0.5, 0.0),
                stop("far", "Far", 10.0, 10.0),
                stop("b", "B", 1.0, 1.0),
            ])
            .expect("seed stops");

        let bbox = Rect::new(Coord { x: -1.0, y: -1.0 }, Coord { x: 1.0, y: 1.0 });
        let ids: Vec<String> = store
            .stops_in_bbox(&bbox)
            .expect("query")
            .into_iter()
            .map(|stop| stop.stop_id)
            .collect();

        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[rstest]
    fn stop_modes_round_trip_through_the_bitmask(store: SqliteStore) {
        let modes = BTreeSet::from([TransportMode::Train, TransportMode::LightRail]);
        let interchange =
            StopRecord::new("hub", "Hub", Coord { x: 0.0, y: 0.0 }, modes.clone()).expect("stop");
        store.upsert_stops(&[interchange]).expect("upsert");

        let stored = store.stop_by_id("hub").expect("lookup").expect("present");
        assert_eq!(stored.modes, modes);
    }

    #[rstest]
    fn routes_and_facilities_upsert_by_id(store: SqliteStore) {
        let route = RouteRecord::new("T1", "T1", Some("North Shore".into()), TransportMode::Train)
            .expect("route");
        store.upsert_routes(&[route]).expect("upsert route");
        let renamed =
            RouteRecord::new("T1", "T1", Some("North Shore Line".into()), TransportMode::Train)
                .expect("route");
        store.upsert_routes(&[renamed.clone()]).expect("update route");

        let facility =
            ParkRideFacility::new("P1", "Kellyville", Coord { x: 150.9, y: -33.7 }, Some(1_000))
                .expect("facility");
        store
            .upsert_park_ride(&[facility.clone()])
            .expect("upsert facility");

        assert_eq!(store.route_count().expect("count"), 1);
        assert_eq!(store.route_by_id("T1").expect("lookup"), Some(renamed));
        assert_eq!(store.park_ride_count().expect("count"), 1);
        assert_eq!(store.park_ride_facilities().expect("list"), vec![facility]);
    }

    #[rstest]
    fn stops_and_routes_commit_together(store: SqliteStore) {
        let route = RouteRecord::new("L1", "L1", None, TransportMode::LightRail).expect("route");

        let written = store
            .upsert_stops_and_routes(&numbered_stops(0..3, "stop"), &[route.clone()])
            .expect("upsert pair");

        assert_eq!(written, (3, 1));
        assert_eq!(store.stop_count().expect("count"), 3);
        assert_eq!(store.route_by_id("L1").expect("lookup"), Some(route));
    }

    #[rstest]
    fn rejected_route_rolls_back_the_stops(store: SqliteStore) {
        store
            .execute_raw(
                "CREATE TRIGGER reject_routes BEFORE INSERT ON routes
                 BEGIN SELECT RAISE(ABORT, 'route rejected'); END;",
            )
            .expect("install fault");
        let route = RouteRecord::new("B1", "B1", None, TransportMode::Bus).expect("route");

        let err = store
            .upsert_stops_and_routes(&numbered_stops(0..3, "stop"), &[route])
            .expect_err("route insert aborts");

        assert!(matches!(err, StoreError::Sqlite { .. }), "unexpected error: {err:?}");
        assert_eq!(store.stop_count().expect("count"), 0);
    }

    #[rstest]
    fn corrupt_route_mode_is_reported(store: SqliteStore) {
        store
            .execute_raw(
                "INSERT INTO routes (route_id, short_name, long_name, mode)
                 VALUES ('X', 'X', NULL, 'zeppelin')",
            )
            .expect("insert corrupt row");

        let err = store.route_by_id("X").expect_err("unknown mode");
        assert!(matches!(err, StoreError::UnknownMode { route_id, .. } if route_id == "X"));
    }

    #[rstest]
    fn open_reports_failed_migration() {
        fn broken(_: &rusqlite::Transaction<'_>) -> Result<(), rusqlite::Error> {
            Err(rusqlite::Error::InvalidQuery)
        }
        let engine = MigrationEngine::new(vec![
            Migration::sql(1, "one", "CREATE TABLE t1 (id INTEGER)"),
            Migration::transform(2, "broken", broken),
        ])
        .expect("contiguous plan");

        let err = SqliteStore::open_with(&MemoryStoreDriver, &engine, SchemaVersion::new(2))
            .expect_err("migration fails");

        assert!(err.is_migration_failure());
        assert!(matches!(
            err,
            StoreError::Migration(MigrationError::Failed { name: "broken", .. })
        ));
    }
}
