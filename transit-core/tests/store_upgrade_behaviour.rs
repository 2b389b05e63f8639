//! Behavioural tests for schema upgrades and stop refreshes on a file-backed
//! [`SqliteStore`].

use std::{cell::RefCell, collections::BTreeSet};

use camino::Utf8PathBuf;
use geo::Coord;
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use tempfile::TempDir;
use transit_core::{
    CURRENT_SCHEMA_VERSION, FileStoreDriver, MigrationEngine, SchemaVersion, SqliteStore,
    StopRecord, StopStore, StoreDriverFactory, StoreError, TransportMode, shipped_migrations,
};

/// Shared state for store upgrade scenarios.
#[derive(Debug)]
struct StoreWorld {
    temp_dir: TempDir,
    store: RefCell<Option<SqliteStore>>,
    open_error: RefCell<Option<StoreError>>,
}

impl StoreWorld {
    fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("create temp dir"),
            store: RefCell::new(None),
            open_error: RefCell::new(None),
        }
    }

    fn driver(&self) -> FileStoreDriver {
        let path = Utf8PathBuf::from_path_buf(self.temp_dir.path().join("transit.db"))
            .expect("utf-8 temp path");
        FileStoreDriver::new(path)
    }

    fn seed_at(&self, version: u32, sql: &str) {
        let engine = MigrationEngine::new(shipped_migrations()).expect("shipped plan");
        let mut connection = self.driver().open().expect("open database file");
        engine
            .migrate(&mut connection, SchemaVersion::new(version))
            .expect("migrate to seed version");
        connection.execute_batch(sql).expect("seed rows");
    }

    fn with_store<T>(&self, action: impl FnOnce(&SqliteStore) -> T) -> T {
        assert!(
            self.open_error.borrow().is_none(),
            "unexpected open error: {:?}",
            self.open_error.borrow()
        );
        let borrowed = self.store.borrow();
        let store = borrowed.as_ref().expect("store should be open");
        action(store)
    }
}

#[fixture]
fn world() -> StoreWorld {
    StoreWorld::new()
}

fn numbered_stops(range: std::ops::Range<u32>, name: &str) -> Vec<StopRecord> {
    range
        .map(|n| {
            StopRecord::new(
                format!("stop-{n:03}"),
                name,
                Coord {
                    x: 151.0,
                    y: -33.0,
                },
                BTreeSet::from([TransportMode::Bus]),
            )
            .expect("valid stop")
        })
        .collect()
}

// --- Given steps ---

#[given("a store file created at schema version one holding the Central stop")]
fn given_v1_store(world: &StoreWorld) {
    world.seed_at(
        1,
        "INSERT INTO stops (stop_id, name, latitude, longitude)
         VALUES ('s1', 'Central', -33.8832, 151.2070)",
    );
}

#[given("a store file created at schema version five with a legacy dismissed tile list")]
fn given_v5_store(world: &StoreWorld) {
    world.seed_at(
        5,
        "INSERT INTO preferences (key, value) VALUES ('dismissed_tile_ids', 't1,t2, t3')",
    );
}

#[given("a migrated store file holding 100 original stops")]
fn given_migrated_store(world: &StoreWorld) {
    let store = SqliteStore::open(&world.driver()).expect("open store");
    store
        .upsert_stops(&numbered_stops(0..100, "original"))
        .expect("seed stops");
    world.store.replace(Some(store));
}

// --- When steps ---

#[when("I open the store with the shipped migrations")]
fn when_open(world: &StoreWorld) {
    // Release any earlier handle so the reopen exercises the migration path.
    world.store.replace(None);
    match SqliteStore::open(&world.driver()) {
        Ok(store) => {
            world.store.replace(Some(store));
        }
        Err(err) => {
            world.open_error.replace(Some(err));
        }
    }
}

#[when("I ingest 50 renamed stops and 50 new stops")]
fn when_ingest(world: &StoreWorld) {
    let mut incoming = numbered_stops(50..100, "renamed");
    incoming.extend(numbered_stops(100..150, "new"));
    world.with_store(|store| store.upsert_stops(&incoming).expect("ingest stops"));
}

// --- Then steps ---

#[then("the store reports the current schema version")]
fn then_current_version(world: &StoreWorld) {
    let version = world.with_store(|store| store.schema_version().expect("read version"));
    assert_eq!(version, CURRENT_SCHEMA_VERSION);
}

#[then("the Central stop keeps its name")]
fn then_central_kept(world: &StoreWorld) {
    let stop = world.with_store(|store| store.stop_by_id("s1").expect("lookup"));
    let stop = stop.expect("stop survives the upgrade");
    assert_eq!(stop.name, "Central");
    assert!(stop.modes.is_empty(), "pre-mode rows decode with no modes");
}

#[then("the store holds 150 stops")]
fn then_150_stops(world: &StoreWorld) {
    assert_eq!(world.with_store(|store| store.stop_count().expect("count")), 150);
}

#[then("the store holds 100 stops")]
fn then_100_stops(world: &StoreWorld) {
    assert_eq!(world.with_store(|store| store.stop_count().expect("count")), 100);
}

#[then("the overlapping stops carry the new names")]
fn then_renamed(world: &StoreWorld) {
    world.with_store(|store| {
        for id in ["stop-050", "stop-099"] {
            let stop = store.stop_by_id(id).expect("lookup").expect("present");
            assert_eq!(stop.name, "renamed", "stop {id} should be renamed");
        }
        let untouched = store.stop_by_id("stop-049").expect("lookup").expect("present");
        assert_eq!(untouched.name, "original");
    });
}

#[then("the dismissed tiles are stored as a set")]
fn then_dismissed_set(world: &StoreWorld) {
    let members =
        world.with_store(|store| store.preference_set("dismissed_tile_ids").expect("read set"));
    let expected: BTreeSet<String> = ["t1", "t2", "t3"].map(String::from).into();
    assert_eq!(members, expected);
    let legacy = world.with_store(|store| store.preference("dismissed_tile_ids").expect("read"));
    assert_eq!(legacy, None, "legacy joined value is removed");
}

// --- Scenario registrations ---

macro_rules! register_scenario {
    ($fn_name:ident, $title:literal) => {
        #[scenario(path = "tests/features/store_upgrade.feature", name = $title)]
        fn $fn_name(world: StoreWorld) {
            let _ = world;
        }
    };
}

register_scenario!(
    upgrading_v1_keeps_stops,
    "Upgrading a version one store keeps existing stops"
);
register_scenario!(
    refreshing_merges_records,
    "Refreshing stops merges new and updated records"
);
register_scenario!(
    legacy_tiles_become_set,
    "Legacy dismissed tiles become a set"
);
register_scenario!(
    reopening_is_noop,
    "Reopening an upgraded store is a no-op"
);
