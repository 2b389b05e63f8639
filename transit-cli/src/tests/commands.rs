//! Command execution against real store files and a stubbed transit API.

use super::helpers::{StubApiBuilder, Workspace, facilities, stops, sync_config};
use crate::{
    store::{MigrateConfig, StatusConfig, execute_migrate, execute_status},
    sync::{DatasetSummary, SyncRun, execute_sync},
};
use super::*;
use rstest::{fixture, rstest};
use std::sync::Arc;
use transit_core::{CURRENT_SCHEMA_VERSION, FileStoreDriver, StoreDriverFactory};
use transit_data::{
    ContextError, ErrorKind,
    api::test_support::{Endpoint, StubTransitApi},
};

#[fixture]
fn workspace() -> Workspace {
    Workspace::new()
}

#[rstest]
fn sync_writes_stops_and_reports_them(workspace: Workspace) {
    let api = Arc::new(StubTransitApi::new().with_stops(stops(&["a", "b"])));
    let config = sync_config(workspace.database());

    let summary = execute_sync(&config, &StubApiBuilder(api))
        .and_then(SyncRun::into_result)
        .expect("sync succeeds");

    assert!(!summary.store_was_reset);
    assert_eq!(
        summary.datasets,
        [DatasetSummary {
            dataset: "stops",
            status: "synced",
            records_written: Some(2),
            attempts: Some(1),
            reason: None,
            error: None,
        }]
    );
    let status = execute_status(&StatusConfig {
        database: workspace.database(),
    })
    .expect("status succeeds");
    assert_eq!(status.stops, 2);
    assert!(status.last_sync_ms.stops.is_some());
    assert_eq!(status.last_sync_ms.park_ride, None);
}

#[rstest]
fn sync_includes_park_ride_on_request(workspace: Workspace) {
    let api = Arc::new(
        StubTransitApi::new()
            .with_stops(stops(&["a"]))
            .with_park_ride(facilities(&["p1", "p2"])),
    );
    let mut config = sync_config(workspace.database());
    config.park_ride = true;

    let summary = execute_sync(&config, &StubApiBuilder(Arc::clone(&api)))
        .and_then(SyncRun::into_result)
        .expect("sync succeeds");

    let park_ride = summary.datasets.last().expect("park ride summary");
    assert_eq!(park_ride.dataset, "park_ride");
    assert_eq!(park_ride.records_written, Some(2));
    assert_eq!(api.request_count(Endpoint::ParkRide), 1);
}

#[rstest]
fn disabled_caching_without_priority_stops_is_skipped(workspace: Workspace) {
    let api = Arc::new(StubTransitApi::new().with_stops(stops(&["a"])));
    let mut config = sync_config(workspace.database());
    config.local_caching = false;

    let summary = execute_sync(&config, &StubApiBuilder(Arc::clone(&api)))
        .and_then(SyncRun::into_result)
        .expect("sync succeeds");

    let stops_summary = summary.datasets.first().expect("stops summary");
    assert_eq!(stops_summary.status, "skipped");
    assert!(stops_summary.reason.is_some());
    assert_eq!(api.request_count(Endpoint::Stops), 0);
}

#[rstest]
fn failed_stops_sync_still_attempts_park_ride(workspace: Workspace) {
    let api = Arc::new(StubTransitApi::new().with_park_ride(facilities(&["p1"])));
    let mut config = sync_config(workspace.database());
    config.park_ride = true;

    let run = execute_sync(&config, &StubApiBuilder(Arc::clone(&api))).expect("sync runs");

    let statuses: Vec<_> = run
        .summary
        .datasets
        .iter()
        .map(|summary| (summary.dataset, summary.status))
        .collect();
    assert_eq!(statuses, [("stops", "failed"), ("park_ride", "synced")]);
    assert!(run.summary.datasets[0].error.is_some());
    assert_eq!(api.request_count(Endpoint::ParkRide), 1);
    match run.into_result() {
        Err(CliError::Sync { failures }) => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].dataset, "stops");
            assert_eq!(failures[0].source.kind(), ErrorKind::InvalidPayload);
        }
        other => panic!("expected Sync error, found {other:?}"),
    }
}

#[rstest]
fn every_failed_dataset_is_reported(workspace: Workspace) {
    let api = Arc::new(StubTransitApi::new());
    let mut config = sync_config(workspace.database());
    config.park_ride = true;

    let err = execute_sync(&config, &StubApiBuilder(api))
        .and_then(SyncRun::into_result)
        .expect_err("both payloads are empty");

    let CliError::Sync { failures } = &err else {
        panic!("expected Sync error, found {err:?}");
    };
    let datasets: Vec<_> = failures.iter().map(|failure| failure.dataset).collect();
    assert_eq!(datasets, ["stops", "park_ride"]);
    let message = err.to_string();
    assert!(message.contains("stops sync failed"), "{message}");
    assert!(message.contains("park_ride sync failed"), "{message}");
}

#[rstest]
fn sync_rejects_a_rate_limit_below_one_run(workspace: Workspace) {
    let api = Arc::new(StubTransitApi::new().with_stops(stops(&["a"])));
    let mut config = sync_config(workspace.database());
    config.rate_limit = 1;

    let err = execute_sync(&config, &StubApiBuilder(Arc::clone(&api)))
        .expect_err("one request per window cannot fit a stops sync");

    assert!(
        matches!(
            err,
            CliError::Context(ContextError::RateLimitBelowRun { limit: 1, .. })
        ),
        "unexpected error {err:?}"
    );
    assert_eq!(api.request_count(Endpoint::Stops), 0);
}

#[rstest]
fn status_counts_park_ride_facilities(workspace: Workspace) {
    let api = Arc::new(
        StubTransitApi::new()
            .with_stops(stops(&["a"]))
            .with_park_ride(facilities(&["p1", "p2", "p3"])),
    );
    let mut config = sync_config(workspace.database());
    config.park_ride = true;
    execute_sync(&config, &StubApiBuilder(api))
        .and_then(SyncRun::into_result)
        .expect("sync succeeds");

    let status = execute_status(&StatusConfig {
        database: workspace.database(),
    })
    .expect("status succeeds");

    assert_eq!(status.park_ride_facilities, 3);
    assert!(status.last_sync_ms.park_ride.is_some());
}

#[rstest]
fn migrate_creates_a_current_store(workspace: Workspace) {
    let report = execute_migrate(&MigrateConfig {
        database: workspace.database(),
        reset_on_migration_failure: false,
    })
    .expect("migrate succeeds");

    assert_eq!(report.schema_version, CURRENT_SCHEMA_VERSION.get());
    assert!(!report.store_was_reset);
    assert!(workspace.database().is_file());
}

#[rstest]
#[case(false)]
#[case(true)]
fn migrate_handles_incompatible_stores(workspace: Workspace, #[case] reset: bool) {
    let driver = FileStoreDriver::new(workspace.database());
    driver
        .open()
        .expect("open database file")
        .execute_batch("CREATE TABLE stops (stop_id TEXT PRIMARY KEY);")
        .expect("seed incompatible table");

    let result = execute_migrate(&MigrateConfig {
        database: workspace.database(),
        reset_on_migration_failure: reset,
    });

    match (reset, result) {
        (true, Ok(report)) => {
            assert!(report.store_was_reset);
            assert_eq!(report.schema_version, CURRENT_SCHEMA_VERSION.get());
        }
        (false, Err(CliError::Context(err))) => assert!(err.is_migration_failure()),
        (_, other) => panic!("unexpected migrate result {other:?}"),
    }
}

#[rstest]
fn reports_are_pretty_json_lines(workspace: Workspace) {
    let report = execute_migrate(&MigrateConfig {
        database: workspace.database(),
        reset_on_migration_failure: false,
    })
    .expect("migrate succeeds");
    let mut output = Vec::new();

    write_report(&mut output, &report).expect("write report");

    let text = String::from_utf8(output).expect("utf-8 report");
    assert!(text.ends_with('\n'));
    let value: serde_json::Value = serde_json::from_str(&text).expect("valid JSON");
    assert_eq!(value["schema_version"], CURRENT_SCHEMA_VERSION.get());
    assert_eq!(value["store_was_reset"], false);
}
