//! Behavioural coverage for the sync and status commands.

use super::helpers::{StubApiBuilder, Workspace, facilities, stops, sync_config};
use crate::{
    store::{StatusConfig, StatusReport, execute_status},
    sync::{SyncConfig, SyncRun, SyncSummary, execute_sync},
};
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use std::{cell::RefCell, sync::Arc};
use transit_data::api::test_support::StubTransitApi;

struct SyncCommandWorld {
    workspace: Workspace,
    config: RefCell<SyncConfig>,
    api: RefCell<Option<Arc<StubTransitApi>>>,
    summary: RefCell<Option<SyncSummary>>,
}

impl SyncCommandWorld {
    fn new() -> Self {
        let workspace = Workspace::new();
        let config = sync_config(workspace.database());
        Self {
            workspace,
            config: RefCell::new(config),
            api: RefCell::new(None),
            summary: RefCell::new(None),
        }
    }

    fn run_sync(&self) {
        let api = self.api.borrow().clone().expect("API should be configured");
        let summary = execute_sync(&self.config.borrow(), &StubApiBuilder(api))
            .and_then(SyncRun::into_result)
            .expect("sync succeeds");
        self.summary.replace(Some(summary));
    }

    fn status(&self) -> StatusReport {
        execute_status(&StatusConfig {
            database: self.workspace.database(),
        })
        .expect("status succeeds")
    }
}

#[fixture]
fn sync_command_world() -> SyncCommandWorld {
    SyncCommandWorld::new()
}

#[given("a transit API serving 2 stops and 1 park and ride facility")]
fn api_with_data(#[from(sync_command_world)] world: &SyncCommandWorld) {
    let api = StubTransitApi::new()
        .with_stops(stops(&["s1", "s2"]))
        .with_park_ride(facilities(&["p1"]));
    world.api.replace(Some(Arc::new(api)));
}

#[given("local caching is disabled with priority stop s2")]
fn caching_disabled(#[from(sync_command_world)] world: &SyncCommandWorld) {
    let mut config = world.config.borrow_mut();
    config.local_caching = false;
    config.priority_stops = vec!["s2".to_owned()];
}

#[when("I run the sync command including park and ride")]
fn run_sync_with_park_ride(#[from(sync_command_world)] world: &SyncCommandWorld) {
    world.config.borrow_mut().park_ride = true;
    world.run_sync();
}

#[when("I run the sync command")]
fn run_sync(#[from(sync_command_world)] world: &SyncCommandWorld) {
    world.run_sync();
}

#[then("the sync report lists 2 stop records written")]
fn report_lists_stops(#[from(sync_command_world)] world: &SyncCommandWorld) {
    let summary = world.summary.borrow();
    let stops_summary = summary
        .as_ref()
        .expect("sync should have run")
        .datasets
        .iter()
        .find(|dataset| dataset.dataset == "stops")
        .expect("stops summary present");
    assert_eq!(stops_summary.status, "synced");
    assert_eq!(stops_summary.records_written, Some(2));
}

#[then("the status command reports 2 stops and 1 facility")]
fn status_reports_everything(#[from(sync_command_world)] world: &SyncCommandWorld) {
    let status = world.status();
    assert_eq!(status.stops, 2);
    assert_eq!(status.park_ride_facilities, 1);
    assert!(status.last_sync_ms.park_ride.is_some());
}

#[then("the status command reports 1 stop")]
fn status_reports_priority_stop(#[from(sync_command_world)] world: &SyncCommandWorld) {
    assert_eq!(world.status().stops, 1);
}

#[scenario(
    path = "tests/features/sync_command.feature",
    name = "Syncing a fresh store and reporting its status"
)]
fn syncing_fresh_store(#[from(sync_command_world)] world: SyncCommandWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/sync_command.feature",
    name = "Priority stops are cached when local caching is disabled"
)]
fn priority_stops_are_cached(#[from(sync_command_world)] world: SyncCommandWorld) {
    let _ = world;
}
