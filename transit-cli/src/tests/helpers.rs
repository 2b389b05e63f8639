//! Fixtures shared by the CLI unit and behaviour tests.

use std::sync::Arc;

use camino::Utf8PathBuf;
use tempfile::TempDir;
use transit_data::{
    SyncPolicy, SyncUrgency, TransitApi,
    api::{ParkRidePayload, StopsPayload, WireFacility, WireStop, test_support::StubTransitApi},
};

use crate::{
    CliError,
    sync::{ApiBuilder, SyncConfig},
};

/// Hands out a shared stub instead of building an HTTP client.
pub(super) struct StubApiBuilder(pub(super) Arc<StubTransitApi>);

impl ApiBuilder for StubApiBuilder {
    fn build(&self, _config: &SyncConfig) -> Result<Arc<dyn TransitApi>, CliError> {
        Ok(Arc::clone(&self.0) as Arc<dyn TransitApi>)
    }
}

pub(super) struct Workspace {
    _dir: TempDir,
    root: Utf8PathBuf,
}

impl Workspace {
    pub(super) fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 workspace");
        Self { _dir: dir, root }
    }

    pub(super) fn database(&self) -> Utf8PathBuf {
        self.root.join("cache").join("transit.db")
    }
}

pub(super) fn sync_config(database: Utf8PathBuf) -> SyncConfig {
    SyncConfig {
        database,
        api_base_url: "http://transit.invalid".to_owned(),
        api_token: None,
        rate_limit: 30,
        rate_window: std::time::Duration::from_secs(60),
        policy: SyncPolicy::default().with_max_attempts(1),
        urgency: SyncUrgency::Foreground,
        reset_on_migration_failure: false,
        local_caching: true,
        priority_stops: Vec::new(),
        park_ride: false,
    }
}

pub(super) fn stops(ids: &[&str]) -> StopsPayload {
    StopsPayload {
        stops: ids
            .iter()
            .map(|id| WireStop {
                id: Some((*id).to_owned()),
                name: Some(format!("Stop {id}")),
                lat: Some(-37.81),
                lon: Some(144.96),
                modes: vec!["tram".to_owned()],
            })
            .collect(),
    }
}

pub(super) fn facilities(ids: &[&str]) -> ParkRidePayload {
    ParkRidePayload {
        facilities: ids
            .iter()
            .map(|id| WireFacility {
                id: Some((*id).to_owned()),
                name: Some(format!("Car park {id}")),
                lat: Some(-37.82),
                lon: Some(144.95),
                capacity: Some(120),
            })
            .collect(),
    }
}
