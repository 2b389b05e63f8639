//! Process-wide wiring of store, API client, limiter and sync services.
//!
//! [`compose`] is the only place these collaborators are constructed.
//! Everything else receives them through [`AppContext`].

use std::{fmt, sync::Arc, time::Duration};

use log::{error, info, warn};
use thiserror::Error;
use tokio::sync::OnceCell;
use transit_core::{SqliteStore, StoreDriverFactory, StoreError};

use crate::{
    api::TransitApi,
    flags::{FeatureFlags, StaticFeatureFlags},
    ratelimit::{Clock, RateLimiter, RateLimiterError, SystemClock},
    sync::{
        Dataset, ParkRideDataset, ParkRideIngestionManager, StopsDataset, StopsIngestionManager,
        SyncError, SyncOutcome, SyncPolicy, SyncResources, SyncService, SyncUrgency,
    },
};

/// Default number of API requests allowed per window.
pub const DEFAULT_RATE_LIMIT: u32 = 30;

/// Default rate-limit window.
pub const DEFAULT_RATE_WINDOW: Duration = Duration::from_secs(60);

/// Errors raised while composing the process context.
#[derive(Debug, Error)]
pub enum ContextError {
    /// The store could not be opened or migrated.
    #[error("failed to open store at {location}")]
    OpenStore {
        /// Driver location.
        location: String,
        /// Underlying store error.
        #[source]
        source: StoreError,
    },
    /// Discarding a store after a failed migration failed.
    #[error("failed to discard store at {location} after a failed migration")]
    DiscardStore {
        /// Driver location.
        location: String,
        /// Underlying store error.
        #[source]
        source: StoreError,
    },
    /// The rate limiter configuration was rejected.
    #[error(transparent)]
    RateLimiter(#[from] RateLimiterError),
    /// One window cannot fit the requests of a single sync run.
    #[error("rate limit of {limit} requests per window is below the {required} one sync needs")]
    RateLimitBelowRun {
        /// Configured requests per window.
        limit: u32,
        /// Requests sent by the largest sync run.
        required: u32,
    },
}

impl ContextError {
    /// Whether composition failed because a schema migration failed.
    #[must_use]
    pub fn is_migration_failure(&self) -> bool {
        matches!(self, Self::OpenStore { source, .. } if source.is_migration_failure())
    }
}

/// Inputs to [`compose`].
#[derive(Clone)]
pub struct ContextConfig {
    driver: Arc<dyn StoreDriverFactory>,
    api: Arc<dyn TransitApi>,
    flags: Arc<dyn FeatureFlags>,
    clock: Arc<dyn Clock>,
    rate_limit: u32,
    rate_window: Duration,
    policy: SyncPolicy,
    reset_on_migration_failure: bool,
}

impl fmt::Debug for ContextConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextConfig")
            .field("store", &self.driver.describe())
            .field("rate_limit", &self.rate_limit)
            .field("rate_window", &self.rate_window)
            .field("policy", &self.policy)
            .field(
                "reset_on_migration_failure",
                &self.reset_on_migration_failure,
            )
            .finish_non_exhaustive()
    }
}

impl ContextConfig {
    /// Start from a store driver and an API client; everything else takes
    /// its default.
    pub fn new(driver: Arc<dyn StoreDriverFactory>, api: Arc<dyn TransitApi>) -> Self {
        Self {
            driver,
            api,
            flags: Arc::new(StaticFeatureFlags::default()),
            clock: Arc::new(SystemClock),
            rate_limit: DEFAULT_RATE_LIMIT,
            rate_window: DEFAULT_RATE_WINDOW,
            policy: SyncPolicy::default(),
            reset_on_migration_failure: false,
        }
    }

    /// Use `flags` for feature flag lookups.
    #[must_use]
    pub fn with_flags(mut self, flags: Arc<dyn FeatureFlags>) -> Self {
        self.flags = flags;
        self
    }

    /// Allow `limit` API requests per `window`.
    #[must_use]
    pub const fn with_rate_limit(mut self, limit: u32, window: Duration) -> Self {
        self.rate_limit = limit;
        self.rate_window = window;
        self
    }

    /// Read rate-limit time from `clock`.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use `policy` for both sync services.
    #[must_use]
    pub const fn with_policy(mut self, policy: SyncPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Discard and recreate the store when a migration fails.
    #[must_use]
    pub const fn with_reset_on_migration_failure(mut self, reset: bool) -> Self {
        self.reset_on_migration_failure = reset;
        self
    }
}

/// Everything a running process shares.
pub struct AppContext {
    store: Arc<SqliteStore>,
    limiter: Arc<RateLimiter>,
    stops: StopsIngestionManager,
    park_ride: ParkRideIngestionManager,
    startup: OnceCell<Result<SyncOutcome, SyncError>>,
    store_was_reset: bool,
}

impl fmt::Debug for AppContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppContext")
            .field("store", &self.store)
            .field("stops", &self.stops)
            .field("park_ride", &self.park_ride)
            .field("store_was_reset", &self.store_was_reset)
            .finish_non_exhaustive()
    }
}

/// Build the process context.
///
/// Opens and migrates the store, which blocks; async callers should run this
/// on a blocking thread.
pub fn compose(config: ContextConfig) -> Result<AppContext, ContextError> {
    let required = StopsDataset::REQUESTS.max(ParkRideDataset::REQUESTS);
    if config.rate_limit > 0 && config.rate_limit < required {
        return Err(ContextError::RateLimitBelowRun {
            limit: config.rate_limit,
            required,
        });
    }
    let (store, store_was_reset) =
        open_store(config.driver.as_ref(), config.reset_on_migration_failure)?;
    let limiter = Arc::new(RateLimiter::with_clock(
        config.rate_limit,
        config.rate_window,
        config.clock,
    )?);
    let resources = SyncResources {
        api: config.api,
        store: Arc::clone(&store),
        limiter: Arc::clone(&limiter),
        flags: config.flags,
    };
    Ok(AppContext {
        stops: SyncService::new(StopsDataset, resources.clone(), config.policy),
        park_ride: SyncService::new(ParkRideDataset, resources, config.policy),
        store,
        limiter,
        startup: OnceCell::new(),
        store_was_reset,
    })
}

/// Open and migrate the store behind `driver`.
///
/// When `reset_on_migration_failure` is set, a store whose migration fails is
/// discarded and recreated empty. The returned flag reports whether that
/// happened.
pub fn open_store(
    driver: &dyn StoreDriverFactory,
    reset_on_migration_failure: bool,
) -> Result<(Arc<SqliteStore>, bool), ContextError> {
    let location = driver.describe();
    match SqliteStore::open(driver) {
        Ok(store) => Ok((Arc::new(store), false)),
        Err(err) if err.is_migration_failure() && reset_on_migration_failure => {
            warn!("migration failed for {location}; discarding the store: {err}");
            driver
                .discard()
                .map_err(|source| ContextError::DiscardStore {
                    location: location.clone(),
                    source,
                })?;
            let store = SqliteStore::open(driver)
                .map_err(|source| ContextError::OpenStore { location, source })?;
            info!("recreated empty store at {}", store.location());
            Ok((Arc::new(store), true))
        }
        Err(source) => {
            error!("failed to open store at {location}: {source}");
            Err(ContextError::OpenStore { location, source })
        }
    }
}

impl AppContext {
    /// Await the startup stops sync.
    ///
    /// The first caller runs a background sync; every later caller receives
    /// the same outcome without touching the network again.
    pub async fn stops_ready(&self) -> Result<SyncOutcome, SyncError> {
        self.startup
            .get_or_init(|| self.stops.sync(SyncUrgency::Background))
            .await
            .clone()
    }

    /// Shared store.
    #[must_use]
    pub const fn store(&self) -> &Arc<SqliteStore> {
        &self.store
    }

    /// Shared rate limiter.
    #[must_use]
    pub const fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Stops and routes sync service.
    #[must_use]
    pub const fn stops(&self) -> &StopsIngestionManager {
        &self.stops
    }

    /// Park-and-ride sync service.
    #[must_use]
    pub const fn park_ride(&self) -> &ParkRideIngestionManager {
        &self.park_ride
    }

    /// Whether [`compose`] discarded the store after a failed migration.
    #[must_use]
    pub const fn store_was_reset(&self) -> bool {
        self.store_was_reset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{
        StopsPayload, WireStop,
        test_support::{Endpoint, StubTransitApi},
    };
    use camino::Utf8PathBuf;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;
    use transit_core::{CURRENT_SCHEMA_VERSION, FileStoreDriver};

    #[fixture]
    fn temp_dir() -> TempDir {
        TempDir::new().expect("create temp dir")
    }

    fn file_driver(dir: &TempDir) -> Arc<FileStoreDriver> {
        let path =
            Utf8PathBuf::from_path_buf(dir.path().join("transit.db")).expect("utf-8 temp path");
        Arc::new(FileStoreDriver::new(path))
    }

    /// Leaves a `stops` table whose shape breaks the coordinate index step.
    fn seed_incompatible_store(driver: &FileStoreDriver) {
        let connection = driver.open().expect("open database file");
        connection
            .execute_batch(
                "CREATE TABLE stops (stop_id TEXT PRIMARY KEY);
                 INSERT INTO stops (stop_id) VALUES ('legacy');",
            )
            .expect("seed incompatible table");
    }

    fn stub() -> Arc<StubTransitApi> {
        Arc::new(StubTransitApi::new().with_stops(StopsPayload {
            stops: vec![WireStop {
                id: Some("s1".to_owned()),
                name: Some("Wharf".to_owned()),
                lat: Some(-33.86),
                lon: Some(151.21),
                modes: Vec::new(),
            }],
        }))
    }

    #[rstest]
    fn migration_failure_is_fatal_by_default(temp_dir: TempDir) {
        let driver = file_driver(&temp_dir);
        seed_incompatible_store(&driver);

        let err = compose(ContextConfig::new(driver, stub())).expect_err("migration fails");

        assert!(err.is_migration_failure(), "unexpected error: {err:?}");
    }

    #[rstest]
    fn migration_failure_can_reset_the_store(temp_dir: TempDir) {
        let driver = file_driver(&temp_dir);
        seed_incompatible_store(&driver);

        let context = compose(
            ContextConfig::new(driver, stub()).with_reset_on_migration_failure(true),
        )
        .expect("store recreated");

        assert!(context.store_was_reset());
        assert_eq!(
            context.store().schema_version().expect("version"),
            CURRENT_SCHEMA_VERSION
        );
        assert_eq!(context.store().stop_count().expect("count"), 0);
    }

    #[rstest]
    fn invalid_rate_limit_is_rejected(temp_dir: TempDir) {
        let config = ContextConfig::new(file_driver(&temp_dir), stub())
            .with_rate_limit(0, DEFAULT_RATE_WINDOW);
        assert!(matches!(
            compose(config),
            Err(ContextError::RateLimiter(RateLimiterError::ZeroLimit))
        ));
    }

    #[rstest]
    fn rate_limit_must_fit_one_stops_sync(temp_dir: TempDir) {
        let config = ContextConfig::new(file_driver(&temp_dir), stub())
            .with_rate_limit(1, DEFAULT_RATE_WINDOW);

        let err = compose(config).expect_err("one request cannot fit a stops sync");

        assert!(matches!(
            err,
            ContextError::RateLimitBelowRun {
                limit: 1,
                required: 2
            }
        ));
    }

    #[tokio::test]
    async fn stops_ready_runs_the_startup_sync_once() {
        let api = stub();
        let context = compose(ContextConfig::new(
            Arc::new(transit_core::MemoryStoreDriver),
            Arc::clone(&api) as Arc<dyn TransitApi>,
        ))
        .expect("compose");

        let first = context.stops_ready().await.expect("startup sync");
        let second = context.stops_ready().await.expect("cached outcome");

        assert_eq!(first, second);
        assert_eq!(api.request_count(Endpoint::Stops), 1);
        assert_eq!(context.store().stop_count().expect("count"), 1);
    }
}
