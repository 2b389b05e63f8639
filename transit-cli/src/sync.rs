//! Sync command implementation.

use std::{io::Write, sync::Arc, time::Duration};

use camino::Utf8PathBuf;
use clap::Parser;
use log::{info, warn};
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use serde::{Deserialize, Serialize};
use transit_core::FileStoreDriver;
use transit_data::{
    ContextConfig, HttpTransitApi, HttpTransitApiConfig, StaticFeatureFlags,
    SyncError, SyncOutcome, SyncPolicy, SyncUrgency, TransitApi, compose,
    context::{DEFAULT_RATE_LIMIT, DEFAULT_RATE_WINDOW},
    flags::{HIGH_PRIORITY_STOP_IDS, LOCAL_CACHING_ENABLED},
    sync::{Dataset, ParkRideDataset, StopsDataset},
};

use crate::{
    ARG_API_BASE_URL, ARG_DATABASE, CliError, DatasetFailure, ENV_SYNC_API_BASE_URL,
    ENV_SYNC_DATABASE, write_report,
};

/// CLI arguments for the `sync` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    name = "sync",
    long_about = "Fetch stops and routes from the transit authority and \
                 merge them into the local store. Every request passes the \
                 shared rate limiter; a failed run leaves the existing data \
                 in place.",
    about = "Refresh the local transit cache"
)]
#[ortho_config(prefix = "TRANSIT")]
pub(crate) struct SyncArgs {
    /// Path to the SQLite store.
    #[arg(long = ARG_DATABASE, value_name = "path")]
    #[serde(default)]
    pub(crate) database: Option<Utf8PathBuf>,
    /// Base URL of the transit authority API.
    #[arg(long = ARG_API_BASE_URL, value_name = "url")]
    #[serde(default)]
    pub(crate) api_base_url: Option<String>,
    /// Bearer token sent with every API request.
    #[arg(long, value_name = "token")]
    #[serde(default)]
    pub(crate) api_token: Option<String>,
    /// API requests allowed per rate-limit window.
    #[arg(long, value_name = "count")]
    #[serde(default)]
    pub(crate) rate_limit: Option<u32>,
    /// Length of the rate-limit window in milliseconds.
    #[arg(long, value_name = "ms")]
    #[serde(default)]
    pub(crate) rate_window_ms: Option<u64>,
    /// Fetch attempts per dataset before giving up.
    #[arg(long, value_name = "count")]
    #[serde(default)]
    pub(crate) max_attempts: Option<u32>,
    /// Fail immediately when rate limited instead of waiting.
    #[arg(long)]
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub(crate) foreground: bool,
    /// Recreate the store when a schema migration fails.
    #[arg(long)]
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub(crate) reset_on_migration_failure: bool,
    /// Cache only the priority stops.
    #[arg(long)]
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub(crate) disable_local_caching: bool,
    /// Stop ids cached even when local caching is disabled.
    #[arg(long, value_name = "ids", value_delimiter = ',')]
    #[serde(default)]
    pub(crate) priority_stops: Option<Vec<String>>,
    /// Also refresh park-and-ride facilities.
    #[arg(long)]
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub(crate) park_ride: bool,
}

impl SyncArgs {
    pub(crate) fn into_config(self) -> Result<SyncConfig, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        SyncConfig::try_from(merged)
    }
}

/// Resolved `sync` command configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SyncConfig {
    pub(crate) database: Utf8PathBuf,
    pub(crate) api_base_url: String,
    pub(crate) api_token: Option<String>,
    pub(crate) rate_limit: u32,
    pub(crate) rate_window: Duration,
    pub(crate) policy: SyncPolicy,
    pub(crate) urgency: SyncUrgency,
    pub(crate) reset_on_migration_failure: bool,
    pub(crate) local_caching: bool,
    pub(crate) priority_stops: Vec<String>,
    pub(crate) park_ride: bool,
}

impl TryFrom<SyncArgs> for SyncConfig {
    type Error = CliError;

    fn try_from(args: SyncArgs) -> Result<Self, Self::Error> {
        let database = args.database.ok_or(CliError::MissingArgument {
            field: ARG_DATABASE,
            env: ENV_SYNC_DATABASE,
        })?;
        let api_base_url = args.api_base_url.ok_or(CliError::MissingArgument {
            field: ARG_API_BASE_URL,
            env: ENV_SYNC_API_BASE_URL,
        })?;

        let mut policy = SyncPolicy::default();
        if let Some(max_attempts) = args.max_attempts {
            policy = policy.with_max_attempts(max_attempts);
        }
        let urgency = if args.foreground {
            SyncUrgency::Foreground
        } else {
            SyncUrgency::Background
        };

        Ok(Self {
            database,
            api_base_url,
            api_token: args.api_token,
            rate_limit: args.rate_limit.unwrap_or(DEFAULT_RATE_LIMIT),
            rate_window: args
                .rate_window_ms
                .map_or(DEFAULT_RATE_WINDOW, Duration::from_millis),
            policy,
            urgency,
            reset_on_migration_failure: args.reset_on_migration_failure,
            local_caching: !args.disable_local_caching,
            priority_stops: args.priority_stops.unwrap_or_default(),
            park_ride: args.park_ride,
        })
    }
}

impl SyncConfig {
    pub(crate) fn flags(&self) -> StaticFeatureFlags {
        let flags =
            StaticFeatureFlags::default().with_bool(LOCAL_CACHING_ENABLED, self.local_caching);
        if self.priority_stops.is_empty() {
            flags
        } else {
            flags.with_string(HIGH_PRIORITY_STOP_IDS, self.priority_stops.join(","))
        }
    }

    fn context_config(&self, api: Arc<dyn TransitApi>) -> ContextConfig {
        ContextConfig::new(Arc::new(FileStoreDriver::new(self.database.clone())), api)
            .with_flags(Arc::new(self.flags()))
            .with_rate_limit(self.rate_limit, self.rate_window)
            .with_policy(self.policy)
            .with_reset_on_migration_failure(self.reset_on_migration_failure)
    }
}

/// Builds the transit API client for a sync invocation.
pub(crate) trait ApiBuilder {
    fn build(&self, config: &SyncConfig) -> Result<Arc<dyn TransitApi>, CliError>;
}

pub(crate) struct HttpApiBuilder;

impl ApiBuilder for HttpApiBuilder {
    fn build(&self, config: &SyncConfig) -> Result<Arc<dyn TransitApi>, CliError> {
        let mut api_config = HttpTransitApiConfig::new(config.api_base_url.clone());
        if let Some(token) = &config.api_token {
            api_config = api_config.with_token(token.clone());
        }
        let api = HttpTransitApi::with_config(api_config).map_err(|source| CliError::BuildApi {
            base_url: config.api_base_url.clone(),
            source,
        })?;
        Ok(Arc::new(api))
    }
}

/// One line of the sync report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct DatasetSummary {
    pub(crate) dataset: &'static str,
    pub(crate) status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) records_written: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) error: Option<String>,
}

impl DatasetSummary {
    fn new(dataset: &'static str, outcome: &SyncOutcome) -> Self {
        let base = Self::empty(dataset, "fresh");
        match outcome {
            SyncOutcome::Synced(report) => Self {
                status: "synced",
                records_written: Some(report.records_written),
                attempts: Some(report.attempts),
                ..base
            },
            SyncOutcome::Skipped { reason } => Self {
                status: "skipped",
                reason: Some(*reason),
                ..base
            },
            SyncOutcome::Fresh { .. } => base,
        }
    }

    fn failed(dataset: &'static str, err: &SyncError) -> Self {
        Self {
            error: Some(err.to_string()),
            ..Self::empty(dataset, "failed")
        }
    }

    const fn empty(dataset: &'static str, status: &'static str) -> Self {
        Self {
            dataset,
            status,
            records_written: None,
            attempts: None,
            reason: None,
            error: None,
        }
    }
}

/// Report written after `sync`, listing failed datasets too.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct SyncSummary {
    pub(crate) database: Utf8PathBuf,
    pub(crate) store_was_reset: bool,
    pub(crate) datasets: Vec<DatasetSummary>,
}

pub(crate) fn run_sync(args: SyncArgs, writer: &mut dyn Write) -> Result<(), CliError> {
    run_sync_with(args, &HttpApiBuilder, writer)
}

pub(crate) fn run_sync_with(
    args: SyncArgs,
    builder: &dyn ApiBuilder,
    writer: &mut dyn Write,
) -> Result<(), CliError> {
    let config = args.into_config()?;
    let run = execute_sync(&config, builder)?;
    write_report(writer, &run.summary)?;
    run.into_result().map(drop)
}

/// Every dataset's summary plus the failures among them.
#[derive(Debug)]
pub(crate) struct SyncRun {
    pub(crate) summary: SyncSummary,
    pub(crate) failures: Vec<DatasetFailure>,
}

impl SyncRun {
    /// The summary when every dataset succeeded, otherwise all failures.
    pub(crate) fn into_result(self) -> Result<SyncSummary, CliError> {
        if self.failures.is_empty() {
            Ok(self.summary)
        } else {
            Err(CliError::Sync {
                failures: self.failures,
            })
        }
    }

    fn record(&mut self, dataset: &'static str, outcome: Result<SyncOutcome, SyncError>) {
        match outcome {
            Ok(outcome) => {
                info!("{dataset} sync finished: {outcome:?}");
                self.summary
                    .datasets
                    .push(DatasetSummary::new(dataset, &outcome));
            }
            Err(source) => {
                warn!("{dataset} sync failed: {source}");
                self.summary
                    .datasets
                    .push(DatasetSummary::failed(dataset, &source));
                self.failures.push(DatasetFailure { dataset, source });
            }
        }
    }
}

/// Sync every requested dataset. A failing dataset does not stop the
/// others; failures are collected in the returned [`SyncRun`].
pub(crate) fn execute_sync(
    config: &SyncConfig,
    builder: &dyn ApiBuilder,
) -> Result<SyncRun, CliError> {
    let api = builder.build(config)?;
    let context = compose(config.context_config(api))?;
    if context.store_was_reset() {
        info!("store at {} was recreated", config.database);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)?;

    let mut run = SyncRun {
        summary: SyncSummary {
            database: config.database.clone(),
            store_was_reset: context.store_was_reset(),
            datasets: Vec::new(),
        },
        failures: Vec::new(),
    };
    run.record(
        StopsDataset::NAME,
        runtime.block_on(context.stops().sync(config.urgency)),
    );
    if config.park_ride {
        run.record(
            ParkRideDataset::NAME,
            runtime.block_on(context.park_ride().sync(config.urgency)),
        );
    }
    Ok(run)
}

#[cfg(test)]
pub(crate) fn config_from_layers_for_test(
    layers: Vec<ortho_config::MergeLayer<'static>>,
) -> Result<SyncConfig, CliError> {
    let merged = SyncArgs::merge_from_layers(layers).map_err(CliError::from)?;
    SyncConfig::try_from(merged)
}
