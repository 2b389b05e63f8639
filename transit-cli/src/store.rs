//! Store maintenance commands: `migrate` and `status`.

use std::io::Write;

use camino::Utf8PathBuf;
use clap::Parser;
use log::{info, warn};
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use serde::{Deserialize, Serialize};
use transit_core::{FileStoreDriver, SqliteStore};
use transit_data::{
    open_store,
    sync::{Dataset, ParkRideDataset, StopsDataset, last_success_key},
};

use crate::{ARG_DATABASE, CliError, ENV_MIGRATE_DATABASE, ENV_STATUS_DATABASE, write_report};

/// CLI arguments for the `migrate` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    name = "migrate",
    long_about = "Apply every pending schema migration to the store. Steps \
                 that already committed are kept if a later step fails.",
    about = "Upgrade the store schema"
)]
#[ortho_config(prefix = "TRANSIT")]
pub(crate) struct MigrateArgs {
    /// Path to the SQLite store.
    #[arg(long = ARG_DATABASE, value_name = "path")]
    #[serde(default)]
    pub(crate) database: Option<Utf8PathBuf>,
    /// Recreate the store when a schema migration fails.
    #[arg(long)]
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub(crate) reset_on_migration_failure: bool,
}

/// Resolved `migrate` command configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MigrateConfig {
    pub(crate) database: Utf8PathBuf,
    pub(crate) reset_on_migration_failure: bool,
}

impl TryFrom<MigrateArgs> for MigrateConfig {
    type Error = CliError;

    fn try_from(args: MigrateArgs) -> Result<Self, Self::Error> {
        let database = args.database.ok_or(CliError::MissingArgument {
            field: ARG_DATABASE,
            env: ENV_MIGRATE_DATABASE,
        })?;
        Ok(Self {
            database,
            reset_on_migration_failure: args.reset_on_migration_failure,
        })
    }
}

/// CLI arguments for the `status` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    name = "status",
    long_about = "Open the store, upgrading it if needed, and report its \
                 schema version, row counts and last successful syncs.",
    about = "Summarise the store contents"
)]
#[ortho_config(prefix = "TRANSIT")]
pub(crate) struct StatusArgs {
    /// Path to the SQLite store.
    #[arg(long = ARG_DATABASE, value_name = "path")]
    #[serde(default)]
    pub(crate) database: Option<Utf8PathBuf>,
}

/// Resolved `status` command configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StatusConfig {
    pub(crate) database: Utf8PathBuf,
}

impl TryFrom<StatusArgs> for StatusConfig {
    type Error = CliError;

    fn try_from(args: StatusArgs) -> Result<Self, Self::Error> {
        let database = args.database.ok_or(CliError::MissingArgument {
            field: ARG_DATABASE,
            env: ENV_STATUS_DATABASE,
        })?;
        Ok(Self { database })
    }
}

/// Report written after `migrate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct MigrateReport {
    pub(crate) database: Utf8PathBuf,
    pub(crate) schema_version: u32,
    pub(crate) store_was_reset: bool,
}

/// Report written by `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct StatusReport {
    pub(crate) database: Utf8PathBuf,
    pub(crate) schema_version: u32,
    pub(crate) stops: usize,
    pub(crate) routes: usize,
    pub(crate) park_ride_facilities: usize,
    /// Last successful sync per dataset, in milliseconds since the epoch.
    pub(crate) last_sync_ms: LastSync,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct LastSync {
    pub(crate) stops: Option<u64>,
    pub(crate) park_ride: Option<u64>,
}

pub(crate) fn run_migrate(args: MigrateArgs, writer: &mut dyn Write) -> Result<(), CliError> {
    let merged = args.load_and_merge().map_err(CliError::Configuration)?;
    let report = execute_migrate(&MigrateConfig::try_from(merged)?)?;
    write_report(writer, &report)
}

pub(crate) fn execute_migrate(config: &MigrateConfig) -> Result<MigrateReport, CliError> {
    let driver = FileStoreDriver::new(config.database.clone());
    let (store, store_was_reset) = open_store(&driver, config.reset_on_migration_failure)?;
    let schema_version = store.schema_version()?.get();
    info!("store at {} is at schema version {schema_version}", config.database);
    Ok(MigrateReport {
        database: config.database.clone(),
        schema_version,
        store_was_reset,
    })
}

pub(crate) fn run_status(args: StatusArgs, writer: &mut dyn Write) -> Result<(), CliError> {
    let merged = args.load_and_merge().map_err(CliError::Configuration)?;
    let report = execute_status(&StatusConfig::try_from(merged)?)?;
    write_report(writer, &report)
}

pub(crate) fn execute_status(config: &StatusConfig) -> Result<StatusReport, CliError> {
    let driver = FileStoreDriver::new(config.database.clone());
    let (store, _) = open_store(&driver, false)?;
    Ok(StatusReport {
        schema_version: store.schema_version()?.get(),
        stops: store.stop_count()?,
        routes: store.route_count()?,
        park_ride_facilities: store.park_ride_count()?,
        last_sync_ms: LastSync {
            stops: last_success_ms(&store, StopsDataset::NAME)?,
            park_ride: last_success_ms(&store, ParkRideDataset::NAME)?,
        },
        database: config.database.clone(),
    })
}

fn last_success_ms(store: &SqliteStore, dataset: &str) -> Result<Option<u64>, CliError> {
    let Some(raw) = store.preference(&last_success_key(dataset))? else {
        return Ok(None);
    };
    match raw.parse() {
        Ok(millis) => Ok(Some(millis)),
        Err(err) => {
            warn!("ignoring unreadable {dataset} sync timestamp {raw:?}: {err}");
            Ok(None)
        }
    }
}
