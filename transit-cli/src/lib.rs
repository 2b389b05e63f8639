//! Command-line interface for the transit reference data cache.
#![forbid(unsafe_code)]

use std::io::Write;

use clap::{Parser, Subcommand};
use log::debug;
use serde::Serialize;

mod error;
mod store;
mod sync;

pub use error::{CliError, DatasetFailure};

const ARG_DATABASE: &str = "database";
const ARG_API_BASE_URL: &str = "api-base-url";
const ENV_SYNC_DATABASE: &str = "TRANSIT_CMDS_SYNC_DATABASE";
const ENV_SYNC_API_BASE_URL: &str = "TRANSIT_CMDS_SYNC_API_BASE_URL";
const ENV_MIGRATE_DATABASE: &str = "TRANSIT_CMDS_MIGRATE_DATABASE";
const ENV_STATUS_DATABASE: &str = "TRANSIT_CMDS_STATUS_DATABASE";

/// Run the CLI with the current process arguments and environment.
///
/// # Errors
///
/// Returns the first error raised while parsing arguments, merging
/// configuration, or running the selected command.
pub fn run() -> Result<(), CliError> {
    let cli = Cli::try_parse().map_err(CliError::ArgumentParsing)?;
    init_logging(cli.verbose);
    let mut stdout = std::io::stdout().lock();
    match cli.command {
        Command::Sync(args) => sync::run_sync(args, &mut stdout),
        Command::Migrate(args) => store::run_migrate(args, &mut stdout),
        Command::Status(args) => store::run_status(args, &mut stdout),
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    let result =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
            .format_timestamp(None)
            .try_init();
    if let Err(err) = result {
        debug!("logger already initialised: {err}");
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "transit-cache",
    about = "Maintain the local transit reference data cache",
    version
)]
struct Cli {
    /// Log at debug level unless `RUST_LOG` says otherwise.
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Refresh stops, routes and optionally park-and-ride data.
    Sync(sync::SyncArgs),
    /// Upgrade the store to the current schema version.
    Migrate(store::MigrateArgs),
    /// Report what the store currently holds.
    Status(store::StatusArgs),
}

/// Pretty-print `report` as one JSON document followed by a newline.
fn write_report<T: Serialize>(writer: &mut dyn Write, report: &T) -> Result<(), CliError> {
    let payload = serde_json::to_string_pretty(report).map_err(CliError::SerialiseReport)?;
    writer
        .write_all(payload.as_bytes())
        .map_err(CliError::WriteOutput)?;
    writer.write_all(b"\n").map_err(CliError::WriteOutput)?;
    Ok(())
}

#[cfg(test)]
mod tests;
