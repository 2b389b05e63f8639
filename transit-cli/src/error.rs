//! Error types emitted by the transit cache CLI.
//!
//! Keep this error type reasonably small, as every command helper returns
//! `Result<_, CliError>` and the workspace enables `clippy::result_large_err`.

use std::{fmt, sync::Arc};

use thiserror::Error;
use transit_core::StoreError;
use transit_data::{ContextError, SyncError, api::ProviderBuildError};

/// Errors emitted by the transit cache CLI.
#[derive(Debug, Error)]
pub enum CliError {
    /// Provided arguments failed Clap validation.
    #[error(transparent)]
    ArgumentParsing(#[from] clap::Error),
    /// Configuration layering failed (files, env, CLI).
    #[error("failed to load configuration: {0}")]
    Configuration(#[from] Arc<ortho_config::OrthoError>),
    /// A required option is missing after configuration merging.
    #[error("missing {field} (set --{field} or {env})")]
    MissingArgument {
        field: &'static str,
        env: &'static str,
    },
    /// Constructing the transit API client failed.
    #[error("failed to build transit API client for {base_url:?}: {source}")]
    BuildApi {
        base_url: String,
        #[source]
        source: ProviderBuildError,
    },
    /// Opening the store or composing the process context failed.
    #[error(transparent)]
    Context(#[from] ContextError),
    /// Reading from an open store failed.
    #[error("store query failed: {0}")]
    Store(#[from] StoreError),
    /// Starting the async runtime failed.
    #[error("failed to start the async runtime: {0}")]
    Runtime(#[source] std::io::Error),
    /// One or more datasets failed to sync. Every requested dataset was
    /// attempted first.
    #[error("{}", describe_failures(.failures))]
    Sync { failures: Vec<DatasetFailure> },
    /// Serialising a command report failed.
    #[error("failed to serialise report: {0}")]
    SerialiseReport(#[source] serde_json::Error),
    /// Writing a command report failed.
    #[error("failed to write report: {0}")]
    WriteOutput(#[source] std::io::Error),
}

/// A dataset whose sync failed.
#[derive(Debug)]
pub struct DatasetFailure {
    pub dataset: &'static str,
    pub source: SyncError,
}

impl fmt::Display for DatasetFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} sync failed: {}", self.dataset, self.source)
    }
}

fn describe_failures(failures: &[DatasetFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
