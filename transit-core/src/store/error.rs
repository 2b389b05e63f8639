use camino::Utf8PathBuf;
use thiserror::Error;

use crate::{RecordError, UnknownTransportMode};

#[cfg(feature = "store-sqlite")]
use super::MigrationError;

/// Errors raised by store drivers, transactions and queries.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Creating the directory that holds the database failed.
    #[error("failed to create parent directory for {path:?}")]
    CreateDirectory {
        /// Database path whose parent could not be created.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Opening the SQLite database failed.
    #[cfg(feature = "store-sqlite")]
    #[error("failed to open SQLite database at {location}")]
    Open {
        /// Human-readable driver location.
        location: String,
        /// Source error returned by `rusqlite`.
        #[source]
        source: rusqlite::Error,
    },
    /// Discarding the persisted database failed.
    #[error("failed to discard store at {location}")]
    Discard {
        /// Human-readable driver location.
        location: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Bringing the schema up to date failed.
    #[cfg(feature = "store-sqlite")]
    #[error(transparent)]
    Migration(#[from] MigrationError),
    /// A statement or transaction failed.
    #[cfg(feature = "store-sqlite")]
    #[error("failed to {operation}")]
    Sqlite {
        /// Operation being performed.
        operation: &'static str,
        /// Source error returned by `rusqlite`.
        #[source]
        source: rusqlite::Error,
    },
    /// A persisted row no longer forms a valid record.
    #[error("corrupt row in {table}")]
    CorruptRow {
        /// Table holding the row.
        table: &'static str,
        /// Validation failure.
        #[source]
        source: RecordError,
    },
    /// A persisted route names a transport mode this build does not know.
    #[error("route {route_id:?} has an unknown transport mode")]
    UnknownMode {
        /// Route holding the value.
        route_id: String,
        /// Parse failure.
        #[source]
        source: UnknownTransportMode,
    },
    /// A preference set member was empty or whitespace.
    #[error("preference set {key:?} cannot hold a blank member")]
    BlankPreferenceMember {
        /// Preference key being written.
        key: String,
    },
    /// A numeric value does not fit its column.
    #[error("{field} value {value} does not fit the store's integer range")]
    OutOfRange {
        /// Field being converted.
        field: &'static str,
        /// Rejected value.
        value: i64,
    },
}

impl StoreError {
    /// Whether the error came from a failed schema migration step.
    #[must_use]
    pub fn is_migration_failure(&self) -> bool {
        #[cfg(feature = "store-sqlite")]
        {
            matches!(self, Self::Migration(MigrationError::Failed { .. }))
        }
        #[cfg(not(feature = "store-sqlite"))]
        {
            false
        }
    }
}
