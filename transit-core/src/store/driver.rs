//! Capability interface for obtaining SQLite connections.
//!
//! Each target supplies one [`StoreDriverFactory`]; the store itself never
//! inspects which platform it runs on.

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use log::warn;
use rusqlite::Connection;

use super::StoreError;

/// How long a connection waits on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens and discards the database backing a store.
pub trait StoreDriverFactory: Send + Sync {
    /// Open a connection to the database, creating it when absent.
    fn open(&self) -> Result<Connection, StoreError>;

    /// Delete the persisted database so that the next [`open`] starts empty.
    ///
    /// [`open`]: StoreDriverFactory::open
    fn discard(&self) -> Result<(), StoreError>;

    /// Human-readable location for logs and errors.
    fn describe(&self) -> String;
}

/// Driver for a database file on local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStoreDriver {
    path: Utf8PathBuf,
}

impl FileStoreDriver {
    /// Create a driver for the database at `path`.
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the database file.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn open_error(&self, source: rusqlite::Error) -> StoreError {
        StoreError::Open {
            location: self.describe(),
            source,
        }
    }
}

impl StoreDriverFactory for FileStoreDriver {
    fn open(&self) -> Result<Connection, StoreError> {
        transit_fs::ensure_parent_dir(&self.path).map_err(|source| {
            StoreError::CreateDirectory {
                path: self.path.clone(),
                source,
            }
        })?;
        let connection =
            Connection::open(self.path.as_std_path()).map_err(|source| self.open_error(source))?;
        let journal_mode: String = connection
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .map_err(|source| self.open_error(source))?;
        if !journal_mode.eq_ignore_ascii_case("wal") {
            warn!("{} does not support WAL; using {journal_mode}", self.path);
        }
        configure(&connection).map_err(|source| self.open_error(source))?;
        Ok(connection)
    }

    fn discard(&self) -> Result<(), StoreError> {
        let existed =
            transit_fs::remove_database_files(&self.path).map_err(|source| StoreError::Discard {
                location: self.describe(),
                source,
            })?;
        if existed {
            warn!("discarded store at {}", self.path);
        }
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.to_string()
    }
}

/// Driver for a private in-memory database, used by tests and ephemeral
/// sessions. Every [`open`](StoreDriverFactory::open) yields a fresh, empty
/// database.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStoreDriver;

impl StoreDriverFactory for MemoryStoreDriver {
    fn open(&self) -> Result<Connection, StoreError> {
        let connection = Connection::open_in_memory().map_err(|source| StoreError::Open {
            location: self.describe(),
            source,
        })?;
        configure(&connection).map_err(|source| StoreError::Open {
            location: self.describe(),
            source,
        })?;
        Ok(connection)
    }

    fn discard(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn describe(&self) -> String {
        String::from(":memory:")
    }
}

fn configure(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.pragma_update(None, "foreign_keys", true)?;
    connection.busy_timeout(BUSY_TIMEOUT)
}
