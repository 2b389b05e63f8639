//! Ordered, exactly-once schema migrations.
//!
//! Each [`Migration`] names the version it produces. The engine applies the
//! steps between the persisted version and the requested target in
//! ascending order, each in its own transaction together with the row that
//! records it in `schema_migrations`. A step is therefore either fully
//! applied and recorded, or absent; re-running the engine resumes after the
//! last recorded step.

use std::fmt;

use log::{debug, info};
use rusqlite::{Connection, Error as SqliteError, Transaction, TransactionBehavior};
use thiserror::Error;

/// A persisted schema version. Zero denotes an empty database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SchemaVersion(u32);

impl SchemaVersion {
    /// Version of a database no migration has touched.
    pub const EMPTY: Self = Self(0);

    /// Wrap a raw version number.
    #[must_use]
    pub const fn new(version: u32) -> Self {
        Self(version)
    }

    /// Raw version number.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// The version a single step upgrades to.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Work performed by a migration step.
#[derive(Clone, Copy)]
pub enum MigrationStep {
    /// A batch of SQL statements.
    Sql(&'static str),
    /// A data transformation over the rows visible in the transaction.
    Transform(fn(&Transaction<'_>) -> Result<(), SqliteError>),
}

impl fmt::Debug for MigrationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sql(sql) => f.debug_tuple("Sql").field(sql).finish(),
            Self::Transform(_) => f.write_str("Transform(..)"),
        }
    }
}

/// One tagged schema upgrade, `version - 1 → version`.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    version: SchemaVersion,
    name: &'static str,
    step: MigrationStep,
}

impl Migration {
    /// A migration that runs a batch of SQL statements.
    #[must_use]
    pub const fn sql(version: u32, name: &'static str, sql: &'static str) -> Self {
        Self {
            version: SchemaVersion(version),
            name,
            step: MigrationStep::Sql(sql),
        }
    }

    /// A migration that transforms existing rows in Rust.
    #[must_use]
    pub const fn transform(
        version: u32,
        name: &'static str,
        apply: fn(&Transaction<'_>) -> Result<(), SqliteError>,
    ) -> Self {
        Self {
            version: SchemaVersion(version),
            name,
            step: MigrationStep::Transform(apply),
        }
    }

    /// Version produced by this step.
    #[must_use]
    pub const fn version(&self) -> SchemaVersion {
        self.version
    }

    /// Human-readable step name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    fn apply(&self, transaction: &Transaction<'_>) -> Result<(), SqliteError> {
        match self.step {
            MigrationStep::Sql(sql) => transaction.execute_batch(sql),
            MigrationStep::Transform(apply) => apply(transaction),
        }
    }
}

/// Summary of one engine run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    /// Version found before the run.
    pub from: SchemaVersion,
    /// Version persisted after the run.
    pub to: SchemaVersion,
    /// Versions applied by this run, in order.
    pub applied: Vec<SchemaVersion>,
}

impl MigrationReport {
    /// Whether the run changed nothing.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }
}

/// Errors raised while planning or applying migrations.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Step versions do not run contiguously from 1.
    #[error("migration plan is not contiguous: expected {expected} but found {found}")]
    NonContiguousPlan {
        /// Version the plan should contain at this position.
        expected: SchemaVersion,
        /// Version actually listed.
        found: SchemaVersion,
    },
    /// The store is newer than the requested target.
    #[error("store is at {current} and cannot be downgraded to {target}")]
    Downgrade {
        /// Persisted version.
        current: SchemaVersion,
        /// Requested target.
        target: SchemaVersion,
    },
    /// The target lies beyond the last known migration.
    #[error("target {target} is beyond the latest known migration {latest}")]
    UnknownTarget {
        /// Requested target.
        target: SchemaVersion,
        /// Highest version in the plan.
        latest: SchemaVersion,
    },
    /// Reading or initialising the version bookkeeping failed.
    #[error("failed to read the persisted schema version")]
    ReadVersion {
        /// Source error returned by `rusqlite`.
        #[source]
        source: SqliteError,
    },
    /// A step failed; its transaction was rolled back.
    #[error("migration {version} ({name}) failed")]
    Failed {
        /// Version the failing step would have produced.
        version: SchemaVersion,
        /// Name of the failing step.
        name: &'static str,
        /// Source error returned by `rusqlite`.
        #[source]
        source: SqliteError,
    },
}

/// Applies an ordered list of [`Migration`] steps to a connection.
#[derive(Debug, Clone)]
pub struct MigrationEngine {
    steps: Vec<Migration>,
}

impl MigrationEngine {
    /// Build an engine from steps listed in ascending version order starting
    /// at 1.
    pub fn new(steps: Vec<Migration>) -> Result<Self, MigrationError> {
        let mut expected = SchemaVersion::EMPTY.next();
        for step in &steps {
            if step.version != expected {
                return Err(MigrationError::NonContiguousPlan {
                    expected,
                    found: step.version,
                });
            }
            expected = expected.next();
        }
        Ok(Self { steps })
    }

    /// Highest version this engine can produce.
    #[must_use]
    pub fn latest(&self) -> SchemaVersion {
        self.steps
            .last()
            .map_or(SchemaVersion::EMPTY, Migration::version)
    }

    /// Read the version persisted in `connection`.
    pub fn current_version(connection: &Connection) -> Result<SchemaVersion, MigrationError> {
        ensure_bookkeeping(connection)?;
        connection
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
                [],
                |row| row.get::<_, u32>(0),
            )
            .map(SchemaVersion)
            .map_err(|source| MigrationError::ReadVersion { source })
    }

    /// Bring `connection` to the latest known version.
    pub fn migrate_to_latest(
        &self,
        connection: &mut Connection,
    ) -> Result<MigrationReport, MigrationError> {
        self.migrate(connection, self.latest())
    }

    /// Apply every step between the persisted version and `target`.
    ///
    /// Steps committed before a failure stay committed; the failing step is
    /// rolled back and reported as [`MigrationError::Failed`]. Calling again
    /// resumes from the persisted version.
    pub fn migrate(
        &self,
        connection: &mut Connection,
        target: SchemaVersion,
    ) -> Result<MigrationReport, MigrationError> {
        let latest = self.latest();
        if target > latest {
            return Err(MigrationError::UnknownTarget { target, latest });
        }

        let from = Self::current_version(connection)?;
        if from > target {
            return Err(MigrationError::Downgrade {
                current: from,
                target,
            });
        }

        let mut applied = Vec::new();
        for step in self
            .steps
            .iter()
            .filter(|step| step.version > from && step.version <= target)
        {
            apply_step(connection, step)?;
            applied.push(step.version);
        }

        if applied.is_empty() {
            debug!("schema already at {from}; nothing to migrate");
        } else {
            info!("migrated schema from {from} to {target}");
        }

        Ok(MigrationReport {
            from,
            to: target,
            applied,
        })
    }
}

fn ensure_bookkeeping(connection: &Connection) -> Result<(), MigrationError> {
    connection
        .execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY CHECK (version > 0),
                name TEXT NOT NULL,
                applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
            ) WITHOUT ROWID",
        )
        .map_err(|source| MigrationError::ReadVersion { source })
}

fn apply_step(connection: &mut Connection, step: &Migration) -> Result<(), MigrationError> {
    let failed = |source| MigrationError::Failed {
        version: step.version,
        name: step.name,
        source,
    };

    debug!("applying migration {} ({})", step.version, step.name);
    let transaction = connection
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(failed)?;
    step.apply(&transaction).map_err(failed)?;
    transaction
        .execute(
            "INSERT INTO schema_migrations (version, name) VALUES (?1, ?2)",
            (step.version.get(), step.name),
        )
        .map_err(failed)?;
    transaction.commit().map_err(failed)
}
