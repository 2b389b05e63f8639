//! The store's schema history.
//!
//! Steps only ever append. Editing a shipped step changes databases that
//! already recorded it, so corrections go into a new step.

use rusqlite::{Error as SqliteError, OptionalExtension, Transaction};

use super::{Migration, SchemaVersion};

/// Version produced by the last shipped migration.
pub const CURRENT_SCHEMA_VERSION: SchemaVersion = SchemaVersion::new(6);

/// Separator used by the preference values that step 6 converts into set
/// rows.
pub const LEGACY_SET_DELIMITER: char = ',';

/// Preference keys that held delimiter-joined id lists before step 6.
const LEGACY_SET_KEYS: [&str; 1] = ["dismissed_tile_ids"];

/// The ordered migration plan shipped with this build.
#[must_use]
pub fn shipped_migrations() -> Vec<Migration> {
    vec![
        Migration::sql(
            1,
            "create stops and preferences",
            "CREATE TABLE IF NOT EXISTS stops (
                stop_id TEXT PRIMARY KEY CHECK (length(trim(stop_id)) > 0),
                name TEXT NOT NULL,
                latitude REAL NOT NULL,
                longitude REAL NOT NULL
            ) WITHOUT ROWID;
            CREATE TABLE IF NOT EXISTS preferences (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            ) WITHOUT ROWID;",
        ),
        Migration::sql(
            2,
            "add stop transport modes",
            "ALTER TABLE stops ADD COLUMN transport_modes INTEGER NOT NULL DEFAULT 0",
        ),
        Migration::sql(
            3,
            "create routes",
            "CREATE TABLE IF NOT EXISTS routes (
                route_id TEXT PRIMARY KEY CHECK (length(trim(route_id)) > 0),
                short_name TEXT NOT NULL,
                long_name TEXT,
                mode TEXT NOT NULL
            ) WITHOUT ROWID",
        ),
        Migration::sql(
            4,
            "create park and ride facilities",
            "CREATE TABLE IF NOT EXISTS park_ride_facilities (
                facility_id TEXT PRIMARY KEY CHECK (length(trim(facility_id)) > 0),
                name TEXT NOT NULL,
                latitude REAL NOT NULL,
                longitude REAL NOT NULL,
                capacity INTEGER CHECK (capacity IS NULL OR capacity >= 0)
            ) WITHOUT ROWID",
        ),
        Migration::sql(
            5,
            "index stop coordinates",
            "CREATE INDEX IF NOT EXISTS idx_stops_location ON stops(longitude, latitude)",
        ),
        Migration::transform(6, "split legacy preference lists", split_legacy_sets),
    ]
}

fn split_legacy_sets(transaction: &Transaction<'_>) -> Result<(), SqliteError> {
    transaction.execute_batch(
        "CREATE TABLE IF NOT EXISTS preference_sets (
            key TEXT NOT NULL,
            member TEXT NOT NULL CHECK (length(trim(member)) > 0),
            PRIMARY KEY (key, member)
        ) WITHOUT ROWID",
    )?;

    let mut read = transaction.prepare("SELECT value FROM preferences WHERE key = ?1")?;
    let mut insert = transaction
        .prepare("INSERT OR IGNORE INTO preference_sets (key, member) VALUES (?1, ?2)")?;
    for key in LEGACY_SET_KEYS {
        let joined: Option<String> = read
            .query_row([key], |row| row.get(0))
            .optional()?;
        let Some(joined) = joined else {
            continue;
        };
        for member in joined
            .split(LEGACY_SET_DELIMITER)
            .map(str::trim)
            .filter(|member| !member.is_empty())
        {
            insert.execute((key, member))?;
        }
        transaction.execute("DELETE FROM preferences WHERE key = ?1", [key])?;
    }
    Ok(())
}
