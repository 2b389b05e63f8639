//! Key/value preferences and set-valued preferences.
//!
//! Scalar preferences live in `preferences`. Sets such as dismissed tile ids
//! live one member per row in `preference_sets`, so adding or removing a
//! member never rewrites the rest of the set.

use std::collections::BTreeSet;

use rusqlite::OptionalExtension;

use super::{
    SqliteStore, StoreError,
    sqlite::{SqliteContext, StoreTransaction},
};

impl SqliteStore {
    /// Read a scalar preference.
    pub fn preference(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.read(|connection| {
            connection
                .query_row(
                    "SELECT value FROM preferences WHERE key = ?1",
                    [key],
                    |row| row.get(0),
                )
                .optional()
                .during("read preference")
        })
    }

    /// Store a scalar preference, replacing any previous value.
    pub fn set_preference(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.write("set preference", |transaction| {
            transaction.set_preference(key, value)
        })
    }

    /// Delete a scalar preference. Returns whether a value was present.
    pub fn remove_preference(&self, key: &str) -> Result<bool, StoreError> {
        self.write("remove preference", |transaction| {
            let removed = transaction
                .connection()
                .execute("DELETE FROM preferences WHERE key = ?1", [key])
                .during("delete preference")?;
            Ok(removed > 0)
        })
    }

    /// Every member of a set-valued preference. Unknown keys yield an empty
    /// set.
    pub fn preference_set(&self, key: &str) -> Result<BTreeSet<String>, StoreError> {
        self.read(|connection| {
            let mut statement = connection
                .prepare_cached("SELECT member FROM preference_sets WHERE key = ?1")
                .during("prepare preference set query")?;
            statement
                .query_map([key], |row| row.get(0))
                .during("query preference set")?
                .collect::<Result<BTreeSet<String>, _>>()
                .during("read preference set")
        })
    }

    /// Add `member` to a set-valued preference. Returns `false` when it was
    /// already present.
    ///
    /// Members are trimmed; blank members are rejected.
    pub fn add_to_preference_set(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let member = require_member(key, member)?;
        self.write("add preference set member", |transaction| {
            let inserted = transaction
                .connection()
                .execute(
                    "INSERT OR IGNORE INTO preference_sets (key, member) VALUES (?1, ?2)",
                    (key, member),
                )
                .during("insert preference set member")?;
            Ok(inserted > 0)
        })
    }

    /// Remove `member` from a set-valued preference. Returns whether it was
    /// present.
    pub fn remove_from_preference_set(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        self.write("remove preference set member", |transaction| {
            let removed = transaction
                .connection()
                .execute(
                    "DELETE FROM preference_sets WHERE key = ?1 AND member = ?2",
                    (key, member.trim()),
                )
                .during("delete preference set member")?;
            Ok(removed > 0)
        })
    }
}

impl StoreTransaction<'_> {
    /// Store a scalar preference as part of this transaction.
    pub fn set_preference(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.connection()
            .execute(
                "INSERT INTO preferences (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                (key, value),
            )
            .during("upsert preference")?;
        Ok(())
    }
}

fn require_member<'a>(key: &str, member: &'a str) -> Result<&'a str, StoreError> {
    let trimmed = member.trim();
    if trimmed.is_empty() {
        return Err(StoreError::BlankPreferenceMember {
            key: key.to_owned(),
        });
    }
    Ok(trimmed)
}
