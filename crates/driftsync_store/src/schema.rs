//! Managed tables and schema versioning.
//!
//! The store is a cache and an outbox, never the system of record, so
//! schema changes are handled by dropping and recreating every managed
//! table whenever [`SCHEMA_VERSION`] differs from the version stored in
//! the database file.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Current schema version, stored in `PRAGMA user_version`.
pub const SCHEMA_VERSION: i32 = 3;

/// Name of the generic outbox table.
pub const OUTBOX_TABLE: &str = "outbox";

/// Name of the generic key/value stat table.
pub const STAT_TABLE: &str = "system_stat";

/// An entity kind with its own cache table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityTable {
    /// User profiles, keyed by user id.
    Profile,
    /// Catalog courses, keyed by course id.
    Course,
    /// Catalog questions, keyed by question id.
    Question,
    /// Per-user course progress, keyed by `course_id:user_id`.
    Progress,
    /// Credit wallets, keyed by user id.
    Wallet,
}

impl EntityTable {
    /// Every cache table, in creation order.
    pub const ALL: [EntityTable; 5] = [
        EntityTable::Profile,
        EntityTable::Course,
        EntityTable::Question,
        EntityTable::Progress,
        EntityTable::Wallet,
    ];

    /// Returns the logical table name.
    pub fn name(&self) -> &'static str {
        match self {
            EntityTable::Profile => "profile",
            EntityTable::Course => "course",
            EntityTable::Question => "question",
            EntityTable::Progress => "progress",
            EntityTable::Wallet => "wallet",
        }
    }

    /// Returns the SQL table holding this entity's cache rows.
    pub fn sql_table(&self) -> &'static str {
        match self {
            EntityTable::Profile => "cache_profile",
            EntityTable::Course => "cache_course",
            EntityTable::Question => "cache_question",
            EntityTable::Progress => "cache_progress",
            EntityTable::Wallet => "cache_wallet",
        }
    }

    /// Returns the payload fields persisted as denormalized, indexed columns.
    pub fn indexed_columns(&self) -> &'static [&'static str] {
        match self {
            EntityTable::Question => &["course_id"],
            EntityTable::Progress => &["course_id", "user_id"],
            EntityTable::Profile | EntityTable::Course | EntityTable::Wallet => &[],
        }
    }

    /// Returns true if `column` is one of this table's indexed columns.
    pub fn indexes(&self, column: &str) -> bool {
        self.indexed_columns().contains(&column)
    }
}

impl fmt::Display for EntityTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EntityTable {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityTable::ALL
            .into_iter()
            .find(|table| table.name() == s)
            .ok_or_else(|| format!("unknown table '{s}'"))
    }
}

/// Extracts the indexed column values of `table` from a payload.
///
/// Missing or non-scalar fields yield `None`.
pub fn indexed_values(
    table: EntityTable,
    payload: &serde_json::Value,
) -> Vec<(&'static str, Option<String>)> {
    table
        .indexed_columns()
        .iter()
        .map(|column| (*column, payload.get(*column).and_then(scalar_to_string)))
        .collect()
}

/// Renders a scalar JSON value the way it is stored in an indexed column.
pub(crate) fn scalar_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// DDL creating every managed table.
pub(crate) fn create_statements() -> String {
    let mut sql = String::new();
    for table in EntityTable::ALL {
        let extra: String = table
            .indexed_columns()
            .iter()
            .map(|column| format!(", {column} TEXT"))
            .collect();
        sql.push_str(&format!(
            "CREATE TABLE IF NOT EXISTS {name} (\
                id TEXT PRIMARY KEY NOT NULL, \
                payload TEXT NOT NULL, \
                last_synced_at INTEGER NOT NULL{extra});\n",
            name = table.sql_table(),
        ));
        for column in table.indexed_columns() {
            sql.push_str(&format!(
                "CREATE INDEX IF NOT EXISTS idx_{name}_{column} ON {name} ({column});\n",
                name = table.sql_table(),
            ));
        }
    }
    sql.push_str(&format!(
        "CREATE TABLE IF NOT EXISTS {OUTBOX_TABLE} (\
            seq INTEGER PRIMARY KEY AUTOINCREMENT, \
            id TEXT NOT NULL UNIQUE, \
            kind TEXT NOT NULL, \
            payload TEXT NOT NULL, \
            attempts INTEGER NOT NULL DEFAULT 0, \
            status TEXT NOT NULL, \
            created_at INTEGER NOT NULL, \
            updated_at INTEGER NOT NULL, \
            last_error TEXT);\n\
         CREATE INDEX IF NOT EXISTS idx_{OUTBOX_TABLE}_order ON {OUTBOX_TABLE} (created_at, seq);\n\
         CREATE TABLE IF NOT EXISTS {STAT_TABLE} (\
            key TEXT PRIMARY KEY NOT NULL, \
            value TEXT NOT NULL);\n"
    ));
    sql
}

/// DDL dropping every managed table.
pub(crate) fn drop_statements() -> String {
    let mut sql = String::new();
    for table in EntityTable::ALL {
        sql.push_str(&format!("DROP TABLE IF EXISTS {};\n", table.sql_table()));
    }
    sql.push_str(&format!("DROP TABLE IF EXISTS {OUTBOX_TABLE};\n"));
    sql.push_str(&format!("DROP TABLE IF EXISTS {STAT_TABLE};\n"));
    sql
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn table_names_round_trip_through_from_str() {
        for table in EntityTable::ALL {
            assert_eq!(table.name().parse::<EntityTable>().unwrap(), table);
        }
        assert!("lesson".parse::<EntityTable>().is_err());
    }

    #[test]
    fn progress_indexes_course_and_user() {
        assert!(EntityTable::Progress.indexes("course_id"));
        assert!(EntityTable::Progress.indexes("user_id"));
        assert!(!EntityTable::Profile.indexes("user_id"));
    }

    #[test]
    fn indexed_values_reads_scalars_only() {
        let payload = json!({"course_id": "c1", "user_id": 42, "percent": 40});
        let values = indexed_values(EntityTable::Progress, &payload);
        assert_eq!(
            values,
            vec![
                ("course_id", Some("c1".to_string())),
                ("user_id", Some("42".to_string())),
            ]
        );

        let nested = json!({"course_id": {"id": "c1"}});
        assert_eq!(
            indexed_values(EntityTable::Question, &nested),
            vec![("course_id", None)]
        );
    }

    #[test]
    fn ddl_mentions_every_table() {
        let create = create_statements();
        let drop = drop_statements();
        for table in EntityTable::ALL {
            assert!(create.contains(table.sql_table()));
            assert!(drop.contains(table.sql_table()));
        }
        assert!(create.contains("idx_cache_question_course_id"));
        assert!(drop.contains(OUTBOX_TABLE));
        assert!(drop.contains(STAT_TABLE));
    }
}
