//! CLI command implementations.

pub mod clear;
pub mod drain;
pub mod inspect;
pub mod outbox;
pub mod probe;
pub mod purge;
pub mod revive;

use driftsync_store::SqliteStore;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// Result type of every command.
pub type CommandResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// Opens an existing client database.
///
/// The schema is never migrated: a database written by another build is
/// refused so its outbox survives inspection.
pub fn open_store(path: &Path) -> CommandResult<Arc<SqliteStore>> {
    if !path.exists() {
        return Err(format!("No database found at {}", path.display()).into());
    }
    Ok(Arc::new(SqliteStore::open_existing(path)?))
}

/// Prints `value` as pretty JSON, or runs `text` for any other format.
pub fn emit<T: Serialize>(format: &str, value: &T, text: impl FnOnce(&T)) -> CommandResult {
    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
        _ => text(value),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_database_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = open_store(&dir.path().join("missing.db")).unwrap_err();
        assert!(err.to_string().starts_with("No database found"));
    }

    #[tokio::test]
    async fn other_schema_version_is_left_untouched() {
        use driftsync_store::{NewAction, StoreAdapter, OUTBOX_TABLE, SCHEMA_VERSION};

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .enqueue_action(NewAction {
                    id: "a1".into(),
                    kind: "EARN_CREDITS".into(),
                    payload: serde_json::json!({"user_id": "u1", "amount": 1}),
                    created_at: 1,
                })
                .await
                .unwrap();
        }
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.pragma_update(None, "user_version", SCHEMA_VERSION + 1)
            .unwrap();

        let err = super::inspect::run(&path, "json").await.unwrap_err();
        assert!(err.to_string().contains("schema version"));
        assert!(super::outbox::run(&path, None, None, "json").await.is_err());

        let rows: i64 = conn
            .query_row(&format!("SELECT COUNT(*) FROM {OUTBOX_TABLE}"), [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(rows, 1);
    }
}
