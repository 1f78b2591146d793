//! SQLite-backed store.

use crate::adapter::StoreAdapter;
use crate::error::{StoreError, StoreResult};
use crate::record::{
    millis_to_utc, now_millis, ActionRow, ActionStatus, CachedRecord, NewAction, RecordFilter,
};
use crate::schema::{
    create_statements, drop_statements, indexed_values, EntityTable, OUTBOX_TABLE,
    SCHEMA_VERSION, STAT_TABLE,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OpenFlags, OptionalExtension, Row};
use std::path::{Path, PathBuf};

const ACTION_COLUMNS: &str =
    "id, seq, kind, payload, attempts, status, created_at, updated_at, last_error";

/// A store persisted in a SQLite database.
///
/// All statements run under one connection lock, so writes are serialized
/// and every call observes the effects of earlier calls.
///
/// # Example
///
/// ```rust,no_run
/// use driftsync_store::{SqliteStore, StoreAdapter, EntityTable};
/// use serde_json::json;
///
/// # async fn demo() -> driftsync_store::StoreResult<()> {
/// let store = SqliteStore::open("app.db")?;
/// store.upsert(EntityTable::Wallet, "u1", &json!({"user_id": "u1", "balance": 5})).await?;
/// assert!(store.get_by_id(EntityTable::Wallet, "u1").await?.is_some());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Opens or creates a store file, migrating its schema if needed.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::init(conn, Some(path.to_path_buf()))
    }

    /// Opens an existing store file without migrating it.
    ///
    /// Fails with [`StoreError::SchemaMismatch`] when the file was written
    /// with another schema version, leaving its contents untouched. A
    /// missing file is an error rather than a new database.
    pub fn open_existing(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        let found: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
        if found != SCHEMA_VERSION {
            return Err(StoreError::SchemaMismatch {
                found,
                expected: SCHEMA_VERSION,
            });
        }
        tracing::debug!(path = %path.display(), version = found, "opened existing sqlite store");
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    /// Opens a private in-memory store.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?, None)
    }

    /// Returns the database path, or `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> StoreResult<Self> {
        migrate(&conn)?;
        tracing::debug!(path = ?path, version = SCHEMA_VERSION, "opened sqlite store");
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }
}

fn migrate(conn: &Connection) -> StoreResult<()> {
    let stored: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    if stored == SCHEMA_VERSION {
        conn.execute_batch(&create_statements())?;
        return Ok(());
    }
    if stored != 0 {
        tracing::warn!(
            stored,
            current = SCHEMA_VERSION,
            "schema version changed, dropping cached data"
        );
    }
    conn.execute_batch(&format!(
        "BEGIN;\n{}{}COMMIT;",
        drop_statements(),
        create_statements()
    ))?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}

fn read_record(row: &Row<'_>) -> rusqlite::Result<(String, String, i64)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}

fn to_record(table: EntityTable, raw: (String, String, i64)) -> StoreResult<CachedRecord> {
    let (id, payload, last_synced_at) = raw;
    Ok(CachedRecord {
        table,
        id,
        payload: serde_json::from_str(&payload)?,
        last_synced_at: millis_to_utc(last_synced_at),
    })
}

struct RawAction {
    id: String,
    seq: i64,
    kind: String,
    payload: String,
    attempts: i64,
    status: String,
    created_at: i64,
    updated_at: i64,
    last_error: Option<String>,
}

fn read_action(row: &Row<'_>) -> rusqlite::Result<RawAction> {
    Ok(RawAction {
        id: row.get(0)?,
        seq: row.get(1)?,
        kind: row.get(2)?,
        payload: row.get(3)?,
        attempts: row.get(4)?,
        status: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
        last_error: row.get(8)?,
    })
}

impl RawAction {
    fn into_row(self) -> StoreResult<ActionRow> {
        let attempts = u32::try_from(self.attempts).map_err(|_| {
            StoreError::corrupted(format!(
                "action {} has invalid attempt count {}",
                self.id, self.attempts
            ))
        })?;
        Ok(ActionRow {
            status: self.status.parse()?,
            payload: serde_json::from_str(&self.payload)?,
            id: self.id,
            seq: self.seq,
            kind: self.kind,
            attempts,
            created_at: self.created_at,
            updated_at: self.updated_at,
            last_error: self.last_error,
        })
    }
}

fn select_action(conn: &Connection, id: &str) -> StoreResult<Option<ActionRow>> {
    let raw = conn
        .query_row(
            &format!("SELECT {ACTION_COLUMNS} FROM {OUTBOX_TABLE} WHERE id = ?1"),
            params![id],
            read_action,
        )
        .optional()?;
    raw.map(RawAction::into_row).transpose()
}

fn require_changed(changed: usize, id: &str) -> StoreResult<()> {
    if changed == 0 {
        return Err(StoreError::ActionNotFound(id.to_string()));
    }
    Ok(())
}

#[async_trait]
impl StoreAdapter for SqliteStore {
    async fn schema_version(&self) -> StoreResult<i32> {
        let conn = self.conn.lock();
        Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
    }

    async fn upsert(
        &self,
        table: EntityTable,
        id: &str,
        payload: &serde_json::Value,
    ) -> StoreResult<()> {
        let indexed = indexed_values(table, payload);
        let mut columns = vec!["id", "payload", "last_synced_at"];
        let mut values = vec![
            SqlValue::Text(id.to_string()),
            SqlValue::Text(serde_json::to_string(payload)?),
            SqlValue::Integer(now_millis()),
        ];
        for (column, value) in indexed {
            columns.push(column);
            values.push(value.map_or(SqlValue::Null, SqlValue::Text));
        }

        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
        let updates: Vec<String> = columns[1..]
            .iter()
            .map(|column| format!("{column} = excluded.{column}"))
            .collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT(id) DO UPDATE SET {}",
            table.sql_table(),
            columns.join(", "),
            placeholders.join(", "),
            updates.join(", "),
        );

        let conn = self.conn.lock();
        conn.execute(&sql, params_from_iter(values.iter()))?;
        Ok(())
    }

    async fn get_by_id(&self, table: EntityTable, id: &str) -> StoreResult<Option<CachedRecord>> {
        let raw = {
            let conn = self.conn.lock();
            conn.query_row(
                &format!(
                    "SELECT id, payload, last_synced_at FROM {} WHERE id = ?1",
                    table.sql_table()
                ),
                params![id],
                read_record,
            )
            .optional()?
        };
        raw.map(|raw| to_record(table, raw)).transpose()
    }

    async fn get_all(
        &self,
        table: EntityTable,
        filter: &RecordFilter,
    ) -> StoreResult<Vec<CachedRecord>> {
        filter.validate(table)?;

        let mut sql = format!(
            "SELECT id, payload, last_synced_at FROM {}",
            table.sql_table()
        );
        let clauses: Vec<String> = filter
            .conditions()
            .iter()
            .enumerate()
            .map(|(i, (column, _))| format!("{column} = ?{}", i + 1))
            .collect();
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY id");
        if let Some(limit) = filter.max_rows() {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let raws = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(
                params_from_iter(filter.conditions().iter().map(|(_, value)| value)),
                read_record,
            )?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        raws.into_iter().map(|raw| to_record(table, raw)).collect()
    }

    async fn count_records(&self, table: EntityTable) -> StoreResult<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", table.sql_table()),
            [],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    async fn enqueue_action(&self, action: NewAction) -> StoreResult<ActionRow> {
        let payload = serde_json::to_string(&action.payload)?;
        let conn = self.conn.lock();
        conn.execute(
            &format!(
                "INSERT OR IGNORE INTO {OUTBOX_TABLE} \
                 (id, kind, payload, attempts, status, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, 0, ?4, ?5, ?5)"
            ),
            params![
                action.id,
                action.kind,
                payload,
                ActionStatus::Pending.as_str(),
                action.created_at
            ],
        )?;
        select_action(&conn, &action.id)?
            .ok_or_else(|| StoreError::corrupted(format!("action {} vanished", action.id)))
    }

    async fn get_action(&self, id: &str) -> StoreResult<Option<ActionRow>> {
        let conn = self.conn.lock();
        select_action(&conn, id)
    }

    async fn oldest_eligible_action(&self, max_attempts: u32) -> StoreResult<Option<ActionRow>> {
        let raw = {
            let conn = self.conn.lock();
            conn.query_row(
                &format!(
                    "SELECT {ACTION_COLUMNS} FROM {OUTBOX_TABLE} \
                     WHERE status IN ('pending', 'failed') AND attempts < ?1 \
                     ORDER BY created_at, seq LIMIT 1"
                ),
                params![max_attempts],
                read_action,
            )
            .optional()?
        };
        raw.map(RawAction::into_row).transpose()
    }

    async fn set_action_status(&self, id: &str, status: ActionStatus) -> StoreResult<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            &format!("UPDATE {OUTBOX_TABLE} SET status = ?2, updated_at = ?3 WHERE id = ?1"),
            params![id, status.as_str(), now_millis()],
        )?;
        require_changed(changed, id)
    }

    async fn record_action_failure(
        &self,
        id: &str,
        error: &str,
        max_attempts: u32,
    ) -> StoreResult<ActionRow> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let current =
            select_action(&tx, id)?.ok_or_else(|| StoreError::ActionNotFound(id.to_string()))?;
        let attempts = current.attempts.saturating_add(1);
        let status = if attempts >= max_attempts {
            ActionStatus::Dead
        } else {
            ActionStatus::Failed
        };
        tx.execute(
            &format!(
                "UPDATE {OUTBOX_TABLE} \
                 SET attempts = ?2, status = ?3, last_error = ?4, updated_at = ?5 \
                 WHERE id = ?1"
            ),
            params![id, attempts, status.as_str(), error, now_millis()],
        )?;
        let updated =
            select_action(&tx, id)?.ok_or_else(|| StoreError::ActionNotFound(id.to_string()))?;
        tx.commit()?;
        Ok(updated)
    }

    async fn mark_action_dead(&self, id: &str, reason: &str) -> StoreResult<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            &format!(
                "UPDATE {OUTBOX_TABLE} SET status = 'dead', last_error = ?2, updated_at = ?3 \
                 WHERE id = ?1"
            ),
            params![id, reason, now_millis()],
        )?;
        require_changed(changed, id)
    }

    async fn delete_action(&self, id: &str) -> StoreResult<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            &format!("DELETE FROM {OUTBOX_TABLE} WHERE id = ?1"),
            params![id],
        )?;
        Ok(changed > 0)
    }

    async fn list_actions(&self, status: Option<ActionStatus>) -> StoreResult<Vec<ActionRow>> {
        let raws = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare(&format!(
                "SELECT {ACTION_COLUMNS} FROM {OUTBOX_TABLE} \
                 WHERE ?1 IS NULL OR status = ?1 ORDER BY created_at, seq"
            ))?;
            let rows = stmt.query_map(params![status.map(|s| s.as_str())], read_action)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        raws.into_iter().map(RawAction::into_row).collect()
    }

    async fn count_eligible_actions(&self, max_attempts: u32) -> StoreResult<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {OUTBOX_TABLE} \
                 WHERE status IN ('pending', 'failed') AND attempts < ?1"
            ),
            params![max_attempts],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    async fn reset_interrupted_actions(&self) -> StoreResult<u64> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            &format!(
                "UPDATE {OUTBOX_TABLE} SET status = 'pending', updated_at = ?1 \
                 WHERE status = 'syncing'"
            ),
            params![now_millis()],
        )?;
        Ok(changed as u64)
    }

    async fn bury_exhausted_actions(&self, max_attempts: u32) -> StoreResult<u64> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            &format!(
                "UPDATE {OUTBOX_TABLE} \
                 SET status = 'dead', \
                     last_error = COALESCE(last_error, 'attempts exhausted'), \
                     updated_at = ?2 \
                 WHERE status != 'dead' AND attempts >= ?1"
            ),
            params![max_attempts, now_millis()],
        )?;
        Ok(changed as u64)
    }

    async fn revive_action(&self, id: &str) -> StoreResult<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            &format!(
                "UPDATE {OUTBOX_TABLE} \
                 SET status = 'pending', attempts = 0, last_error = NULL, updated_at = ?2 \
                 WHERE id = ?1 AND status = 'dead'"
            ),
            params![id, now_millis()],
        )?;
        if changed > 0 {
            return Ok(true);
        }
        match select_action(&conn, id)? {
            Some(_) => Ok(false),
            None => Err(StoreError::ActionNotFound(id.to_string())),
        }
    }

    async fn purge_dead_actions(&self) -> StoreResult<u64> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            &format!("DELETE FROM {OUTBOX_TABLE} WHERE status = 'dead'"),
            [],
        )?;
        Ok(changed as u64)
    }

    async fn get_stat(&self, key: &str) -> StoreResult<Option<String>> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row(
                &format!("SELECT value FROM {STAT_TABLE} WHERE key = ?1"),
                params![key],
                |row| row.get(0),
            )
            .optional()?)
    }

    async fn set_stat(&self, key: &str, value: &str) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            &format!(
                "INSERT INTO {STAT_TABLE} (key, value) VALUES (?1, ?2) \
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value"
            ),
            params![key, value],
        )?;
        Ok(())
    }

    async fn increment_stat(&self, key: &str, by: i64) -> StoreResult<i64> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let current: Option<String> = tx
            .query_row(
                &format!("SELECT value FROM {STAT_TABLE} WHERE key = ?1"),
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        let current = match current {
            Some(text) => text.parse::<i64>().map_err(|_| {
                StoreError::corrupted(format!("stat {key} is not numeric: '{text}'"))
            })?,
            None => 0,
        };
        let next = current.saturating_add(by);
        tx.execute(
            &format!(
                "INSERT INTO {STAT_TABLE} (key, value) VALUES (?1, ?2) \
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value"
            ),
            params![key, next.to_string()],
        )?;
        tx.commit()?;
        Ok(next)
    }

    async fn list_stats(&self) -> StoreResult<Vec<(String, String)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!("SELECT key, value FROM {STAT_TABLE} ORDER BY key"))?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let stats = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(stats)
    }

    async fn clear_table(&self, table: EntityTable) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(&format!("DELETE FROM {}", table.sql_table()), [])?;
        Ok(())
    }

    async fn clear_all(&self) -> StoreResult<()> {
        let mut sql = String::from("BEGIN;\n");
        for table in EntityTable::ALL {
            sql.push_str(&format!("DELETE FROM {};\n", table.sql_table()));
        }
        sql.push_str(&format!(
            "DELETE FROM {OUTBOX_TABLE};\nDELETE FROM {STAT_TABLE};\nCOMMIT;"
        ));
        let conn = self.conn.lock();
        conn.execute_batch(&sql)?;
        tracing::info!("cleared local store");
        Ok(())
    }
}
