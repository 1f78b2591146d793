//! In-memory store for tests and ephemeral sessions.

use crate::adapter::StoreAdapter;
use crate::error::{StoreError, StoreResult};
use crate::record::{
    millis_to_utc, now_millis, ActionRow, ActionStatus, CachedRecord, NewAction, RecordFilter,
};
use crate::schema::{EntityTable, SCHEMA_VERSION};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Default)]
struct MemoryState {
    tables: HashMap<EntityTable, BTreeMap<String, (serde_json::Value, i64)>>,
    outbox: Vec<ActionRow>,
    next_seq: i64,
    stats: BTreeMap<String, String>,
}

impl MemoryState {
    fn action_mut(&mut self, id: &str) -> StoreResult<&mut ActionRow> {
        self.outbox
            .iter_mut()
            .find(|row| row.id == id)
            .ok_or_else(|| StoreError::ActionNotFound(id.to_string()))
    }
}

/// A store that keeps everything in process memory.
///
/// Observable semantics match [`crate::SqliteStore`]: the same filter rules,
/// the same outbox ordering and the same status transitions. Nothing
/// survives the process.
///
/// # Example
///
/// ```rust
/// use driftsync_store::{MemoryStore, StoreAdapter, EntityTable};
/// use serde_json::json;
///
/// # tokio_test_block_on(async {
/// let store = MemoryStore::new();
/// store.upsert(EntityTable::Course, "c1", &json!({"id": "c1"})).await.unwrap();
/// assert_eq!(store.count_records(EntityTable::Course).await.unwrap(), 1);
/// # });
/// # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn sorted_outbox(state: &MemoryState) -> Vec<ActionRow> {
        let mut rows = state.outbox.clone();
        rows.sort_by_key(|row| (row.created_at, row.seq));
        rows
    }
}

#[async_trait]
impl StoreAdapter for MemoryStore {
    async fn schema_version(&self) -> StoreResult<i32> {
        Ok(SCHEMA_VERSION)
    }

    async fn upsert(
        &self,
        table: EntityTable,
        id: &str,
        payload: &serde_json::Value,
    ) -> StoreResult<()> {
        self.state
            .write()
            .tables
            .entry(table)
            .or_default()
            .insert(id.to_string(), (payload.clone(), now_millis()));
        Ok(())
    }

    async fn get_by_id(&self, table: EntityTable, id: &str) -> StoreResult<Option<CachedRecord>> {
        let state = self.state.read();
        Ok(state
            .tables
            .get(&table)
            .and_then(|rows| rows.get(id))
            .map(|(payload, at)| CachedRecord {
                table,
                id: id.to_string(),
                payload: payload.clone(),
                last_synced_at: millis_to_utc(*at),
            }))
    }

    async fn get_all(
        &self,
        table: EntityTable,
        filter: &RecordFilter,
    ) -> StoreResult<Vec<CachedRecord>> {
        filter.validate(table)?;
        let state = self.state.read();
        let Some(rows) = state.tables.get(&table) else {
            return Ok(Vec::new());
        };
        Ok(rows
            .iter()
            .filter(|(_, (payload, _))| filter.matches(payload))
            .take(filter.max_rows().unwrap_or(usize::MAX))
            .map(|(id, (payload, at))| CachedRecord {
                table,
                id: id.clone(),
                payload: payload.clone(),
                last_synced_at: millis_to_utc(*at),
            })
            .collect())
    }

    async fn count_records(&self, table: EntityTable) -> StoreResult<u64> {
        let state = self.state.read();
        Ok(state.tables.get(&table).map_or(0, |rows| rows.len() as u64))
    }

    async fn enqueue_action(&self, action: NewAction) -> StoreResult<ActionRow> {
        let mut state = self.state.write();
        if let Some(existing) = state.outbox.iter().find(|row| row.id == action.id) {
            return Ok(existing.clone());
        }
        state.next_seq += 1;
        let row = ActionRow {
            id: action.id,
            seq: state.next_seq,
            kind: action.kind,
            payload: action.payload,
            attempts: 0,
            status: ActionStatus::Pending,
            created_at: action.created_at,
            updated_at: action.created_at,
            last_error: None,
        };
        state.outbox.push(row.clone());
        Ok(row)
    }

    async fn get_action(&self, id: &str) -> StoreResult<Option<ActionRow>> {
        let state = self.state.read();
        Ok(state.outbox.iter().find(|row| row.id == id).cloned())
    }

    async fn oldest_eligible_action(&self, max_attempts: u32) -> StoreResult<Option<ActionRow>> {
        let state = self.state.read();
        Ok(state
            .outbox
            .iter()
            .filter(|row| row.is_eligible(max_attempts))
            .min_by_key(|row| (row.created_at, row.seq))
            .cloned())
    }

    async fn set_action_status(&self, id: &str, status: ActionStatus) -> StoreResult<()> {
        let mut state = self.state.write();
        let row = state.action_mut(id)?;
        row.status = status;
        row.updated_at = now_millis();
        Ok(())
    }

    async fn record_action_failure(
        &self,
        id: &str,
        error: &str,
        max_attempts: u32,
    ) -> StoreResult<ActionRow> {
        let mut state = self.state.write();
        let row = state.action_mut(id)?;
        row.attempts = row.attempts.saturating_add(1);
        row.status = if row.attempts >= max_attempts {
            ActionStatus::Dead
        } else {
            ActionStatus::Failed
        };
        row.last_error = Some(error.to_string());
        row.updated_at = now_millis();
        Ok(row.clone())
    }

    async fn mark_action_dead(&self, id: &str, reason: &str) -> StoreResult<()> {
        let mut state = self.state.write();
        let row = state.action_mut(id)?;
        row.status = ActionStatus::Dead;
        row.last_error = Some(reason.to_string());
        row.updated_at = now_millis();
        Ok(())
    }

    async fn delete_action(&self, id: &str) -> StoreResult<bool> {
        let mut state = self.state.write();
        let before = state.outbox.len();
        state.outbox.retain(|row| row.id != id);
        Ok(state.outbox.len() < before)
    }

    async fn list_actions(&self, status: Option<ActionStatus>) -> StoreResult<Vec<ActionRow>> {
        let state = self.state.read();
        let mut rows = Self::sorted_outbox(&state);
        if let Some(status) = status {
            rows.retain(|row| row.status == status);
        }
        Ok(rows)
    }

    async fn count_eligible_actions(&self, max_attempts: u32) -> StoreResult<u64> {
        let state = self.state.read();
        Ok(state
            .outbox
            .iter()
            .filter(|row| row.is_eligible(max_attempts))
            .count() as u64)
    }

    async fn reset_interrupted_actions(&self) -> StoreResult<u64> {
        let mut state = self.state.write();
        let now = now_millis();
        let mut reset = 0;
        for row in state
            .outbox
            .iter_mut()
            .filter(|row| row.status == ActionStatus::Syncing)
        {
            row.status = ActionStatus::Pending;
            row.updated_at = now;
            reset += 1;
        }
        Ok(reset)
    }

    async fn bury_exhausted_actions(&self, max_attempts: u32) -> StoreResult<u64> {
        let mut state = self.state.write();
        let now = now_millis();
        let mut buried = 0;
        for row in state
            .outbox
            .iter_mut()
            .filter(|row| row.status != ActionStatus::Dead && row.attempts >= max_attempts)
        {
            row.status = ActionStatus::Dead;
            row.last_error
                .get_or_insert_with(|| "attempts exhausted".to_string());
            row.updated_at = now;
            buried += 1;
        }
        Ok(buried)
    }

    async fn revive_action(&self, id: &str) -> StoreResult<bool> {
        let mut state = self.state.write();
        let row = state.action_mut(id)?;
        if row.status != ActionStatus::Dead {
            return Ok(false);
        }
        row.status = ActionStatus::Pending;
        row.attempts = 0;
        row.last_error = None;
        row.updated_at = now_millis();
        Ok(true)
    }

    async fn purge_dead_actions(&self) -> StoreResult<u64> {
        let mut state = self.state.write();
        let before = state.outbox.len();
        state.outbox.retain(|row| row.status != ActionStatus::Dead);
        Ok((before - state.outbox.len()) as u64)
    }

    async fn get_stat(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.state.read().stats.get(key).cloned())
    }

    async fn set_stat(&self, key: &str, value: &str) -> StoreResult<()> {
        self.state
            .write()
            .stats
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn increment_stat(&self, key: &str, by: i64) -> StoreResult<i64> {
        let mut state = self.state.write();
        let current = match state.stats.get(key) {
            Some(text) => text.parse::<i64>().map_err(|_| {
                StoreError::corrupted(format!("stat {key} is not numeric: '{text}'"))
            })?,
            None => 0,
        };
        let next = current.saturating_add(by);
        state.stats.insert(key.to_string(), next.to_string());
        Ok(next)
    }

    async fn list_stats(&self) -> StoreResult<Vec<(String, String)>> {
        let state = self.state.read();
        Ok(state
            .stats
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn clear_table(&self, table: EntityTable) -> StoreResult<()> {
        self.state.write().tables.remove(&table);
        Ok(())
    }

    async fn clear_all(&self) -> StoreResult<()> {
        let mut state = self.state.write();
        state.tables.clear();
        state.outbox.clear();
        state.stats.clear();
        Ok(())
    }
}
