//! The store adapter trait.

use crate::error::StoreResult;
use crate::record::{ActionRow, ActionStatus, CachedRecord, NewAction, RecordFilter};
use crate::schema::EntityTable;
use async_trait::async_trait;

/// Typed access to the local cache, outbox and stat tables.
///
/// Implementations hide per-entity schema differences: every table is
/// reachable through the same generic calls, while tables with indexed
/// columns additionally support filtered reads.
///
/// # Invariants
///
/// - A missing row is `Ok(None)` or an empty list, never an error.
/// - `upsert` replaces the whole payload and is idempotent.
/// - Outbox rows are returned in `(created_at, seq)` order.
/// - Implementations must be `Send + Sync`; statements are serialized
///   internally so callers never need their own lock.
#[async_trait]
pub trait StoreAdapter: Send + Sync {
    /// Returns the schema version of the open store.
    async fn schema_version(&self) -> StoreResult<i32>;

    // --- cache ---

    /// Inserts or fully replaces the record `(table, id)`.
    async fn upsert(
        &self,
        table: EntityTable,
        id: &str,
        payload: &serde_json::Value,
    ) -> StoreResult<()>;

    /// Returns the record `(table, id)` if cached.
    async fn get_by_id(&self, table: EntityTable, id: &str) -> StoreResult<Option<CachedRecord>>;

    /// Returns the records of `table` matching `filter`, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StoreError::UnknownColumn`] if the filter names a
    /// column that `table` does not index.
    async fn get_all(
        &self,
        table: EntityTable,
        filter: &RecordFilter,
    ) -> StoreResult<Vec<CachedRecord>>;

    /// Returns the number of cached rows in `table`.
    async fn count_records(&self, table: EntityTable) -> StoreResult<u64>;

    // --- outbox ---

    /// Appends an action in `pending` state.
    ///
    /// Enqueueing an id that already exists leaves the stored row
    /// untouched and returns it.
    async fn enqueue_action(&self, action: NewAction) -> StoreResult<ActionRow>;

    /// Returns the action with `id`, whatever its status.
    async fn get_action(&self, id: &str) -> StoreResult<Option<ActionRow>>;

    /// Returns the oldest action that is `pending` or `failed` and has
    /// fewer than `max_attempts` attempts.
    async fn oldest_eligible_action(&self, max_attempts: u32) -> StoreResult<Option<ActionRow>>;

    /// Sets the status of an action.
    async fn set_action_status(&self, id: &str, status: ActionStatus) -> StoreResult<()>;

    /// Records a failed replay: increments `attempts` and moves the action
    /// to `failed`, or to `dead` once `max_attempts` is reached.
    async fn record_action_failure(
        &self,
        id: &str,
        error: &str,
        max_attempts: u32,
    ) -> StoreResult<ActionRow>;

    /// Moves an action to the terminal `dead` state.
    async fn mark_action_dead(&self, id: &str, reason: &str) -> StoreResult<()>;

    /// Removes an action. Returns false if it did not exist.
    async fn delete_action(&self, id: &str) -> StoreResult<bool>;

    /// Lists actions, optionally restricted to one status.
    async fn list_actions(&self, status: Option<ActionStatus>) -> StoreResult<Vec<ActionRow>>;

    /// Counts actions eligible for replay.
    async fn count_eligible_actions(&self, max_attempts: u32) -> StoreResult<u64>;

    /// Moves every `syncing` action back to `pending`.
    ///
    /// A `syncing` row found at startup was interrupted mid-dispatch.
    async fn reset_interrupted_actions(&self) -> StoreResult<u64>;

    /// Marks `dead` every live action whose attempts reached `max_attempts`.
    async fn bury_exhausted_actions(&self, max_attempts: u32) -> StoreResult<u64>;

    /// Returns a `dead` action to `pending` with its attempts reset.
    ///
    /// Returns false if the action exists but is not dead.
    async fn revive_action(&self, id: &str) -> StoreResult<bool>;

    /// Deletes every `dead` action.
    async fn purge_dead_actions(&self) -> StoreResult<u64>;

    // --- stats ---

    /// Reads a stat value.
    async fn get_stat(&self, key: &str) -> StoreResult<Option<String>>;

    /// Writes a stat value.
    async fn set_stat(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Adds `by` to a numeric stat (missing counts as zero) and returns the
    /// new value.
    async fn increment_stat(&self, key: &str, by: i64) -> StoreResult<i64>;

    /// Returns every stat, ordered by key.
    async fn list_stats(&self) -> StoreResult<Vec<(String, String)>>;

    // --- clear ---

    /// Deletes every cached row of `table`.
    async fn clear_table(&self, table: EntityTable) -> StoreResult<()>;

    /// Deletes every cached row, outbox action and stat.
    async fn clear_all(&self) -> StoreResult<()>;
}
