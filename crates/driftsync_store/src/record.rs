//! Row types shared by every store implementation.

use crate::error::{StoreError, StoreResult};
use crate::schema::{scalar_to_string, EntityTable};
use chrono::{DateTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// A cached entity row.
///
/// At most one record exists per `(table, id)`; writes replace the whole
/// payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedRecord {
    /// Entity kind.
    pub table: EntityTable,
    /// Identifier, unique within `table`.
    pub id: String,
    /// Full JSON payload of the entity.
    pub payload: serde_json::Value,
    /// When this row was last written.
    pub last_synced_at: DateTime<Utc>,
}

impl CachedRecord {
    /// Decodes the payload into a typed record.
    pub fn decode<T: DeserializeOwned>(&self) -> StoreResult<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// Equality filter over a table's indexed columns.
///
/// # Example
///
/// ```rust
/// use driftsync_store::RecordFilter;
///
/// let filter = RecordFilter::new().eq("course_id", "c1").limit(20);
/// assert_eq!(filter.conditions().len(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    conditions: Vec<(String, String)>,
    limit: Option<usize>,
}

impl RecordFilter {
    /// Creates a filter that matches every row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an equality condition.
    #[must_use]
    pub fn eq(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.conditions.push((column.into(), value.into()));
        self
    }

    /// Caps the number of returned rows.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns the equality conditions.
    pub fn conditions(&self) -> &[(String, String)] {
        &self.conditions
    }

    /// Returns the row cap, if any.
    pub fn max_rows(&self) -> Option<usize> {
        self.limit
    }

    /// Checks every condition targets an indexed column of `table`.
    pub fn validate(&self, table: EntityTable) -> StoreResult<()> {
        for (column, _) in &self.conditions {
            if !table.indexes(column) {
                return Err(StoreError::UnknownColumn {
                    table: table.name(),
                    column: column.clone(),
                });
            }
        }
        Ok(())
    }

    /// Evaluates the filter against a payload, reading the same fields the
    /// SQLite store denormalizes.
    pub fn matches(&self, payload: &serde_json::Value) -> bool {
        self.conditions.iter().all(|(column, expected)| {
            payload
                .get(column)
                .and_then(scalar_to_string)
                .is_some_and(|actual| &actual == expected)
        })
    }
}

/// Lifecycle state of an outbox action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    /// Waiting for its first replay.
    Pending,
    /// Currently being replayed.
    Syncing,
    /// Last replay failed; still eligible while under the attempt cap.
    Failed,
    /// Terminal: exhausted its attempts or was rejected by the server.
    Dead,
}

impl ActionStatus {
    /// Returns the stored representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Pending => "pending",
            ActionStatus::Syncing => "syncing",
            ActionStatus::Failed => "failed",
            ActionStatus::Dead => "dead",
        }
    }

    /// Returns true if actions in this state may be dispatched.
    pub fn is_replayable(&self) -> bool {
        matches!(self, ActionStatus::Pending | ActionStatus::Failed)
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ActionStatus::Pending),
            "syncing" => Ok(ActionStatus::Syncing),
            "failed" => Ok(ActionStatus::Failed),
            "dead" => Ok(ActionStatus::Dead),
            other => Err(StoreError::corrupted(format!(
                "unknown action status '{other}'"
            ))),
        }
    }
}

/// A mutation about to be appended to the outbox.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAction {
    /// Action id, also used as the idempotency key on the wire.
    pub id: String,
    /// Mutation kind tag, e.g. `SPEND_CREDITS`.
    pub kind: String,
    /// Mutation payload.
    pub payload: serde_json::Value,
    /// Creation time in Unix milliseconds; FIFO order key.
    pub created_at: i64,
}

/// A stored outbox row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionRow {
    /// Action id.
    pub id: String,
    /// Insertion sequence, breaking ties between equal timestamps.
    pub seq: i64,
    /// Mutation kind tag.
    pub kind: String,
    /// Mutation payload.
    pub payload: serde_json::Value,
    /// Number of failed replays so far.
    pub attempts: u32,
    /// Current state.
    pub status: ActionStatus,
    /// Creation time in Unix milliseconds.
    pub created_at: i64,
    /// Last state change in Unix milliseconds.
    pub updated_at: i64,
    /// Message of the last failure, or why the action died.
    pub last_error: Option<String>,
}

impl ActionRow {
    /// Returns true if the reconciliation loop may pick this action.
    pub fn is_eligible(&self, max_attempts: u32) -> bool {
        self.status.is_replayable() && self.attempts < max_attempts
    }

    /// Returns the creation time as a UTC timestamp.
    pub fn created_at_utc(&self) -> DateTime<Utc> {
        millis_to_utc(self.created_at)
    }
}

/// Returns the current time in Unix milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Converts Unix milliseconds to a UTC timestamp, clamping invalid values to the epoch.
pub fn millis_to_utc(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}
