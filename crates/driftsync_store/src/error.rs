//! Error types for store operations.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in the local store.
///
/// A missing row is never an error; lookups return `Ok(None)` instead.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The embedded SQLite engine reported a failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A payload could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A filter referenced a column the table does not index.
    #[error("table {table} has no indexed column {column}")]
    UnknownColumn {
        /// The table being filtered.
        table: &'static str,
        /// The offending column name.
        column: String,
    },

    /// An outbox operation referenced an action that does not exist.
    #[error("outbox action not found: {0}")]
    ActionNotFound(String),

    /// The database was written with another schema version.
    #[error("schema version {found} does not match expected version {expected}")]
    SchemaMismatch {
        /// Version stored in the database.
        found: i32,
        /// Version this build uses.
        expected: i32,
    },

    /// A row holds a value the store cannot interpret.
    #[error("store corrupted: {0}")]
    Corrupted(String),
}

impl StoreError {
    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted(message.into())
    }

    /// Returns true if the error means the store itself is unusable, as
    /// opposed to a caller mistake such as an unknown filter column.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            StoreError::Sqlite(_) | StoreError::Corrupted(_) | StoreError::SchemaMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_column_display() {
        let err = StoreError::UnknownColumn {
            table: "question",
            column: "title".into(),
        };
        assert_eq!(err.to_string(), "table question has no indexed column title");
        assert!(!err.is_unavailable());
    }

    #[test]
    fn corruption_is_unavailable() {
        assert!(StoreError::corrupted("bad status 'zombie'").is_unavailable());
        assert!(!StoreError::ActionNotFound("a1".into()).is_unavailable());
    }
}
