//! # DriftSync Store
//!
//! Local durable store for the DriftSync engine.
//!
//! The store holds three kinds of data:
//!
//! - **Cache tables**: one per entity kind, holding the last known JSON
//!   payload of each record. Some tables also persist denormalized columns
//!   used for indexed filtering.
//! - **Outbox**: an append-only queue of mutations waiting to be replayed
//!   against the remote service, with retry bookkeeping.
//! - **Stats**: generic key/value rows used for counters and timestamps.
//!
//! ## Design Principles
//!
//! - The store is the only durable writer; everything else is derived
//! - A missing row is never an error
//! - Writes are full upserts, never partial merges
//! - Schema changes drop and recreate the managed tables
//!
//! ## Available Stores
//!
//! - [`SqliteStore`] - Persistent store on an embedded SQLite database
//! - [`MemoryStore`] - For tests and ephemeral sessions
//!
//! ## Example
//!
//! ```rust
//! use driftsync_store::{EntityTable, RecordFilter, SqliteStore, StoreAdapter};
//! use serde_json::json;
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let store = SqliteStore::open_in_memory().unwrap();
//! store
//!     .upsert(EntityTable::Question, "q1", &json!({"id": "q1", "course_id": "c1"}))
//!     .await
//!     .unwrap();
//!
//! let filter = RecordFilter::new().eq("course_id", "c1");
//! let questions = store.get_all(EntityTable::Question, &filter).await.unwrap();
//! assert_eq!(questions.len(), 1);
//! # });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod adapter;
mod error;
mod memory;
mod record;
mod schema;
mod sqlite;

pub use adapter::StoreAdapter;
pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use record::{
    millis_to_utc, now_millis, ActionRow, ActionStatus, CachedRecord, NewAction, RecordFilter,
};
pub use schema::{indexed_values, EntityTable, OUTBOX_TABLE, SCHEMA_VERSION, STAT_TABLE};
pub use sqlite::SqliteStore;
