//! Reactive in-memory query cache.
//!
//! A derived projection of the local store that screens subscribe to. Each
//! query key owns a `watch` channel; setting a value notifies every
//! subscriber, and invalidation flags the value stale without dropping it.
//! The cache can be rebuilt from the store at any time.

use driftsync_store::EntityTable;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt;
use tokio::sync::watch;

/// Identifies one cached query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    /// Table the query reads.
    pub table: EntityTable,
    /// Record id for single-record queries, or a list scope.
    pub scope: String,
}

impl QueryKey {
    /// Key of a single-record query.
    pub fn record(table: EntityTable, id: impl Into<String>) -> Self {
        Self {
            table,
            scope: id.into(),
        }
    }

    /// Key of a list query, e.g. `list:all` or `list:course=c1`.
    pub fn list(table: EntityTable, scope: impl fmt::Display) -> Self {
        Self {
            table,
            scope: format!("list:{scope}"),
        }
    }

    /// Returns true for list queries.
    pub fn is_list(&self) -> bool {
        self.scope.starts_with("list:")
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.table, self.scope)
    }
}

/// A cached query result.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryEntry {
    /// Last known value.
    pub value: serde_json::Value,
    /// Set when dependent data changed since the value was written.
    pub stale: bool,
}

/// The reactive cache.
#[derive(Debug, Default)]
pub struct QueryCache {
    slots: RwLock<HashMap<QueryKey, watch::Sender<Option<QueryEntry>>>>,
}

impl QueryCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current entry of `key`.
    pub fn get(&self, key: &QueryKey) -> Option<QueryEntry> {
        self.slots
            .read()
            .get(key)
            .and_then(|slot| slot.borrow().clone())
    }

    /// Returns the current value of `key` decoded as `T`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &QueryKey) -> Option<T> {
        self.get(key)
            .and_then(|entry| serde_json::from_value(entry.value).ok())
    }

    /// Stores a fresh value and notifies subscribers.
    pub fn set(&self, key: QueryKey, value: serde_json::Value) {
        let entry = Some(QueryEntry {
            value,
            stale: false,
        });
        let mut slots = self.slots.write();
        match slots.get(&key) {
            Some(slot) => {
                slot.send_replace(entry);
            }
            None => {
                let (tx, _rx) = watch::channel(entry);
                slots.insert(key, tx);
            }
        }
    }

    /// Subscribes to `key`. The receiver sees the current entry immediately.
    pub fn subscribe(&self, key: QueryKey) -> watch::Receiver<Option<QueryEntry>> {
        let mut slots = self.slots.write();
        slots
            .entry(key)
            .or_insert_with(|| watch::channel(None).0)
            .subscribe()
    }

    /// Flags `key` stale. Returns true if it held a value.
    pub fn invalidate(&self, key: &QueryKey) -> bool {
        let slots = self.slots.read();
        let Some(slot) = slots.get(key) else {
            return false;
        };
        slot.send_if_modified(mark_stale)
    }

    /// Flags every query of `table` stale.
    pub fn invalidate_table(&self, table: EntityTable) -> usize {
        let slots = self.slots.read();
        slots
            .iter()
            .filter(|(key, _)| key.table == table)
            .filter(|(_, slot)| slot.send_if_modified(mark_stale))
            .count()
    }

    /// Flags every list query of `table` stale.
    pub fn invalidate_lists(&self, table: EntityTable) -> usize {
        let slots = self.slots.read();
        slots
            .iter()
            .filter(|(key, _)| key.table == table && key.is_list())
            .filter(|(_, slot)| slot.send_if_modified(mark_stale))
            .count()
    }

    /// Drops every value. Subscribers observe `None`.
    pub fn clear(&self) {
        for slot in self.slots.read().values() {
            slot.send_replace(None);
        }
    }

    /// Returns the number of keys holding a value.
    pub fn len(&self) -> usize {
        self.slots
            .read()
            .values()
            .filter(|slot| slot.borrow().is_some())
            .count()
    }

    /// Returns true if no key holds a value.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn mark_stale(entry: &mut Option<QueryEntry>) -> bool {
    match entry {
        Some(entry) if !entry.stale => {
            entry.stale = true;
            true
        }
        _ => false,
    }
}
