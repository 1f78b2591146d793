//! Cache-aside reads.
//!
//! A read fetches from the remote service when the device is online,
//! stores the authoritative value and returns it. When offline, or when
//! the fetch fails, the cached value is returned instead. Reads never fail:
//! local store errors are logged and treated as a miss.

use crate::context::SyncContext;
use crate::error::RemoteResult;
use crate::query_cache::QueryKey;
use crate::records::CacheRecord;
use crate::remote::RemoteService;
use driftsync_store::RecordFilter;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, warn};

impl SyncContext {
    /// Reads one record through the cache.
    ///
    /// `fetch` receives the remote service and is only called while online.
    pub async fn read_record<T, F, Fut>(&self, id: &str, fetch: F) -> Option<T>
    where
        T: CacheRecord,
        F: FnOnce(Arc<dyn RemoteService>) -> Fut,
        Fut: Future<Output = RemoteResult<T>>,
    {
        let key = QueryKey::record(T::TABLE, id);
        if self.is_online() {
            match fetch(Arc::clone(self.remote())).await {
                Ok(fresh) => {
                    self.store_record(&fresh).await;
                    self.publish(key, &fresh);
                    return Some(fresh);
                }
                Err(err) => {
                    warn!(table = %T::TABLE, id, error = %err, "remote read failed, serving cache");
                }
            }
        }
        let cached = self.cached_record::<T>(id).await;
        if let Some(record) = &cached {
            self.publish(key, record);
        }
        cached
    }

    /// Reads a list through the cache.
    ///
    /// Every fetched item is stored individually; offline, the cached rows
    /// matching `filter` are returned.
    pub async fn read_list<T, F, Fut>(&self, key: QueryKey, filter: RecordFilter, fetch: F) -> Vec<T>
    where
        T: CacheRecord,
        F: FnOnce(Arc<dyn RemoteService>) -> Fut,
        Fut: Future<Output = RemoteResult<Vec<T>>>,
    {
        if self.is_online() {
            match fetch(Arc::clone(self.remote())).await {
                Ok(fresh) => {
                    for record in &fresh {
                        self.store_record(record).await;
                    }
                    self.publish(key, &fresh);
                    return fresh;
                }
                Err(err) => {
                    warn!(query = %key, error = %err, "remote list failed, serving cache");
                }
            }
        }
        let cached = self.cached_list::<T>(&filter).await;
        self.publish(key, &cached);
        cached
    }

    /// Returns the cached record immediately and refreshes it in the
    /// background when online.
    pub async fn peek_record<T, F, Fut>(&self, id: &str, fetch: F) -> Option<T>
    where
        T: CacheRecord,
        F: FnOnce(Arc<dyn RemoteService>) -> Fut + Send + 'static,
        Fut: Future<Output = RemoteResult<T>> + Send + 'static,
    {
        let cached = self.cached_record::<T>(id).await;
        if let Some(record) = &cached {
            self.publish(QueryKey::record(T::TABLE, id), record);
        }
        if self.is_online() {
            let ctx = self.clone();
            let id = id.to_string();
            tokio::spawn(async move {
                ctx.read_record::<T, _, _>(&id, fetch).await;
            });
        }
        cached
    }

    /// Returns the cached record without touching the network.
    pub async fn cached_record<T: CacheRecord>(&self, id: &str) -> Option<T> {
        let record = match self.store().get_by_id(T::TABLE, id).await {
            Ok(record) => record?,
            Err(err) => {
                error!(table = %T::TABLE, id, error = %err, "cache read failed");
                return None;
            }
        };
        match record.decode::<T>() {
            Ok(value) => Some(value),
            Err(err) => {
                error!(table = %T::TABLE, id, error = %err, "cached record is unreadable");
                None
            }
        }
    }

    /// Returns the cached rows matching `filter`, skipping unreadable ones.
    pub async fn cached_list<T: CacheRecord>(&self, filter: &RecordFilter) -> Vec<T> {
        let records = match self.store().get_all(T::TABLE, filter).await {
            Ok(records) => records,
            Err(err) => {
                error!(table = %T::TABLE, error = %err, "cache list failed");
                return Vec::new();
            }
        };
        records
            .iter()
            .filter_map(|record| match record.decode::<T>() {
                Ok(value) => Some(value),
                Err(err) => {
                    error!(table = %T::TABLE, id = %record.id, error = %err, "skipping unreadable row");
                    None
                }
            })
            .collect()
    }

    pub(crate) async fn store_record<T: CacheRecord>(&self, record: &T) {
        let payload = match serde_json::to_value(record) {
            Ok(payload) => payload,
            Err(err) => {
                error!(table = %T::TABLE, error = %err, "failed to encode record");
                return;
            }
        };
        let id = record.record_id();
        if let Err(err) = self.store().upsert(T::TABLE, &id, &payload).await {
            error!(table = %T::TABLE, id, error = %err, "cache write failed");
        }
    }

    pub(crate) fn publish<V: serde::Serialize + ?Sized>(&self, key: QueryKey, value: &V) {
        match serde_json::to_value(value) {
            Ok(value) => {
                debug!(query = %key, "query updated");
                self.queries().set(key, value);
            }
            Err(err) => error!(query = %key, error = %err, "failed to encode query value"),
        }
    }
}
