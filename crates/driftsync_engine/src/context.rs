//! The explicit engine context.

use crate::config::SyncConfig;
use crate::connectivity::{ConnectivityMonitor, NetworkReporter};
use crate::error::{SyncError, SyncResult};
use crate::events::SyncEvent;
use crate::outbox::Outbox;
use crate::query_cache::QueryCache;
use crate::remote::RemoteService;
use crate::state::{ConnectivityState, SyncStats};
use driftsync_store::{ActionRow, StoreAdapter};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Notify};
use tracing::error;

const EVENT_CAPACITY: usize = 256;

pub(crate) struct ContextInner {
    pub(crate) config: SyncConfig,
    pub(crate) store: Arc<dyn StoreAdapter>,
    pub(crate) remote: Arc<dyn RemoteService>,
    pub(crate) monitor: ConnectivityMonitor,
    pub(crate) queries: QueryCache,
    pub(crate) outbox: Outbox,
    pub(crate) events: broadcast::Sender<SyncEvent>,
    pub(crate) state: watch::Sender<ConnectivityState>,
    pub(crate) shutdown: watch::Sender<bool>,
    pub(crate) in_flight: AtomicBool,
    pub(crate) wake: Notify,
}

/// Everything the engine operates on: configuration, store, remote
/// service, connectivity signals and the reactive query cache.
///
/// Constructed by [`crate::SyncSession::start`] and shared by the
/// background tasks. Cloning is cheap; every clone sees the same state.
#[derive(Clone)]
pub struct SyncContext {
    pub(crate) inner: Arc<ContextInner>,
}

impl std::fmt::Debug for SyncContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncContext")
            .field("account_id", &self.inner.config.account_id)
            .field("state", &*self.inner.state.borrow())
            .finish_non_exhaustive()
    }
}

impl SyncContext {
    /// Creates a context. Background tasks are not started.
    pub fn new(
        config: SyncConfig,
        store: Arc<dyn StoreAdapter>,
        remote: Arc<dyn RemoteService>,
    ) -> SyncResult<Self> {
        config.validate()?;
        let monitor = ConnectivityMonitor::new(config.initial_online);
        let outbox = Outbox::new(Arc::clone(&store), config.max_attempts);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (state, _) = watch::channel(ConnectivityState {
            is_online: config.initial_online,
            ..ConnectivityState::default()
        });
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            inner: Arc::new(ContextInner {
                config,
                store,
                remote,
                monitor,
                queries: QueryCache::new(),
                outbox,
                events,
                state,
                shutdown,
                in_flight: AtomicBool::new(false),
                wake: Notify::new(),
            }),
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Returns the signed-in account.
    pub fn account_id(&self) -> &str {
        &self.inner.config.account_id
    }

    /// Returns the local store.
    pub fn store(&self) -> &Arc<dyn StoreAdapter> {
        &self.inner.store
    }

    /// Returns the remote service.
    pub fn remote(&self) -> &Arc<dyn RemoteService> {
        &self.inner.remote
    }

    /// Returns the connectivity monitor.
    pub fn monitor(&self) -> &ConnectivityMonitor {
        &self.inner.monitor
    }

    /// Returns a handle for reporting network changes.
    pub fn reporter(&self) -> NetworkReporter {
        self.inner.monitor.reporter()
    }

    /// Returns the reactive query cache.
    pub fn queries(&self) -> &QueryCache {
        &self.inner.queries
    }

    /// Returns the outbox.
    pub fn outbox(&self) -> &Outbox {
        &self.inner.outbox
    }

    /// Samples the network state.
    pub fn is_online(&self) -> bool {
        self.inner.monitor.is_online()
    }

    /// Returns false once the owning session has shut down.
    pub fn is_running(&self) -> bool {
        !*self.inner.shutdown.borrow()
    }

    /// Subscribes to engine events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    /// Subscribes to connectivity snapshots.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectivityState> {
        self.inner.state.subscribe()
    }

    /// Returns the last published connectivity snapshot.
    pub fn connectivity_state(&self) -> ConnectivityState {
        *self.inner.state.borrow()
    }

    /// Recomputes and publishes the connectivity snapshot.
    ///
    /// A store failure keeps the previous pending count.
    pub async fn refresh_state(&self) -> ConnectivityState {
        let previous = self.connectivity_state();
        let pending_count = match self.inner.outbox.pending_count().await {
            Ok(count) => count,
            Err(err) => {
                error!(error = %err, "failed to count pending actions");
                previous.pending_count
            }
        };
        let next = ConnectivityState {
            is_online: self.inner.monitor.is_online(),
            is_server_reachable: self.inner.monitor.is_server_reachable(),
            pending_count,
        };
        let changed = self.inner.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
        if changed {
            self.emit(SyncEvent::ConnectivityChanged(next));
        }
        next
    }

    /// Returns the actions that reached the terminal `dead` state.
    pub async fn dead_actions(&self) -> SyncResult<Vec<ActionRow>> {
        Ok(self.inner.outbox.dead_actions().await?)
    }

    /// Loads the persisted counters.
    pub async fn stats(&self) -> SyncResult<SyncStats> {
        Ok(SyncStats::load(self.inner.store.as_ref()).await?)
    }

    /// Deletes every cached record, queued action and counter, and empties
    /// the query cache. Used on sign-out.
    pub async fn clear_local_data(&self) -> SyncResult<()> {
        self.inner.store.clear_all().await?;
        self.inner.queries.clear();
        self.refresh_state().await;
        Ok(())
    }

    /// Wakes the reconciliation loop before its next scheduled tick.
    pub fn wake_reconciler(&self) {
        self.inner.wake.notify_one();
    }

    pub(crate) fn emit(&self, event: SyncEvent) {
        // no subscribers is fine
        let _ = self.inner.events.send(event);
    }

    pub(crate) fn ensure_running(&self) -> SyncResult<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(SyncError::NotRunning)
        }
    }
}
