//! Engine lifecycle.

use crate::config::SyncConfig;
use crate::connectivity::{NetworkReporter, ReachabilityProber};
use crate::context::SyncContext;
use crate::error::SyncResult;
use crate::reconcile::{Reconciler, TickOutcome};
use crate::remote::RemoteService;
use driftsync_store::StoreAdapter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// A running engine: the context plus its background tasks.
///
/// Tasks:
/// - the reconciliation loop, ticking every `reconcile_interval`;
/// - the reachability prober, probing every `heartbeat_interval`;
/// - a publisher that refreshes the connectivity snapshot on network
///   changes and every `heartbeat_interval`, and wakes the reconciler when
///   the device comes online.
///
/// Must be started inside a tokio runtime.
pub struct SyncSession {
    ctx: SyncContext,
    handles: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for SyncSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncSession")
            .field("ctx", &self.ctx)
            .field("tasks", &self.handles.len())
            .finish()
    }
}

impl SyncSession {
    /// Builds the context, repairs the outbox and spawns the background
    /// tasks.
    pub async fn start(
        config: SyncConfig,
        store: Arc<dyn StoreAdapter>,
        remote: Arc<dyn RemoteService>,
    ) -> SyncResult<Self> {
        let ctx = SyncContext::new(config, store, remote)?;
        ctx.outbox().recover().await?;
        let state = ctx.refresh_state().await;
        info!(
            account = ctx.account_id(),
            online = state.is_online,
            pending = state.pending_count,
            "sync session started"
        );

        let config = ctx.config().clone();
        let shutdown = ctx.inner.shutdown.subscribe();
        let reconciler = Reconciler::new(ctx.clone());
        let prober = ReachabilityProber::new(
            Arc::clone(ctx.remote()),
            ctx.monitor().clone(),
            config.probe_timeout,
        );
        let publisher = ConnectivityPublisher {
            ctx: ctx.clone(),
            online: ctx.monitor().subscribe_online(),
            reachable: ctx.monitor().subscribe_reachable(),
            was_online: state.is_online,
            heartbeat: config.heartbeat_interval,
        };
        let handles = vec![
            tokio::spawn(reconciler.run(config.reconcile_interval, shutdown.clone())),
            tokio::spawn(prober.run(config.heartbeat_interval, shutdown.clone())),
            tokio::spawn(publisher.run(shutdown)),
        ];
        Ok(Self { ctx, handles })
    }

    /// Returns the engine context.
    pub fn context(&self) -> &SyncContext {
        &self.ctx
    }

    /// Returns a handle for reporting network changes.
    pub fn reporter(&self) -> NetworkReporter {
        self.ctx.reporter()
    }

    /// Runs one reconciliation tick now.
    pub async fn sync_now(&self) -> SyncResult<TickOutcome> {
        self.ctx.ensure_running()?;
        Reconciler::new(self.ctx.clone()).tick().await
    }

    /// Stops the background tasks, waiting for an in-flight tick to settle.
    pub async fn shutdown(mut self) {
        self.ctx.inner.shutdown.send_replace(true);
        for handle in self.handles.drain(..) {
            if let Err(err) = handle.await {
                warn!(error = %err, "background task ended abnormally");
            }
        }
        info!(account = self.ctx.account_id(), "sync session stopped");
    }
}

impl Drop for SyncSession {
    fn drop(&mut self) {
        if self.handles.is_empty() {
            return;
        }
        self.ctx.inner.shutdown.send_replace(true);
        for handle in &self.handles {
            handle.abort();
        }
    }
}

/// Refreshes the connectivity snapshot on signal changes and on every
/// heartbeat, and wakes the reconciler on an offline to online transition.
struct ConnectivityPublisher {
    ctx: SyncContext,
    online: watch::Receiver<bool>,
    reachable: watch::Receiver<bool>,
    was_online: bool,
    heartbeat: Duration,
}

impl ConnectivityPublisher {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let Self {
            ctx,
            mut online,
            mut reachable,
            mut was_online,
            heartbeat,
        } = self;
        let mut heartbeat = tokio::time::interval(heartbeat);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                changed = online.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let now_online = *online.borrow_and_update();
                    ctx.refresh_state().await;
                    if now_online && !was_online {
                        debug!("back online, waking reconciler");
                        ctx.wake_reconciler();
                    }
                    was_online = now_online;
                }
                changed = reachable.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    reachable.borrow_and_update();
                    ctx.refresh_state().await;
                }
                _ = heartbeat.tick() => {
                    ctx.refresh_state().await;
                }
            }
        }
        debug!("connectivity publisher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockRemote;
    use driftsync_store::{MemoryStore, NewAction};

    #[tokio::test]
    async fn heartbeat_picks_up_outbox_changes() {
        let store = Arc::new(MemoryStore::new());
        let config = SyncConfig::new("u1", "http://localhost")
            .with_reconcile_interval(Duration::from_secs(3600))
            .with_heartbeat_interval(Duration::from_millis(50));
        let session = SyncSession::start(config, store.clone(), Arc::new(MockRemote::new()))
            .await
            .unwrap();
        let mut state = session.context().subscribe_state();
        assert_eq!(state.borrow_and_update().pending_count, 0);

        store
            .enqueue_action(NewAction {
                id: "a1".into(),
                kind: "EARN_CREDITS".into(),
                payload: serde_json::json!({"user_id": "u1", "amount": 1}),
                created_at: 1,
            })
            .await
            .unwrap();

        let refreshed = tokio::time::timeout(
            Duration::from_secs(5),
            state.wait_for(|state| state.pending_count == 1),
        )
        .await
        .is_ok();
        assert!(refreshed, "snapshot was not refreshed");
        session.shutdown().await;
    }
}
