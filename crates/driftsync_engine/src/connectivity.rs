//! Connectivity and reachability monitoring.
//!
//! Two signals are tracked independently:
//!
//! - `is_online`: the platform reports a usable network interface. Pushed
//!   by the host through a [`NetworkReporter`].
//! - `is_server_reachable`: the last bounded-timeout probe reached the
//!   backend. Written by the [`ReachabilityProber`] and forced false
//!   whenever `is_online` is false.
//!
//! The reconciliation loop gates only on `is_online`.

use crate::remote::RemoteService;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

#[derive(Debug)]
struct Signals {
    online: watch::Sender<bool>,
    reachable: watch::Sender<bool>,
}

/// Read side of the connectivity signals. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    signals: Arc<Signals>,
}

impl ConnectivityMonitor {
    /// Creates a monitor with the given initial network state.
    pub fn new(initial_online: bool) -> Self {
        let (online, _) = watch::channel(initial_online);
        let (reachable, _) = watch::channel(false);
        Self {
            signals: Arc::new(Signals { online, reachable }),
        }
    }

    /// Returns a handle for reporting OS network changes.
    pub fn reporter(&self) -> NetworkReporter {
        NetworkReporter {
            signals: Arc::clone(&self.signals),
        }
    }

    /// Samples the network state.
    pub fn is_online(&self) -> bool {
        *self.signals.online.borrow()
    }

    /// Samples the backend reachability.
    pub fn is_server_reachable(&self) -> bool {
        *self.signals.reachable.borrow()
    }

    /// Subscribes to network changes.
    pub fn subscribe_online(&self) -> watch::Receiver<bool> {
        self.signals.online.subscribe()
    }

    /// Subscribes to reachability changes.
    pub fn subscribe_reachable(&self) -> watch::Receiver<bool> {
        self.signals.reachable.subscribe()
    }

    /// Records a probe result. Ignored while offline.
    pub(crate) fn set_reachable(&self, reachable: bool) {
        let reachable = reachable && self.is_online();
        self.signals.reachable.send_if_modified(|current| {
            if *current == reachable {
                return false;
            }
            *current = reachable;
            true
        });
    }
}

/// Write side of the network signal, handed to the host platform.
#[derive(Debug, Clone)]
pub struct NetworkReporter {
    signals: Arc<Signals>,
}

impl NetworkReporter {
    /// Reports the current OS network state.
    pub fn report(&self, online: bool) {
        let changed = self.signals.online.send_if_modified(|current| {
            if *current == online {
                return false;
            }
            *current = online;
            true
        });
        if changed {
            info!(online, "network state changed");
        }
        if !online {
            self.signals.reachable.send_if_modified(|reachable| {
                let was = *reachable;
                *reachable = false;
                was
            });
        }
    }
}

/// Periodic bounded-timeout probe of the backend.
pub struct ReachabilityProber {
    remote: Arc<dyn RemoteService>,
    monitor: ConnectivityMonitor,
    timeout: Duration,
}

impl ReachabilityProber {
    /// Creates a prober.
    pub fn new(
        remote: Arc<dyn RemoteService>,
        monitor: ConnectivityMonitor,
        timeout: Duration,
    ) -> Self {
        Self {
            remote,
            monitor,
            timeout,
        }
    }

    /// Probes once and records the result.
    pub async fn probe_once(&self) -> bool {
        if !self.monitor.is_online() {
            self.monitor.set_reachable(false);
            return false;
        }
        let reachable = match tokio::time::timeout(self.timeout, self.remote.probe()).await {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                debug!(error = %err, "probe failed");
                false
            }
            Err(_) => {
                debug!(timeout = ?self.timeout, "probe timed out");
                false
            }
        };
        self.monitor.set_reachable(reachable);
        reachable
    }

    /// Probes on every heartbeat and immediately when the network comes
    /// back, until `shutdown` flips to true.
    pub(crate) async fn run(self, heartbeat: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut online = self.monitor.subscribe_online();
        self.probe_once().await;
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
                    if now_online {
                        self.probe_once().await;
                    } else {
                        self.monitor.set_reachable(false);
                    }
                }
                _ = tokio::time::sleep(heartbeat) => {
                    self.probe_once().await;
                }
            }
        }
        debug!("reachability prober stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockRemote;

    #[test]
    fn reporter_updates_monitor() {
        let monitor = ConnectivityMonitor::new(false);
        let reporter = monitor.reporter();
        assert!(!monitor.is_online());
        reporter.report(true);
        assert!(monitor.is_online());
        reporter.report(false);
        assert!(!monitor.is_online());
    }

    #[test]
    fn going_offline_clears_reachability() {
        let monitor = ConnectivityMonitor::new(true);
        monitor.set_reachable(true);
        assert!(monitor.is_server_reachable());
        monitor.reporter().report(false);
        assert!(!monitor.is_server_reachable());
        monitor.set_reachable(true);
        assert!(!monitor.is_server_reachable());
    }

    #[tokio::test]
    async fn subscribers_observe_changes() {
        let monitor = ConnectivityMonitor::new(false);
        let mut rx = monitor.subscribe_online();
        monitor.reporter().report(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
    }

    #[tokio::test]
    async fn probe_reflects_backend() {
        let remote = Arc::new(MockRemote::new());
        let monitor = ConnectivityMonitor::new(true);
        let prober = ReachabilityProber::new(
            remote.clone(),
            monitor.clone(),
            Duration::from_secs(1),
        );

        assert!(prober.probe_once().await);
        assert!(monitor.is_server_reachable());

        remote.set_reachable(false);
        assert!(!prober.probe_once().await);
        assert!(!monitor.is_server_reachable());
    }

    #[tokio::test]
    async fn probe_skipped_while_offline() {
        let remote = Arc::new(MockRemote::new());
        let monitor = ConnectivityMonitor::new(false);
        let prober =
            ReachabilityProber::new(remote.clone(), monitor.clone(), Duration::from_secs(1));
        assert!(!prober.probe_once().await);
        assert_eq!(remote.call_count("probe"), 0);
    }
}
