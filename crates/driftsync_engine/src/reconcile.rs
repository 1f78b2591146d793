//! Outbox reconciliation.
//!
//! Each tick replays at most one action, the oldest eligible one by
//! `(created_at, seq)`. Outbox is a single FIFO queue: an action that keeps
//! failing blocks every later action until it reaches the attempt cap.
//!
//! Outcomes per replay:
//!
//! | remote result      | outbox row                 | cache                     |
//! |--------------------|----------------------------|---------------------------|
//! | success            | deleted                    | confirmed record upserted |
//! | retryable error    | `failed`, `dead` at cap    | untouched                 |
//! | permanent error    | `dead` (`rejected: ...`)   | queries invalidated       |
//! | undecodable row    | `dead` (`undecodable: ...`)| untouched                 |

use crate::context::SyncContext;
use crate::error::{RetryClass, SyncResult};
use crate::events::SyncEvent;
use crate::outbox::QueuedAction;
use crate::query_cache::QueryKey;
use crate::records::mutation_target;
use crate::remote::dispatch;
use driftsync_store::{ActionStatus, StoreResult};
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

/// Result of one reconciliation tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Another tick was already running.
    Busy,
    /// The device is offline; nothing was attempted.
    Offline,
    /// No eligible action.
    Idle,
    /// An action was confirmed and removed.
    Synced {
        /// Confirmed action.
        action_id: String,
    },
    /// An action failed and stays queued.
    Retrying {
        /// Failed action.
        action_id: String,
        /// Attempts so far.
        attempts: u32,
    },
    /// An action reached `dead`.
    Dead {
        /// Buried action.
        action_id: String,
        /// Why it died.
        reason: String,
    },
}

impl TickOutcome {
    /// Returns true when the tick made progress on the queue.
    pub fn is_progress(&self) -> bool {
        matches!(
            self,
            TickOutcome::Synced { .. } | TickOutcome::Retrying { .. } | TickOutcome::Dead { .. }
        )
    }
}

struct InFlight<'a> {
    ctx: &'a SyncContext,
}

impl<'a> InFlight<'a> {
    fn acquire(ctx: &'a SyncContext) -> Option<Self> {
        ctx.inner
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { ctx })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.ctx.inner.in_flight.store(false, Ordering::Release);
    }
}

/// Replays the outbox against the remote service.
#[derive(Debug, Clone)]
pub struct Reconciler {
    ctx: SyncContext,
}

impl Reconciler {
    /// Creates a reconciler over `ctx`.
    pub fn new(ctx: SyncContext) -> Self {
        Self { ctx }
    }

    /// Runs one tick.
    ///
    /// Concurrent ticks are refused with [`TickOutcome::Busy`]. Store
    /// failures are returned; remote failures are recorded on the action.
    #[instrument(skip(self), fields(account = %self.ctx.account_id()))]
    pub async fn tick(&self) -> SyncResult<TickOutcome> {
        let Some(_guard) = InFlight::acquire(&self.ctx) else {
            debug!("tick already in flight");
            return Ok(TickOutcome::Busy);
        };

        let state = self.ctx.refresh_state().await;
        if !state.is_online {
            debug!(pending = state.pending_count, "offline, skipping tick");
            return Ok(TickOutcome::Offline);
        }

        let Some(row) = self.ctx.outbox().next_eligible().await? else {
            return Ok(TickOutcome::Idle);
        };

        let outcome = match QueuedAction::decode(row) {
            Ok(action) => self.replay(action).await?,
            Err((row, err)) => {
                let reason = format!("undecodable: {err}");
                error!(action_id = %row.id, kind = %row.kind, %reason, "burying action");
                self.ctx.outbox().bury(&row.id, &reason).await?;
                self.ctx.emit(SyncEvent::ActionDead {
                    action_id: row.id.clone(),
                    reason: reason.clone(),
                });
                TickOutcome::Dead {
                    action_id: row.id,
                    reason,
                }
            }
        };

        self.ctx.refresh_state().await;
        Ok(outcome)
    }

    async fn replay(&self, action: QueuedAction) -> SyncResult<TickOutcome> {
        let QueuedAction {
            row,
            action_id,
            mutation,
        } = action;
        let outbox = self.ctx.outbox();
        outbox.mark_syncing(&row.id).await?;
        debug!(action_id = %row.id, kind = %row.kind, attempts = row.attempts, "dispatching");

        match dispatch(self.ctx.remote().as_ref(), action_id, &mutation).await {
            Ok(confirmed) => {
                let completed = outbox.complete(&row.id).await;
                self.settle(&row.id, completed).await?;
                self.ctx.apply_server_record(&confirmed).await;
                info!(action_id = %row.id, kind = %row.kind, "action synced");
                self.ctx.emit(SyncEvent::ActionSynced {
                    action_id,
                    kind: row.kind,
                });
                Ok(TickOutcome::Synced { action_id: row.id })
            }
            Err(err) if err.retry_class() == RetryClass::Retryable => {
                let message = err.to_string();
                let failed = outbox.fail(&row.id, &message).await;
                let failed = self.settle(&row.id, failed).await?;
                if failed.status == ActionStatus::Dead {
                    error!(
                        action_id = %row.id,
                        attempts = failed.attempts,
                        error = %message,
                        "action exhausted its attempts"
                    );
                    let reason = format!("attempts exhausted: {message}");
                    self.ctx.emit(SyncEvent::ActionDead {
                        action_id: row.id.clone(),
                        reason: reason.clone(),
                    });
                    Ok(TickOutcome::Dead {
                        action_id: row.id,
                        reason,
                    })
                } else {
                    warn!(
                        action_id = %row.id,
                        attempts = failed.attempts,
                        error = %message,
                        "replay failed, will retry"
                    );
                    self.ctx.emit(SyncEvent::ActionRetrying {
                        action_id,
                        attempts: failed.attempts,
                        error: message,
                    });
                    Ok(TickOutcome::Retrying {
                        action_id: row.id,
                        attempts: failed.attempts,
                    })
                }
            }
            Err(err) => {
                let reason = format!("rejected: {err}");
                error!(action_id = %row.id, kind = %row.kind, %reason, "server rejected action");
                let rejected = outbox.reject(&row.id, &reason).await;
                self.settle(&row.id, rejected).await?;
                let (table, id) = mutation_target(&mutation);
                self.ctx.queries().invalidate(&QueryKey::record(table, id));
                self.ctx.queries().invalidate_lists(table);
                self.ctx.emit(SyncEvent::ActionDead {
                    action_id: row.id.clone(),
                    reason: reason.clone(),
                });
                Ok(TickOutcome::Dead {
                    action_id: row.id,
                    reason,
                })
            }
        }
    }

    /// Passes through the result of recording a replay. On a store error the
    /// row is released back to `pending` so it stays counted and eligible.
    async fn settle<T>(&self, id: &str, result: StoreResult<T>) -> SyncResult<T> {
        match result {
            Ok(value) => Ok(value),
            Err(err) => {
                error!(action_id = %id, error = %err, "failed to record replay result");
                if let Err(release) = self.ctx.outbox().release(id).await {
                    error!(action_id = %id, error = %release, "failed to release action");
                }
                Err(err.into())
            }
        }
    }

    /// Ticks until the queue is idle, the device is offline, another tick
    /// is running, or `max_ticks` ticks ran.
    pub async fn drain(&self, max_ticks: usize) -> SyncResult<Vec<TickOutcome>> {
        let mut outcomes = Vec::new();
        for _ in 0..max_ticks {
            let outcome = self.tick().await?;
            let done = !outcome.is_progress();
            outcomes.push(outcome);
            if done {
                break;
            }
        }
        Ok(outcomes)
    }

    /// Ticks every `interval` until `shutdown` flips to true.
    ///
    /// The next sleep is armed only after the previous tick settles, and
    /// [`SyncContext::wake_reconciler`] cuts the sleep short.
    pub async fn run(self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            if let Err(err) = self.tick().await {
                error!(error = %err, "reconciliation tick failed");
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(interval) => {}
                _ = self.ctx.inner.wake.notified() => {
                    debug!("reconciler woken");
                }
            }
        }
        debug!("reconciler stopped");
    }
}
