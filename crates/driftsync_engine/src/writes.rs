//! Write-behind mutations.
//!
//! A mutation is applied to the local cache first, then sent to the server
//! if the device is online and the outbox is empty. Otherwise, or on a
//! transient failure, it is queued in the outbox and replayed by the
//! [`crate::Reconciler`] after the actions already waiting there. The
//! caller gets one of three outcomes and never sees a remote error.

use crate::context::SyncContext;
use crate::error::{RetryClass, SyncResult};
use crate::events::SyncEvent;
use crate::query_cache::QueryKey;
use crate::records::EntityRecord;
use crate::remote::{dispatch, RemoteService};
use crate::state::stat_keys;
use driftsync_protocol::{progress_id, ActionId, Mutation, Profile, Progress, Wallet};
use driftsync_store::{now_millis, EntityTable};
use tracing::{debug, error, info, instrument, warn};

/// How a mutation was accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome<T> {
    /// The server applied the mutation; holds its response.
    Confirmed(T),
    /// The mutation is queued and will be replayed later.
    QueuedOffline {
        /// Id of the queued action.
        action_id: ActionId,
    },
    /// The server refused the mutation, or it was invalid. Nothing is
    /// queued and the local value has been restored.
    Rejected {
        /// Why.
        reason: String,
    },
}

impl<T> MutationOutcome<T> {
    /// Returns true for `Confirmed` and `QueuedOffline`.
    pub fn is_accepted(&self) -> bool {
        !matches!(self, MutationOutcome::Rejected { .. })
    }

    /// Returns true when the mutation waits in the outbox.
    pub fn is_queued(&self) -> bool {
        matches!(self, MutationOutcome::QueuedOffline { .. })
    }

    /// Returns the confirmed value, if any.
    pub fn confirmed(self) -> Option<T> {
        match self {
            MutationOutcome::Confirmed(value) => Some(value),
            _ => None,
        }
    }

    /// Converts the confirmed value.
    pub fn try_map<U, E>(self, f: impl FnOnce(T) -> Result<U, E>) -> Result<MutationOutcome<U>, E> {
        Ok(match self {
            MutationOutcome::Confirmed(value) => MutationOutcome::Confirmed(f(value)?),
            MutationOutcome::QueuedOffline { action_id } => {
                MutationOutcome::QueuedOffline { action_id }
            }
            MutationOutcome::Rejected { reason } => MutationOutcome::Rejected { reason },
        })
    }
}

impl SyncContext {
    /// Submits a mutation.
    ///
    /// The optimistic value is written to the store and the query cache
    /// before any network call. The only error is a failure of that local
    /// write.
    #[instrument(skip(self, mutation), fields(kind = mutation.kind()))]
    pub async fn submit(&self, mutation: Mutation) -> SyncResult<MutationOutcome<EntityRecord>> {
        if let Err(err) = mutation.validate() {
            debug!(error = %err, "invalid mutation");
            return Ok(MutationOutcome::Rejected {
                reason: err.to_string(),
            });
        }

        let action_id = ActionId::generate();
        let optimistic = self.optimistic_record(&mutation).await;
        let table = optimistic.table();
        let id = optimistic.id();
        let payload = optimistic.to_payload()?;
        self.store().upsert(table, &id, &payload).await?;
        self.queries().set(QueryKey::record(table, id), payload);

        // Older queued actions go first, so a non-empty outbox forces the
        // mutation to queue behind them.
        let direct = self.is_online() && self.outbox().pending_count().await? == 0;
        if direct {
            match dispatch(self.remote().as_ref(), action_id, &mutation).await {
                Ok(confirmed) => {
                    self.apply_server_record(&confirmed).await;
                    info!(%action_id, "mutation confirmed");
                    return Ok(MutationOutcome::Confirmed(confirmed));
                }
                Err(err) if err.retry_class() == RetryClass::Permanent => {
                    let reason = err.to_string();
                    warn!(%action_id, %reason, "mutation rejected");
                    if let Err(err) = self.store().increment_stat(stat_keys::REJECTED, 1).await {
                        error!(error = %err, "failed to update counter");
                    }
                    self.emit(SyncEvent::MutationRejected {
                        action_id,
                        reason: reason.clone(),
                    });
                    self.restore_entity(&mutation).await;
                    return Ok(MutationOutcome::Rejected { reason });
                }
                Err(err) => {
                    debug!(%action_id, error = %err, "direct attempt failed, queueing");
                }
            }
        }

        let row = self.outbox().enqueue(action_id, &mutation).await?;
        self.emit(SyncEvent::ActionQueued {
            action_id,
            kind: row.kind,
        });
        self.refresh_state().await;
        if self.is_online() {
            self.wake_reconciler();
        }
        Ok(MutationOutcome::QueuedOffline { action_id })
    }

    async fn optimistic_record(&self, mutation: &Mutation) -> EntityRecord {
        match mutation {
            Mutation::PatchProfile(patch) => {
                let mut profile = self
                    .cached_record::<Profile>(&patch.user_id)
                    .await
                    .unwrap_or_else(|| Profile::empty(patch.user_id.clone()));
                patch.apply_to(&mut profile);
                EntityRecord::Profile(profile)
            }
            Mutation::UpdateProgress(update) => {
                EntityRecord::Progress(update.to_progress(now_millis()))
            }
            Mutation::EarnCredits(request) | Mutation::SpendCredits(request) => {
                let mut wallet = self
                    .cached_record::<Wallet>(&request.user_id)
                    .await
                    .unwrap_or_else(|| Wallet::empty(request.user_id.clone()));
                mutation.apply_to_wallet(&mut wallet);
                EntityRecord::Wallet(wallet)
            }
        }
    }

    /// Stores a record returned by the server and refreshes dependent
    /// queries.
    pub(crate) async fn apply_server_record(&self, record: &EntityRecord) {
        match record {
            EntityRecord::Profile(profile) => self.store_record(profile).await,
            EntityRecord::Progress(progress) => self.store_record(progress).await,
            EntityRecord::Wallet(wallet) => self.store_record(wallet).await,
        }
        match record.to_payload() {
            Ok(payload) => self
                .queries()
                .set(QueryKey::record(record.table(), record.id()), payload),
            Err(err) => error!(error = %err, "failed to encode confirmed record"),
        }
        self.queries().invalidate_lists(record.table());
    }

    /// Re-reads the entity a rejected mutation touched, replacing the
    /// optimistic value with the server's.
    async fn restore_entity(&self, mutation: &Mutation) {
        match mutation {
            Mutation::PatchProfile(patch) => {
                let user = patch.user_id.clone();
                self.read_record::<Profile, _, _>(&patch.user_id, |remote| async move {
                    remote.get_profile(&user).await
                })
                .await;
            }
            Mutation::UpdateProgress(update) => {
                let (user, course) = (update.user_id.clone(), update.course_id.clone());
                let id = progress_id(&course, &user);
                let restored = self
                    .read_record::<Progress, _, _>(&id, |remote| async move {
                        remote.get_progress(&user, &course).await
                    })
                    .await;
                if restored.is_none() {
                    self.queries()
                        .invalidate(&QueryKey::record(EntityTable::Progress, id));
                }
            }
            Mutation::EarnCredits(request) | Mutation::SpendCredits(request) => {
                let user = request.user_id.clone();
                self.read_record::<Wallet, _, _>(&request.user_id, |remote| async move {
                    remote.get_wallet(&user).await
                })
                .await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::error::RemoteError;
    use crate::mock::MockRemote;
    use driftsync_protocol::{CreditRequest, ProfilePatch};
    use driftsync_store::{ActionStatus, MemoryStore, StoreAdapter};
    use std::sync::Arc;

    fn context(online: bool) -> (Arc<MockRemote>, SyncContext) {
        let remote = Arc::new(MockRemote::new());
        let config = SyncConfig::new("u1", "http://localhost").with_initial_online(online);
        let ctx = SyncContext::new(config, Arc::new(MemoryStore::new()), remote.clone()).unwrap();
        (remote, ctx)
    }

    fn spend(amount: u32) -> Mutation {
        Mutation::SpendCredits(CreditRequest {
            user_id: "u1".into(),
            amount,
            reason: None,
        })
    }

    #[tokio::test]
    async fn offline_mutation_is_queued_and_visible() {
        let (remote, ctx) = context(false);
        ctx.store_record(&Wallet {
            user_id: "u1".into(),
            balance: 5,
        })
        .await;

        let outcome = ctx.submit(spend(2)).await.unwrap();
        assert!(outcome.is_queued());
        assert_eq!(ctx.cached_record::<Wallet>("u1").await.unwrap().balance, 3);
        let entry = ctx
            .queries()
            .get(&QueryKey::record(EntityTable::Wallet, "u1"))
            .unwrap();
        assert_eq!(entry.value["balance"], 3);
        assert_eq!(ctx.connectivity_state().pending_count, 1);
        assert!(remote.calls().is_empty());
    }

    #[tokio::test]
    async fn online_mutation_is_confirmed() {
        let (remote, ctx) = context(true);
        remote.seed_wallet(Wallet {
            user_id: "u1".into(),
            balance: 10,
        });
        ctx.store_record(&Wallet {
            user_id: "u1".into(),
            balance: 10,
        })
        .await;

        let outcome = ctx.submit(spend(4)).await.unwrap();
        assert_eq!(
            outcome,
            MutationOutcome::Confirmed(EntityRecord::Wallet(Wallet {
                user_id: "u1".into(),
                balance: 6,
            }))
        );
        assert_eq!(ctx.outbox().pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn transient_failure_falls_back_to_outbox() {
        let (remote, ctx) = context(true);
        remote.fail_next(RemoteError::api(503, "maintenance"));

        let outcome = ctx.submit(spend(1)).await.unwrap();
        assert!(outcome.is_queued());
        let rows = ctx.outbox().list(Some(ActionStatus::Pending)).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].attempts, 0);
    }

    #[tokio::test]
    async fn rejection_restores_server_value() {
        let (remote, ctx) = context(true);
        remote.seed_wallet(Wallet {
            user_id: "u1".into(),
            balance: 1,
        });
        ctx.store_record(&Wallet {
            user_id: "u1".into(),
            balance: 1,
        })
        .await;

        let outcome = ctx.submit(spend(5)).await.unwrap();
        assert!(matches!(outcome, MutationOutcome::Rejected { .. }));
        assert_eq!(ctx.cached_record::<Wallet>("u1").await.unwrap().balance, 1);
        assert_eq!(ctx.outbox().pending_count().await.unwrap(), 0);
        assert_eq!(ctx.stats().await.unwrap().rejected, 1);
    }

    #[tokio::test]
    async fn invalid_mutation_changes_nothing() {
        let (_, ctx) = context(false);
        let outcome = ctx.submit(spend(0)).await.unwrap();
        assert!(matches!(outcome, MutationOutcome::Rejected { .. }));
        assert!(ctx.cached_record::<Wallet>("u1").await.is_none());
        assert_eq!(ctx.store().count_records(EntityTable::Wallet).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn profile_patch_merges_cached_fields() {
        let (_, ctx) = context(false);
        ctx.store_record(&Profile {
            user_id: "u1".into(),
            display_name: "Ada".into(),
            avatar_url: None,
            bio: Some("hello".into()),
        })
        .await;

        ctx.submit(Mutation::PatchProfile(
            ProfilePatch::new("u1").with_display_name("Ada L."),
        ))
        .await
        .unwrap();
        let profile = ctx.cached_record::<Profile>("u1").await.unwrap();
        assert_eq!(profile.display_name, "Ada L.");
        assert_eq!(profile.bio.as_deref(), Some("hello"));
    }
}
