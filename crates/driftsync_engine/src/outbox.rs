//! Durable queue of mutations awaiting replay.
//!
//! The outbox is a typed layer over the store's outbox table: it encodes
//! [`Mutation`]s into rows, applies the attempt cap and keeps the
//! counters in the stat table current.

use crate::error::SyncResult;
use crate::state::stat_keys;
use chrono::{SecondsFormat, Utc};
use driftsync_protocol::{ActionId, Mutation, ProtocolError};
use driftsync_store::{
    now_millis, ActionRow, ActionStatus, NewAction, StoreAdapter, StoreResult,
};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Counts reported by [`Outbox::recover`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Recovery {
    /// `syncing` rows returned to `pending`.
    pub interrupted: u64,
    /// Rows at or above the attempt cap moved to `dead`.
    pub buried: u64,
}

/// A stored action decoded back into a mutation.
#[derive(Debug, Clone)]
pub struct QueuedAction {
    /// The stored row.
    pub row: ActionRow,
    /// Parsed action id.
    pub action_id: ActionId,
    /// Decoded mutation.
    pub mutation: Mutation,
}

impl QueuedAction {
    /// Decodes a stored row.
    pub fn decode(row: ActionRow) -> Result<Self, (ActionRow, ProtocolError)> {
        let action_id = match row.id.parse::<ActionId>() {
            Ok(id) => id,
            Err(err) => return Err((row, err)),
        };
        match Mutation::from_parts(&row.kind, row.payload.clone()) {
            Ok(mutation) => Ok(Self {
                row,
                action_id,
                mutation,
            }),
            Err(err) => Err((row, err)),
        }
    }
}

/// The engine's view of the outbox table.
#[derive(Clone)]
pub struct Outbox {
    store: Arc<dyn StoreAdapter>,
    max_attempts: u32,
}

impl std::fmt::Debug for Outbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbox")
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

impl Outbox {
    /// Creates an outbox over `store`.
    pub fn new(store: Arc<dyn StoreAdapter>, max_attempts: u32) -> Self {
        Self {
            store,
            max_attempts,
        }
    }

    /// Returns the attempt cap.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Appends a mutation in `pending` state.
    pub async fn enqueue(&self, action_id: ActionId, mutation: &Mutation) -> SyncResult<ActionRow> {
        let (kind, payload) = mutation.clone().into_parts()?;
        let row = self
            .store
            .enqueue_action(NewAction {
                id: action_id.to_string(),
                kind,
                payload,
                created_at: now_millis(),
            })
            .await?;
        self.bump(stat_keys::ENQUEUED).await;
        debug!(action_id = %row.id, kind = %row.kind, "action queued");
        Ok(row)
    }

    /// Returns the oldest eligible row, undecoded.
    pub async fn next_eligible(&self) -> StoreResult<Option<ActionRow>> {
        self.store.oldest_eligible_action(self.max_attempts).await
    }

    /// Counts rows eligible for replay.
    pub async fn pending_count(&self) -> StoreResult<u64> {
        self.store.count_eligible_actions(self.max_attempts).await
    }

    /// Lists rows, optionally of one status.
    pub async fn list(&self, status: Option<ActionStatus>) -> StoreResult<Vec<ActionRow>> {
        self.store.list_actions(status).await
    }

    /// Lists `dead` rows.
    pub async fn dead_actions(&self) -> StoreResult<Vec<ActionRow>> {
        self.store.list_actions(Some(ActionStatus::Dead)).await
    }

    /// Marks a row as being replayed.
    pub async fn mark_syncing(&self, id: &str) -> StoreResult<()> {
        self.store.set_action_status(id, ActionStatus::Syncing).await
    }

    /// Returns a row whose replay could not be settled to `pending`.
    pub async fn release(&self, id: &str) -> StoreResult<()> {
        self.store.set_action_status(id, ActionStatus::Pending).await
    }

    /// Removes a confirmed row and records the success.
    pub async fn complete(&self, id: &str) -> StoreResult<()> {
        self.store.delete_action(id).await?;
        self.bump(stat_keys::REPLAYED).await;
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        if let Err(err) = self.store.set_stat(stat_keys::LAST_SUCCESS_AT, &now).await {
            error!(error = %err, "failed to record last sync time");
        }
        Ok(())
    }

    /// Records a transient failure. The returned row is `failed`, or `dead`
    /// if the cap was reached.
    pub async fn fail(&self, id: &str, error: &str) -> StoreResult<ActionRow> {
        let row = self
            .store
            .record_action_failure(id, error, self.max_attempts)
            .await?;
        self.bump(stat_keys::FAILED_ATTEMPTS).await;
        if row.status == ActionStatus::Dead {
            self.bump(stat_keys::DEAD).await;
        }
        Ok(row)
    }

    /// Moves a row to `dead` because the server refused it.
    pub async fn reject(&self, id: &str, reason: &str) -> StoreResult<()> {
        self.store.mark_action_dead(id, reason).await?;
        self.bump(stat_keys::REJECTED).await;
        self.bump(stat_keys::DEAD).await;
        Ok(())
    }

    /// Moves an undecodable row to `dead`.
    pub async fn bury(&self, id: &str, reason: &str) -> StoreResult<()> {
        self.store.mark_action_dead(id, reason).await?;
        self.bump(stat_keys::DEAD).await;
        Ok(())
    }

    /// Returns a `dead` row to `pending` with its attempts reset.
    pub async fn revive(&self, id: &str) -> StoreResult<bool> {
        let revived = self.store.revive_action(id).await?;
        if revived {
            info!(action_id = %id, "revived dead action");
        }
        Ok(revived)
    }

    /// Revives every `dead` row.
    pub async fn revive_all(&self) -> StoreResult<u64> {
        let mut revived = 0;
        for row in self.dead_actions().await? {
            if self.store.revive_action(&row.id).await? {
                revived += 1;
            }
        }
        if revived > 0 {
            info!(revived, "revived dead actions");
        }
        Ok(revived)
    }

    /// Deletes every `dead` row.
    pub async fn purge_dead(&self) -> StoreResult<u64> {
        self.store.purge_dead_actions().await
    }

    /// Repairs rows left behind by an interrupted session.
    pub async fn recover(&self) -> StoreResult<Recovery> {
        let recovery = Recovery {
            interrupted: self.store.reset_interrupted_actions().await?,
            buried: self.store.bury_exhausted_actions(self.max_attempts).await?,
        };
        if recovery.interrupted > 0 || recovery.buried > 0 {
            info!(
                interrupted = recovery.interrupted,
                buried = recovery.buried,
                "recovered outbox"
            );
        }
        Ok(recovery)
    }

    async fn bump(&self, key: &str) {
        if let Err(err) = self.store.increment_stat(key, 1).await {
            error!(key, error = %err, "failed to update counter");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftsync_protocol::CreditRequest;
    use driftsync_store::MemoryStore;
    use serde_json::json;

    fn outbox(max_attempts: u32) -> (Arc<MemoryStore>, Outbox) {
        let store = Arc::new(MemoryStore::new());
        let outbox = Outbox::new(store.clone(), max_attempts);
        (store, outbox)
    }

    fn spend() -> Mutation {
        Mutation::SpendCredits(CreditRequest {
            user_id: "u1".into(),
            amount: 2,
            reason: None,
        })
    }

    #[tokio::test]
    async fn enqueue_round_trips_through_decode() {
        let (_, outbox) = outbox(5);
        let id = ActionId::generate();
        outbox.enqueue(id, &spend()).await.unwrap();

        let row = outbox.next_eligible().await.unwrap().unwrap();
        assert_eq!(row.kind, "SPEND_CREDITS");
        let queued = QueuedAction::decode(row).unwrap();
        assert_eq!(queued.action_id, id);
        assert_eq!(queued.mutation, spend());
        assert_eq!(outbox.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn decode_reports_unknown_kinds() {
        let (store, _) = outbox(5);
        let row = store
            .enqueue_action(NewAction {
                id: ActionId::generate().to_string(),
                kind: "TRANSFER_CREDITS".into(),
                payload: json!({}),
                created_at: 1,
            })
            .await
            .unwrap();
        let (row, err) = QueuedAction::decode(row).unwrap_err();
        assert_eq!(row.kind, "TRANSFER_CREDITS");
        assert!(matches!(err, ProtocolError::UnknownKind(_)));
    }

    #[tokio::test]
    async fn failures_count_towards_dead() {
        let (store, outbox) = outbox(2);
        let id = ActionId::generate().to_string();
        outbox.enqueue(id.parse().unwrap(), &spend()).await.unwrap();

        assert_eq!(outbox.fail(&id, "503").await.unwrap().status, ActionStatus::Failed);
        assert_eq!(outbox.fail(&id, "503").await.unwrap().status, ActionStatus::Dead);
        assert_eq!(outbox.dead_actions().await.unwrap().len(), 1);
        assert_eq!(
            store.get_stat(stat_keys::FAILED_ATTEMPTS).await.unwrap().as_deref(),
            Some("2")
        );
        assert_eq!(store.get_stat(stat_keys::DEAD).await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn complete_records_success() {
        let (store, outbox) = outbox(5);
        let id = ActionId::generate();
        outbox.enqueue(id, &spend()).await.unwrap();
        outbox.complete(&id.to_string()).await.unwrap();
        assert_eq!(outbox.pending_count().await.unwrap(), 0);
        assert_eq!(store.get_stat(stat_keys::REPLAYED).await.unwrap().as_deref(), Some("1"));
        assert!(store
            .get_stat(stat_keys::LAST_SUCCESS_AT)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn recover_resets_and_buries() {
        let (store, outbox) = outbox(1);
        let a = ActionId::generate();
        let b = ActionId::generate();
        outbox.enqueue(a, &spend()).await.unwrap();
        outbox.enqueue(b, &spend()).await.unwrap();
        outbox.mark_syncing(&a.to_string()).await.unwrap();
        store
            .record_action_failure(&b.to_string(), "timeout", 10)
            .await
            .unwrap();

        let recovery = outbox.recover().await.unwrap();
        assert_eq!(recovery, Recovery { interrupted: 1, buried: 1 });
        assert_eq!(outbox.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn revive_all_returns_dead_to_pending() {
        let (_, outbox) = outbox(5);
        for _ in 0..3 {
            let id = ActionId::generate();
            outbox.enqueue(id, &spend()).await.unwrap();
            outbox.reject(&id.to_string(), "rejected: 422").await.unwrap();
        }
        assert_eq!(outbox.pending_count().await.unwrap(), 0);
        assert_eq!(outbox.revive_all().await.unwrap(), 3);
        assert_eq!(outbox.pending_count().await.unwrap(), 3);
        assert_eq!(outbox.purge_dead().await.unwrap(), 0);
    }
}
