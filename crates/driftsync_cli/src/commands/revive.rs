//! Revive command implementation.

use super::{emit, open_store, CommandResult};
use driftsync_engine::{Outbox, SyncConfig};
use serde::Serialize;
use std::path::Path;

/// Actions to revive.
#[derive(Debug)]
pub enum Target {
    /// One action by id.
    One(String),
    /// Every dead action.
    All,
}

#[derive(Debug, Serialize)]
struct ReviveResult {
    revived: u64,
}

/// Runs the revive command.
pub async fn run(path: &Path, target: Target, format: &str) -> CommandResult {
    let store = open_store(path)?;
    let outbox = Outbox::new(store, SyncConfig::default().max_attempts);
    let revived = match target {
        Target::All => outbox.revive_all().await?,
        Target::One(id) => {
            if !outbox.revive(&id).await? {
                return Err(format!("Action {id} is not dead").into());
            }
            1
        }
    };
    emit(format, &ReviveResult { revived }, |result| {
        println!("Revived {} action(s)", result.revived);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftsync_store::{ActionStatus, NewAction, SqliteStore, StoreAdapter};

    async fn store_with_dead_action(path: &Path) {
        let store = SqliteStore::open(path).unwrap();
        store
            .enqueue_action(NewAction {
                id: "a1".into(),
                kind: "SPEND_CREDITS".into(),
                payload: serde_json::json!({"user_id": "u1", "amount": 2}),
                created_at: 1,
            })
            .await
            .unwrap();
        store.mark_action_dead("a1", "rejected: nope").await.unwrap();
    }

    #[tokio::test]
    async fn revives_dead_action() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.db");
        store_with_dead_action(&path).await;

        run(&path, Target::One("a1".into()), "json").await.unwrap();

        let store = SqliteStore::open(&path).unwrap();
        let row = store.get_action("a1").await.unwrap().unwrap();
        assert_eq!(row.status, ActionStatus::Pending);
        assert_eq!(row.attempts, 0);
        assert!(run(&path, Target::One("a1".into()), "text").await.is_err());
    }
}
