//! End-to-end offline scenarios against the in-process backend.

use driftsync_engine::{
    MockRemote, MutationOutcome, QueryKey, Reconciler, RemoteError, RemoteService, SyncConfig,
    SyncContext, SyncEvent, SyncSession, TickOutcome,
};
use driftsync_protocol::{ActionId, CreditRequest, Mutation, Wallet};
use driftsync_store::{ActionStatus, EntityTable, MemoryStore, SqliteStore, StoreAdapter};
use std::sync::Arc;
use std::time::Duration;

fn config(online: bool) -> SyncConfig {
    SyncConfig::new("u1", "http://backend.invalid")
        .with_initial_online(online)
        .with_reconcile_interval(Duration::from_secs(3600))
}

fn remote_with_balance(balance: i64) -> Arc<MockRemote> {
    let remote = Arc::new(MockRemote::new());
    remote.seed_wallet(Wallet {
        user_id: "u1".into(),
        balance,
    });
    remote
}

fn context(remote: &Arc<MockRemote>, config: SyncConfig) -> SyncContext {
    SyncContext::new(config, Arc::new(MemoryStore::new()), remote.clone()).unwrap()
}

fn queued_id<T>(outcome: &MutationOutcome<T>) -> ActionId {
    match outcome {
        MutationOutcome::QueuedOffline { action_id } => *action_id,
        _ => panic!("mutation was not queued"),
    }
}

#[tokio::test]
async fn spend_offline_then_reconcile() {
    let remote = remote_with_balance(5);
    let ctx = context(&remote, config(true));
    assert_eq!(ctx.wallet().await.balance, 5);

    ctx.reporter().report(false);
    let outcome = ctx.spend_credits(2, None).await.unwrap();
    assert!(outcome.is_queued());
    assert_eq!(ctx.wallet().await.balance, 3);

    let rows = ctx.outbox().list(None).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].kind, "SPEND_CREDITS");
    assert_eq!(rows[0].payload["amount"], 2);
    assert_eq!(ctx.connectivity_state().pending_count, 1);

    ctx.reporter().report(true);
    let outcomes = Reconciler::new(ctx.clone()).drain(10).await.unwrap();
    assert!(matches!(outcomes[0], TickOutcome::Synced { .. }));
    assert_eq!(remote.wallet("u1").unwrap().balance, 3);
    assert_eq!(ctx.wallet().await.balance, 3);
    assert!(ctx.outbox().list(None).await.unwrap().is_empty());
    assert_eq!(ctx.connectivity_state().pending_count, 0);
}

#[tokio::test]
async fn offline_actions_replay_in_order() {
    let remote = Arc::new(MockRemote::new());
    let ctx = context(&remote, config(false));

    let first = ctx.update_progress("courseA", 40, false).await.unwrap();
    let second = ctx.update_progress("courseB", 70, false).await.unwrap();
    let expected = vec![queued_id(&first), queued_id(&second)];

    ctx.reporter().report(true);
    Reconciler::new(ctx.clone()).drain(10).await.unwrap();

    let replayed: Vec<ActionId> = remote
        .calls()
        .into_iter()
        .filter(|call| call.op == "post_progress")
        .filter_map(|call| call.action_id)
        .collect();
    assert_eq!(replayed, expected);
    assert_eq!(remote.progress("u1", "courseA").unwrap().percent, 40);
    assert_eq!(remote.progress("u1", "courseB").unwrap().percent, 70);
}

#[tokio::test]
async fn online_write_queues_behind_older_actions() {
    let remote = Arc::new(MockRemote::new());
    let ctx = context(&remote, config(false));

    let older = ctx.update_progress("courseA", 40, false).await.unwrap();
    assert!(older.is_queued());

    ctx.reporter().report(true);
    let newer = ctx.update_progress("courseA", 60, false).await.unwrap();
    let expected = vec![queued_id(&older), queued_id(&newer)];
    assert_eq!(remote.call_count("post_progress"), 0);
    assert_eq!(ctx.connectivity_state().pending_count, 2);

    Reconciler::new(ctx.clone()).drain(10).await.unwrap();

    let replayed: Vec<ActionId> = remote
        .calls()
        .into_iter()
        .filter(|call| call.op == "post_progress")
        .filter_map(|call| call.action_id)
        .collect();
    assert_eq!(replayed, expected);
    assert_eq!(remote.progress("u1", "courseA").unwrap().percent, 60);
    assert_eq!(ctx.progress("courseA").await.percent, 60);
    assert!(ctx.outbox().list(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn failing_action_stops_at_attempt_cap() {
    let remote = remote_with_balance(0);
    let ctx = context(&remote, config(false).with_max_attempts(3));
    ctx.earn_credits(1, None).await.unwrap();

    remote.reject_op("earn_credits", RemoteError::api(503, "unavailable"));
    ctx.reporter().report(true);
    let reconciler = Reconciler::new(ctx.clone());
    let outcomes = reconciler.drain(10).await.unwrap();

    assert_eq!(outcomes.len(), 4);
    assert!(matches!(outcomes[0], TickOutcome::Retrying { attempts: 1, .. }));
    assert!(matches!(outcomes[1], TickOutcome::Retrying { attempts: 2, .. }));
    assert!(matches!(outcomes[2], TickOutcome::Dead { .. }));
    assert_eq!(outcomes[3], TickOutcome::Idle);
    assert_eq!(remote.call_count("earn_credits"), 3);

    assert_eq!(reconciler.tick().await.unwrap(), TickOutcome::Idle);
    assert_eq!(remote.call_count("earn_credits"), 3);

    let dead = ctx.dead_actions().await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].attempts, 3);
    assert_eq!(dead[0].status, ActionStatus::Dead);
}

#[tokio::test]
async fn blocked_head_delays_later_actions() {
    let remote = remote_with_balance(0);
    let ctx = context(&remote, config(false).with_max_attempts(2));
    ctx.earn_credits(1, None).await.unwrap();
    ctx.patch_profile(driftsync_protocol::ProfilePatch::new("u1").with_bio("hi"))
        .await
        .unwrap();

    remote.reject_op("earn_credits", RemoteError::Timeout);
    ctx.reporter().report(true);
    let reconciler = Reconciler::new(ctx.clone());
    reconciler.tick().await.unwrap();
    assert_eq!(remote.call_count("patch_profile"), 0);

    reconciler.drain(10).await.unwrap();
    assert_eq!(remote.call_count("patch_profile"), 1);
    assert_eq!(remote.profile("u1").unwrap().bio.as_deref(), Some("hi"));
}

#[tokio::test]
async fn rejected_replay_is_never_retried() {
    let remote = remote_with_balance(5);
    let ctx = context(&remote, config(true));
    ctx.wallet().await;
    ctx.reporter().report(false);
    ctx.spend_credits(50, None).await.unwrap();
    assert_eq!(ctx.wallet().await.balance, -45);

    let mut events = ctx.subscribe_events();
    ctx.reporter().report(true);
    let reconciler = Reconciler::new(ctx.clone());
    let outcome = reconciler.tick().await.unwrap();
    match outcome {
        TickOutcome::Dead { reason, .. } => assert!(reason.starts_with("rejected: ")),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(reconciler.tick().await.unwrap(), TickOutcome::Idle);
    assert_eq!(remote.call_count("spend_credits"), 1);
    assert_eq!(ctx.stats().await.unwrap().rejected, 1);
    assert!(ctx
        .queries()
        .get(&QueryKey::record(EntityTable::Wallet, "u1"))
        .unwrap()
        .stale);

    let mut saw_dead = false;
    while let Ok(event) = events.try_recv() {
        saw_dead |= matches!(event, SyncEvent::ActionDead { .. });
    }
    assert!(saw_dead);

    assert_eq!(ctx.wallet().await.balance, 5);
}

#[tokio::test]
async fn replay_of_applied_action_is_not_applied_twice() {
    let remote = remote_with_balance(0);
    let ctx = context(&remote, config(true));
    let request = CreditRequest {
        user_id: "u1".into(),
        amount: 4,
        reason: None,
    };
    let action_id = ActionId::generate();

    // The server applied the request but the response never arrived.
    remote.earn_credits(action_id, &request).await.unwrap();
    ctx.outbox()
        .enqueue(action_id, &Mutation::EarnCredits(request))
        .await
        .unwrap();

    let outcome = Reconciler::new(ctx.clone()).tick().await.unwrap();
    assert!(matches!(outcome, TickOutcome::Synced { .. }));
    assert_eq!(remote.wallet("u1").unwrap().balance, 4);
    assert_eq!(remote.applied_count(), 1);
}

#[tokio::test]
async fn direct_attempt_and_replay_share_the_action_id() {
    let remote = remote_with_balance(0);
    let ctx = context(&remote, config(true));
    remote.fail_next(RemoteError::transport_retryable("connection reset"));

    let outcome = ctx.earn_credits(2, None).await.unwrap();
    let action_id = queued_id(&outcome);
    Reconciler::new(ctx.clone()).tick().await.unwrap();

    let ids: Vec<Option<ActionId>> = remote
        .calls()
        .into_iter()
        .filter(|call| call.op == "earn_credits")
        .map(|call| call.action_id)
        .collect();
    assert_eq!(ids, vec![Some(action_id), Some(action_id)]);
    assert_eq!(remote.wallet("u1").unwrap().balance, 2);
}

#[tokio::test]
async fn mutation_is_visible_to_subscribers_before_sync() {
    let remote = remote_with_balance(5);
    let ctx = context(&remote, config(true));
    ctx.wallet().await;
    ctx.reporter().report(false);

    let rx = ctx
        .queries()
        .subscribe(QueryKey::record(EntityTable::Wallet, "u1"));
    ctx.spend_credits(2, None).await.unwrap();
    let entry = rx.borrow().clone().unwrap();
    assert_eq!(entry.value["balance"], 3);
    assert!(!entry.stale);
    assert_eq!(remote.call_count("spend_credits"), 0);
}

#[tokio::test]
async fn offline_reads_are_stable() {
    let remote = remote_with_balance(7);
    let ctx = context(&remote, config(true));
    ctx.wallet().await;
    ctx.reporter().report(false);
    remote.seed_wallet(Wallet {
        user_id: "u1".into(),
        balance: 100,
    });

    let first = ctx.wallet().await;
    let second = ctx.wallet().await;
    assert_eq!(first, second);
    assert_eq!(first.balance, 7);
}

#[tokio::test]
async fn interrupted_replay_is_recovered_on_start() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("drift.db");
    let remote = remote_with_balance(0);

    {
        let store = Arc::new(SqliteStore::open(&path).unwrap());
        let ctx = SyncContext::new(config(false), store, remote.clone()).unwrap();
        let outcome = ctx.earn_credits(3, None).await.unwrap();
        let id = queued_id(&outcome).to_string();
        ctx.outbox().mark_syncing(&id).await.unwrap();
    }

    let store = Arc::new(SqliteStore::open(&path).unwrap());
    let session = SyncSession::start(config(false), store.clone(), remote.clone())
        .await
        .unwrap();
    let rows = store.list_actions(None).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, ActionStatus::Pending);
    assert_eq!(session.context().connectivity_state().pending_count, 1);
    session.shutdown().await;
}

#[tokio::test]
async fn session_drains_when_network_returns() {
    let remote = remote_with_balance(0);
    let store = Arc::new(MemoryStore::new());
    let session = SyncSession::start(config(false), store, remote.clone())
        .await
        .unwrap();
    let ctx = session.context().clone();
    let mut events = ctx.subscribe_events();

    ctx.earn_credits(5, None).await.unwrap();
    session.reporter().report(true);

    let synced = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(SyncEvent::ActionSynced { .. }) = events.recv().await {
                break;
            }
        }
    })
    .await;
    assert!(synced.is_ok(), "reconciler was not woken");
    assert_eq!(remote.wallet("u1").unwrap().balance, 5);

    session.shutdown().await;
    assert!(!ctx.is_running());
}

#[tokio::test]
async fn revived_action_is_replayed() {
    let remote = remote_with_balance(0);
    let ctx = context(&remote, config(false).with_max_attempts(1));
    ctx.earn_credits(1, None).await.unwrap();

    ctx.reporter().report(true);
    remote.fail_next(RemoteError::Timeout);
    let reconciler = Reconciler::new(ctx.clone());
    assert!(matches!(
        reconciler.tick().await.unwrap(),
        TickOutcome::Dead { .. }
    ));

    assert_eq!(ctx.outbox().revive_all().await.unwrap(), 1);
    assert!(matches!(
        reconciler.tick().await.unwrap(),
        TickOutcome::Synced { .. }
    ));
    assert_eq!(remote.wallet("u1").unwrap().balance, 1);
}

#[tokio::test]
async fn clear_local_data_empties_everything() {
    let remote = remote_with_balance(3);
    let ctx = context(&remote, config(true));
    ctx.wallet().await;
    ctx.reporter().report(false);
    ctx.earn_credits(1, None).await.unwrap();

    ctx.clear_local_data().await.unwrap();
    assert!(ctx.queries().is_empty());
    assert_eq!(ctx.connectivity_state().pending_count, 0);
    assert_eq!(ctx.wallet().await, Wallet::empty("u1"));
}
