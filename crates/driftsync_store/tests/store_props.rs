//! Property tests shared by both store implementations.

use driftsync_store::{
    ActionStatus, EntityTable, MemoryStore, NewAction, RecordFilter, SqliteStore, StoreAdapter,
};
use proptest::prelude::*;
use serde_json::json;

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime")
        .block_on(future)
}

/// Strategy for question writes: (id, course, marker).
fn question_write_strategy() -> impl Strategy<Value = (String, String, i64)> {
    (
        prop::string::string_regex("q[0-9]{1,2}").expect("Invalid regex"),
        prop::sample::select(vec!["c1".to_string(), "c2".to_string(), "c3".to_string()]),
        any::<i64>(),
    )
}

/// Strategy for outbox creation timestamps with frequent ties.
fn created_at_strategy() -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(0i64..5, 1..20)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn last_write_wins_and_one_row_per_key(
        writes in prop::collection::vec(question_write_strategy(), 1..40)
    ) {
        block_on(async {
            let sqlite = SqliteStore::open_in_memory().unwrap();
            let memory = MemoryStore::new();
            let mut expected = std::collections::BTreeMap::new();

            for (id, course, marker) in &writes {
                let payload = json!({"id": id, "course_id": course, "marker": marker});
                sqlite.upsert(EntityTable::Question, id, &payload).await.unwrap();
                memory.upsert(EntityTable::Question, id, &payload).await.unwrap();
                expected.insert(id.clone(), payload);
            }

            let expected_count = expected.len() as u64;
            assert_eq!(sqlite.count_records(EntityTable::Question).await.unwrap(), expected_count);
            assert_eq!(memory.count_records(EntityTable::Question).await.unwrap(), expected_count);

            for (id, payload) in &expected {
                let from_sqlite = sqlite.get_by_id(EntityTable::Question, id).await.unwrap().unwrap();
                let from_memory = memory.get_by_id(EntityTable::Question, id).await.unwrap().unwrap();
                assert_eq!(&from_sqlite.payload, payload);
                assert_eq!(&from_memory.payload, payload);
            }
        });
    }

    #[test]
    fn sqlite_and_memory_agree_on_filters(
        writes in prop::collection::vec(question_write_strategy(), 0..40),
        course in prop::sample::select(vec!["c1", "c2", "c3", "c4"]),
        limit in prop::option::of(0usize..6),
    ) {
        block_on(async {
            let sqlite = SqliteStore::open_in_memory().unwrap();
            let memory = MemoryStore::new();
            for (id, course, marker) in &writes {
                let payload = json!({"id": id, "course_id": course, "marker": marker});
                sqlite.upsert(EntityTable::Question, id, &payload).await.unwrap();
                memory.upsert(EntityTable::Question, id, &payload).await.unwrap();
            }

            let mut filter = RecordFilter::new().eq("course_id", course);
            if let Some(limit) = limit {
                filter = filter.limit(limit);
            }

            let a: Vec<_> = sqlite
                .get_all(EntityTable::Question, &filter)
                .await
                .unwrap()
                .into_iter()
                .map(|r| (r.id, r.payload))
                .collect();
            let b: Vec<_> = memory
                .get_all(EntityTable::Question, &filter)
                .await
                .unwrap()
                .into_iter()
                .map(|r| (r.id, r.payload))
                .collect();
            assert_eq!(a, b);
            assert!(a.iter().all(|(_, p)| p["course_id"] == course));
        });
    }

    #[test]
    fn outbox_order_is_created_at_then_insertion(times in created_at_strategy()) {
        block_on(async {
            let sqlite = SqliteStore::open_in_memory().unwrap();
            let memory = MemoryStore::new();
            for (i, created_at) in times.iter().enumerate() {
                let action = NewAction {
                    id: format!("a{i}"),
                    kind: "EARN_CREDITS".into(),
                    payload: json!({"amount": i}),
                    created_at: *created_at,
                };
                sqlite.enqueue_action(action.clone()).await.unwrap();
                memory.enqueue_action(action).await.unwrap();
            }

            let mut expected: Vec<(i64, usize)> =
                times.iter().copied().enumerate().map(|(i, t)| (t, i)).collect();
            expected.sort();
            let expected: Vec<String> = expected.into_iter().map(|(_, i)| format!("a{i}")).collect();

            for store in [&sqlite as &dyn StoreAdapter, &memory as &dyn StoreAdapter] {
                let ids: Vec<String> = store
                    .list_actions(Some(ActionStatus::Pending))
                    .await
                    .unwrap()
                    .into_iter()
                    .map(|a| a.id)
                    .collect();
                assert_eq!(ids, expected);
                let oldest = store.oldest_eligible_action(5).await.unwrap().unwrap();
                assert_eq!(oldest.id, expected[0]);
            }
        });
    }

    #[test]
    fn attempts_never_exceed_cap(failures in 0u32..12, cap in 1u32..6) {
        block_on(async {
            let store = SqliteStore::open_in_memory().unwrap();
            store
                .enqueue_action(NewAction {
                    id: "a".into(),
                    kind: "SPEND_CREDITS".into(),
                    payload: json!({"amount": 2}),
                    created_at: 0,
                })
                .await
                .unwrap();

            // the loop stops picking the action once it is no longer eligible
            for _ in 0..failures {
                if store.oldest_eligible_action(cap).await.unwrap().is_none() {
                    break;
                }
                store.record_action_failure("a", "timeout", cap).await.unwrap();
            }

            let row = store.get_action("a").await.unwrap().unwrap();
            assert!(row.attempts <= cap);
            assert_eq!(row.status == ActionStatus::Dead, row.attempts == cap);
        });
    }
}
