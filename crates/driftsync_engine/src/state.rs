//! Observable engine state and persisted counters.

use chrono::{DateTime, Utc};
use driftsync_store::{StoreAdapter, StoreResult};
use serde::Serialize;

/// Keys of the counters kept in the stat table.
pub mod stat_keys {
    /// Actions appended to the outbox.
    pub const ENQUEUED: &str = "outbox.enqueued";
    /// Actions confirmed by a replay.
    pub const REPLAYED: &str = "outbox.replayed";
    /// Failed replays that were retried or buried.
    pub const FAILED_ATTEMPTS: &str = "outbox.failed_attempts";
    /// Actions that reached the `dead` state.
    pub const DEAD: &str = "outbox.dead";
    /// Mutations the server refused.
    pub const REJECTED: &str = "outbox.rejected";
    /// RFC 3339 time of the last confirmed mutation.
    pub const LAST_SUCCESS_AT: &str = "sync.last_success_at";
}

/// Process-wide connectivity snapshot.
///
/// Not persisted. Recomputed on every network change, every heartbeat and
/// every reconciliation tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ConnectivityState {
    /// The platform reports a network interface.
    pub is_online: bool,
    /// The last probe reached the backend.
    pub is_server_reachable: bool,
    /// Outbox actions eligible for replay.
    pub pending_count: u64,
}

/// Snapshot of the persisted counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    /// Actions appended to the outbox.
    pub enqueued: u64,
    /// Actions confirmed by a replay.
    pub replayed: u64,
    /// Failed replays.
    pub failed_attempts: u64,
    /// Actions that died.
    pub dead: u64,
    /// Mutations the server refused.
    pub rejected: u64,
    /// Last confirmed mutation.
    pub last_success_at: Option<DateTime<Utc>>,
}

impl SyncStats {
    /// Reads the counters from the stat table. Missing or unreadable values
    /// count as zero.
    pub async fn load(store: &dyn StoreAdapter) -> StoreResult<Self> {
        let counter = |value: Option<String>| {
            value
                .and_then(|text| text.parse::<u64>().ok())
                .unwrap_or(0)
        };
        Ok(Self {
            enqueued: counter(store.get_stat(stat_keys::ENQUEUED).await?),
            replayed: counter(store.get_stat(stat_keys::REPLAYED).await?),
            failed_attempts: counter(store.get_stat(stat_keys::FAILED_ATTEMPTS).await?),
            dead: counter(store.get_stat(stat_keys::DEAD).await?),
            rejected: counter(store.get_stat(stat_keys::REJECTED).await?),
            last_success_at: store
                .get_stat(stat_keys::LAST_SUCCESS_AT)
                .await?
                .and_then(|text| DateTime::parse_from_rfc3339(&text).ok())
                .map(|at| at.with_timezone(&Utc)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftsync_store::MemoryStore;

    #[tokio::test]
    async fn load_reads_counters() {
        let store = MemoryStore::new();
        store.increment_stat(stat_keys::ENQUEUED, 3).await.unwrap();
        store.increment_stat(stat_keys::DEAD, 1).await.unwrap();
        store
            .set_stat(stat_keys::LAST_SUCCESS_AT, "2026-03-01T10:00:00Z")
            .await
            .unwrap();

        let stats = SyncStats::load(&store).await.unwrap();
        assert_eq!(stats.enqueued, 3);
        assert_eq!(stats.dead, 1);
        assert_eq!(stats.replayed, 0);
        assert_eq!(
            stats.last_success_at.unwrap().to_rfc3339(),
            "2026-03-01T10:00:00+00:00"
        );
    }
}
