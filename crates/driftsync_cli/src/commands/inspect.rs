//! Inspect command implementation.

use super::{emit, open_store, CommandResult};
use chrono::{DateTime, Utc};
use driftsync_engine::SyncStats;
use driftsync_store::{ActionStatus, EntityTable, StoreAdapter};
use serde::Serialize;
use std::path::Path;

/// Database inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Database path.
    pub path: String,
    /// Stored schema version.
    pub schema_version: i32,
    /// Rows per cache table.
    pub tables: Vec<TableStats>,
    /// Outbox summary.
    pub outbox: OutboxSummary,
    /// Persisted counters.
    pub stats: SyncStats,
}

/// Row count of one cache table.
#[derive(Debug, Serialize)]
pub struct TableStats {
    /// Table name.
    pub table: EntityTable,
    /// Number of cached rows.
    pub rows: u64,
}

/// Outbox rows per state.
#[derive(Debug, Default, Serialize)]
pub struct OutboxSummary {
    /// Waiting for their first replay.
    pub pending: usize,
    /// Replay in flight, or interrupted.
    pub syncing: usize,
    /// Failed at least once, will be retried.
    pub failed: usize,
    /// Terminal.
    pub dead: usize,
    /// Creation time of the oldest row.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest: Option<DateTime<Utc>>,
}

/// Runs the inspect command.
pub async fn run(path: &Path, format: &str) -> CommandResult {
    let store = open_store(path)?;

    let mut tables = Vec::with_capacity(EntityTable::ALL.len());
    for table in EntityTable::ALL {
        tables.push(TableStats {
            table,
            rows: store.count_records(table).await?,
        });
    }

    let mut outbox = OutboxSummary::default();
    for row in store.list_actions(None).await? {
        match row.status {
            ActionStatus::Pending => outbox.pending += 1,
            ActionStatus::Syncing => outbox.syncing += 1,
            ActionStatus::Failed => outbox.failed += 1,
            ActionStatus::Dead => outbox.dead += 1,
        }
        let created = row.created_at_utc();
        if outbox.oldest.map_or(true, |oldest| created < oldest) {
            outbox.oldest = Some(created);
        }
    }

    let result = InspectResult {
        path: path.display().to_string(),
        schema_version: store.schema_version().await?,
        tables,
        outbox,
        stats: SyncStats::load(store.as_ref()).await?,
    };
    emit(format, &result, print_text_output)
}

fn print_text_output(result: &InspectResult) {
    println!("DriftSync Database Inspection");
    println!("=============================");
    println!();
    println!("Path:           {}", result.path);
    println!("Schema version: {}", result.schema_version);
    println!();
    println!("Cache:");
    for table in &result.tables {
        println!("  {:<10} {} rows", table.table, table.rows);
    }
    println!();
    println!("Outbox:");
    println!("  Pending: {}", result.outbox.pending);
    println!("  Syncing: {}", result.outbox.syncing);
    println!("  Failed:  {}", result.outbox.failed);
    println!("  Dead:    {}", result.outbox.dead);
    if let Some(oldest) = result.outbox.oldest {
        println!("  Oldest:  {}", oldest.to_rfc3339());
    }
    println!();
    println!("Counters:");
    println!("  Enqueued:        {}", result.stats.enqueued);
    println!("  Replayed:        {}", result.stats.replayed);
    println!("  Failed attempts: {}", result.stats.failed_attempts);
    println!("  Dead:            {}", result.stats.dead);
    println!("  Rejected:        {}", result.stats.rejected);
    match result.stats.last_success_at {
        Some(at) => println!("  Last success:    {}", at.to_rfc3339()),
        None => println!("  Last success:    never"),
    }
}
