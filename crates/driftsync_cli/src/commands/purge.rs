//! Purge-dead command implementation.

use super::{emit, open_store, CommandResult};
use driftsync_engine::{Outbox, SyncConfig};
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Serialize)]
struct PurgeResult {
    purged: u64,
}

/// Runs the purge-dead command.
pub async fn run(path: &Path, format: &str) -> CommandResult {
    let store = open_store(path)?;
    let purged = Outbox::new(store, SyncConfig::default().max_attempts)
        .purge_dead()
        .await?;
    emit(format, &PurgeResult { purged }, |result| {
        println!("Purged {} dead action(s)", result.purged);
    })
}
