//! Outbox listing command implementation.

use super::{emit, open_store, CommandResult};
use driftsync_store::{ActionRow, ActionStatus, StoreAdapter};
use std::path::Path;

/// Runs the outbox command.
pub async fn run(
    path: &Path,
    status: Option<&str>,
    limit: Option<usize>,
    format: &str,
) -> CommandResult {
    let status = status.map(str::parse::<ActionStatus>).transpose()?;
    let store = open_store(path)?;
    let mut rows = store.list_actions(status).await?;
    if let Some(limit) = limit {
        rows.truncate(limit);
    }
    emit(format, &rows, |rows| print_text_output(rows))
}

fn print_text_output(rows: &[ActionRow]) {
    if rows.is_empty() {
        println!("Outbox is empty");
        return;
    }
    for row in rows {
        println!(
            "{}  {:<15} {:<8} attempts={} created={}",
            row.id,
            row.kind,
            row.status,
            row.attempts,
            row.created_at_utc().to_rfc3339()
        );
        if let Some(error) = &row.last_error {
            println!("    last error: {error}");
        }
    }
    println!();
    println!("{} action(s)", rows.len());
}
