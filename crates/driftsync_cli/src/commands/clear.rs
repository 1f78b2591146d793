//! Clear command implementation.

use super::{emit, open_store, CommandResult};
use driftsync_store::{EntityTable, StoreAdapter};
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Serialize)]
struct ClearResult {
    cleared: Vec<String>,
}

/// Runs the clear command. Without a table, cached rows, queued actions
/// and counters are all deleted.
pub async fn run(path: &Path, table: Option<&str>, format: &str) -> CommandResult {
    let store = open_store(path)?;
    let cleared = match table {
        Some(name) => {
            let table: EntityTable = name.parse()?;
            store.clear_table(table).await?;
            vec![table.sql_table().to_string()]
        }
        None => {
            store.clear_all().await?;
            vec!["everything".to_string()]
        }
    };
    emit(format, &ClearResult { cleared }, |result| {
        println!("Cleared {}", result.cleared.join(", "));
    })
}
