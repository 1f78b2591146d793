//! Drain command implementation.

use super::{emit, open_store, CommandResult};
use driftsync_engine::{HttpRemote, Reconciler, SyncConfig, SyncContext, TickOutcome};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Options of the drain command.
#[derive(Debug)]
pub struct DrainOptions {
    /// Backend URL.
    pub url: String,
    /// Account the database belongs to.
    pub account: String,
    /// Bearer token.
    pub token: Option<String>,
    /// Upper bound on reconciliation ticks.
    pub max_ticks: usize,
}

/// One tick as reported by the command.
#[derive(Debug, Serialize)]
pub struct TickReport {
    /// `synced`, `retrying`, `dead`, `idle`, `offline` or `busy`.
    pub outcome: &'static str,
    /// Action replayed by the tick.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_id: Option<String>,
    /// Attempts after a failed replay.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    /// Why an action died.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl From<TickOutcome> for TickReport {
    fn from(outcome: TickOutcome) -> Self {
        let report = |outcome| TickReport {
            outcome,
            action_id: None,
            attempts: None,
            reason: None,
        };
        match outcome {
            TickOutcome::Busy => report("busy"),
            TickOutcome::Offline => report("offline"),
            TickOutcome::Idle => report("idle"),
            TickOutcome::Synced { action_id } => TickReport {
                action_id: Some(action_id),
                ..report("synced")
            },
            TickOutcome::Retrying {
                action_id,
                attempts,
            } => TickReport {
                action_id: Some(action_id),
                attempts: Some(attempts),
                ..report("retrying")
            },
            TickOutcome::Dead { action_id, reason } => TickReport {
                action_id: Some(action_id),
                reason: Some(reason),
                ..report("dead")
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct DrainResult {
    ticks: Vec<TickReport>,
    pending: u64,
}

/// Runs the drain command.
pub async fn run(path: &Path, options: DrainOptions, format: &str) -> CommandResult {
    let store = open_store(path)?;
    let mut config = SyncConfig::new(options.account, options.url).with_initial_online(true);
    if let Some(token) = options.token {
        config = config.with_auth_token(token);
    }
    let remote = Arc::new(HttpRemote::from_config(&config)?);
    let ctx = SyncContext::new(config, store, remote)?;

    let recovery = ctx.outbox().recover().await?;
    if recovery.interrupted > 0 {
        info!(count = recovery.interrupted, "requeued interrupted actions");
    }

    let outcomes = Reconciler::new(ctx.clone()).drain(options.max_ticks).await?;
    let result = DrainResult {
        ticks: outcomes.into_iter().map(TickReport::from).collect(),
        pending: ctx.outbox().pending_count().await?,
    };
    emit(format, &result, print_text_output)
}

fn print_text_output(result: &DrainResult) {
    for tick in &result.ticks {
        match (&tick.action_id, tick.attempts, &tick.reason) {
            (Some(id), Some(attempts), _) => {
                println!("{:<8} {id} (attempt {attempts})", tick.outcome)
            }
            (Some(id), None, Some(reason)) => println!("{:<8} {id}: {reason}", tick.outcome),
            (Some(id), _, _) => println!("{:<8} {id}", tick.outcome),
            (None, _, _) => println!("{}", tick.outcome),
        }
    }
    println!();
    println!("{} action(s) still pending", result.pending);
}
