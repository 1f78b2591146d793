//! Probe command implementation.

use super::{emit, CommandResult};
use driftsync_engine::{HttpRemote, RemoteService};
use serde::Serialize;
use std::time::{Duration, Instant};

#[derive(Debug, Serialize)]
struct ProbeResult {
    url: String,
    reachable: bool,
    latency_ms: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Runs the probe command.
pub async fn run(url: &str, token: Option<&str>, timeout_secs: u64, format: &str) -> CommandResult {
    let timeout = Duration::from_secs(timeout_secs);
    let mut remote = HttpRemote::new(url, timeout)?;
    if let Some(token) = token {
        remote = remote.with_auth_token(token);
    }

    let started = Instant::now();
    let outcome = remote.probe().await;
    let result = ProbeResult {
        url: url.to_string(),
        reachable: outcome.is_ok(),
        latency_ms: started.elapsed().as_millis(),
        error: outcome.err().map(|err| err.to_string()),
    };
    emit(format, &result, |result| match &result.error {
        None => println!("{} is reachable ({} ms)", result.url, result.latency_ms),
        Some(error) => println!("{} is unreachable: {error}", result.url),
    })?;

    if result.reachable {
        Ok(())
    } else {
        Err("Backend unreachable".into())
    }
}
