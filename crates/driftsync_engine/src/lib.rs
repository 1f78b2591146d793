//! # DriftSync Engine
//!
//! Offline-first synchronization for a mobile client.
//!
//! This crate provides:
//! - Cache-aside reads that fall back to the local store when offline
//! - Write-behind mutations with optimistic local state
//! - A durable outbox replayed in FIFO order with bounded retries
//! - Connectivity and reachability monitoring
//! - A reactive query cache for UI subscriptions
//! - HTTP and in-process implementations of the remote service
//!
//! ## Architecture
//!
//! A [`SyncSession`] owns a [`SyncContext`] and three background tasks:
//! the reconciliation loop, the reachability prober and the connectivity
//! publisher. Reads and mutations are methods on the context.
//!
//! 1. A mutation updates the local store and the query cache first.
//! 2. If online with an empty outbox, it is sent directly; otherwise, or
//!    on a transient failure, it is appended to the outbox.
//! 3. The reconciler replays the oldest eligible action once per tick.
//!
//! ## Key Invariants
//!
//! - The local write always precedes any network attempt
//! - One action id per mutation, sent as idempotency key on every attempt
//! - At most one action is in flight at a time
//! - Attempts never exceed `max_attempts`; exhausted or rejected actions
//!   are kept as `dead` until revived or purged
//!
//! ```no_run
//! use driftsync_engine::{HttpRemote, SyncConfig, SyncSession};
//! use driftsync_store::SqliteStore;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SyncConfig::new("user-1", "https://api.example.com");
//! let store = Arc::new(SqliteStore::open("app.db")?);
//! let remote = Arc::new(HttpRemote::from_config(&config)?);
//! let session = SyncSession::start(config, store, remote).await?;
//!
//! session.reporter().report(true);
//! let outcome = session.context().spend_credits(2, None).await?;
//! println!("accepted: {}", outcome.is_accepted());
//! session.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod connectivity;
mod context;
mod domain;
mod error;
mod events;
mod http;
mod mock;
mod outbox;
mod query_cache;
mod reads;
mod reconcile;
mod records;
mod remote;
mod session;
mod state;
mod writes;

pub use config::SyncConfig;
pub use connectivity::{ConnectivityMonitor, NetworkReporter, ReachabilityProber};
pub use context::SyncContext;
pub use domain::{courses_key, questions_key};
pub use error::{RemoteError, RemoteResult, RetryClass, SyncError, SyncResult};
pub use events::SyncEvent;
pub use http::HttpRemote;
pub use mock::{MockCall, MockRemote};
pub use outbox::{Outbox, QueuedAction, Recovery};
pub use query_cache::{QueryCache, QueryEntry, QueryKey};
pub use reconcile::{Reconciler, TickOutcome};
pub use records::{mutation_target, CacheRecord, EntityRecord};
pub use remote::{dispatch, RemoteService};
pub use session::SyncSession;
pub use state::{stat_keys, ConnectivityState, SyncStats};
pub use writes::MutationOutcome;
