//! Engine events.

use crate::state::ConnectivityState;
use driftsync_protocol::ActionId;

/// Something observable happened in the engine.
///
/// Delivered on a broadcast channel; slow subscribers may miss events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A mutation was appended to the outbox.
    ActionQueued {
        /// Action id.
        action_id: ActionId,
        /// Mutation kind tag.
        kind: String,
    },
    /// A queued mutation was confirmed by the server.
    ActionSynced {
        /// Action id.
        action_id: ActionId,
        /// Mutation kind tag.
        kind: String,
    },
    /// A replay failed and will be retried.
    ActionRetrying {
        /// Action id.
        action_id: ActionId,
        /// Attempts so far.
        attempts: u32,
        /// Failure message.
        error: String,
    },
    /// An action reached the terminal `dead` state.
    ActionDead {
        /// Action id, as stored.
        action_id: String,
        /// Why the action died.
        reason: String,
    },
    /// A mutation was refused by the server on its direct attempt.
    MutationRejected {
        /// Action id.
        action_id: ActionId,
        /// Server message.
        reason: String,
    },
    /// The connectivity snapshot changed.
    ConnectivityChanged(ConnectivityState),
}
