//! Protocol error types.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while interpreting protocol data.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A mutation kind tag is not known to this build.
    #[error("unknown mutation kind: {0}")]
    UnknownKind(String),

    /// A payload does not match the shape of its kind.
    #[error("invalid {kind} payload: {source}")]
    InvalidPayload {
        /// The mutation kind being decoded.
        kind: String,
        /// The underlying decode failure.
        #[source]
        source: serde_json::Error,
    },

    /// An action id is not a valid UUID.
    #[error("invalid action id '{0}'")]
    InvalidActionId(String),

    /// A mutation is well formed but cannot be applied.
    #[error("invalid mutation: {0}")]
    InvalidMutation(String),
}

impl ProtocolError {
    /// Creates an invalid-mutation error.
    pub fn invalid_mutation(message: impl Into<String>) -> Self {
        Self::InvalidMutation(message.into())
    }
}
