//! Error types for the sync engine.

use driftsync_protocol::ProtocolError;
use driftsync_store::StoreError;
use thiserror::Error;

/// Result type for remote calls.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Result type for engine operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Retry policy class of a remote failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Transient; the action stays queued and is retried.
    Retryable,
    /// The server refused the request; retrying cannot help.
    Permanent,
}

/// Errors returned by a [`crate::RemoteService`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the request can be retried.
        retryable: bool,
    },

    /// The request did not complete in time.
    #[error("request timed out")]
    Timeout,

    /// The server answered with a non-success status.
    #[error("api error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Server-provided message.
        message: String,
    },

    /// The response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
}

impl RemoteError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates an API error.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// HTTP status if this is an API error.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Classifies the error for the retry policy.
    ///
    /// Connection failures, timeouts, `408`, `425`, `429` and `5xx` are
    /// transient. Every other status is a domain rejection.
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::Transport { retryable, .. } => {
                if *retryable {
                    RetryClass::Retryable
                } else {
                    RetryClass::Permanent
                }
            }
            Self::Timeout => RetryClass::Retryable,
            Self::Api { status, .. } => match *status {
                408 | 425 | 429 => RetryClass::Retryable,
                500..=599 => RetryClass::Retryable,
                _ => RetryClass::Permanent,
            },
            Self::Decode(_) => RetryClass::Permanent,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        self.retry_class() == RetryClass::Retryable
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RemoteError::Timeout
        } else if err.is_decode() {
            RemoteError::Decode(err.to_string())
        } else if err.is_connect() || err.is_request() || err.is_body() {
            RemoteError::transport_retryable(err.to_string())
        } else if let Some(status) = err.status() {
            RemoteError::api(status.as_u16(), err.to_string())
        } else {
            RemoteError::transport_fatal(err.to_string())
        }
    }
}

/// Errors that can occur in the sync engine.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The local store failed ("storage unavailable").
    #[error("storage unavailable: {0}")]
    Storage(#[from] StoreError),

    /// A remote call failed.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// A payload could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Protocol data could not be interpreted.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The configuration is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The session has been shut down.
    #[error("sync session is not running")]
    NotRunning,
}
