//! Configuration for the sync engine.

use crate::error::{SyncError, SyncResult};
use std::time::Duration;

/// Configuration for a sync session.
///
/// # Example
///
/// ```rust
/// use driftsync_engine::SyncConfig;
/// use std::time::Duration;
///
/// let config = SyncConfig::new("user-1", "https://api.example.com")
///     .with_reconcile_interval(Duration::from_secs(5))
///     .with_max_attempts(3);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Identifier of the signed-in account.
    pub account_id: String,
    /// Base URL of the remote service.
    pub base_url: String,
    /// Bearer token sent with every request.
    pub auth_token: Option<String>,
    /// Delay between reconciliation ticks.
    pub reconcile_interval: Duration,
    /// Delay between reachability probes.
    pub heartbeat_interval: Duration,
    /// Upper bound on a single probe.
    pub probe_timeout: Duration,
    /// Transport timeout of every other request.
    pub request_timeout: Duration,
    /// Replay attempts before an action is declared dead.
    pub max_attempts: u32,
    /// Assumed network state until the platform reports one.
    pub initial_online: bool,
}

impl SyncConfig {
    /// Creates a configuration with default timings.
    pub fn new(account_id: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            base_url: base_url.into(),
            auth_token: None,
            reconcile_interval: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(120),
            probe_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            max_attempts: 5,
            initial_online: false,
        }
    }

    /// Sets the bearer token.
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Sets the reconciliation interval.
    pub fn with_reconcile_interval(mut self, interval: Duration) -> Self {
        self.reconcile_interval = interval;
        self
    }

    /// Sets the heartbeat interval.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Sets the probe timeout.
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the attempt cap.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sets the initial network state.
    pub fn with_initial_online(mut self, online: bool) -> Self {
        self.initial_online = online;
        self
    }

    /// Checks the configuration is usable.
    pub fn validate(&self) -> SyncResult<()> {
        if self.account_id.trim().is_empty() {
            return Err(SyncError::InvalidConfig("account_id must not be empty".into()));
        }
        if self.max_attempts == 0 {
            return Err(SyncError::InvalidConfig("max_attempts must be at least 1".into()));
        }
        for (name, value) in [
            ("reconcile_interval", self.reconcile_interval),
            ("heartbeat_interval", self.heartbeat_interval),
            ("probe_timeout", self.probe_timeout),
            ("request_timeout", self.request_timeout),
        ] {
            if value.is_zero() {
                return Err(SyncError::InvalidConfig(format!("{name} must be non-zero")));
            }
        }
        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("", "")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SyncConfig::new("u1", "http://localhost:8080");
        assert_eq!(config.reconcile_interval, Duration::from_secs(10));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(120));
        assert_eq!(config.probe_timeout, Duration::from_secs(5));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.max_attempts, 5);
        assert!(!config.initial_online);
        assert!(config.auth_token.is_none());
    }

    #[test]
    fn builder() {
        let config = SyncConfig::new("u1", "http://localhost")
            .with_auth_token("secret")
            .with_reconcile_interval(Duration::from_millis(50))
            .with_max_attempts(2)
            .with_initial_online(true);
        assert_eq!(config.auth_token.as_deref(), Some("secret"));
        assert_eq!(config.reconcile_interval, Duration::from_millis(50));
        assert_eq!(config.max_attempts, 2);
        assert!(config.initial_online);
    }

    #[test]
    fn validation_rejects_bad_values() {
        assert!(SyncConfig::default().validate().is_err());
        assert!(SyncConfig::new("u1", "")
            .with_max_attempts(0)
            .validate()
            .is_err());
        let err = SyncConfig::new("u1", "")
            .with_probe_timeout(Duration::ZERO)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("probe_timeout"));
    }
}
