//! Client configuration.

use std::time::Duration;

use gridgate_types::AddressType;
use serde::{Deserialize, Serialize};

/// Tunables for one gateway client.
///
/// Interval fields are milliseconds, matching the configuration surface
/// of the deployment tooling; use the accessor methods for `Duration`s.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Master switch for the retry engine. When off, every call is a
    /// single attempt and failures classify straight to the caller.
    pub enable_retries: bool,

    /// Fixed backoff between retry attempts.
    pub retry_backoff_time_ms: u64,

    /// Upper bound on attempts for one logical call.
    pub retry_attempts: u32,

    /// Total wall-clock budget for one logical call, including backoff.
    pub retry_timeout_ms: u64,

    /// Total budget for one streaming transfer (which never retries).
    pub default_total_streaming_timeout_ms: u64,

    /// Proxy-list refresh period after a successful pull.
    pub proxy_list_update_period_ms: u64,

    /// Refresh period after a failed pull, and the wait applied when
    /// a selection finds the pool empty.
    pub proxy_list_retry_period_ms: u64,

    /// Address type requested from discovery.
    pub address_type: AddressType,

    /// Network requested from discovery.
    pub network_name: String,

    /// Only select proxies carrying this role.
    pub proxy_role: Option<String>,

    /// Allow a sticky session whose proxy has vanished (connection-level
    /// failure and absent from the directory — not merely banned) to
    /// bind afresh. Off by default: transaction state held by the lost
    /// proxy cannot be assumed recoverable.
    pub rebind_lost_sessions: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            enable_retries: true,
            retry_backoff_time_ms: 100,
            retry_attempts: 15,
            retry_timeout_ms: 2000,
            default_total_streaming_timeout_ms: 1000,
            proxy_list_update_period_ms: 1000,
            proxy_list_retry_period_ms: 100,
            address_type: AddressType::InternalRpc,
            network_name: "default".to_string(),
            proxy_role: None,
            rebind_lost_sessions: false,
        }
    }
}

impl ClientConfig {
    pub fn retry_backoff_time(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_time_ms)
    }

    pub fn retry_timeout(&self) -> Duration {
        Duration::from_millis(self.retry_timeout_ms)
    }

    pub fn default_total_streaming_timeout(&self) -> Duration {
        Duration::from_millis(self.default_total_streaming_timeout_ms)
    }

    pub fn proxy_list_update_period(&self) -> Duration {
        Duration::from_millis(self.proxy_list_update_period_ms)
    }

    pub fn proxy_list_retry_period(&self) -> Duration {
        Duration::from_millis(self.proxy_list_retry_period_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_the_documented_surface() {
        let config = ClientConfig::default();
        assert!(config.enable_retries);
        assert_eq!(config.retry_attempts, 15);
        assert_eq!(config.retry_backoff_time(), Duration::from_millis(100));
        assert_eq!(config.retry_timeout(), Duration::from_millis(2000));
        assert_eq!(config.network_name, "default");
        assert!(!config.rebind_lost_sessions);
    }

    #[test]
    fn test_partial_config_deserializes_over_defaults() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"retry_attempts": 3, "enable_retries": false}"#).unwrap();
        assert_eq!(config.retry_attempts, 3);
        assert!(!config.enable_retries);
        assert_eq!(config.retry_timeout_ms, 2000);
    }
}
