//! Static (process-level) configuration, read from the environment.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;

#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen address.
    pub listen_addr: SocketAddr,
    /// Public address this proxy announces to the registry.
    pub proxy_address: String,
    /// Monitoring endpoint announced alongside, if any.
    pub monitoring_address: Option<String>,
    /// Role announced at registration.
    pub proxy_role: Option<String>,
    pub log_level: String,
    /// JSON file the dynamic-config watcher polls, if any.
    pub dynamic_config_path: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let listen_addr: SocketAddr = std::env::var("GRIDGATE_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:9013".to_string())
            .parse()?;

        let proxy_address =
            std::env::var("GRIDGATE_PROXY_ADDRESS").unwrap_or_else(|_| listen_addr.to_string());

        let monitoring_address = std::env::var("GRIDGATE_MONITORING_ADDRESS").ok();
        let proxy_role = std::env::var("GRIDGATE_PROXY_ROLE").ok();

        let log_level = std::env::var("GRIDGATE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let dynamic_config_path = std::env::var("GRIDGATE_DYNAMIC_CONFIG_PATH")
            .ok()
            .map(PathBuf::from);

        Ok(Self {
            listen_addr,
            proxy_address,
            monitoring_address,
            proxy_role,
            log_level,
            dynamic_config_path,
        })
    }
}
