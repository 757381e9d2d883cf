//! The live proxy registry.
//!
//! Each proxy instance announces itself with its per-network,
//! per-address-type endpoints and an optional role, then keeps the
//! record fresh with heartbeats. Discovery projects one endpoint kind
//! out of the records that are alive, not banned, and role-matching.
//! Banned proxies drop out of fresh selection on the clients' next
//! refresh; a sticky session already pinned to one keeps referencing it
//! until the session ends.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use gridgate_types::{AddressType, DiscoveryRequest};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::dynconfig::ConfigHandle;

/// Endpoint map: network name, then address type.
pub type AddressMap = HashMap<String, HashMap<AddressType, String>>;

/// Registration payload a proxy announces itself with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyAnnouncement {
    /// Globally unique registry key; also the conventional
    /// `internal_rpc`/`default` endpoint.
    pub address: String,
    #[serde(default)]
    pub role: Option<String>,
    pub addresses: AddressMap,
}

impl ProxyAnnouncement {
    /// The conventional announcement: `address` served as both the
    /// default and internal RPC endpoint on the default network, plus
    /// an optional monitoring endpoint.
    pub fn standard(address: impl Into<String>, monitoring: Option<&str>) -> Self {
        let address = address.into();
        let mut by_type = HashMap::from([
            (AddressType::Default, address.clone()),
            (AddressType::InternalRpc, address.clone()),
        ]);
        if let Some(monitoring) = monitoring {
            by_type.insert(AddressType::MonitoringHttp, monitoring.to_string());
        }
        Self {
            address,
            role: None,
            addresses: HashMap::from([("default".to_string(), by_type)]),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }
}

/// One registered proxy.
#[derive(Debug, Clone)]
pub struct ProxyRecord {
    pub address: String,
    pub addresses: AddressMap,
    pub role: Option<String>,
    pub banned: bool,
    pub ban_message: Option<String>,
    pub registered_at: DateTime<Utc>,
    pub last_seen: Instant,
}

/// Current ban state of a proxy.
#[derive(Debug, Clone, Default)]
pub struct BanState {
    pub banned: bool,
    pub message: Option<String>,
}

/// Live set of proxies, keyed by address.
pub struct ProxyRegistry {
    records: RwLock<HashMap<String, ProxyRecord>>,
    config: ConfigHandle,
}

impl ProxyRegistry {
    pub fn new(config: ConfigHandle) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Register or re-register a proxy. Re-registration replaces the
    /// endpoints and role but keeps an existing ban in force.
    pub async fn register(&self, announcement: ProxyAnnouncement) {
        let mut records = self.records.write().await;
        let now = Instant::now();
        match records.get_mut(&announcement.address) {
            Some(existing) => {
                existing.addresses = announcement.addresses;
                existing.role = announcement.role;
                existing.last_seen = now;
                debug!(address = %existing.address, "proxy re-registered");
            }
            None => {
                info!(address = %announcement.address, role = ?announcement.role, "proxy registered");
                records.insert(
                    announcement.address.clone(),
                    ProxyRecord {
                        address: announcement.address,
                        addresses: announcement.addresses,
                        role: announcement.role,
                        banned: false,
                        ban_message: None,
                        registered_at: Utc::now(),
                        last_seen: now,
                    },
                );
            }
        }
    }

    /// Refresh a proxy's liveness stamp. Unknown addresses are ignored.
    pub async fn heartbeat(&self, address: &str) {
        let mut records = self.records.write().await;
        if let Some(record) = records.get_mut(address) {
            record.last_seen = Instant::now();
        }
    }

    /// Flip a proxy's ban flag. Returns false for unknown addresses.
    pub async fn set_banned(&self, address: &str, banned: bool, message: Option<String>) -> bool {
        let mut records = self.records.write().await;
        let Some(record) = records.get_mut(address) else {
            return false;
        };
        record.banned = banned;
        record.ban_message = if banned { message } else { None };
        info!(address, banned, "proxy ban state changed");
        true
    }

    /// Set or clear a proxy's role. Returns false for unknown addresses.
    pub async fn set_role(&self, address: &str, role: Option<String>) -> bool {
        let mut records = self.records.write().await;
        let Some(record) = records.get_mut(address) else {
            return false;
        };
        info!(address, role = ?role, "proxy role changed");
        record.role = role;
        true
    }

    pub async fn remove(&self, address: &str) -> bool {
        self.records.write().await.remove(address).is_some()
    }

    pub async fn ban_state(&self, address: &str) -> BanState {
        let records = self.records.read().await;
        match records.get(address) {
            Some(record) => BanState {
                banned: record.banned,
                message: record.ban_message.clone(),
            },
            None => BanState::default(),
        }
    }

    pub async fn role_of(&self, address: &str) -> Option<String> {
        self.records.read().await.get(address)?.role.clone()
    }

    /// All records, for the admin surface.
    pub async fn list(&self) -> Vec<ProxyRecord> {
        let mut records: Vec<ProxyRecord> = self.records.read().await.values().cloned().collect();
        records.sort_by(|a, b| a.address.cmp(&b.address));
        records
    }

    /// Answer a discovery query.
    ///
    /// Projects the requested endpoint kind out of every record that is
    /// alive, not banned, and carries the requested role (when one is
    /// given). Records missing the network or the address type are
    /// skipped: an unmatched network name yields an empty set, never an
    /// error. Unknown address *types* cannot reach this point — they
    /// fail at parse time in the API layer.
    pub async fn discover(&self, request: &DiscoveryRequest) -> Vec<String> {
        let liveness = self.config.load().liveness_timeout();
        let now = Instant::now();
        let records = self.records.read().await;

        let mut proxies: Vec<String> = records
            .values()
            .filter(|record| !record.banned)
            .filter(|record| now.duration_since(record.last_seen) < liveness)
            .filter(|record| match &request.role {
                Some(role) => record.role.as_deref() == Some(role.as_str()),
                None => true,
            })
            .filter_map(|record| {
                record
                    .addresses
                    .get(&request.network_name)?
                    .get(&request.address_type)
                    .cloned()
            })
            .collect();
        proxies.sort();
        proxies
    }

    /// Drop records whose heartbeat lapsed past the liveness timeout.
    pub async fn prune_stale(&self) -> usize {
        let liveness = self.config.load().liveness_timeout();
        let now = Instant::now();
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|address, record| {
            let alive = now.duration_since(record.last_seen) < liveness;
            if !alive {
                warn!(address, "pruning proxy with lapsed heartbeat");
            }
            alive
        });
        before - records.len()
    }

    /// Periodic pruning loop, decoupled from the request path.
    pub async fn run_pruner(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            let period = self.config.load().liveness_timeout();
            tokio::select! {
                _ = tokio::time::sleep(period) => {
                    self.prune_stale().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        debug!("registry pruner shutting down");
                        return;
                    }
                }
            }
        }
    }
}
