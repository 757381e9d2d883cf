//! The client-side proxy directory.
//!
//! A read-mostly cache of the discovery result: a background task pulls
//! the proxy list on a fixed period and atomically swaps in a new
//! snapshot; request paths select from the latest snapshot without ever
//! waiting for a refresh. Addresses that failed since the last refresh
//! are kept in an avoided set so reselection skips them until discovery
//! confirms or removes them.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use gridgate_types::{DiscoveryRequest, GatewayError};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::transport::DiscoverySource;

/// One consistent view of the usable proxy set.
#[derive(Debug, Clone, Default)]
pub struct DirectorySnapshot {
    pub addresses: Vec<String>,
}

/// Read-mostly proxy cache with round-robin selection.
pub struct ProxyDirectory {
    source: Arc<dyn DiscoverySource>,
    request: DiscoveryRequest,
    config: ClientConfig,
    snapshot: ArcSwap<DirectorySnapshot>,
    /// Addresses that failed since the last successful refresh.
    avoided: Mutex<HashSet<String>>,
    cursor: AtomicUsize,
}

impl ProxyDirectory {
    pub fn new(config: ClientConfig, source: Arc<dyn DiscoverySource>) -> Self {
        let request = DiscoveryRequest {
            address_type: config.address_type,
            network_name: config.network_name.clone(),
            role: config.proxy_role.clone(),
        };
        Self {
            source,
            request,
            config,
            snapshot: ArcSwap::from_pointee(DirectorySnapshot::default()),
            avoided: Mutex::new(HashSet::new()),
            cursor: AtomicUsize::new(0),
        }
    }

    /// Pull the current proxy list and swap in a fresh snapshot.
    ///
    /// A successful refresh clears the avoided set: the discovery result
    /// already excludes banned and dead proxies, so anything it still
    /// lists is eligible again.
    pub async fn refresh(&self) -> Result<(), GatewayError> {
        let addresses = self.source.list_proxies(&self.request).await?;
        debug!(proxy_count = addresses.len(), "refreshed proxy list");
        self.snapshot
            .store(Arc::new(DirectorySnapshot { addresses }));
        self.avoided
            .lock()
            .expect("proxy directory avoided set poisoned")
            .clear();
        Ok(())
    }

    /// Latest snapshot; never blocks.
    pub fn snapshot(&self) -> Arc<DirectorySnapshot> {
        self.snapshot.load_full()
    }

    /// Round-robin over the snapshot minus the avoided set.
    ///
    /// `None` means the pool is (currently) empty — a valid state the
    /// caller converts into waiting or an `EmptyProxyList` error, never
    /// a panic or a blocked request.
    pub fn select(&self) -> Option<String> {
        let snapshot = self.snapshot.load();
        let avoided = self
            .avoided
            .lock()
            .expect("proxy directory avoided set poisoned");
        let eligible: Vec<&String> = snapshot
            .addresses
            .iter()
            .filter(|address| !avoided.contains(address.as_str()))
            .collect();
        if eligible.is_empty() {
            return None;
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % eligible.len();
        Some(eligible[index].clone())
    }

    /// Mark an address as failed; selections skip it until the next
    /// successful refresh.
    pub fn avoid(&self, address: &str) {
        let mut avoided = self
            .avoided
            .lock()
            .expect("proxy directory avoided set poisoned");
        if avoided.insert(address.to_string()) {
            debug!(address, "avoiding proxy until next refresh");
        }
    }

    /// Whether the latest snapshot lists the address at all.
    pub fn contains(&self, address: &str) -> bool {
        self.snapshot
            .load()
            .addresses
            .iter()
            .any(|candidate| candidate == address)
    }

    /// Background refresh loop. Sleeps the update period after a
    /// successful pull and the (shorter) retry period after a failure;
    /// request paths keep using the previous snapshot either way.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            let period = match self.refresh().await {
                Ok(()) => self.config.proxy_list_update_period(),
                Err(error) => {
                    warn!(error = %error, "proxy list refresh failed; retrying");
                    self.config.proxy_list_retry_period()
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(period) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        debug!("proxy directory refresh loop shutting down");
                        return;
                    }
                }
            }
        }
    }
}
