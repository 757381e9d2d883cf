//! Dynamic configuration snapshots and the polling watcher.
//!
//! Consumers never mutate a shared config object: the watcher publishes
//! immutable snapshots through an atomic pointer swap, so readers get a
//! consistent view without blocking and without torn reads. The static
//! (process-level) configuration lives in [`crate::config`]; everything
//! here may change at runtime.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use arc_swap::ArcSwap;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Discovery-related dynamic settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryDynamicConfig {
    /// Registry poll / config refresh period.
    pub proxy_update_period_ms: u64,
    /// Registration heartbeats older than this exclude a proxy from
    /// discovery and make it eligible for pruning.
    pub liveness_timeout_ms: u64,
}

impl Default for DiscoveryDynamicConfig {
    fn default() -> Self {
        Self {
            proxy_update_period_ms: 1000,
            liveness_timeout_ms: 15_000,
        }
    }
}

/// Access-checker cache expiry knobs, one per decision class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessCacheConfig {
    pub expire_after_successful_update_ms: u64,
    pub expire_after_failed_update_ms: u64,
    pub expire_after_access_ms: u64,
}

impl Default for AccessCacheConfig {
    fn default() -> Self {
        Self {
            expire_after_successful_update_ms: 60_000,
            expire_after_failed_update_ms: 5_000,
            expire_after_access_ms: 60_000,
        }
    }
}

impl AccessCacheConfig {
    pub fn expire_after_successful_update(&self) -> Duration {
        Duration::from_millis(self.expire_after_successful_update_ms)
    }

    pub fn expire_after_failed_update(&self) -> Duration {
        Duration::from_millis(self.expire_after_failed_update_ms)
    }

    pub fn expire_after_access(&self) -> Duration {
        Duration::from_millis(self.expire_after_access_ms)
    }
}

/// Access-checker enforcement gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessCheckerDynamicConfig {
    pub enabled: bool,
    pub cache: AccessCacheConfig,
}

impl Default for AccessCheckerDynamicConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cache: AccessCacheConfig::default(),
        }
    }
}

/// Structured-logging surface of the API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiDynamicConfig {
    /// Methods dropped from the structured log while listed here.
    pub structured_logging_suppressed_methods: HashSet<String>,
    /// Requests serializing larger than this are logged with an opaque
    /// empty marker instead of their content.
    pub structured_logging_max_request_byte_size: Option<usize>,
}

/// Per-user admission control defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueDynamicConfig {
    pub default_request_queue_size_limit: usize,
    /// How long an admission may queue before backpressure is surfaced.
    pub wait_timeout_ms: u64,
}

impl Default for QueueDynamicConfig {
    fn default() -> Self {
        Self {
            default_request_queue_size_limit: 100,
            wait_timeout_ms: 1500,
        }
    }
}

impl QueueDynamicConfig {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }
}

/// The atomically-swapped dynamic configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DynamicConfig {
    /// Whether queue overflow is retried transparently by clients
    /// (carried to them as the error's `retryable` hint) or surfaced.
    pub retry_request_queue_size_limit_exceeded: RetryQueueOverflow,
    pub discovery: DiscoveryDynamicConfig,
    pub access_checker: AccessCheckerDynamicConfig,
    pub api: ApiDynamicConfig,
    pub queue: QueueDynamicConfig,
}

/// Newtype so the flag defaults to `true` under `#[serde(default)]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RetryQueueOverflow(pub bool);

impl Default for RetryQueueOverflow {
    fn default() -> Self {
        Self(true)
    }
}

impl DynamicConfig {
    pub fn proxy_update_period(&self) -> Duration {
        Duration::from_millis(self.discovery.proxy_update_period_ms)
    }

    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery.liveness_timeout_ms)
    }
}

/// Shared handle to the current snapshot.
///
/// `load()` is wait-free for readers; `store()` swaps the whole
/// snapshot in one atomic pointer exchange.
#[derive(Clone)]
pub struct ConfigHandle {
    current: Arc<ArcSwap<DynamicConfig>>,
}

impl ConfigHandle {
    pub fn new(config: DynamicConfig) -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(config)),
        }
    }

    pub fn load(&self) -> Arc<DynamicConfig> {
        self.current.load_full()
    }

    pub fn store(&self, config: DynamicConfig) {
        self.current.store(Arc::new(config));
    }
}

impl Default for ConfigHandle {
    fn default() -> Self {
        Self::new(DynamicConfig::default())
    }
}

/// Where the watcher pulls candidate snapshots from.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn fetch(&self) -> anyhow::Result<DynamicConfig>;
}

/// JSON file on disk, the deployment-facing source.
pub struct FileConfigSource {
    path: PathBuf,
}

impl FileConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ConfigSource for FileConfigSource {
    async fn fetch(&self) -> anyhow::Result<DynamicConfig> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading {}", self.path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", self.path.display()))
    }
}

/// Polls a source and publishes changed snapshots.
///
/// A fetch or parse failure keeps the previous snapshot; the request
/// path never waits on this loop.
pub struct ConfigWatcher {
    handle: ConfigHandle,
    source: Box<dyn ConfigSource>,
}

impl ConfigWatcher {
    pub fn new(handle: ConfigHandle, source: Box<dyn ConfigSource>) -> Self {
        Self { handle, source }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            match self.source.fetch().await {
                Ok(fetched) => {
                    if fetched != *self.handle.load() {
                        info!("dynamic config changed; publishing new snapshot");
                        self.handle.store(fetched);
                    }
                }
                Err(error) => {
                    warn!(error = %error, "dynamic config fetch failed; keeping current snapshot");
                }
            }

            // The poll period itself is dynamic.
            let period = self.handle.load().proxy_update_period();
            tokio::select! {
                _ = tokio::time::sleep(period) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        debug!("config watcher shutting down");
                        return;
                    }
                }
            }
        }
    }
}
