//! In-process cluster for tests and local development.
//!
//! Spins up N proxy nodes around one shared registry, config handle,
//! and in-memory backend, and implements the client's transport seams
//! directly — no sockets involved. Integration tests drive the exact
//! production pipeline (gates, limiter, logger, retry engine) against
//! it, with failure injection on the backend.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{stream, StreamExt};
use gridgate_client::{ByteStream, ClientConfig, DiscoverySource, GatewayClient, ProxyChannel};
use gridgate_types::{ApiRequest, ApiResponse, DiscoveryRequest, GatewayError};
use serde_json::Value;

use crate::access::{AccessChecker, RoleAclStore};
use crate::dispatch::{ClusterBackend, ProxyNode};
use crate::dynconfig::{ConfigHandle, DynamicConfig};
use crate::logging::StructuredLogger;
use crate::queue::RequestQueueLimiter;
use crate::registry::{ProxyAnnouncement, ProxyRegistry};

const STREAM_CHUNK_SIZE: usize = 1024;

/// In-memory stand-in for the storage/compute cluster.
///
/// Supports a handful of generic methods (`set`, `get`, `exists`,
/// `remove`, `ping_transaction`) over a path-keyed object map, chunked
/// file streams, and failure injection for tests.
#[derive(Default)]
pub struct MemoryBackend {
    objects: Mutex<HashMap<String, Value>>,
    files: Mutex<HashMap<String, Vec<u8>>>,
    /// When set, every backend operation fails as unavailable.
    unavailable: AtomicBool,
    /// When set, streams fail after yielding/consuming this many chunks.
    stream_failure_after: Mutex<Option<usize>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the cluster (or target node) going away entirely.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make streams fail mid-transfer after `chunks` chunks.
    pub fn fail_streams_after(&self, chunks: usize) {
        *self.stream_failure_after.lock().expect("backend poisoned") = Some(chunks);
    }

    pub fn clear_stream_failure(&self) {
        *self.stream_failure_after.lock().expect("backend poisoned") = None;
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.files.lock().expect("backend poisoned").get(path).cloned()
    }

    fn check_available(&self) -> Result<(), GatewayError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(GatewayError::unavailable("cluster backend is unavailable"));
        }
        Ok(())
    }

    fn path_param(request: &ApiRequest) -> Result<String, GatewayError> {
        request
            .params
            .get("path")
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| GatewayError::internal("request has no path parameter"))
    }
}

#[async_trait]
impl ClusterBackend for MemoryBackend {
    async fn execute(&self, request: &ApiRequest) -> Result<Value, GatewayError> {
        self.check_available()?;
        match request.method.as_str() {
            "set" => {
                let path = Self::path_param(request)?;
                let value = request.params.get("value").cloned().unwrap_or(Value::Null);
                self.objects.lock().expect("backend poisoned").insert(path, value);
                Ok(Value::Null)
            }
            "get" => {
                let path = Self::path_param(request)?;
                self.objects
                    .lock()
                    .expect("backend poisoned")
                    .get(&path)
                    .cloned()
                    .ok_or_else(|| GatewayError::not_found(format!("no such node: {path}")))
            }
            "exists" => {
                let path = Self::path_param(request)?;
                let exists = self.objects.lock().expect("backend poisoned").contains_key(&path);
                Ok(Value::Bool(exists))
            }
            "remove" => {
                let path = Self::path_param(request)?;
                self.objects.lock().expect("backend poisoned").remove(&path);
                Ok(Value::Null)
            }
            // Transactions live on the pinned proxy; the ping itself is
            // trivial here.
            "ping_transaction" => Ok(Value::Null),
            _ => Ok(Value::Null),
        }
    }

    async fn read_stream(&self, request: &ApiRequest) -> Result<ByteStream, GatewayError> {
        self.check_available()?;
        let path = Self::path_param(request)?;
        let body = self
            .files
            .lock()
            .expect("backend poisoned")
            .get(&path)
            .cloned()
            .ok_or_else(|| GatewayError::not_found(format!("no such file: {path}")))?;

        let chunks: Vec<Result<Bytes, GatewayError>> = body
            .chunks(STREAM_CHUNK_SIZE)
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
            .collect();

        let failure = *self.stream_failure_after.lock().expect("backend poisoned");
        let stream: ByteStream = match failure {
            Some(after) => {
                let truncated: Vec<_> = chunks.into_iter().take(after).collect();
                Box::pin(
                    stream::iter(truncated).chain(stream::once(async {
                        Err(GatewayError::unavailable("stream target went away"))
                    })),
                )
            }
            None => Box::pin(stream::iter(chunks)),
        };
        Ok(stream)
    }

    async fn write_stream(
        &self,
        request: &ApiRequest,
        mut body: ByteStream,
    ) -> Result<(), GatewayError> {
        self.check_available()?;
        let path = Self::path_param(request)?;
        let failure = *self.stream_failure_after.lock().expect("backend poisoned");

        let mut buffer = Vec::new();
        let mut consumed = 0usize;
        while let Some(chunk) = body.next().await {
            if let Some(after) = failure {
                if consumed >= after {
                    return Err(GatewayError::unavailable("stream target went away"));
                }
            }
            buffer.extend_from_slice(&chunk?);
            consumed += 1;
        }

        self.files.lock().expect("backend poisoned").insert(path, buffer);
        Ok(())
    }
}

/// Builder for [`LocalCluster`].
pub struct LocalClusterBuilder {
    proxies: usize,
    config: DynamicConfig,
    role: Option<String>,
}

impl LocalClusterBuilder {
    pub fn proxies(mut self, proxies: usize) -> Self {
        self.proxies = proxies;
        self
    }

    pub fn dynamic_config(mut self, config: DynamicConfig) -> Self {
        self.config = config;
        self
    }

    /// Role assigned to every proxy at registration.
    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub async fn build(self) -> LocalCluster {
        let config = ConfigHandle::new(self.config);
        let registry = Arc::new(ProxyRegistry::new(config.clone()));
        let acl = Arc::new(RoleAclStore::new());
        let backend = Arc::new(MemoryBackend::new());

        let mut nodes = Vec::with_capacity(self.proxies);
        for index in 0..self.proxies {
            let address = format!("proxy-{index}:9013");
            let monitoring = format!("proxy-{index}:9014");
            let mut announcement = ProxyAnnouncement::standard(&address, Some(&monitoring));
            if let Some(role) = &self.role {
                announcement = announcement.with_role(role.clone());
            }
            registry.register(announcement).await;

            let node = Arc::new(ProxyNode::new(
                &address,
                Arc::clone(&registry),
                Arc::new(AccessChecker::new(Arc::clone(&acl), config.clone())),
                Arc::new(RequestQueueLimiter::new(config.clone())),
                Arc::new(StructuredLogger::new(config.clone())),
                Arc::clone(&backend) as Arc<dyn ClusterBackend>,
            ));
            nodes.push(node);
        }

        LocalCluster {
            registry,
            config,
            acl,
            backend,
            nodes,
            killed: Arc::new(Mutex::new(HashSet::new())),
        }
    }
}

/// N proxy nodes around one shared registry and backend.
pub struct LocalCluster {
    registry: Arc<ProxyRegistry>,
    config: ConfigHandle,
    acl: Arc<RoleAclStore>,
    backend: Arc<MemoryBackend>,
    nodes: Vec<Arc<ProxyNode>>,
    /// Addresses that refuse connections outright, as a dead host would.
    killed: Arc<Mutex<HashSet<String>>>,
}

impl LocalCluster {
    pub fn builder() -> LocalClusterBuilder {
        LocalClusterBuilder {
            proxies: 1,
            config: DynamicConfig::default(),
            role: None,
        }
    }

    /// A cluster of `proxies` nodes with default dynamic config.
    pub async fn start(proxies: usize) -> Self {
        Self::builder().proxies(proxies).build().await
    }

    pub fn registry(&self) -> &Arc<ProxyRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &ConfigHandle {
        &self.config
    }

    pub fn acl(&self) -> &Arc<RoleAclStore> {
        &self.acl
    }

    pub fn backend(&self) -> &Arc<MemoryBackend> {
        &self.backend
    }

    pub fn node(&self, index: usize) -> &Arc<ProxyNode> {
        &self.nodes[index]
    }

    pub fn address(&self, index: usize) -> &str {
        self.nodes[index].address()
    }

    pub fn addresses(&self) -> Vec<String> {
        self.nodes
            .iter()
            .map(|node| node.address().to_string())
            .collect()
    }

    pub async fn ban(&self, address: &str) {
        self.registry
            .set_banned(address, true, Some("banned by test".to_string()))
            .await;
    }

    pub async fn unban(&self, address: &str) {
        self.registry.set_banned(address, false, None).await;
    }

    pub async fn set_role(&self, address: &str, role: &str) {
        self.registry.set_role(address, Some(role.to_string())).await;
    }

    /// Take a proxy down for good: it disappears from the registry and
    /// its address refuses connections.
    pub async fn kill(&self, address: &str) {
        self.registry.remove(address).await;
        self.killed
            .lock()
            .expect("killed set poisoned")
            .insert(address.to_string());
    }

    /// The in-process call path.
    pub fn channel(&self) -> Arc<LocalChannel> {
        let nodes = self
            .nodes
            .iter()
            .map(|node| (node.address().to_string(), Arc::clone(node)))
            .collect();
        Arc::new(LocalChannel {
            nodes,
            killed: Arc::clone(&self.killed),
        })
    }

    /// The in-process discovery path.
    pub fn discovery(&self) -> Arc<LocalDiscovery> {
        Arc::new(LocalDiscovery {
            registry: Arc::clone(&self.registry),
        })
    }

    /// A gateway client wired to this cluster.
    pub fn client(&self, config: ClientConfig) -> GatewayClient {
        GatewayClient::new(config, self.discovery(), self.channel())
    }
}

/// [`ProxyChannel`] over in-process proxy nodes.
pub struct LocalChannel {
    nodes: HashMap<String, Arc<ProxyNode>>,
    killed: Arc<Mutex<HashSet<String>>>,
}

impl LocalChannel {
    fn node(&self, address: &str) -> Result<&Arc<ProxyNode>, GatewayError> {
        if self.killed.lock().expect("killed set poisoned").contains(address) {
            return Err(GatewayError::unavailable(format!(
                "connection refused: {address}"
            )));
        }
        self.nodes
            .get(address)
            .ok_or_else(|| GatewayError::unavailable(format!("connection refused: {address}")))
    }
}

#[async_trait]
impl ProxyChannel for LocalChannel {
    async fn call(
        &self,
        address: &str,
        request: ApiRequest,
    ) -> Result<ApiResponse, GatewayError> {
        self.node(address)?.handle(request).await
    }

    async fn read_stream(
        &self,
        address: &str,
        request: ApiRequest,
    ) -> Result<ByteStream, GatewayError> {
        self.node(address)?.read_stream(request).await
    }

    async fn write_stream(
        &self,
        address: &str,
        request: ApiRequest,
        body: ByteStream,
    ) -> Result<(), GatewayError> {
        self.node(address)?.write_stream(request, body).await
    }
}

/// [`DiscoverySource`] over the shared registry.
pub struct LocalDiscovery {
    registry: Arc<ProxyRegistry>,
}

#[async_trait]
impl DiscoverySource for LocalDiscovery {
    async fn list_proxies(&self, request: &DiscoveryRequest) -> Result<Vec<String>, GatewayError> {
        Ok(self.registry.discover(request).await)
    }
}
