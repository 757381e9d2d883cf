//! The client facade.

use std::sync::Arc;

use gridgate_types::{ApiRequest, ApiResponse, SessionId};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::ClientConfig;
use crate::directory::ProxyDirectory;
use crate::error::ClientError;
use crate::retry::RetryEngine;
use crate::sticky::StickySessionTable;
use crate::streaming::StreamingTransport;
use crate::transport::{ByteStream, DiscoverySource, ProxyChannel};

/// One cluster's gateway client: directory, sticky table, retry engine,
/// and streaming path behind a single handle.
///
/// All collaborators are injected, so independent clusters coexist in
/// one process and tests swap in in-process implementations of the
/// seams.
pub struct GatewayClient {
    config: ClientConfig,
    directory: Arc<ProxyDirectory>,
    sticky: Arc<StickySessionTable>,
    engine: RetryEngine,
    streaming: StreamingTransport,
}

impl GatewayClient {
    pub fn new(
        config: ClientConfig,
        discovery: Arc<dyn DiscoverySource>,
        channel: Arc<dyn ProxyChannel>,
    ) -> Self {
        let directory = Arc::new(ProxyDirectory::new(config.clone(), discovery));
        let sticky = Arc::new(StickySessionTable::new());
        let engine = RetryEngine::new(
            config.clone(),
            Arc::clone(&directory),
            Arc::clone(&sticky),
            Arc::clone(&channel),
        );
        let streaming = StreamingTransport::new(
            config.clone(),
            Arc::clone(&directory),
            Arc::clone(&sticky),
            channel,
        );
        Self {
            config,
            directory,
            sticky,
            engine,
            streaming,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn directory(&self) -> &Arc<ProxyDirectory> {
        &self.directory
    }

    pub fn sessions(&self) -> &Arc<StickySessionTable> {
        &self.sticky
    }

    /// Spawn the background proxy-list refresh loop.
    pub fn spawn_directory_refresh(&self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let directory = Arc::clone(&self.directory);
        tokio::spawn(async move { directory.run(shutdown).await })
    }

    /// Execute one logical call under the retry policy.
    pub async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, ClientError> {
        self.engine.execute(request).await
    }

    /// Read a large payload. Never retried.
    pub async fn download(&self, request: ApiRequest) -> Result<Vec<u8>, ClientError> {
        self.streaming.download(request).await
    }

    /// Write a large payload. Never retried.
    pub async fn upload(&self, request: ApiRequest, body: ByteStream) -> Result<(), ClientError> {
        self.streaming.upload(request, body).await
    }

    /// Start a sticky session. The proxy binding happens lazily on the
    /// session's first call.
    pub fn start_session(&self) -> SessionId {
        SessionId::new()
    }

    /// End a sticky session, dropping its proxy binding.
    pub fn end_session(&self, session: SessionId) {
        self.sticky.release(session);
    }
}
