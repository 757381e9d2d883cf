//! The streaming path for large payloads.
//!
//! Streaming transfers never enter the retry loop: a partially consumed
//! stream cannot be replayed without application-level idempotence the
//! transport cannot guarantee. One target is selected, one attempt is
//! made, and the whole transfer runs under the total streaming timeout.
//! Any failure — including the target going away mid-transfer —
//! surfaces promptly.

use std::sync::Arc;

use futures_util::StreamExt;
use gridgate_types::{ApiRequest, GatewayError};
use tokio::time::timeout;

use crate::config::ClientConfig;
use crate::directory::ProxyDirectory;
use crate::error::ClientError;
use crate::sticky::StickySessionTable;
use crate::transport::{ByteStream, ProxyChannel};

/// Chunked read/write path, exempt from automatic retry.
pub struct StreamingTransport {
    config: ClientConfig,
    directory: Arc<ProxyDirectory>,
    sticky: Arc<StickySessionTable>,
    channel: Arc<dyn ProxyChannel>,
}

impl StreamingTransport {
    pub fn new(
        config: ClientConfig,
        directory: Arc<ProxyDirectory>,
        sticky: Arc<StickySessionTable>,
        channel: Arc<dyn ProxyChannel>,
    ) -> Self {
        Self {
            config,
            directory,
            sticky,
            channel,
        }
    }

    fn resolve_target(&self, request: &ApiRequest) -> Result<String, ClientError> {
        let address = match request.session_id {
            Some(session) => match self.sticky.lookup(session) {
                Some(address) => Some(address),
                None => self
                    .directory
                    .select()
                    .map(|address| self.sticky.bind(session, address)),
            },
            None => self.directory.select(),
        };
        address.ok_or(ClientError::EmptyProxyList)
    }

    /// Read a large payload to completion.
    pub async fn download(&self, request: ApiRequest) -> Result<Vec<u8>, ClientError> {
        let address = self.resolve_target(&request)?;
        let budget = self.config.default_total_streaming_timeout();

        let transfer = async {
            let mut stream: ByteStream = self.channel.read_stream(&address, request).await?;
            let mut body = Vec::new();
            while let Some(chunk) = stream.next().await {
                body.extend_from_slice(&chunk?);
            }
            Ok::<_, GatewayError>(body)
        };

        match timeout(budget, transfer).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(GatewayError::timeout("total streaming timeout exceeded").into()),
        }
    }

    /// Write a large payload to completion.
    pub async fn upload(&self, request: ApiRequest, body: ByteStream) -> Result<(), ClientError> {
        let address = self.resolve_target(&request)?;
        let budget = self.config.default_total_streaming_timeout();

        match timeout(budget, self.channel.write_stream(&address, request, body)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(GatewayError::timeout("total streaming timeout exceeded").into()),
        }
    }
}
