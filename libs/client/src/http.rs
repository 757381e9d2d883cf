//! HTTP implementations of the transport seams.
//!
//! Discovered addresses are `host:port` strings; calls go to
//! `http://{address}/v1/...`. Error bodies carry a JSON `GatewayError`;
//! anything that fails before a response arrives (connect, reset,
//! decode) maps to `Unavailable` so the retry engine sees one taxonomy.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use gridgate_types::{ApiRequest, ApiResponse, DiscoveryRequest, DiscoveryResponse, GatewayError};
use tracing::debug;

use crate::transport::{ByteStream, DiscoverySource, ProxyChannel};

/// Header carrying the request envelope on streaming writes, where the
/// HTTP body is the payload itself.
pub const REQUEST_HEADER: &str = "x-gridgate-request";

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

fn build_client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
        .build()
        .expect("failed to build HTTP client")
}

async fn decode_error(response: reqwest::Response) -> GatewayError {
    let status = response.status();
    match response.json::<GatewayError>().await {
        Ok(error) => error,
        Err(_) => GatewayError::unavailable(format!("proxy returned status {status}")),
    }
}

fn transport_error(error: reqwest::Error) -> GatewayError {
    GatewayError::unavailable(format!("transport error: {error}"))
}

/// Discovery over the gateway's HTTP control surface.
pub struct HttpDiscoverySource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDiscoverySource {
    /// `base_url` is the cluster discovery endpoint, e.g.
    /// `http://gateway.example:8080`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: build_client(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl DiscoverySource for HttpDiscoverySource {
    async fn list_proxies(&self, request: &DiscoveryRequest) -> Result<Vec<String>, GatewayError> {
        let url = format!("{}/v1/discovery", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(decode_error(response).await);
        }

        let body: DiscoveryResponse = response.json().await.map_err(transport_error)?;
        debug!(proxy_count = body.proxies.len(), "discovery succeeded");
        Ok(body.proxies)
    }
}

/// The call path over HTTP.
pub struct HttpChannel {
    client: reqwest::Client,
}

impl Default for HttpChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpChannel {
    pub fn new() -> Self {
        Self {
            client: build_client(),
        }
    }

    fn url(address: &str, path: &str) -> String {
        format!("http://{address}{path}")
    }
}

#[async_trait]
impl ProxyChannel for HttpChannel {
    async fn call(
        &self,
        address: &str,
        request: ApiRequest,
    ) -> Result<ApiResponse, GatewayError> {
        let response = self
            .client
            .post(Self::url(address, "/v1/call"))
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(decode_error(response).await);
        }
        response.json().await.map_err(transport_error)
    }

    async fn read_stream(
        &self,
        address: &str,
        request: ApiRequest,
    ) -> Result<ByteStream, GatewayError> {
        let response = self
            .client
            .post(Self::url(address, "/v1/streams/read"))
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(decode_error(response).await);
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(transport_error));
        Ok(Box::pin(stream))
    }

    async fn write_stream(
        &self,
        address: &str,
        request: ApiRequest,
        body: ByteStream,
    ) -> Result<(), GatewayError> {
        let envelope = serde_json::to_string(&request)
            .map_err(|error| GatewayError::internal(format!("encoding request: {error}")))?;

        let response = self
            .client
            .post(Self::url(address, "/v1/streams/write"))
            .header(REQUEST_HEADER, envelope)
            .body(reqwest::Body::wrap_stream(body))
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(decode_error(response).await);
        }
        Ok(())
    }
}
