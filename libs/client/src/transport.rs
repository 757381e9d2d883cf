//! The two seams between the client and a cluster.
//!
//! Implementations exist for HTTP (see [`crate::http`]) and in-process
//! clusters (the proxy crate's local harness). Connection-level failures
//! are reported as `Unavailable` gateway errors so the retry engine sees
//! one uniform taxonomy.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_core::Stream;
use gridgate_types::{ApiRequest, ApiResponse, DiscoveryRequest, GatewayError};

/// A chunked byte stream, as produced and consumed by the streaming path.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, GatewayError>> + Send>>;

/// The call path to one proxy, addressed by its discovery address.
#[async_trait]
pub trait ProxyChannel: Send + Sync {
    /// Execute a request/response call against the given proxy.
    async fn call(&self, address: &str, request: ApiRequest)
        -> Result<ApiResponse, GatewayError>;

    /// Open a chunked read of a large payload.
    async fn read_stream(
        &self,
        address: &str,
        request: ApiRequest,
    ) -> Result<ByteStream, GatewayError>;

    /// Perform a chunked write of a large payload.
    async fn write_stream(
        &self,
        address: &str,
        request: ApiRequest,
        body: ByteStream,
    ) -> Result<(), GatewayError>;
}

/// The discovery query surface the directory polls.
#[async_trait]
pub trait DiscoverySource: Send + Sync {
    /// List the addresses of usable proxies matching the request.
    ///
    /// An empty list is a valid answer; only malformed input (an
    /// unknown address type) is an error.
    async fn list_proxies(&self, request: &DiscoveryRequest) -> Result<Vec<String>, GatewayError>;
}
