//! The per-proxy call pipeline.
//!
//! Every call admitted by a proxy runs the same gates in order: ban
//! check, role-based access check, per-user admission — then the
//! backend executes and the structured log records the outcome. The
//! caller always gets the result or one terminal error; nothing is
//! silently dropped.

use std::sync::Arc;

use async_trait::async_trait;
use gridgate_client::ByteStream;
use gridgate_types::{ApiRequest, ApiResponse, GatewayError, LogOutcome};
use serde_json::Value;
use tracing::debug;

use crate::access::{AccessChecker, AccessDecision};
use crate::logging::StructuredLogger;
use crate::queue::{QueueSlot, RequestQueueLimiter};
use crate::registry::ProxyRegistry;

/// The narrow seam to the storage/compute cluster behind the gateway.
///
/// Everything past this trait — table semantics, job scheduling, the
/// data-plane encoding — is another system's concern.
#[async_trait]
pub trait ClusterBackend: Send + Sync {
    async fn execute(&self, request: &ApiRequest) -> Result<Value, GatewayError>;

    /// Open a chunked read of a large payload.
    async fn read_stream(&self, request: &ApiRequest) -> Result<ByteStream, GatewayError>;

    /// Consume a chunked write of a large payload.
    async fn write_stream(
        &self,
        request: &ApiRequest,
        body: ByteStream,
    ) -> Result<(), GatewayError>;
}

/// One gateway proxy instance.
pub struct ProxyNode {
    address: String,
    registry: Arc<ProxyRegistry>,
    access: Arc<AccessChecker>,
    limiter: Arc<RequestQueueLimiter>,
    logger: Arc<StructuredLogger>,
    backend: Arc<dyn ClusterBackend>,
}

impl ProxyNode {
    pub fn new(
        address: impl Into<String>,
        registry: Arc<ProxyRegistry>,
        access: Arc<AccessChecker>,
        limiter: Arc<RequestQueueLimiter>,
        logger: Arc<StructuredLogger>,
        backend: Arc<dyn ClusterBackend>,
    ) -> Self {
        Self {
            address: address.into(),
            registry,
            access,
            limiter,
            logger,
            backend,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn logger(&self) -> &Arc<StructuredLogger> {
        &self.logger
    }

    pub fn limiter(&self) -> &Arc<RequestQueueLimiter> {
        &self.limiter
    }

    /// Run the admission gates. The returned slot must be held for the
    /// duration of the backend work it admits.
    async fn admit(&self, request: &ApiRequest) -> Result<QueueSlot, GatewayError> {
        let ban = self.registry.ban_state(&self.address).await;
        if ban.banned {
            debug!(address = %self.address, user = %request.user, "rejecting call to banned proxy");
            return Err(GatewayError::proxy_banned(
                &self.address,
                ban.message.as_deref(),
            ));
        }

        let role = self.registry.role_of(&self.address).await;
        if self.access.check(&request.user, role.as_deref()) == AccessDecision::Deny {
            return Err(GatewayError::access_denied(
                &request.user,
                role.as_deref().unwrap_or("<none>"),
            ));
        }

        self.limiter.admit(&request.user).await
    }

    /// Execute one request/response call.
    pub async fn handle(&self, request: ApiRequest) -> Result<ApiResponse, GatewayError> {
        let result = self.handle_inner(&request).await;
        self.logger.log_call(
            &request.method,
            &request.user,
            &request.params,
            outcome_of(&result),
        );
        result
    }

    async fn handle_inner(&self, request: &ApiRequest) -> Result<ApiResponse, GatewayError> {
        let _slot = self.admit(request).await?;
        let value = self.backend.execute(request).await?;
        Ok(ApiResponse::new(value))
    }

    /// Open a chunked read. The admission slot covers the open, not the
    /// whole transfer; the stream itself reports mid-transfer failures
    /// to the caller directly.
    pub async fn read_stream(&self, request: ApiRequest) -> Result<ByteStream, GatewayError> {
        let result = async {
            let _slot = self.admit(&request).await?;
            self.backend.read_stream(&request).await
        }
        .await;
        self.logger.log_call(
            &request.method,
            &request.user,
            &request.params,
            outcome_of(&result),
        );
        result
    }

    /// Consume a chunked write to completion.
    pub async fn write_stream(
        &self,
        request: ApiRequest,
        body: ByteStream,
    ) -> Result<(), GatewayError> {
        let result = async {
            let _slot = self.admit(&request).await?;
            self.backend.write_stream(&request, body).await
        }
        .await;
        self.logger.log_call(
            &request.method,
            &request.user,
            &request.params,
            outcome_of(&result),
        );
        result
    }
}

fn outcome_of<T>(result: &Result<T, GatewayError>) -> LogOutcome {
    match result {
        Ok(_) => LogOutcome::Success,
        Err(error) => LogOutcome::Error {
            code: error.code,
            message: error.message.clone(),
        },
    }
}
