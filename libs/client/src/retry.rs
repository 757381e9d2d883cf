//! The per-call retry state machine.
//!
//! One logical call runs `SelectProxy -> Send -> {Success |
//! ClassifyFailure}` under a total wall-clock budget. Classification is
//! a typed table over the wire error code, the sticky flag, and the
//! idempotence class — retry/backoff/fail-fast decisions are data, not
//! control flow scattered across handlers.

use std::sync::Arc;

use gridgate_types::{ApiRequest, ApiResponse, ErrorCode, GatewayError, RequestKind};
use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::config::ClientConfig;
use crate::directory::ProxyDirectory;
use crate::error::ClientError;
use crate::sticky::StickySessionTable;
use crate::transport::ProxyChannel;

/// What to do with a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Avoid the failed proxy and try another candidate.
    RetryElsewhere,
    /// Try the same target again (sticky calls cannot move).
    RetrySame,
    /// Surface the error now.
    FailFast,
}

/// Classify one failure into a retry disposition.
pub fn classify(error: &GatewayError, sticky: bool, kind: RequestKind) -> Disposition {
    if kind == RequestKind::NonIdempotent {
        return Disposition::FailFast;
    }
    match error.code {
        ErrorCode::Unavailable | ErrorCode::Timeout => {
            if sticky {
                Disposition::RetrySame
            } else {
                Disposition::RetryElsewhere
            }
        }
        // A banned pinned proxy fails the one call: migrating a session
        // mid-transaction would abandon transaction-local state held by
        // the bound proxy.
        ErrorCode::ProxyBanned => {
            if sticky {
                Disposition::FailFast
            } else {
                Disposition::RetryElsewhere
            }
        }
        // The server marks overflow retryable or not, according to its
        // retry_request_queue_size_limit_exceeded flag.
        ErrorCode::QueueSizeLimitExceeded => {
            if !error.retryable {
                Disposition::FailFast
            } else if sticky {
                Disposition::RetrySame
            } else {
                Disposition::RetryElsewhere
            }
        }
        ErrorCode::InvalidAddressType
        | ErrorCode::AccessDenied
        | ErrorCode::NotFound
        | ErrorCode::Internal => Disposition::FailFast,
    }
}

/// Drives one logical call to completion.
pub struct RetryEngine {
    config: ClientConfig,
    directory: Arc<ProxyDirectory>,
    sticky: Arc<StickySessionTable>,
    channel: Arc<dyn ProxyChannel>,
}

impl RetryEngine {
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

    /// Resolve the target address for this call.
    ///
    /// Sticky calls use their existing binding unconditionally; an
    /// unbound session selects a proxy and binds it first-writer-wins.
    pub(crate) fn resolve_target(&self, request: &ApiRequest) -> Option<String> {
        match request.session_id {
            Some(session) => match self.sticky.lookup(session) {
                Some(address) => Some(address),
                None => {
                    let address = self.directory.select()?;
                    Some(self.sticky.bind(session, address))
                }
            },
            None => self.directory.select(),
        }
    }

    /// Execute the request under the retry policy.
    pub async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, ClientError> {
        if !self.config.enable_retries {
            let address = self
                .resolve_target(&request)
                .ok_or(ClientError::EmptyProxyList)?;
            return Ok(self.channel.call(&address, request).await?);
        }

        let deadline = Instant::now() + self.config.retry_timeout();
        let mut attempts: u32 = 0;
        let mut last_error: Option<GatewayError> = None;

        loop {
            let Some(address) = self.resolve_target(&request) else {
                // Empty pool: a valid state, so wait out the proxy-list
                // retry period (clamped to the budget) and refresh.
                let now = Instant::now();
                if now >= deadline {
                    return Err(Self::exhausted(last_error));
                }
                let wait = self.config.proxy_list_retry_period().min(deadline - now);
                sleep(wait).await;
                if let Err(error) = self.directory.refresh().await {
                    debug!(error = %error, "proxy list refresh failed during call");
                }
                if Instant::now() >= deadline {
                    return Err(Self::exhausted(last_error));
                }
                continue;
            };

            attempts += 1;
            match self.channel.call(&address, request.clone()).await {
                Ok(response) => return Ok(response),
                Err(error) => {
                    match classify(&error, request.is_sticky(), request.kind) {
                        Disposition::FailFast => return Err(error.into()),
                        Disposition::RetryElsewhere => {
                            self.directory.avoid(&address);
                        }
                        Disposition::RetrySame => {
                            self.maybe_release_lost_session(&request, &address, &error);
                        }
                    }

                    debug!(
                        %address,
                        attempts,
                        error = %error,
                        "call attempt failed; retrying"
                    );

                    if attempts >= self.config.retry_attempts {
                        return Err(error.into());
                    }
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(error.into());
                    }
                    last_error = Some(error);

                    // Never sleep past the budget.
                    let backoff = self.config.retry_backoff_time().min(deadline - now);
                    sleep(backoff).await;
                    if Instant::now() >= deadline {
                        return Err(Self::exhausted(last_error));
                    }
                }
            }
        }
    }

    /// Opt-in recovery for sessions whose proxy is gone for good: the
    /// failure was connection-level (the proxy did not answer — a banned
    /// proxy answers with its ban) and discovery no longer lists the
    /// address. Releasing the binding lets the next attempt bind afresh.
    fn maybe_release_lost_session(
        &self,
        request: &ApiRequest,
        address: &str,
        error: &GatewayError,
    ) {
        if !self.config.rebind_lost_sessions {
            return;
        }
        if error.code != ErrorCode::Unavailable || self.directory.contains(address) {
            return;
        }
        if let Some(session) = request.session_id {
            debug!(%session, %address, "pinned proxy lost; releasing session binding");
            self.sticky.release(session);
        }
    }

    /// Budget exhaustion surfaces the last underlying error; only a call
    /// that never reached any proxy reports the empty pool itself.
    fn exhausted(last_error: Option<GatewayError>) -> ClientError {
        match last_error {
            Some(error) => error.into(),
            None => ClientError::EmptyProxyList,
        }
    }
}
