//! The gateway error taxonomy.
//!
//! Every failed call carries one `GatewayError` describing the final
//! cause. The code set is closed so that retry decisions on the client
//! side are a lookup, not string matching.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed set of gateway failure classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Malformed discovery input; fatal to the caller.
    InvalidAddressType,
    /// The targeted proxy is banned.
    ProxyBanned,
    /// The user is not permitted on the proxy's role.
    AccessDenied,
    /// Per-user request queue is full and the admission wait elapsed.
    QueueSizeLimitExceeded,
    /// Transient transport or target unavailability.
    Unavailable,
    /// The call or admission wait timed out at the target.
    Timeout,
    /// The addressed object does not exist.
    NotFound,
    /// Unclassified server-side failure.
    Internal,
}

impl ErrorCode {
    /// Codes the retry engine may absorb regardless of server hints.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable | Self::Timeout)
    }
}

/// A terminal error for one gateway call.
///
/// `retryable` is a server-side hint: the proxy sets it on
/// `QueueSizeLimitExceeded` according to its dynamic configuration, so
/// the overflow-retry policy lives on exactly one side of the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{code:?}: {message}")]
pub struct GatewayError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default)]
    pub retryable: bool,
}

impl GatewayError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retryable: code.is_transient(),
        }
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn invalid_address_type(name: &str) -> Self {
        Self::new(
            ErrorCode::InvalidAddressType,
            format!("invalid address type: {name:?}"),
        )
    }

    pub fn proxy_banned(address: &str, message: Option<&str>) -> Self {
        let detail = match message {
            Some(m) => format!("proxy {address} is banned: {m}"),
            None => format!("proxy {address} is banned"),
        };
        Self::new(ErrorCode::ProxyBanned, detail)
    }

    pub fn access_denied(user: &str, role: &str) -> Self {
        Self::new(
            ErrorCode::AccessDenied,
            format!("user {user:?} is not allowed to use proxies with role {role:?}"),
        )
    }

    pub fn queue_size_limit_exceeded(user: &str, limit: usize) -> Self {
        Self::new(
            ErrorCode::QueueSizeLimitExceeded,
            format!("request queue size limit exceeded for user {user:?} (limit {limit})"),
        )
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unavailable, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Timeout, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_round_trips_through_json() {
        let err = GatewayError::queue_size_limit_exceeded("u", 0).with_retryable(true);
        let json = serde_json::to_string(&err).unwrap();
        let back: GatewayError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, err);
        assert!(json.contains("\"code\":\"queue_size_limit_exceeded\""));
    }

    #[test]
    fn test_transient_codes() {
        assert!(ErrorCode::Unavailable.is_transient());
        assert!(ErrorCode::Timeout.is_transient());
        assert!(!ErrorCode::AccessDenied.is_transient());
        assert!(!ErrorCode::ProxyBanned.is_transient());
    }

    #[test]
    fn test_transient_errors_default_retryable() {
        assert!(GatewayError::unavailable("connection refused").retryable);
        assert!(!GatewayError::access_denied("u", "r").retryable);
    }
}
