//! Client-surface errors.

use gridgate_types::GatewayError;
use thiserror::Error;

/// Terminal error of one logical client call.
///
/// Callers always receive either a successful result or exactly one of
/// these; transient failures absorbed by the retry engine never leak.
/// When the retry budget is exhausted the error is the last underlying
/// gateway error, not a synthetic "retries exhausted" wrapper.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// No proxy matched the configured discovery selector. A valid
    /// steady state of the cluster, surfaced only once the retry budget
    /// is spent waiting for the pool to become non-empty.
    #[error("proxy list is empty")]
    EmptyProxyList,

    /// The final gateway error for this call.
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl ClientError {
    /// The gateway error, when this is one.
    pub fn as_gateway(&self) -> Option<&GatewayError> {
        match self {
            Self::Gateway(error) => Some(error),
            Self::EmptyProxyList => None,
        }
    }
}
