//! Structured-log record model and barrier tokens.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ErrorCode;

/// A point in the structured log's total order.
///
/// Tokens are opaque to callers but totally ordered; a pair `(from, to]`
/// scopes a query to the calls completed between the two barriers.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct BarrierToken(pub u64);

/// Outcome of a logged call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "result")]
pub enum LogOutcome {
    Success,
    Error { code: ErrorCode, message: String },
}

/// One append-only record per completed call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Position in the log's total order, consistent with completion order.
    pub seq: BarrierToken,

    pub method: String,
    pub user: String,

    /// Captured request parameters. `None` is the explicit opaque marker
    /// written when the serialized request exceeded the capture
    /// threshold; the payload is never truncated to a prefix.
    pub request: Option<Value>,

    pub outcome: LogOutcome,

    pub logged_at: DateTime<Utc>,
}

impl LogEntry {
    /// True when the entry recorded a successful call.
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, LogOutcome::Success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_barrier_tokens_order() {
        assert!(BarrierToken(1) < BarrierToken(2));
        assert_eq!(BarrierToken::default(), BarrierToken(0));
    }

    #[test]
    fn test_outcome_serde_tagging() {
        let outcome = LogOutcome::Error {
            code: ErrorCode::NotFound,
            message: "no such table".to_string(),
        };
        let json = serde_json::to_string(&outcome).unwrap();
        assert!(json.contains("\"result\":\"error\""));
        assert!(json.contains("\"code\":\"not_found\""));
    }
}
