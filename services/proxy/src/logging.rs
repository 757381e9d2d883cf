//! The barrier-indexed structured log.
//!
//! One record per completed call, stamped with a strictly increasing
//! sequence number. A barrier token names "now" in that order; queries
//! read the half-open interval `(from, to]`. Suppression and payload
//! capping are read from the current config snapshot at append time, so
//! they affect exactly the calls made while the setting is active.

use gridgate_types::{BarrierToken, LogEntry, LogOutcome};
use serde_json::Value;
use std::sync::Mutex;
use tracing::{debug, trace};

use crate::dynconfig::ConfigHandle;

#[derive(Default)]
struct LogState {
    last_seq: u64,
    entries: Vec<LogEntry>,
}

/// Append-only log of completed calls.
pub struct StructuredLogger {
    config: ConfigHandle,
    state: Mutex<LogState>,
}

impl StructuredLogger {
    pub fn new(config: ConfigHandle) -> Self {
        Self {
            config,
            state: Mutex::new(LogState::default()),
        }
    }

    /// A token for "now": every record appended after this call compares
    /// strictly greater.
    pub fn barrier(&self) -> BarrierToken {
        let state = self.state.lock().expect("structured log poisoned");
        BarrierToken(state.last_seq)
    }

    /// Append one record, subject to the current suppression set and
    /// payload-capture threshold.
    ///
    /// An over-threshold request body is replaced with the opaque empty
    /// marker (`None`), never truncated to a prefix: a partial payload
    /// is worse than none for both privacy and debuggability.
    pub fn log_call(&self, method: &str, user: &str, params: &Value, outcome: LogOutcome) {
        let config = self.config.load();

        if config
            .api
            .structured_logging_suppressed_methods
            .contains(method)
        {
            trace!(method, "structured log record suppressed");
            return;
        }

        let request = match config.api.structured_logging_max_request_byte_size {
            Some(max) => {
                let size = serde_json::to_vec(params).map(|raw| raw.len()).unwrap_or(0);
                if size > max {
                    None
                } else {
                    Some(params.clone())
                }
            }
            None => Some(params.clone()),
        };

        let mut state = self.state.lock().expect("structured log poisoned");
        state.last_seq += 1;
        let entry = LogEntry {
            seq: BarrierToken(state.last_seq),
            method: method.to_string(),
            user: user.to_string(),
            request,
            outcome,
            logged_at: chrono::Utc::now(),
        };
        debug!(
            target: "structured_log",
            seq = entry.seq.0,
            method,
            user,
            success = entry.is_success(),
            "call completed"
        );
        state.entries.push(entry);
    }

    /// Records in `(from, to]`; a `None` bound opens that end of the
    /// interval.
    pub fn query(&self, from: Option<BarrierToken>, to: Option<BarrierToken>) -> Vec<LogEntry> {
        let state = self.state.lock().expect("structured log poisoned");
        state
            .entries
            .iter()
            .filter(|entry| match from {
                Some(from) => entry.seq > from,
                None => true,
            })
            .filter(|entry| match to {
                Some(to) => entry.seq <= to,
                None => true,
            })
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().expect("structured log poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynconfig::DynamicConfig;
    use serde_json::json;

    fn logger() -> (ConfigHandle, StructuredLogger) {
        let handle = ConfigHandle::default();
        let logger = StructuredLogger::new(handle.clone());
        (handle, logger)
    }

    fn success(logger: &StructuredLogger, method: &str, params: Value) {
        logger.log_call(method, "root", &params, LogOutcome::Success);
    }

    #[test]
    fn test_barrier_intervals_are_half_open_and_exact() {
        let (_handle, logger) = logger();

        let b1 = logger.barrier();
        success(&logger, "select_rows", json!({"query": "* from [//tmp/t1]"}));
        let b2 = logger.barrier();
        success(&logger, "select_rows", json!({"query": "* from [//tmp/t2]"}));
        let b3 = logger.barrier();

        let first = logger.query(Some(b1), Some(b2));
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].request.as_ref().unwrap()["query"], "* from [//tmp/t1]");

        let second = logger.query(Some(b2), Some(b3));
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].request.as_ref().unwrap()["query"], "* from [//tmp/t2]");

        assert!(logger.query(Some(b3), None).is_empty());
        assert_eq!(logger.query(None, None).len(), 2);
    }

    #[test]
    fn test_suppression_drops_new_records_only() {
        let (handle, logger) = logger();

        let b1 = logger.barrier();
        success(&logger, "select_rows", json!({"query": "q"}));
        let b2 = logger.barrier();

        let mut config = DynamicConfig::default();
        config
            .api
            .structured_logging_suppressed_methods
            .insert("select_rows".to_string());
        handle.store(config);

        success(&logger, "select_rows", json!({"query": "q"}));
        let b3 = logger.barrier();

        assert_eq!(logger.query(Some(b1), Some(b2)).len(), 1);
        assert!(logger.query(Some(b2), Some(b3)).is_empty());
        // The earlier record is untouched.
        assert_eq!(logger.query(None, None).len(), 1);
    }

    #[test]
    fn test_oversized_requests_log_the_opaque_marker() {
        let (handle, logger) = logger();

        let long_query = "a".repeat(4096);
        success(&logger, "select_rows", json!({"query": long_query}));

        let mut config = DynamicConfig::default();
        config.api.structured_logging_max_request_byte_size = Some(1024);
        handle.store(config);

        let long_query = "b".repeat(4096);
        success(&logger, "select_rows", json!({"query": long_query}));

        let entries = logger.query(None, None);
        assert_eq!(entries.len(), 2);
        assert!(entries[0].request.is_some());
        // Replaced outright, not truncated.
        assert!(entries[1].request.is_none());
    }

    #[test]
    fn test_sequence_tracks_completion_order() {
        let (_handle, logger) = logger();
        success(&logger, "a", json!(1));
        success(&logger, "b", json!(2));
        let entries = logger.query(None, None);
        assert!(entries[0].seq < entries[1].seq);
    }

    #[test]
    fn test_error_outcomes_are_recorded() {
        let (_handle, logger) = logger();
        logger.log_call(
            "get_node",
            "u",
            &json!({"path": "//nope"}),
            LogOutcome::Error {
                code: gridgate_types::ErrorCode::NotFound,
                message: "no such node".to_string(),
            },
        );
        let entries = logger.query(None, None);
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].is_success());
    }
}
