//! The request/response envelope the gateway carries.
//!
//! The envelope is deliberately narrow: the data-plane payload is an
//! opaque JSON value interpreted by the cluster backend, not by the
//! gateway. The gateway only reads the routing-relevant fields (method,
//! user, session, idempotence class).

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Identifier of a sticky session (a transaction).
///
/// Generated on the client; all calls carrying the same session id are
/// pinned to the proxy the session first bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether a request may be safely re-sent after a transient failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// Safe to retry on another proxy.
    Idempotent,
    /// Never re-attempted by the retry engine.
    NonIdempotent,
}

/// One logical gateway call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiRequest {
    /// Method name, e.g. `get_node` or `select_rows`.
    pub method: String,

    /// Authenticated user the call runs as.
    pub user: String,

    /// Sticky-session binding, if the call belongs to a transaction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,

    #[serde(default = "RequestKind::idempotent")]
    pub kind: RequestKind,

    /// Opaque method parameters, passed through to the backend.
    #[serde(default)]
    pub params: Value,
}

impl RequestKind {
    fn idempotent() -> Self {
        Self::Idempotent
    }
}

impl ApiRequest {
    pub fn new(method: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            user: user.into(),
            session_id: None,
            kind: RequestKind::Idempotent,
            params: Value::Null,
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    pub fn with_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn non_idempotent(mut self) -> Self {
        self.kind = RequestKind::NonIdempotent;
        self
    }

    /// True when the call is pinned to a sticky session.
    pub fn is_sticky(&self) -> bool {
        self.session_id.is_some()
    }
}

/// The successful result of a gateway call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub value: Value,
}

impl ApiResponse {
    pub fn new(value: Value) -> Self {
        Self { value }
    }
}
