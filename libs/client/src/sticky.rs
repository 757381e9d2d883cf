//! Sticky-session affinity.
//!
//! A session (a transaction) is pinned to the proxy its first call
//! selected and stays pinned for its entire lifetime. The table is a
//! compare-and-set map: when two calls race to bind the same session,
//! the first insert wins and the loser adopts the winner's address.

use std::collections::HashMap;
use std::sync::Mutex;

use gridgate_types::SessionId;
use tracing::debug;

/// Session-to-proxy bindings.
#[derive(Debug, Default)]
pub struct StickySessionTable {
    bindings: Mutex<HashMap<SessionId, String>>,
}

impl StickySessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The bound address, if the session is bound.
    ///
    /// Returned unconditionally — even when the proxy is currently
    /// banned. A banned target fails the individual call; it never
    /// silently migrates the session.
    pub fn lookup(&self, session: SessionId) -> Option<String> {
        self.bindings
            .lock()
            .expect("sticky session table poisoned")
            .get(&session)
            .cloned()
    }

    /// Bind the session to `address` unless a concurrent bind got there
    /// first; returns the winning address either way.
    pub fn bind(&self, session: SessionId, address: String) -> String {
        let mut bindings = self.bindings.lock().expect("sticky session table poisoned");
        let bound = bindings.entry(session).or_insert_with(|| {
            debug!(%session, %address, "bound session to proxy");
            address
        });
        bound.clone()
    }

    /// Drop the binding when the session ends.
    pub fn release(&self, session: SessionId) -> Option<String> {
        let removed = self
            .bindings
            .lock()
            .expect("sticky session table poisoned")
            .remove(&session);
        if let Some(address) = &removed {
            debug!(%session, %address, "released session binding");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.bindings
            .lock()
            .expect("sticky session table poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
