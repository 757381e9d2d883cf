//! Application state shared across request handlers.

use std::sync::Arc;

use crate::access::RoleAclStore;
use crate::dispatch::ProxyNode;
use crate::dynconfig::ConfigHandle;
use crate::logging::StructuredLogger;
use crate::queue::RequestQueueLimiter;
use crate::registry::ProxyRegistry;

/// Shared application state, passed to handlers via Axum's state
/// extractor. Everything is lifecycle-scoped and injected — no
/// process-wide globals, so tests run several instances side by side.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    registry: Arc<ProxyRegistry>,
    node: Arc<ProxyNode>,
    logger: Arc<StructuredLogger>,
    limiter: Arc<RequestQueueLimiter>,
    acl: Arc<RoleAclStore>,
    config: ConfigHandle,
}

impl AppState {
    pub fn new(
        registry: Arc<ProxyRegistry>,
        node: Arc<ProxyNode>,
        logger: Arc<StructuredLogger>,
        limiter: Arc<RequestQueueLimiter>,
        acl: Arc<RoleAclStore>,
        config: ConfigHandle,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                registry,
                node,
                logger,
                limiter,
                acl,
                config,
            }),
        }
    }

    pub fn registry(&self) -> &Arc<ProxyRegistry> {
        &self.inner.registry
    }

    pub fn node(&self) -> &Arc<ProxyNode> {
        &self.inner.node
    }

    pub fn logger(&self) -> &Arc<StructuredLogger> {
        &self.inner.logger
    }

    pub fn limiter(&self) -> &Arc<RequestQueueLimiter> {
        &self.inner.limiter
    }

    pub fn acl(&self) -> &Arc<RoleAclStore> {
        &self.inner.acl
    }

    pub fn config(&self) -> &ConfigHandle {
        &self.inner.config
    }
}
