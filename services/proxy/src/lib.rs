//! gridgate proxy: the gateway daemon between clients and the cluster.
//!
//! A proxy instance owns the live registry view, enforces role-based
//! access and per-user admission, records every completed call in the
//! barrier-indexed structured log, and serves the discovery and admin
//! HTTP surface. The cluster itself sits behind the [`ClusterBackend`]
//! seam and is out of scope here.

pub mod access;
pub mod api;
pub mod config;
pub mod dispatch;
pub mod dynconfig;
pub mod local;
pub mod logging;
pub mod queue;
pub mod registry;
pub mod state;

pub use access::{AccessChecker, AccessDecision, AclAction, AclEntry, RoleAclStore};
pub use dispatch::{ClusterBackend, ProxyNode};
pub use dynconfig::{ConfigHandle, ConfigSource, ConfigWatcher, DynamicConfig, FileConfigSource};
pub use local::{LocalChannel, LocalCluster, LocalDiscovery, MemoryBackend};
pub use logging::StructuredLogger;
pub use queue::{QueueSlot, RequestQueueLimiter};
pub use registry::{ProxyAnnouncement, ProxyRecord, ProxyRegistry};
pub use state::AppState;
