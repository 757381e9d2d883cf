//! Role-based access control with a TTL'd decision cache.
//!
//! Proxies may carry a role; users must be permitted on that role to use
//! the proxy. A role with no ACL node at all is fail-open (allow) so
//! that introducing a new role never locks anyone out by accident; a
//! role *with* a node switches to an explicit-allow regime where a
//! matching deny always wins.
//!
//! The checker consults the live enabled flag on every check — cached
//! decisions included — and flushes the cache whenever the flag
//! transitions, so toggling enforcement takes effect immediately rather
//! than after cache expiry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use crate::dynconfig::ConfigHandle;

/// Effect of an ACL entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AclAction {
    Allow,
    Deny,
}

/// One access-control entry on a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclEntry {
    pub action: AclAction,
    pub subjects: Vec<String>,
}

impl AclEntry {
    pub fn new(action: AclAction, subject: impl Into<String>) -> Self {
        Self {
            action,
            subjects: vec![subject.into()],
        }
    }

    fn matches(&self, user: &str) -> bool {
        self.subjects.iter().any(|subject| subject == user)
    }
}

/// Outcome of an access check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Allow,
    Deny,
}

/// Role-to-ACL mapping, admin-mutated.
#[derive(Debug, Default)]
pub struct RoleAclStore {
    roles: RwLock<HashMap<String, Vec<AclEntry>>>,
}

impl RoleAclStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_acl(&self, role: impl Into<String>, entries: Vec<AclEntry>) {
        self.roles
            .write()
            .expect("role acl store poisoned")
            .insert(role.into(), entries);
    }

    pub fn remove_role(&self, role: &str) {
        self.roles
            .write()
            .expect("role acl store poisoned")
            .remove(role);
    }

    /// Evaluate the raw ACL, ignoring caches and the enabled flag.
    pub fn evaluate(&self, role: &str, user: &str) -> AccessDecision {
        let roles = self.roles.read().expect("role acl store poisoned");
        let Some(entries) = roles.get(role) else {
            // No ACL node: unknown roles are fail-open.
            return AccessDecision::Allow;
        };

        let mut allowed = false;
        for entry in entries.iter().filter(|entry| entry.matches(user)) {
            match entry.action {
                AclAction::Deny => return AccessDecision::Deny,
                AclAction::Allow => allowed = true,
            }
        }
        if allowed {
            AccessDecision::Allow
        } else {
            AccessDecision::Deny
        }
    }
}

struct CacheEntry {
    decision: AccessDecision,
    updated_at: Instant,
    last_access: Instant,
}

/// Per-proxy access checker.
pub struct AccessChecker {
    store: Arc<RoleAclStore>,
    config: ConfigHandle,
    cache: Mutex<HashMap<(String, String), CacheEntry>>,
    enabled_seen: AtomicBool,
}

impl AccessChecker {
    pub fn new(store: Arc<RoleAclStore>, config: ConfigHandle) -> Self {
        let enabled = config.load().access_checker.enabled;
        Self {
            store,
            config,
            cache: Mutex::new(HashMap::new()),
            enabled_seen: AtomicBool::new(enabled),
        }
    }

    /// Is `user` permitted on a proxy carrying `role`?
    ///
    /// `role == None` (an unassigned proxy) is always allowed.
    pub fn check(&self, user: &str, role: Option<&str>) -> AccessDecision {
        let config = self.config.load();
        let enabled = config.access_checker.enabled;

        // Flag transitions invalidate every cached decision, in both
        // directions: re-enabling must not resurrect stale allows.
        if self.enabled_seen.swap(enabled, Ordering::AcqRel) != enabled {
            debug!(enabled, "access checker toggled; flushing decision cache");
            self.cache
                .lock()
                .expect("access cache poisoned")
                .clear();
        }

        if !enabled {
            return AccessDecision::Allow;
        }
        let Some(role) = role else {
            return AccessDecision::Allow;
        };

        let ttls = &config.access_checker.cache;
        let now = Instant::now();
        let key = (user.to_string(), role.to_string());
        let mut cache = self.cache.lock().expect("access cache poisoned");

        if let Some(entry) = cache.get_mut(&key) {
            let ttl = match entry.decision {
                AccessDecision::Allow => ttls.expire_after_successful_update(),
                AccessDecision::Deny => ttls.expire_after_failed_update(),
            };
            let fresh = now.duration_since(entry.updated_at) < ttl
                && now.duration_since(entry.last_access) < ttls.expire_after_access();
            if fresh {
                entry.last_access = now;
                return entry.decision;
            }
        }

        let decision = self.store.evaluate(role, user);
        cache.insert(
            key,
            CacheEntry {
                decision,
                updated_at: now,
                last_access: now,
            },
        );
        decision
    }

    /// Drop all cached decisions.
    pub fn invalidate(&self) {
        self.cache.lock().expect("access cache poisoned").clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynconfig::DynamicConfig;
    use std::time::Duration;

    fn checker_with(config: DynamicConfig) -> (Arc<RoleAclStore>, ConfigHandle, AccessChecker) {
        let store = Arc::new(RoleAclStore::new());
        let handle = ConfigHandle::new(config);
        let checker = AccessChecker::new(Arc::clone(&store), handle.clone());
        (store, handle, checker)
    }

    fn short_ttl_config() -> DynamicConfig {
        let mut config = DynamicConfig::default();
        config.access_checker.cache.expire_after_successful_update_ms = 20;
        config.access_checker.cache.expire_after_failed_update_ms = 20;
        config.access_checker.cache.expire_after_access_ms = 20;
        config
    }

    #[test]
    fn test_unknown_role_is_fail_open() {
        let (_store, _handle, checker) = checker_with(DynamicConfig::default());
        assert_eq!(checker.check("u", Some("r3")), AccessDecision::Allow);
        assert_eq!(checker.check("u", None), AccessDecision::Allow);
    }

    #[test]
    fn test_explicit_deny_overrides_allow() {
        let (store, _handle, checker) = checker_with(DynamicConfig::default());
        store.set_acl(
            "r",
            vec![
                AclEntry::new(AclAction::Allow, "u"),
                AclEntry::new(AclAction::Deny, "u"),
            ],
        );
        assert_eq!(checker.check("u", Some("r")), AccessDecision::Deny);
    }

    #[test]
    fn test_governed_role_requires_explicit_allow() {
        let (store, _handle, checker) = checker_with(DynamicConfig::default());
        store.set_acl("r", vec![AclEntry::new(AclAction::Allow, "u")]);
        assert_eq!(checker.check("u", Some("r")), AccessDecision::Allow);
        assert_eq!(checker.check("other", Some("r")), AccessDecision::Deny);
    }

    #[tokio::test]
    async fn test_acl_changes_show_up_after_ttl() {
        let (store, _handle, checker) = checker_with(short_ttl_config());
        store.set_acl("r", vec![AclEntry::new(AclAction::Allow, "u")]);
        assert_eq!(checker.check("u", Some("r")), AccessDecision::Allow);

        store.set_acl("r", vec![AclEntry::new(AclAction::Deny, "u")]);
        // Cached allow until the TTL lapses.
        assert_eq!(checker.check("u", Some("r")), AccessDecision::Allow);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(checker.check("u", Some("r")), AccessDecision::Deny);
    }

    #[test]
    fn test_toggling_enforcement_bypasses_the_cache() {
        let (store, handle, checker) = checker_with(DynamicConfig::default());
        store.set_acl("r", vec![AclEntry::new(AclAction::Deny, "u")]);
        assert_eq!(checker.check("u", Some("r")), AccessDecision::Deny);

        // Disabling allows immediately — no waiting for cache expiry.
        let mut disabled = DynamicConfig::default();
        disabled.access_checker.enabled = false;
        handle.store(disabled);
        assert_eq!(checker.check("u", Some("r")), AccessDecision::Allow);

        // Re-enabling re-denies immediately as well.
        handle.store(DynamicConfig::default());
        assert_eq!(checker.check("u", Some("r")), AccessDecision::Deny);
    }
}
