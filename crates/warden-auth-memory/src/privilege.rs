//! In-memory privilege cache.
//!
//! Scopes come from a grant table keyed by `(identity, resource)`. Each
//! computation produces a new immutable snapshot with its own ID. The current
//! snapshot of a pair is reused until it expires or is marked stale; grant
//! changes mark it stale. Superseded snapshots are kept while a token still
//! references them and are dropped by [`MemoryPrivilegeCache::prune`].

use std::collections::HashSet;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use dashmap::DashMap;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;
use warden_auth::AuthResult;
use warden_auth::storage::PrivilegeCacheService;
use warden_auth::types::PrivilegeCache;

/// Default lifetime of a computed snapshot.
pub const DEFAULT_SNAPSHOT_TTL: StdDuration = StdDuration::from_secs(3600);

type GrantKey = (Uuid, String);

/// In-memory [`PrivilegeCacheService`].
#[derive(Debug)]
pub struct MemoryPrivilegeCache {
    grants: DashMap<GrantKey, Vec<String>>,
    current: DashMap<GrantKey, Uuid>,
    snapshots: DashMap<Uuid, PrivilegeCache>,
    ttl: Duration,
}

impl Default for MemoryPrivilegeCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPrivilegeCache {
    /// Creates an empty cache with the default snapshot lifetime.
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_SNAPSHOT_TTL)
    }

    /// Creates an empty cache whose snapshots live for `ttl`.
    pub fn with_ttl(ttl: StdDuration) -> Self {
        Self {
            grants: DashMap::new(),
            current: DashMap::new(),
            snapshots: DashMap::new(),
            ttl: Duration::try_from(ttl).unwrap_or(Duration::HOUR),
        }
    }

    /// Sets the scopes an identity holds on a resource.
    pub fn grant<I, S>(&self, identity_id: Uuid, resource_id: &str, scopes: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let key = (identity_id, resource_id.to_string());
        self.grants
            .insert(key.clone(), scopes.into_iter().map(Into::into).collect());
        self.mark_key_stale(&key);
    }

    /// Removes every scope an identity holds on a resource.
    pub fn revoke(&self, identity_id: Uuid, resource_id: &str) {
        let key = (identity_id, resource_id.to_string());
        self.grants.remove(&key);
        self.mark_key_stale(&key);
    }

    /// Marks every current snapshot of an identity stale.
    ///
    /// Returns the number of snapshots marked.
    pub fn mark_stale(&self, identity_id: Uuid) -> usize {
        let ids: Vec<Uuid> = self
            .current
            .iter()
            .filter(|entry| entry.key().0 == identity_id)
            .map(|entry| *entry.value())
            .collect();

        ids.iter().filter(|id| self.mark_snapshot_stale(**id)).count()
    }

    /// Returns a snapshot by ID, including superseded ones.
    pub fn snapshot(&self, privilege_cache_id: Uuid) -> Option<PrivilegeCache> {
        self.snapshots
            .get(&privilege_cache_id)
            .map(|entry| entry.value().clone())
    }

    /// Drops superseded snapshots whose IDs are not in `referenced`.
    ///
    /// Current snapshots are always kept. Returns the number removed.
    pub fn prune(&self, referenced: &HashSet<Uuid>) -> usize {
        let current: HashSet<Uuid> = self.current.iter().map(|entry| *entry.value()).collect();
        let mut removed = 0;
        self.snapshots.retain(|id, _| {
            let keep = current.contains(id) || referenced.contains(id);
            if !keep {
                removed += 1;
            }
            keep
        });

        if removed > 0 {
            tracing::debug!(removed, "pruned privilege snapshots");
        }
        removed
    }

    fn mark_key_stale(&self, key: &GrantKey) {
        let current = self.current.get(key).map(|entry| *entry.value());
        if let Some(id) = current {
            self.mark_snapshot_stale(id);
        }
    }

    fn mark_snapshot_stale(&self, privilege_cache_id: Uuid) -> bool {
        match self.snapshots.get_mut(&privilege_cache_id) {
            Some(mut snapshot) => {
                snapshot.stale = true;
                true
            }
            None => false,
        }
    }

    fn reusable(&self, key: &GrantKey, now: OffsetDateTime) -> Option<PrivilegeCache> {
        let id = self.current.get(key).map(|entry| *entry.value())?;
        self.snapshot(id)
            .filter(|snapshot| !snapshot.stale && snapshot.expiry_time > now)
    }
}

#[async_trait]
impl PrivilegeCacheService for MemoryPrivilegeCache {
    async fn cached_privileges(
        &self,
        identity_id: Uuid,
        resource_id: &str,
    ) -> AuthResult<PrivilegeCache> {
        let key = (identity_id, resource_id.to_string());
        let now = OffsetDateTime::now_utc();

        if let Some(snapshot) = self.reusable(&key, now) {
            return Ok(snapshot);
        }

        let scopes = self
            .grants
            .get(&key)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();
        let snapshot = PrivilegeCache {
            privilege_cache_id: Uuid::new_v4(),
            identity_id,
            resource_id: resource_id.to_string(),
            scopes,
            expiry_time: now + self.ttl,
            stale: false,
        };

        tracing::debug!(
            identity_id = %identity_id,
            resource_id = %resource_id,
            scopes = ?snapshot.scopes,
            "computed privilege snapshot"
        );

        self.snapshots
            .insert(snapshot.privilege_cache_id, snapshot.clone());
        self.current.insert(key, snapshot.privilege_cache_id);
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_snapshot_reused_until_grant_changes() {
        let cache = MemoryPrivilegeCache::new();
        let identity = Uuid::new_v4();
        cache.grant(identity, "r1", ["view"]);

        let first = cache.cached_privileges(identity, "r1").await.unwrap();
        let second = cache.cached_privileges(identity, "r1").await.unwrap();
        assert_eq!(first.privilege_cache_id, second.privilege_cache_id);

        cache.grant(identity, "r1", ["view", "edit"]);
        assert!(cache.snapshot(first.privilege_cache_id).unwrap().stale);

        let third = cache.cached_privileges(identity, "r1").await.unwrap();
        assert_ne!(third.privilege_cache_id, first.privilege_cache_id);
        assert_eq!(third.scopes, ["view", "edit"]);
        assert!(!third.stale);
    }

    #[tokio::test]
    async fn test_ungranted_resource_has_no_scopes() {
        let cache = MemoryPrivilegeCache::new();
        let snapshot = cache
            .cached_privileges(Uuid::new_v4(), "nothing")
            .await
            .unwrap();
        assert!(snapshot.scopes.is_empty());
    }

    #[tokio::test]
    async fn test_mark_stale_and_revoke() {
        let cache = MemoryPrivilegeCache::new();
        let identity = Uuid::new_v4();
        cache.grant(identity, "r1", ["view"]);
        cache.grant(identity, "r2", ["view"]);
        cache.cached_privileges(identity, "r1").await.unwrap();
        let r2 = cache.cached_privileges(identity, "r2").await.unwrap();

        assert_eq!(cache.mark_stale(identity), 2);
        assert_eq!(cache.mark_stale(Uuid::new_v4()), 0);

        cache.revoke(identity, "r2");
        let fresh = cache.cached_privileges(identity, "r2").await.unwrap();
        assert_ne!(fresh.privilege_cache_id, r2.privilege_cache_id);
        assert!(fresh.scopes.is_empty());
    }

    #[tokio::test]
    async fn test_prune_keeps_current_and_referenced() {
        let cache = MemoryPrivilegeCache::new();
        let identity = Uuid::new_v4();
        cache.grant(identity, "r1", ["view"]);
        let first = cache.cached_privileges(identity, "r1").await.unwrap();
        cache.grant(identity, "r1", ["edit"]);
        let second = cache.cached_privileges(identity, "r1").await.unwrap();
        cache.grant(identity, "r1", ["pay"]);
        let third = cache.cached_privileges(identity, "r1").await.unwrap();

        let referenced = HashSet::from([second.privilege_cache_id]);
        assert_eq!(cache.prune(&referenced), 1);

        assert!(cache.snapshot(first.privilege_cache_id).is_none());
        assert!(cache.snapshot(second.privilege_cache_id).is_some());
        assert!(cache.snapshot(third.privilege_cache_id).is_some());
        assert_eq!(cache.prune(&HashSet::new()), 1);
        assert!(cache.snapshot(third.privilege_cache_id).is_some());
    }

    #[tokio::test]
    async fn test_expired_snapshot_is_recomputed() {
        let cache = MemoryPrivilegeCache::with_ttl(StdDuration::ZERO);
        let identity = Uuid::new_v4();
        cache.grant(identity, "r1", ["view"]);

        let first = cache.cached_privileges(identity, "r1").await.unwrap();
        let second = cache.cached_privileges(identity, "r1").await.unwrap();
        assert_ne!(first.privilege_cache_id, second.privilege_cache_id);
    }
}
