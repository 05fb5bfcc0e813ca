//! Carrying privileges forward from a superseded token.
//!
//! When a new RPT replaces an old one, the old token's privilege snapshots are
//! migrated into it: latest expiry first, refreshed through the privilege cache
//! when they are stale, never duplicating a resource, and capped at the
//! configured maximum number of permissions.

use std::collections::{BTreeSet, HashSet};

use uuid::Uuid;

use crate::AuthResult;
use crate::error::AuthError;
use crate::storage::PrivilegeCacheService;
use crate::token::claims::Permission;
use crate::types::PrivilegeCache;

/// Returns `true` if both scope lists name the same set of scopes.
///
/// Order and duplicates are ignored.
#[must_use]
pub fn scopes_equivalent(left: &[String], right: &[String]) -> bool {
    let left: BTreeSet<&str> = left.iter().map(String::as_str).collect();
    let right: BTreeSet<&str> = right.iter().map(String::as_str).collect();
    left == right
}

/// Sorts snapshots by expiry, latest first.
pub fn sort_latest_first(privileges: &mut [PrivilegeCache]) {
    privileges.sort_by(|a, b| b.expiry_time.cmp(&a.expiry_time));
}

/// Builds the permission claims embedding the given snapshots.
#[must_use]
pub fn to_permissions(privileges: &[PrivilegeCache]) -> Vec<Permission> {
    privileges.iter().map(PrivilegeCache::to_permission).collect()
}

/// Fetches the live snapshot for a resource, reporting failures as internal errors.
pub(crate) async fn fetch_live(
    cache: &dyn PrivilegeCacheService,
    identity_id: Uuid,
    resource_id: &str,
) -> AuthResult<PrivilegeCache> {
    cache
        .cached_privileges(identity_id, resource_id)
        .await
        .map_err(|err| match err {
            AuthError::Internal { .. } => err,
            other => AuthError::internal(format!(
                "failed to load cached privileges for resource '{resource_id}': {other}"
            )),
        })
}

/// Migration of historical privileges into a new token.
pub struct PrivilegeMigration<'a> {
    cache: &'a dyn PrivilegeCacheService,
    identity_id: Uuid,
    max_permissions: usize,
}

impl<'a> PrivilegeMigration<'a> {
    /// Creates a migration for one identity.
    #[must_use]
    pub fn new(
        cache: &'a dyn PrivilegeCacheService,
        identity_id: Uuid,
        max_permissions: usize,
    ) -> Self {
        Self {
            cache,
            identity_id,
            max_permissions,
        }
    }

    /// Appends historical snapshots to `selected` until the maximum is reached.
    ///
    /// `selected` holds the entries that must be embedded (the audited
    /// resource, or nothing on refresh). History entries for resources that
    /// are already selected are skipped. An entry is replaced by its live
    /// snapshot when it is stale or when `refresh_all` is set.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Internal` if a live snapshot cannot be loaded.
    pub async fn migrate(
        &self,
        mut selected: Vec<PrivilegeCache>,
        mut history: Vec<PrivilegeCache>,
        refresh_all: bool,
    ) -> AuthResult<Vec<PrivilegeCache>> {
        let mut seen: HashSet<String> = selected.iter().map(|p| p.resource_id.clone()).collect();
        sort_latest_first(&mut history);

        for old in history {
            if selected.len() >= self.max_permissions {
                break;
            }
            if seen.contains(&old.resource_id) {
                continue;
            }

            let entry = if refresh_all || old.stale {
                let live = fetch_live(self.cache, self.identity_id, &old.resource_id).await?;
                tracing::debug!(
                    resource_id = %old.resource_id,
                    old_scopes = ?old.scopes,
                    new_scopes = ?live.scopes,
                    "refreshed stale privilege"
                );
                live
            } else {
                old
            };

            seen.insert(entry.resource_id.clone());
            selected.push(entry);
        }

        Ok(selected)
    }
}
