//! Privilege cache service trait.

use async_trait::async_trait;
use uuid::Uuid;

use crate::AuthResult;
use crate::types::PrivilegeCache;

/// Supplies the current scopes of an identity on a resource.
///
/// Implementations memoize the result and recompute it when the cached entry
/// is stale or expired, so the returned entry is always authoritative.
#[async_trait]
pub trait PrivilegeCacheService: Send + Sync {
    /// Returns the current privilege snapshot for `(identity_id, resource_id)`.
    ///
    /// An identity without grants on the resource yields an entry with no
    /// scopes.
    ///
    /// # Errors
    ///
    /// Returns an error if the scopes cannot be computed or stored.
    async fn cached_privileges(
        &self,
        identity_id: Uuid,
        resource_id: &str,
    ) -> AuthResult<PrivilegeCache>;
}
