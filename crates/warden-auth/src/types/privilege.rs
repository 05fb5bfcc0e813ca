//! Privilege cache entry.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::token::claims::Permission;

/// Memoized scope set of one identity on one resource.
///
/// Entries are produced by the privilege cache service. The engine only reads
/// them; a `stale` entry must be re-fetched before its scopes are embedded in a
/// new token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivilegeCache {
    /// Unique identifier of this snapshot.
    pub privilege_cache_id: Uuid,

    /// Identity the scopes were computed for.
    pub identity_id: Uuid,

    /// Resource the scopes apply to.
    pub resource_id: String,

    /// Granted scope names.
    pub scopes: Vec<String>,

    /// When the snapshot stops being authoritative.
    #[serde(with = "time::serde::rfc3339")]
    pub expiry_time: OffsetDateTime,

    /// Set when the underlying grants changed after the snapshot was taken.
    #[serde(default)]
    pub stale: bool,
}

impl PrivilegeCache {
    /// Returns the scope names.
    #[must_use]
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    /// Returns the scope names as a deduplicated, ordered set.
    #[must_use]
    pub fn scope_set(&self) -> BTreeSet<&str> {
        self.scopes.iter().map(String::as_str).collect()
    }

    /// Builds the permission claim embedding this snapshot.
    #[must_use]
    pub fn to_permission(&self) -> Permission {
        Permission::new(
            self.resource_id.clone(),
            self.scopes.clone(),
            self.expiry_time.unix_timestamp(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_to_permission() {
        let entry = PrivilegeCache {
            privilege_cache_id: Uuid::new_v4(),
            identity_id: Uuid::new_v4(),
            resource_id: "space-1".to_string(),
            scopes: vec!["view".to_string(), "contribute".to_string()],
            expiry_time: datetime!(2030-01-01 00:00 UTC),
            stale: false,
        };

        let permission = entry.to_permission();
        assert_eq!(permission.resource_set_id, "space-1");
        assert_eq!(permission.scopes, entry.scopes);
        assert_eq!(permission.expiry, 1_893_456_000);
    }

    #[test]
    fn test_scope_set_deduplicates() {
        let entry = PrivilegeCache {
            privilege_cache_id: Uuid::new_v4(),
            identity_id: Uuid::new_v4(),
            resource_id: "r".to_string(),
            scopes: vec!["b".to_string(), "a".to_string(), "b".to_string()],
            expiry_time: OffsetDateTime::now_utc(),
            stale: true,
        };
        assert_eq!(entry.scope_set().into_iter().collect::<Vec<_>>(), ["a", "b"]);
    }
}
