//! In-memory identity and resource repositories.

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use time::OffsetDateTime;
use uuid::Uuid;
use warden_auth::storage::{IdentityRepository, ResourceRepository};
use warden_auth::types::Identity;
use warden_auth::{AuthError, AuthResult};

/// In-memory [`IdentityRepository`].
#[derive(Debug, Default)]
pub struct MemoryIdentityRepository {
    identities: DashMap<Uuid, Identity>,
}

impl MemoryIdentityRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces an identity.
    pub fn insert(&self, identity: Identity) {
        self.identities.insert(identity.id, identity);
    }

    /// Returns a copy of an identity.
    pub fn get(&self, identity_id: Uuid) -> Option<Identity> {
        self.identities
            .get(&identity_id)
            .map(|entry| entry.value().clone())
    }

    /// Sets the banned flag of an identity's user.
    ///
    /// Returns `false` if the identity is unknown or has no user.
    pub fn set_banned(&self, identity_id: Uuid, banned: bool) -> bool {
        match self.identities.get_mut(&identity_id) {
            Some(mut identity) => match identity.user.as_mut() {
                Some(user) => {
                    user.banned = banned;
                    true
                }
                None => false,
            },
            None => false,
        }
    }
}

#[async_trait]
impl IdentityRepository for MemoryIdentityRepository {
    async fn check_exists(&self, identity_id: Uuid) -> AuthResult<()> {
        if self.identities.contains_key(&identity_id) {
            Ok(())
        } else {
            Err(AuthError::not_found("identity", identity_id))
        }
    }

    async fn load_with_user(&self, identity_id: Uuid) -> AuthResult<Identity> {
        self.get(identity_id)
            .ok_or_else(|| AuthError::not_found("identity", identity_id))
    }

    async fn touch_last_active(&self, identity_id: Uuid) -> AuthResult<()> {
        if let Some(mut identity) = self.identities.get_mut(&identity_id) {
            identity.last_active = Some(OffsetDateTime::now_utc());
        }
        Ok(())
    }
}

/// In-memory [`ResourceRepository`].
#[derive(Debug, Default)]
pub struct MemoryResourceRepository {
    resources: DashSet<String>,
}

impl MemoryResourceRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a resource.
    pub fn insert(&self, resource_id: impl Into<String>) {
        self.resources.insert(resource_id.into());
    }

    /// Removes a resource; returns `true` if it existed.
    pub fn remove(&self, resource_id: &str) -> bool {
        self.resources.remove(resource_id).is_some()
    }
}

#[async_trait]
impl ResourceRepository for MemoryResourceRepository {
    async fn check_exists(&self, resource_id: &str) -> AuthResult<()> {
        if self.resources.contains(resource_id) {
            Ok(())
        } else {
            Err(AuthError::not_found("resource", resource_id))
        }
    }
}
