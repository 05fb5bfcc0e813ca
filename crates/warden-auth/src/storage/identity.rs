//! Identity repository trait.

use async_trait::async_trait;
use uuid::Uuid;

use crate::AuthResult;
use crate::types::Identity;

/// Access to identities and their users.
#[async_trait]
pub trait IdentityRepository: Send + Sync {
    /// Checks that an identity exists.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::NotFound` if it does not, or another error if the
    /// lookup fails.
    async fn check_exists(&self, identity_id: Uuid) -> AuthResult<()>;

    /// Loads an identity together with its user record.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::NotFound` for unknown identities. Implementations
    /// may return `AuthError::Unauthorized` when the caller is not allowed to
    /// see the identity.
    async fn load_with_user(&self, identity_id: Uuid) -> AuthResult<Identity>;

    /// Records that the identity was active just now.
    ///
    /// Unknown identities (such as API clients) are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    async fn touch_last_active(&self, identity_id: Uuid) -> AuthResult<()>;
}
