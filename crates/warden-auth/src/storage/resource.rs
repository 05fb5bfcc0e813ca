//! Resource repository trait.

use async_trait::async_trait;

use crate::AuthResult;

/// Access to protected resources.
#[async_trait]
pub trait ResourceRepository: Send + Sync {
    /// Checks that a resource exists.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::NotFound` if it does not, or another error if the
    /// lookup fails.
    async fn check_exists(&self, resource_id: &str) -> AuthResult<()>;
}
