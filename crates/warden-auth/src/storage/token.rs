//! Token repository and unit of work traits.
//!
//! Reads go straight to the repository. Every write goes through a
//! [`TokenUnitOfWork`] obtained from [`TokenRepository::begin`], so that a
//! multi-write sequence (a token and its privilege rows, a token pair) becomes
//! visible all at once or not at all.
//!
//! # Implementation Notes
//!
//! Implementations should:
//!
//! - Make writes of a unit of work invisible to other readers until `commit`
//! - Discard buffered writes when a unit of work is dropped without `commit`
//! - Cascade token deletion to the token's privilege rows
//! - Return `AuthError::NotFound` from `load` for unknown token IDs

use async_trait::async_trait;
use uuid::Uuid;

use crate::AuthResult;
use crate::token::status::TokenStatus;
use crate::types::{PrivilegeCache, Token, TokenPrivilege};

/// Read access to persisted tokens.
///
/// # Implementations
///
/// Implementations are provided for:
/// - In-memory maps (in `warden-auth-memory` crate)
/// - PostgreSQL (in `warden-auth-postgres` crate)
#[async_trait]
pub trait TokenRepository: Send + Sync {
    /// Loads a token by ID.
    ///
    /// # Arguments
    ///
    /// * `token_id` - The token's `jti`
    ///
    /// # Errors
    ///
    /// Returns `AuthError::NotFound` if no such token exists, or another error
    /// if the storage operation fails.
    async fn load(&self, token_id: Uuid) -> AuthResult<Token>;

    /// Lists the privilege snapshots embedded in a token.
    ///
    /// Each returned entry is the privilege cache row referenced by one of the
    /// token's privilege rows. Unknown tokens yield an empty list.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn list_privileges(&self, token_id: Uuid) -> AuthResult<Vec<PrivilegeCache>>;

    /// Lists every token issued to an identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn list_for_identity(&self, identity_id: Uuid) -> AuthResult<Vec<Token>>;

    /// Starts a unit of work.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot open a transaction.
    async fn begin(&self) -> AuthResult<Box<dyn TokenUnitOfWork>>;
}

/// A scoped set of token writes that commit or roll back together.
///
/// Dropping a unit of work without calling [`commit`](Self::commit) discards
/// every write made through it.
#[async_trait]
pub trait TokenUnitOfWork: Send {
    /// Inserts a new token.
    ///
    /// # Errors
    ///
    /// Returns an error if a token with the same ID exists or the write fails.
    async fn create(&mut self, token: &Token) -> AuthResult<()>;

    /// Updates an existing token's status, type and expiry.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::NotFound` if the token does not exist.
    async fn save(&mut self, token: &Token) -> AuthResult<()>;

    /// Deletes a token and its privilege rows.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::NotFound` if the token does not exist.
    async fn delete(&mut self, token_id: Uuid) -> AuthResult<()>;

    /// Inserts a privilege row for a token.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    async fn create_privilege(&mut self, privilege: &TokenPrivilege) -> AuthResult<()>;

    /// Overwrites the status of every token of an identity.
    ///
    /// # Returns
    ///
    /// Returns the number of tokens updated.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    async fn set_status_flags_for_identity(
        &mut self,
        identity_id: Uuid,
        status: TokenStatus,
    ) -> AuthResult<u64>;

    /// Deletes every token that expired at least `retention_hours` ago.
    ///
    /// # Returns
    ///
    /// Returns the number of tokens deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the deletion fails.
    async fn cleanup_expired_tokens(&mut self, retention_hours: u32) -> AuthResult<u64>;

    /// Publishes every write of this unit of work.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails; no write is published in that case.
    async fn commit(self: Box<Self>) -> AuthResult<()>;

    /// Discards every write of this unit of work.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend reports a rollback failure.
    async fn rollback(self: Box<Self>) -> AuthResult<()>;
}
