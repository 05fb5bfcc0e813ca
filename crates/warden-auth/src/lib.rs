//! # warden-auth
//!
//! Token lifecycle and RPT audit engine for the Warden identity service.
//!
//! This crate provides:
//! - Auditing of presented tokens against protected resources
//! - Minting of Requesting Party Tokens (RPTs) with migrated permissions
//! - Refresh token exchange
//! - Request-path token validation
//! - Bulk token status changes and expired token cleanup
//!
//! ## Modules
//!
//! - [`config`] - Engine configuration and loading
//! - [`error`] - Error kinds returned by the engine
//! - [`observability`] - Tracing setup
//! - [`storage`] - Repository and collaborator traits
//! - [`token`] - Token manager, status flags and the lifecycle engine
//! - [`types`] - Domain records

pub mod config;
pub mod error;
pub mod observability;
pub mod storage;
pub mod token;
pub mod types;

pub use config::{ConfigError, LoggingConfig, SigningConfig, TokenServiceConfig};
pub use error::{AuthError, ErrorCategory, UnauthorizedCode};
pub use storage::{
    IdentityRepository, PrivilegeCacheService, ResourceRepository, TokenRepository,
    TokenUnitOfWork,
};
pub use token::{
    JwtTokenManager, Permission, TokenCleanupTask, TokenLifecycleService, TokenManager, TokenSet,
    TokenStatus,
};
pub use types::{Identity, PrivilegeCache, Token, TokenPrivilege, TokenType, User};

/// Type alias for engine results.
pub type AuthResult<T> = Result<T, AuthError>;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use warden_auth::prelude::*;
/// ```
pub mod prelude {
    pub use crate::AuthResult;
    pub use crate::config::{ConfigError, TokenServiceConfig};
    pub use crate::error::{AuthError, ErrorCategory, UnauthorizedCode};
    pub use crate::storage::{
        IdentityRepository, PrivilegeCacheService, ResourceRepository, TokenRepository,
        TokenUnitOfWork,
    };
    pub use crate::token::{
        JwtTokenManager, ParsedToken, Permission, TokenCleanupTask, TokenClaims,
        TokenLifecycleService, TokenManager, TokenPair, TokenSet, TokenStatus,
    };
    pub use crate::types::{Identity, PrivilegeCache, Token, TokenPrivilege, TokenType, User};
}
