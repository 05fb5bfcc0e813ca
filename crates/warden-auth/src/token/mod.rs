//! Token parsing, minting and lifecycle management.
//!
//! This module provides:
//!
//! - Token status flags
//! - JWT claims and the signing token manager
//! - Privilege migration into new RPTs
//! - The lifecycle engine and its periodic cleanup

pub mod claims;
pub mod cleanup;
pub mod jwt;
pub mod manager;
pub mod migration;
pub mod service;
pub mod status;

pub use claims::{
    ParsedToken, Permission, TOKEN_TYP_BEARER, TOKEN_TYP_REFRESH, TokenClaims, TokenPair, TokenSet,
    UnsignedToken,
};
pub use cleanup::{TokenCleanupHandle, TokenCleanupTask};
pub use jwt::{JwtError, JwtTokenManager, SigningAlgorithm, SigningKeys};
pub use manager::TokenManager;
pub use migration::{PrivilegeMigration, scopes_equivalent};
pub use service::{DEFAULT_RETENTION_HOURS, DEFAULT_RPT_MAX_PERMISSIONS, TokenLifecycleService};
pub use status::TokenStatus;
