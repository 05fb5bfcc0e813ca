//! Storage and collaborator traits used by the token engine.
//!
//! This module defines interfaces for:
//!
//! - Persisted tokens and their privilege rows (with units of work)
//! - Identities and their users
//! - Protected resources
//! - The privilege cache
//!
//! # Implementations
//!
//! Implementations are provided in separate crates:
//!
//! - `warden-auth-memory` - In-memory collaborators
//! - `warden-auth-postgres` - PostgreSQL token repository

pub mod identity;
pub mod privilege_cache;
pub mod resource;
pub mod token;

pub use identity::IdentityRepository;
pub use privilege_cache::PrivilegeCacheService;
pub use resource::ResourceRepository;
pub use token::{TokenRepository, TokenUnitOfWork};
