//! In-memory collaborators for the Warden token engine.
//!
//! Intended for tests and single-node development. Every store lives in
//! process memory and is lost on restart.
//!
//! # Example
//!
//! ```ignore
//! use warden_auth::JwtTokenManager;
//! use warden_auth_memory::MemoryBackend;
//!
//! let backend = MemoryBackend::new();
//! backend.resources.insert("invoice-42");
//! backend.privilege_cache.grant(identity.id, "invoice-42", ["view"]);
//!
//! let service = backend.service(Arc::new(JwtTokenManager::from_config(&config)?));
//! let rpt = service.audit(&identity, &token, "invoice-42").await?;
//! ```

pub mod identity;
pub mod privilege;
pub mod token;

use std::sync::Arc;

use warden_auth::{TokenLifecycleService, TokenManager};

pub use identity::{MemoryIdentityRepository, MemoryResourceRepository};
pub use privilege::{DEFAULT_SNAPSHOT_TTL, MemoryPrivilegeCache};
pub use token::{MemoryTokenRepository, MemoryTokenUnitOfWork};

/// All in-memory collaborators, wired to share the privilege cache.
#[derive(Clone)]
pub struct MemoryBackend {
    pub tokens: Arc<MemoryTokenRepository>,
    pub identities: Arc<MemoryIdentityRepository>,
    pub resources: Arc<MemoryResourceRepository>,
    pub privilege_cache: Arc<MemoryPrivilegeCache>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Creates empty stores.
    pub fn new() -> Self {
        let privilege_cache = Arc::new(MemoryPrivilegeCache::new());
        Self {
            tokens: Arc::new(MemoryTokenRepository::new(privilege_cache.clone())),
            identities: Arc::new(MemoryIdentityRepository::new()),
            resources: Arc::new(MemoryResourceRepository::new()),
            privilege_cache,
        }
    }

    /// Builds a lifecycle engine over these stores with default limits.
    pub fn service(&self, token_manager: Arc<dyn TokenManager>) -> TokenLifecycleService {
        TokenLifecycleService::new(
            token_manager,
            self.tokens.clone(),
            self.identities.clone(),
            self.resources.clone(),
            self.privilege_cache.clone(),
        )
    }
}
