//! PostgreSQL storage backend for the Warden token engine
//!
//! Provides persistent storage for:
//!
//! - Issued tokens (`token` table)
//! - Privilege snapshots embedded in tokens (`privilege_cache` table)
//! - The join between them (`token_privilege` table)
//!
//! The reference schema lives in `migrations/` and can be applied with
//! [`PostgresTokenStore::migrate`].
//!
//! # Example
//!
//! ```ignore
//! use warden_auth_postgres::PostgresTokenStore;
//!
//! let store = PostgresTokenStore::connect("postgres://localhost/warden").await?;
//! store.migrate().await?;
//!
//! let tokens = Arc::new(store.tokens());
//! let service = TokenLifecycleService::new(manager, tokens, identities, resources, cache);
//! ```

pub mod token;

use std::sync::Arc;

use sqlx_core::pool::Pool;
use sqlx_core::raw_sql::raw_sql;
use sqlx_postgres::Postgres;
use warden_auth::AuthError;

/// PostgreSQL connection pool type alias.
pub type PgPool = Pool<Postgres>;

pub use token::{PgTokenRepository, PgTokenUnitOfWork};

/// Reference schema for the token tables.
pub const SCHEMA_SQL: &str = include_str!("../migrations/0001_token_tables.sql");

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during token storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx_core::Error),

    /// Requested row was not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Row already exists (conflict).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A stored or supplied value could not be converted.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl StorageError {
    // -------------------------------------------------------------------------
    // Constructor Methods
    // -------------------------------------------------------------------------

    /// Create a `NotFound` error.
    #[must_use]
    pub fn not_found(entity: impl Into<String>, id: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Create a `Conflict` error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// Create an `InvalidInput` error.
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    // -------------------------------------------------------------------------
    // Predicate Methods
    // -------------------------------------------------------------------------

    /// Returns `true` if this is a `NotFound` error.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` if this is a `Conflict` error.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Returns `true` if this is a database error.
    #[must_use]
    pub fn is_database_error(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

impl From<StorageError> for AuthError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { entity, id } => AuthError::not_found(entity, id),
            other => AuthError::internal(other.to_string()),
        }
    }
}

// =============================================================================
// PostgreSQL Token Store
// =============================================================================

/// PostgreSQL storage backend for tokens.
#[derive(Debug, Clone)]
pub struct PostgresTokenStore {
    pool: Arc<PgPool>,
}

impl PostgresTokenStore {
    /// Create new storage with an existing connection pool.
    #[must_use]
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Create new storage by connecting to the database.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        use sqlx_core::pool::PoolOptions;
        let pool = PoolOptions::<Postgres>::new().connect(database_url).await?;
        Ok(Self::new(Arc::new(pool)))
    }

    /// Applies the reference schema. Safe to run repeatedly.
    ///
    /// # Errors
    ///
    /// Returns an error if a statement fails.
    pub async fn migrate(&self) -> StorageResult<()> {
        raw_sql(SCHEMA_SQL).execute(self.pool.as_ref()).await?;
        tracing::info!("Token schema applied");
        Ok(())
    }

    /// Get a reference to the connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Token repository sharing this store's pool.
    #[must_use]
    pub fn tokens(&self) -> PgTokenRepository {
        PgTokenRepository::new(Arc::clone(&self.pool))
    }
}
