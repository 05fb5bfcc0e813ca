//! Token repository for PostgreSQL.
//!
//! Reads run on the pool. A unit of work wraps one database transaction;
//! sqlx rolls the transaction back when it is dropped without `commit`.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use sqlx_postgres::PgTransaction;
use time::OffsetDateTime;
use tracing::instrument;
use uuid::Uuid;
use warden_auth::AuthResult;
use warden_auth::storage::{TokenRepository, TokenUnitOfWork};
use warden_auth::token::TokenStatus;
use warden_auth::types::{PrivilegeCache, Token, TokenPrivilege, TokenType};

use crate::{PgPool, StorageError, StorageResult};

// =============================================================================
// Rows
// =============================================================================

type TokenTuple = (Uuid, Uuid, i32, String, OffsetDateTime);

type PrivilegeCacheTuple = (Uuid, Uuid, String, Vec<String>, OffsetDateTime, bool);

fn token_from_row(row: TokenTuple) -> StorageResult<Token> {
    let (token_id, identity_id, status, token_type, expiry_time) = row;
    Ok(Token {
        token_id,
        identity_id,
        status: status_from_db(status)?,
        token_type: TokenType::from_str(&token_type)
            .map_err(|e| StorageError::invalid_input(e.to_string()))?,
        expiry_time,
    })
}

fn privilege_cache_from_row(row: PrivilegeCacheTuple) -> PrivilegeCache {
    let (privilege_cache_id, identity_id, resource_id, scopes, expiry_time, stale) = row;
    PrivilegeCache {
        privilege_cache_id,
        identity_id,
        resource_id,
        scopes,
        expiry_time,
        stale,
    }
}

fn status_from_db(value: i32) -> StorageResult<TokenStatus> {
    u32::try_from(value)
        .map(TokenStatus::from_bits)
        .map_err(|_| StorageError::invalid_input(format!("negative token status {value}")))
}

fn status_to_db(status: TokenStatus) -> StorageResult<i32> {
    i32::try_from(status.bits())
        .map_err(|_| StorageError::invalid_input(format!("token status {status} out of range")))
}

/// Foreign key from `token_privilege` to `token`.
const TOKEN_FK: &str = "token_privilege_token_fk";

/// Foreign key from `token_privilege` to `privilege_cache`.
const PRIVILEGE_CACHE_FK: &str = "token_privilege_privilege_cache_fk";

fn map_insert_error(err: sqlx_core::Error, token_id: Uuid) -> StorageError {
    match err.as_database_error() {
        Some(db) if db.is_unique_violation() => {
            StorageError::conflict(format!("token {token_id} already exists"))
        }
        _ => StorageError::Database(err),
    }
}

fn map_privilege_insert_error(
    err: sqlx_core::Error,
    privilege: &TokenPrivilege,
) -> StorageError {
    match err.as_database_error() {
        Some(db) if db.is_foreign_key_violation() => {
            missing_reference(db.constraint(), privilege)
        }
        _ => StorageError::Database(err),
    }
}

/// Names the row a privilege insert referenced but did not find.
fn missing_reference(constraint: Option<&str>, privilege: &TokenPrivilege) -> StorageError {
    match constraint {
        Some(TOKEN_FK) => StorageError::not_found("token", privilege.token_id),
        Some(PRIVILEGE_CACHE_FK) => {
            StorageError::not_found("privilege_cache", privilege.privilege_cache_id)
        }
        other => StorageError::invalid_input(format!(
            "token privilege ({}, {}) violates foreign key {}",
            privilege.token_id,
            privilege.privilege_cache_id,
            other.unwrap_or("<unnamed>")
        )),
    }
}

// =============================================================================
// Token Repository
// =============================================================================

/// PostgreSQL [`TokenRepository`].
#[derive(Debug, Clone)]
pub struct PgTokenRepository {
    pool: Arc<PgPool>,
}

impl PgTokenRepository {
    /// Create a new repository with a shared connection pool.
    #[must_use]
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Insert or replace a privilege snapshot so tokens can reference it.
    ///
    /// # Errors
    ///
    /// Returns an error if the database write fails.
    #[instrument(skip(self, snapshot), fields(privilege_cache_id = %snapshot.privilege_cache_id))]
    pub async fn save_privilege_snapshot(&self, snapshot: &PrivilegeCache) -> StorageResult<()> {
        query(
            r#"
            INSERT INTO privilege_cache
                (privilege_cache_id, identity_id, resource_id, scopes, expiry_time, stale)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (privilege_cache_id) DO UPDATE SET
                scopes = EXCLUDED.scopes,
                expiry_time = EXCLUDED.expiry_time,
                stale = EXCLUDED.stale
            "#,
        )
        .bind(snapshot.privilege_cache_id)
        .bind(snapshot.identity_id)
        .bind(&snapshot.resource_id)
        .bind(&snapshot.scopes)
        .bind(snapshot.expiry_time)
        .bind(snapshot.stale)
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    /// Mark every privilege snapshot of an identity stale.
    ///
    /// # Returns
    ///
    /// Returns the number of snapshots marked.
    ///
    /// # Errors
    ///
    /// Returns an error if the database update fails.
    #[instrument(skip(self))]
    pub async fn mark_privileges_stale(&self, identity_id: Uuid) -> StorageResult<u64> {
        let result = query("UPDATE privilege_cache SET stale = TRUE WHERE identity_id = $1")
            .bind(identity_id)
            .execute(self.pool.as_ref())
            .await?;

        Ok(result.rows_affected())
    }

    async fn load_row(&self, token_id: Uuid) -> StorageResult<Token> {
        let row: Option<TokenTuple> = query_as(
            r#"
            SELECT token_id, identity_id, status, token_type, expiry_time
            FROM token
            WHERE token_id = $1
            "#,
        )
        .bind(token_id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        row.map(token_from_row)
            .transpose()?
            .ok_or_else(|| StorageError::not_found("token", token_id))
    }

    async fn privilege_rows(&self, token_id: Uuid) -> StorageResult<Vec<PrivilegeCache>> {
        let rows: Vec<PrivilegeCacheTuple> = query_as(
            r#"
            SELECT pc.privilege_cache_id, pc.identity_id, pc.resource_id,
                   pc.scopes, pc.expiry_time, pc.stale
            FROM token_privilege tp
            JOIN privilege_cache pc ON pc.privilege_cache_id = tp.privilege_cache_id
            WHERE tp.token_id = $1
            "#,
        )
        .bind(token_id)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(rows.into_iter().map(privilege_cache_from_row).collect())
    }

    async fn identity_rows(&self, identity_id: Uuid) -> StorageResult<Vec<Token>> {
        let rows: Vec<TokenTuple> = query_as(
            r#"
            SELECT token_id, identity_id, status, token_type, expiry_time
            FROM token
            WHERE identity_id = $1
            ORDER BY expiry_time DESC
            "#,
        )
        .bind(identity_id)
        .fetch_all(self.pool.as_ref())
        .await?;

        rows.into_iter().map(token_from_row).collect()
    }
}

#[async_trait]
impl TokenRepository for PgTokenRepository {
    #[instrument(skip(self))]
    async fn load(&self, token_id: Uuid) -> AuthResult<Token> {
        Ok(self.load_row(token_id).await?)
    }

    #[instrument(skip(self))]
    async fn list_privileges(&self, token_id: Uuid) -> AuthResult<Vec<PrivilegeCache>> {
        Ok(self.privilege_rows(token_id).await?)
    }

    #[instrument(skip(self))]
    async fn list_for_identity(&self, identity_id: Uuid) -> AuthResult<Vec<Token>> {
        Ok(self.identity_rows(identity_id).await?)
    }

    async fn begin(&self) -> AuthResult<Box<dyn TokenUnitOfWork>> {
        let tx = self.pool.begin().await.map_err(StorageError::from)?;
        Ok(Box::new(PgTokenUnitOfWork { tx }))
    }
}

// =============================================================================
// Unit of Work
// =============================================================================

/// Unit of work backed by one PostgreSQL transaction.
pub struct PgTokenUnitOfWork {
    tx: PgTransaction<'static>,
}

impl PgTokenUnitOfWork {
    async fn insert_token(&mut self, token: &Token) -> StorageResult<()> {
        query(
            r#"
            INSERT INTO token (token_id, identity_id, status, token_type, expiry_time)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(token.token_id)
        .bind(token.identity_id)
        .bind(status_to_db(token.status)?)
        .bind(token.token_type.as_str())
        .bind(token.expiry_time)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_insert_error(e, token.token_id))?;

        Ok(())
    }

    async fn update_token(&mut self, token: &Token) -> StorageResult<()> {
        let result = query(
            r#"
            UPDATE token
            SET status = $2, token_type = $3, expiry_time = $4
            WHERE token_id = $1
            "#,
        )
        .bind(token.token_id)
        .bind(status_to_db(token.status)?)
        .bind(token.token_type.as_str())
        .bind(token.expiry_time)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::not_found("token", token.token_id));
        }
        Ok(())
    }

    async fn delete_token(&mut self, token_id: Uuid) -> StorageResult<()> {
        let result = query("DELETE FROM token WHERE token_id = $1")
            .bind(token_id)
            .execute(&mut *self.tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::not_found("token", token_id));
        }
        Ok(())
    }

    async fn insert_privilege(&mut self, privilege: &TokenPrivilege) -> StorageResult<()> {
        query(
            r#"
            INSERT INTO token_privilege (token_id, privilege_cache_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(privilege.token_id)
        .bind(privilege.privilege_cache_id)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_privilege_insert_error(e, privilege))?;

        Ok(())
    }

    async fn update_identity_status(
        &mut self,
        identity_id: Uuid,
        status: TokenStatus,
    ) -> StorageResult<u64> {
        let result = query("UPDATE token SET status = $2 WHERE identity_id = $1")
            .bind(identity_id)
            .bind(status_to_db(status)?)
            .execute(&mut *self.tx)
            .await?;

        Ok(result.rows_affected())
    }

    async fn delete_expired(&mut self, retention_hours: u32) -> StorageResult<u64> {
        let hours = i32::try_from(retention_hours)
            .map_err(|_| StorageError::invalid_input("retention_hours out of range"))?;

        let result = query(
            r#"
            DELETE FROM token
            WHERE expiry_time <= NOW() - make_interval(hours => $1)
            "#,
        )
        .bind(hours)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl TokenUnitOfWork for PgTokenUnitOfWork {
    async fn create(&mut self, token: &Token) -> AuthResult<()> {
        Ok(self.insert_token(token).await?)
    }

    async fn save(&mut self, token: &Token) -> AuthResult<()> {
        Ok(self.update_token(token).await?)
    }

    async fn delete(&mut self, token_id: Uuid) -> AuthResult<()> {
        Ok(self.delete_token(token_id).await?)
    }

    async fn create_privilege(&mut self, privilege: &TokenPrivilege) -> AuthResult<()> {
        Ok(self.insert_privilege(privilege).await?)
    }

    #[instrument(skip(self))]
    async fn set_status_flags_for_identity(
        &mut self,
        identity_id: Uuid,
        status: TokenStatus,
    ) -> AuthResult<u64> {
        Ok(self.update_identity_status(identity_id, status).await?)
    }

    #[instrument(skip(self))]
    async fn cleanup_expired_tokens(&mut self, retention_hours: u32) -> AuthResult<u64> {
        Ok(self.delete_expired(retention_hours).await?)
    }

    async fn commit(self: Box<Self>) -> AuthResult<()> {
        self.tx.commit().await.map_err(StorageError::from)?;
        tracing::debug!("Transaction committed successfully");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> AuthResult<()> {
        self.tx.rollback().await.map_err(StorageError::from)?;
        tracing::debug!("Transaction rolled back successfully");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_from_row() {
        let token_id = Uuid::new_v4();
        let identity_id = Uuid::new_v4();
        let expiry = OffsetDateTime::now_utc();

        let token = token_from_row((token_id, identity_id, 3, "RPT".to_string(), expiry)).unwrap();
        assert_eq!(token.token_id, token_id);
        assert_eq!(token.identity_id, identity_id);
        assert_eq!(token.token_type, TokenType::Rpt);
        assert!(token.has_status(TokenStatus::STALE));
        assert!(token.has_status(TokenStatus::REVOKED));
        assert_eq!(token.expiry_time, expiry);
    }

    #[test]
    fn test_token_from_row_rejects_bad_values() {
        let row = |status: i32, token_type: &str| {
            (
                Uuid::new_v4(),
                Uuid::new_v4(),
                status,
                token_type.to_string(),
                OffsetDateTime::now_utc(),
            )
        };

        assert!(matches!(
            token_from_row(row(0, "XYZ")),
            Err(StorageError::InvalidInput(_))
        ));
        assert!(matches!(
            token_from_row(row(-1, "ACC")),
            Err(StorageError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_missing_reference_names_failed_constraint() {
        let privilege = TokenPrivilege::new(Uuid::new_v4(), Uuid::new_v4());

        match missing_reference(Some(PRIVILEGE_CACHE_FK), &privilege) {
            StorageError::NotFound { entity, id } => {
                assert_eq!(entity, "privilege_cache");
                assert_eq!(id, privilege.privilege_cache_id.to_string());
            }
            other => panic!("unexpected error: {other}"),
        }

        match missing_reference(Some(TOKEN_FK), &privilege) {
            StorageError::NotFound { entity, id } => {
                assert_eq!(entity, "token");
                assert_eq!(id, privilege.token_id.to_string());
            }
            other => panic!("unexpected error: {other}"),
        }

        assert!(matches!(
            missing_reference(None, &privilege),
            StorageError::InvalidInput(_)
        ));
    }

    #[test]
    fn test_schema_names_foreign_keys() {
        assert!(crate::SCHEMA_SQL.contains(TOKEN_FK));
        assert!(crate::SCHEMA_SQL.contains(PRIVILEGE_CACHE_FK));
    }

    #[test]
    fn test_status_roundtrip() {
        let status = TokenStatus::LOGGED_OUT | TokenStatus::DEPROVISIONED;
        let stored = status_to_db(status).unwrap();
        assert_eq!(stored, 12);
        assert_eq!(status_from_db(stored).unwrap(), status);
    }
}
