//! In-memory token repository.
//!
//! Committed tables live behind a single `tokio::sync::RwLock`. A unit of work
//! stages its writes against a private copy of the tables and records them in
//! an operation log; `commit` replays the log against the tables as they are
//! at commit time and swaps the result in under the write lock. Dropping the
//! unit of work discards the log. Commits that remove tokens also prune the
//! privilege snapshots nothing references any more.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use time::{Duration, OffsetDateTime};
use tokio::sync::RwLock;
use uuid::Uuid;
use warden_auth::storage::{TokenRepository, TokenUnitOfWork};
use warden_auth::token::TokenStatus;
use warden_auth::types::{PrivilegeCache, Token, TokenPrivilege};
use warden_auth::{AuthError, AuthResult};

use crate::privilege::MemoryPrivilegeCache;

#[derive(Debug, Clone, Default)]
struct TokenTables {
    tokens: HashMap<Uuid, Token>,
    /// Privilege rows keyed by token ID.
    privileges: HashMap<Uuid, Vec<TokenPrivilege>>,
}

#[derive(Debug, Clone)]
enum Operation {
    Create(Token),
    Save(Token),
    Delete(Uuid),
    CreatePrivilege(TokenPrivilege),
    SetStatus {
        identity_id: Uuid,
        status: TokenStatus,
    },
    Cleanup {
        cutoff: OffsetDateTime,
    },
}

impl Operation {
    fn removes_tokens(&self) -> bool {
        matches!(self, Self::Delete(_) | Self::Cleanup { .. })
    }
}

impl TokenTables {
    fn referenced_snapshots(&self) -> HashSet<Uuid> {
        self.privileges
            .values()
            .flatten()
            .map(|row| row.privilege_cache_id)
            .collect()
    }

    /// Applies one operation. Either the whole operation applies or nothing does.
    fn apply(&mut self, op: &Operation) -> AuthResult<u64> {
        match op {
            Operation::Create(token) => {
                if self.tokens.contains_key(&token.token_id) {
                    return Err(AuthError::internal(format!(
                        "token {} already exists",
                        token.token_id
                    )));
                }
                self.tokens.insert(token.token_id, token.clone());
                Ok(1)
            }
            Operation::Save(token) => match self.tokens.get_mut(&token.token_id) {
                Some(existing) => {
                    *existing = token.clone();
                    Ok(1)
                }
                None => Err(AuthError::not_found("token", token.token_id)),
            },
            Operation::Delete(token_id) => {
                if self.tokens.remove(token_id).is_none() {
                    return Err(AuthError::not_found("token", token_id));
                }
                self.privileges.remove(token_id);
                Ok(1)
            }
            Operation::CreatePrivilege(privilege) => {
                if !self.tokens.contains_key(&privilege.token_id) {
                    return Err(AuthError::not_found("token", privilege.token_id));
                }
                self.privileges
                    .entry(privilege.token_id)
                    .or_default()
                    .push(*privilege);
                Ok(1)
            }
            Operation::SetStatus {
                identity_id,
                status,
            } => {
                let mut updated = 0;
                for token in self.tokens.values_mut() {
                    if token.identity_id == *identity_id {
                        token.status = *status;
                        updated += 1;
                    }
                }
                Ok(updated)
            }
            Operation::Cleanup { cutoff } => {
                let expired: Vec<Uuid> = self
                    .tokens
                    .values()
                    .filter(|token| token.expiry_time <= *cutoff)
                    .map(|token| token.token_id)
                    .collect();
                for token_id in &expired {
                    self.tokens.remove(token_id);
                    self.privileges.remove(token_id);
                }
                Ok(expired.len() as u64)
            }
        }
    }
}

/// In-memory [`TokenRepository`].
///
/// Privilege rows are resolved against the snapshots held by the shared
/// [`MemoryPrivilegeCache`].
#[derive(Clone)]
pub struct MemoryTokenRepository {
    tables: Arc<RwLock<TokenTables>>,
    privilege_cache: Arc<MemoryPrivilegeCache>,
}

impl MemoryTokenRepository {
    /// Creates an empty repository.
    pub fn new(privilege_cache: Arc<MemoryPrivilegeCache>) -> Self {
        Self {
            tables: Arc::new(RwLock::new(TokenTables::default())),
            privilege_cache,
        }
    }

    /// Returns the number of committed tokens.
    pub async fn len(&self) -> usize {
        self.tables.read().await.tokens.len()
    }

    /// Returns `true` if no token is committed.
    pub async fn is_empty(&self) -> bool {
        self.tables.read().await.tokens.is_empty()
    }

    /// Returns the committed privilege rows of a token.
    pub async fn privilege_rows(&self, token_id: Uuid) -> Vec<TokenPrivilege> {
        self.tables
            .read()
            .await
            .privileges
            .get(&token_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl TokenRepository for MemoryTokenRepository {
    async fn load(&self, token_id: Uuid) -> AuthResult<Token> {
        self.tables
            .read()
            .await
            .tokens
            .get(&token_id)
            .cloned()
            .ok_or_else(|| AuthError::not_found("token", token_id))
    }

    async fn list_privileges(&self, token_id: Uuid) -> AuthResult<Vec<PrivilegeCache>> {
        let rows = self.privilege_rows(token_id).await;
        Ok(rows
            .iter()
            .filter_map(|row| self.privilege_cache.snapshot(row.privilege_cache_id))
            .collect())
    }

    async fn list_for_identity(&self, identity_id: Uuid) -> AuthResult<Vec<Token>> {
        Ok(self
            .tables
            .read()
            .await
            .tokens
            .values()
            .filter(|token| token.identity_id == identity_id)
            .cloned()
            .collect())
    }

    async fn begin(&self) -> AuthResult<Box<dyn TokenUnitOfWork>> {
        Ok(Box::new(MemoryTokenUnitOfWork {
            tables: self.tables.clone(),
            privilege_cache: self.privilege_cache.clone(),
            working: None,
            log: Vec::new(),
        }))
    }
}

/// Unit of work of [`MemoryTokenRepository`].
pub struct MemoryTokenUnitOfWork {
    tables: Arc<RwLock<TokenTables>>,
    privilege_cache: Arc<MemoryPrivilegeCache>,
    /// Committed tables plus the staged writes, copied on first write.
    working: Option<TokenTables>,
    log: Vec<Operation>,
}

impl MemoryTokenUnitOfWork {
    async fn stage(&mut self, op: Operation) -> AuthResult<u64> {
        let working = match self.working.take() {
            Some(working) => working,
            None => self.tables.read().await.clone(),
        };
        let working = self.working.insert(working);
        let affected = working.apply(&op)?;
        self.log.push(op);
        Ok(affected)
    }
}

#[async_trait]
impl TokenUnitOfWork for MemoryTokenUnitOfWork {
    async fn create(&mut self, token: &Token) -> AuthResult<()> {
        self.stage(Operation::Create(token.clone())).await.map(|_| ())
    }

    async fn save(&mut self, token: &Token) -> AuthResult<()> {
        self.stage(Operation::Save(token.clone())).await.map(|_| ())
    }

    async fn delete(&mut self, token_id: Uuid) -> AuthResult<()> {
        self.stage(Operation::Delete(token_id)).await.map(|_| ())
    }

    async fn create_privilege(&mut self, privilege: &TokenPrivilege) -> AuthResult<()> {
        self.stage(Operation::CreatePrivilege(*privilege))
            .await
            .map(|_| ())
    }

    async fn set_status_flags_for_identity(
        &mut self,
        identity_id: Uuid,
        status: TokenStatus,
    ) -> AuthResult<u64> {
        self.stage(Operation::SetStatus {
            identity_id,
            status,
        })
        .await
    }

    async fn cleanup_expired_tokens(&mut self, retention_hours: u32) -> AuthResult<u64> {
        let cutoff = OffsetDateTime::now_utc() - Duration::hours(i64::from(retention_hours));
        self.stage(Operation::Cleanup { cutoff }).await
    }

    async fn commit(self: Box<Self>) -> AuthResult<()> {
        if self.log.is_empty() {
            return Ok(());
        }

        let mut tables = self.tables.write().await;
        let mut next = tables.clone();
        for op in &self.log {
            next.apply(op)?;
        }
        *tables = next;

        if self.log.iter().any(Operation::removes_tokens) {
            self.privilege_cache.prune(&tables.referenced_snapshots());
        }

        tracing::trace!(operations = self.log.len(), "unit of work committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> AuthResult<()> {
        tracing::trace!(operations = self.log.len(), "unit of work rolled back");
        Ok(())
    }
}
