//! Token lifecycle engine.
//!
//! [`TokenLifecycleService`] decides whether a presented token can keep being
//! used, re-verifies tokens whose privileges may be outdated, mints new RPTs
//! with a bounded set of migrated permissions, exchanges refresh tokens,
//! gates tokens on the request path and reclaims expired records.
//!
//! # Usage
//!
//! ```ignore
//! use warden_auth::token::TokenLifecycleService;
//!
//! let service = TokenLifecycleService::new(
//!     token_manager,
//!     token_repository,
//!     identity_repository,
//!     resource_repository,
//!     privilege_cache,
//! )
//! .with_config(&config);
//!
//! match service.audit(&identity, &token, "resource-id").await? {
//!     Some(rpt) => { /* hand the new RPT to the client */ }
//!     None => { /* the presented token already grants access */ }
//! }
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use time::OffsetDateTime;
use uuid::Uuid;

use crate::AuthResult;
use crate::config::TokenServiceConfig;
use crate::error::{AuthError, REDACTED, UnauthorizedCode};
use crate::storage::{
    IdentityRepository, PrivilegeCacheService, ResourceRepository, TokenRepository,
    TokenUnitOfWork,
};
use crate::token::claims::{ParsedToken, TokenClaims, TokenSet};
use crate::token::manager::TokenManager;
use crate::token::migration::{PrivilegeMigration, fetch_live, scopes_equivalent, to_permissions};
use crate::token::status::TokenStatus;
use crate::types::{Identity, PrivilegeCache, Token, TokenPrivilege, TokenType};

/// Default maximum number of permissions embedded in one RPT.
pub const DEFAULT_RPT_MAX_PERMISSIONS: usize = 10;

/// Default retention of expired tokens, in hours.
pub const DEFAULT_RETENTION_HOURS: u32 = 24;

/// Token lifecycle and RPT audit engine.
///
/// Holds only shared collaborators and immutable settings, so one instance can
/// serve concurrent requests.
pub struct TokenLifecycleService {
    /// Parses, mints and signs tokens.
    token_manager: Arc<dyn TokenManager>,

    /// Persisted tokens and their privilege rows.
    tokens: Arc<dyn TokenRepository>,

    /// Identities and their users.
    identities: Arc<dyn IdentityRepository>,

    /// Protected resources.
    resources: Arc<dyn ResourceRepository>,

    /// Live privilege snapshots.
    privilege_cache: Arc<dyn PrivilegeCacheService>,

    /// Upper bound on permissions embedded in a minted RPT.
    max_permissions: usize,

    /// Retention used by the periodic cleanup.
    retention_hours: u32,
}

impl TokenLifecycleService {
    /// Creates a new engine with default limits.
    #[must_use]
    pub fn new(
        token_manager: Arc<dyn TokenManager>,
        tokens: Arc<dyn TokenRepository>,
        identities: Arc<dyn IdentityRepository>,
        resources: Arc<dyn ResourceRepository>,
        privilege_cache: Arc<dyn PrivilegeCacheService>,
    ) -> Self {
        Self {
            token_manager,
            tokens,
            identities,
            resources,
            privilege_cache,
            max_permissions: DEFAULT_RPT_MAX_PERMISSIONS,
            retention_hours: DEFAULT_RETENTION_HOURS,
        }
    }

    /// Sets the maximum number of permissions per RPT (at least one).
    #[must_use]
    pub fn with_max_permissions(mut self, max_permissions: usize) -> Self {
        self.max_permissions = max_permissions.max(1);
        self
    }

    /// Sets the retention applied by the periodic cleanup.
    #[must_use]
    pub fn with_retention_hours(mut self, retention_hours: u32) -> Self {
        self.retention_hours = retention_hours;
        self
    }

    /// Applies the limits from the service configuration.
    #[must_use]
    pub fn with_config(self, config: &TokenServiceConfig) -> Self {
        self.with_max_permissions(config.rpt_max_permissions)
            .with_retention_hours(config.expired_token_retention_hours)
    }

    /// Returns the maximum number of permissions per RPT.
    #[must_use]
    pub fn max_permissions(&self) -> usize {
        self.max_permissions
    }

    /// Returns the configured retention of expired tokens, in hours.
    #[must_use]
    pub fn retention_hours(&self) -> u32 {
        self.retention_hours
    }

    /// Gets the token manager.
    #[must_use]
    pub fn token_manager(&self) -> &Arc<dyn TokenManager> {
        &self.token_manager
    }

    /// Audits a token against a resource.
    ///
    /// # Arguments
    ///
    /// * `identity` - The caller
    /// * `token_string` - The caller's current token
    /// * `resource_id` - The resource being accessed
    ///
    /// # Returns
    ///
    /// Returns `None` when the presented token can keep being used, or the
    /// signed replacement RPT when a new token was minted.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The resource does not exist (`BadParameter`)
    /// - The token cannot be parsed or has a malformed `jti` (`BadParameter`)
    /// - The token belongs to another identity (`Unauthorized`)
    /// - The token is deprovisioned, revoked or logged out (`Unauthorized`)
    /// - A collaborator fails (`Internal`, or the collaborator's error)
    #[tracing::instrument(skip_all, fields(identity_id = %identity.id, resource_id = %resource_id))]
    pub async fn audit(
        &self,
        identity: &Identity,
        token_string: &str,
        resource_id: &str,
    ) -> AuthResult<Option<String>> {
        // 1. The resource must exist
        if let Err(err) = self.resources.check_exists(resource_id).await {
            return Err(if err.is_not_found() {
                AuthError::bad_parameter("resource_id", resource_id, err.to_string())
            } else {
                err
            });
        }

        // 2. Parse the presented token
        let claims = self.token_manager.parse_token(token_string).map_err(|err| {
            tracing::error!(error = %err, "unable to parse token");
            AuthError::bad_parameter("token", REDACTED, err.to_string())
        })?;

        // 3. Look up its persisted record
        let token_id = claims
            .token_id()
            .map_err(|err| AuthError::bad_parameter("jti", claims.jti.clone(), err.to_string()))?;
        let token = self.load_optional(token_id).await?;

        if let Some(token) = &token {
            // 4. Ownership
            if token.identity_id != identity.id {
                return Err(AuthError::unauthorized("invalid token for identity"));
            }

            // 5. Nothing to do if the token is valid and already grants the resource
            let embedded = claims.resource_ids().contains(resource_id);
            if token.valid() && embedded {
                return Ok(None);
            }

            // 6-7. Terminal statuses
            check_usable(token)?;

            // 8. A stale token is revived if its privileges did not change
            if token.has_status(TokenStatus::STALE) && embedded {
                if !self.privileges_changed(identity.id, token.token_id, &claims).await? {
                    let mut revived = token.clone();
                    revived.status = TokenStatus::VALID;

                    let mut tx = self.tokens.begin().await?;
                    let result = tx.save(&revived).await;
                    finish(tx, result).await?;

                    tracing::debug!(token_id = %token.token_id, "stale token revalidated");
                    return Ok(None);
                }
                tracing::debug!(
                    token_id = %token.token_id,
                    "privileges changed, minting new token"
                );
            }
        }

        // 9. Mint a new RPT
        let signed = self
            .mint_rpt(identity, &claims, token.as_ref(), resource_id)
            .await?;
        Ok(Some(signed))
    }

    /// Exchanges a refresh token for a new token pair.
    ///
    /// When `rpt_token` is non-empty and the identity is known, the
    /// permissions of that RPT are carried into the new access token.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The refresh token is invalid or unknown (`Unauthorized`)
    /// - The identity is banned (`Unauthorized` with `IdentityBanned`)
    /// - The RPT is malformed, foreign, deprovisioned or revoked (`Unauthorized`)
    /// - Generation or persistence fails (`Internal`)
    #[tracing::instrument(skip_all)]
    pub async fn exchange_refresh_token(
        &self,
        refresh_token: &str,
        rpt_token: &str,
    ) -> AuthResult<TokenSet> {
        // 1. Verify the refresh token and its persisted record
        let parsed = self
            .token_manager
            .parse(refresh_token)
            .map_err(|err| AuthError::unauthorized(err.to_string()))?;
        self.validate_token(&parsed).await.map_err(|err| {
            if err.is_unauthorized() {
                err
            } else {
                AuthError::unauthorized(err.to_string())
            }
        })?;

        // 2. Resolve the identity; API-client tokens have none
        let subject = parsed
            .sub()
            .ok_or_else(|| AuthError::unauthorized("missing 'sub' claim in the refresh token"))?;
        let subject_id =
            Uuid::parse_str(subject).map_err(|err| AuthError::unauthorized(err.to_string()))?;

        let identity = match self.identities.load_with_user(subject_id).await {
            Ok(identity) => Some(identity),
            Err(err) if err.is_unauthorized() => return Err(err),
            Err(err) => {
                tracing::warn!(
                    identity_id = %subject_id,
                    error = %err,
                    "failed to load identity when refreshing token, proceeding as API client"
                );
                None
            }
        };

        // 3. Banned users get nothing
        if let Some(identity) = identity.as_ref().filter(|identity| identity.is_banned()) {
            tracing::warn!(
                identity_id = %identity.id,
                username = %identity.username,
                "banned user tried to refresh token"
            );
            return Err(AuthError::unauthorized_with_code(
                UnauthorizedCode::IdentityBanned,
                "unauthorized access",
            ));
        }

        // 4. Carry permissions over from the presented RPT
        let migrated = match &identity {
            Some(identity) if !rpt_token.is_empty() => {
                self.migrate_from_rpt(identity, rpt_token).await?
            }
            _ => Vec::new(),
        };
        let permissions = to_permissions(&migrated);

        // 5. Generate the new pair
        let pair = self.token_manager.generate_user_token_using_refresh_token(
            refresh_token,
            identity.as_ref(),
            &permissions,
        )?;

        // 6. Register both tokens together
        let owner = identity.as_ref().map_or(subject_id, |identity| identity.id);
        let access_type = if permissions.is_empty() {
            TokenType::Access
        } else {
            TokenType::Rpt
        };
        let privileges = privilege_rows(&migrated);

        let mut tx = self.tokens.begin().await?;
        let result = self
            .register_pair(
                tx.as_mut(),
                owner,
                (pair.access_token.as_str(), access_type, privileges.as_slice()),
                &pair.refresh_token,
            )
            .await;
        finish(tx, result).await?;

        // 7. Convert for the caller
        Ok(self.token_manager.convert_token(&pair)?)
    }

    /// Registers a newly signed token in its own unit of work.
    ///
    /// # Errors
    ///
    /// Returns `BadParameter` if the token cannot be parsed, or `Internal` if
    /// it cannot be persisted.
    #[tracing::instrument(skip_all, fields(identity_id = %identity_id, token_type = %token_type))]
    pub async fn register_token(
        &self,
        identity_id: Uuid,
        token_string: &str,
        token_type: TokenType,
        privileges: &[TokenPrivilege],
    ) -> AuthResult<Token> {
        let mut tx = self.tokens.begin().await?;
        let result = self
            .register_token_in(tx.as_mut(), identity_id, token_string, token_type, privileges)
            .await;
        finish(tx, result).await
    }

    /// Registers a newly signed token inside a caller-owned unit of work.
    ///
    /// The `token_id` of every privilege row is replaced with the new token's ID.
    ///
    /// # Errors
    ///
    /// Returns `BadParameter` if the token cannot be parsed, or `Internal` if
    /// it cannot be persisted.
    pub async fn register_token_in(
        &self,
        tx: &mut dyn TokenUnitOfWork,
        identity_id: Uuid,
        token_string: &str,
        token_type: TokenType,
        privileges: &[TokenPrivilege],
    ) -> AuthResult<Token> {
        let claims = self.token_manager.parse_token(token_string).map_err(|err| {
            tracing::error!(error = %err, "unable to parse token for registration");
            AuthError::bad_parameter("token", REDACTED, err.to_string())
        })?;
        let token_id = claims
            .token_id()
            .map_err(|err| AuthError::bad_parameter("jti", claims.jti.clone(), err.to_string()))?;
        let expiry_time = OffsetDateTime::from_unix_timestamp(claims.exp).map_err(|err| {
            AuthError::bad_parameter("exp", claims.exp.to_string(), err.to_string())
        })?;

        let token = Token::new(token_id, identity_id, token_type, expiry_time);
        tx.create(&token).await.map_err(|err| {
            tracing::error!(token_id = %token_id, error = %err, "unable to persist token");
            into_internal(err)
        })?;

        for privilege in privileges {
            let row = TokenPrivilege::new(token_id, privilege.privilege_cache_id);
            tx.create_privilege(&row).await.map_err(|err| {
                tracing::error!(
                    token_id = %token_id,
                    privilege_cache_id = %row.privilege_cache_id,
                    error = %err,
                    "unable to persist token privilege"
                );
                into_internal(err)
            })?;
        }

        Ok(token)
    }

    /// Gates a token on the request path.
    ///
    /// Unless the token is marked `transient`, the owning identity's
    /// last-active timestamp is refreshed.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `jti` or `sub` is missing or malformed (`BadParameter`)
    /// - The token record cannot be loaded (the repository's error, e.g. `NotFound`)
    /// - The token is not valid (`Unauthorized`)
    /// - The last-active timestamp cannot be updated (`Internal`)
    #[tracing::instrument(skip_all)]
    pub async fn validate_token(&self, parsed: &ParsedToken) -> AuthResult<()> {
        let jti = parsed
            .jti()
            .ok_or_else(|| AuthError::bad_parameter("jti", "", "missing 'jti' claim"))?;
        let token_id = Uuid::parse_str(jti)
            .map_err(|err| AuthError::bad_parameter("jti", jti, err.to_string()))?;

        let token = self.tokens.load(token_id).await?;
        if !token.valid() {
            tracing::info!(token_id = %token_id, status = %token.status, "token is not valid");
            check_usable(&token)?;
            return Err(AuthError::unauthorized(format!(
                "token status is {}",
                token.status.highest_priority()
            )));
        }

        let transient = parsed.transient().unwrap_or_else(|value| {
            tracing::error!(value = %value, "unable to parse 'transient' claim");
            false
        });
        if transient {
            return Ok(());
        }

        let sub = parsed
            .sub()
            .ok_or_else(|| AuthError::bad_parameter("sub", "", "missing 'sub' claim"))?;
        let identity_id = Uuid::parse_str(sub)
            .map_err(|err| AuthError::bad_parameter("sub", sub, err.to_string()))?;

        self.identities
            .touch_last_active(identity_id)
            .await
            .map_err(into_internal)
    }

    /// Overwrites the status of every token of an identity.
    ///
    /// Passing [`TokenStatus::VALID`] is the administrative reset that clears
    /// terminal flags.
    ///
    /// # Returns
    ///
    /// Returns the number of tokens updated.
    ///
    /// # Errors
    ///
    /// Returns the identity lookup error (including `NotFound`) or a storage error.
    #[tracing::instrument(skip_all, fields(identity_id = %identity_id, status = %status))]
    pub async fn set_status_for_all_identity_tokens(
        &self,
        identity_id: Uuid,
        status: TokenStatus,
    ) -> AuthResult<u64> {
        self.identities.check_exists(identity_id).await?;

        let tokens = self.tokens.list_for_identity(identity_id).await?;
        tracing::debug!(count = tokens.len(), "updating status of identity tokens");

        let mut tx = self.tokens.begin().await?;
        let result = tx.set_status_flags_for_identity(identity_id, status).await;
        let updated = finish(tx, result).await.inspect_err(|err| {
            tracing::error!(error = %err, "unable to update status values for identity");
        })?;

        tracing::debug!(updated, "identity token status updated");
        Ok(updated)
    }

    /// Deletes tokens that expired at least `retention_hours` ago.
    ///
    /// # Returns
    ///
    /// Returns the number of tokens deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the deletion fails; nothing is deleted in that case.
    #[tracing::instrument(skip_all, fields(retention_hours = retention_hours))]
    pub async fn cleanup_expired_tokens(&self, retention_hours: u32) -> AuthResult<u64> {
        let mut tx = self.tokens.begin().await?;
        let result = tx.cleanup_expired_tokens(retention_hours).await;
        let deleted = finish(tx, result).await.inspect_err(|err| {
            tracing::error!(error = %err, "unable to cleanup expired tokens");
        })?;

        tracing::debug!(deleted, "expired tokens cleaned up");
        Ok(deleted)
    }

    async fn load_optional(&self, token_id: Uuid) -> AuthResult<Option<Token>> {
        match self.tokens.load(token_id).await {
            Ok(token) => Ok(Some(token)),
            Err(err) if err.is_not_found() => {
                tracing::info!(token_id = %token_id, "token with specified id not found");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    async fn privileges_changed(
        &self,
        identity_id: Uuid,
        token_id: Uuid,
        claims: &TokenClaims,
    ) -> AuthResult<bool> {
        let persisted = self
            .tokens
            .list_privileges(token_id)
            .await
            .map_err(into_internal)?;
        let permissions = claims.permissions();

        if persisted.len() != permissions.len() {
            tracing::debug!(
                persisted = persisted.len(),
                embedded = permissions.len(),
                "privilege count changed"
            );
            return Ok(true);
        }

        let persisted_resources: HashSet<&str> =
            persisted.iter().map(|p| p.resource_id.as_str()).collect();

        for permission in permissions {
            let live = fetch_live(
                self.privilege_cache.as_ref(),
                identity_id,
                &permission.resource_set_id,
            )
            .await?;

            if !scopes_equivalent(&live.scopes, &permission.scopes) {
                tracing::debug!(
                    resource_id = %permission.resource_set_id,
                    old_scopes = ?permission.scopes,
                    new_scopes = ?live.scopes,
                    "scopes changed"
                );
                return Ok(true);
            }
            if !persisted_resources.contains(permission.resource_set_id.as_str()) {
                return Ok(true);
            }
        }

        Ok(false)
    }

    async fn mint_rpt(
        &self,
        identity: &Identity,
        claims: &TokenClaims,
        previous: Option<&Token>,
        resource_id: &str,
    ) -> AuthResult<String> {
        let mut tx = self.tokens.begin().await?;
        let result = self
            .mint_rpt_in(tx.as_mut(), identity, claims, previous, resource_id)
            .await;
        finish(tx, result).await
    }

    async fn mint_rpt_in(
        &self,
        tx: &mut dyn TokenUnitOfWork,
        identity: &Identity,
        claims: &TokenClaims,
        previous: Option<&Token>,
        resource_id: &str,
    ) -> AuthResult<String> {
        let requested = fetch_live(self.privilege_cache.as_ref(), identity.id, resource_id).await?;

        let history = match previous {
            Some(token) => self
                .tokens
                .list_privileges(token.token_id)
                .await
                .map_err(into_internal)?,
            None => Vec::new(),
        };

        let selected = PrivilegeMigration::new(
            self.privilege_cache.as_ref(),
            identity.id,
            self.max_permissions,
        )
        .migrate(vec![requested], history, false)
        .await?;

        let permissions = to_permissions(&selected);
        let unsigned = self
            .token_manager
            .generate_unsigned_rpt_token(claims, identity, &permissions)?;
        let signed = self.token_manager.sign_rpt_token(&unsigned)?;

        let token = self
            .register_token_in(
                tx,
                identity.id,
                &signed,
                TokenType::Rpt,
                &privilege_rows(&selected),
            )
            .await?;

        tracing::debug!(
            token_id = %token.token_id,
            permissions = permissions.len(),
            "minted RPT"
        );
        Ok(signed)
    }

    async fn migrate_from_rpt(
        &self,
        identity: &Identity,
        rpt_token: &str,
    ) -> AuthResult<Vec<PrivilegeCache>> {
        let claims = self.token_manager.parse_token(rpt_token).map_err(|err| {
            tracing::error!(error = %err, "invalid RPT token could not be parsed");
            AuthError::unauthorized("invalid RPT token could not be parsed")
        })?;
        let token_id = claims.token_id().map_err(|err| {
            tracing::error!(error = %err, "could not extract token ID from RPT token");
            AuthError::unauthorized("could not extract token ID from RPT token")
        })?;

        let Some(token) = self.load_optional(token_id).await? else {
            return Ok(Vec::new());
        };
        if token.identity_id != identity.id {
            return Err(AuthError::unauthorized("invalid token for identity"));
        }
        check_usable(&token)?;

        let history = self
            .tokens
            .list_privileges(token.token_id)
            .await
            .map_err(into_internal)?;

        PrivilegeMigration::new(
            self.privilege_cache.as_ref(),
            identity.id,
            self.max_permissions,
        )
        .migrate(Vec::new(), history, token.has_status(TokenStatus::STALE))
        .await
    }

    async fn register_pair(
        &self,
        tx: &mut dyn TokenUnitOfWork,
        identity_id: Uuid,
        access: (&str, TokenType, &[TokenPrivilege]),
        refresh_token: &str,
    ) -> AuthResult<()> {
        let (access_token, access_type, privileges) = access;
        self.register_token_in(tx, identity_id, access_token, access_type, privileges)
            .await?;
        self.register_token_in(tx, identity_id, refresh_token, TokenType::Refresh, &[])
            .await?;
        Ok(())
    }
}

/// Rejects tokens carrying a terminal status flag.
fn check_usable(token: &Token) -> AuthResult<()> {
    if token.has_status(TokenStatus::DEPROVISIONED) {
        tracing::info!(token_id = %token.token_id, "token is deprovisioned");
        return Err(AuthError::unauthorized_with_code(
            UnauthorizedCode::TokenDeprovisioned,
            "token banned",
        ));
    }
    if token.has_status(TokenStatus::REVOKED) || token.has_status(TokenStatus::LOGGED_OUT) {
        tracing::info!(token_id = %token.token_id, status = %token.status, "token is revoked");
        return Err(AuthError::unauthorized_with_code(
            UnauthorizedCode::TokenRevoked,
            "token revoked or logged out",
        ));
    }
    Ok(())
}

/// Privilege rows for the given snapshots; token IDs are filled in on registration.
fn privilege_rows(privileges: &[PrivilegeCache]) -> Vec<TokenPrivilege> {
    privileges
        .iter()
        .map(|p| TokenPrivilege::new(Uuid::nil(), p.privilege_cache_id))
        .collect()
}

fn into_internal(err: AuthError) -> AuthError {
    match err {
        AuthError::Internal { .. } => err,
        other => AuthError::internal(other.to_string()),
    }
}

/// Commits on success, rolls back on failure.
async fn finish<T>(tx: Box<dyn TokenUnitOfWork>, result: AuthResult<T>) -> AuthResult<T> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(error = %rollback_err, "unit of work rollback failed");
            }
            Err(err)
        }
    }
}
