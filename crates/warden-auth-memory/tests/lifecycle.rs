//! Token lifecycle behaviour over the in-memory collaborators.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration as StdDuration;

use time::{Duration, OffsetDateTime};
use uuid::Uuid;
use warden_auth::error::UnauthorizedCode;
use warden_auth::storage::{PrivilegeCacheService, TokenRepository};
use warden_auth::token::jwt::{JwtError, SigningKeys};
use warden_auth::token::{
    JwtTokenManager, ParsedToken, Permission, TokenClaims, TokenCleanupTask,
    TokenLifecycleService, TokenManager, TokenPair, TokenSet, TokenStatus, UnsignedToken,
};
use warden_auth::types::{Identity, Token, TokenPrivilege, TokenType, User};
use warden_auth_memory::MemoryBackend;

/// Delegates to a real manager and counts refresh exchanges.
///
/// With `reuse_access_token` set, refresh exchanges hand back the access
/// token in both slots of the pair.
struct CountingTokenManager {
    inner: JwtTokenManager,
    refresh_generations: AtomicUsize,
    reuse_access_token: AtomicBool,
}

impl TokenManager for CountingTokenManager {
    fn parse_token(&self, token: &str) -> Result<TokenClaims, JwtError> {
        self.inner.parse_token(token)
    }

    fn generate_unsigned_rpt_token(
        &self,
        source: &TokenClaims,
        identity: &Identity,
        permissions: &[Permission],
    ) -> Result<UnsignedToken, JwtError> {
        self.inner
            .generate_unsigned_rpt_token(source, identity, permissions)
    }

    fn sign_rpt_token(&self, token: &UnsignedToken) -> Result<String, JwtError> {
        self.inner.sign_rpt_token(token)
    }

    fn generate_user_token_using_refresh_token(
        &self,
        refresh_token: &str,
        identity: Option<&Identity>,
        permissions: &[Permission],
    ) -> Result<TokenPair, JwtError> {
        self.refresh_generations.fetch_add(1, Ordering::SeqCst);
        let mut pair = self.inner.generate_user_token_using_refresh_token(
            refresh_token,
            identity,
            permissions,
        )?;
        if self.reuse_access_token.load(Ordering::SeqCst) {
            pair.refresh_token = pair.access_token.clone();
        }
        Ok(pair)
    }

    fn convert_token(&self, pair: &TokenPair) -> Result<TokenSet, JwtError> {
        self.inner.convert_token(pair)
    }

    fn parse(&self, token: &str) -> Result<ParsedToken, JwtError> {
        self.inner.parse(token)
    }
}

struct Harness {
    backend: MemoryBackend,
    manager: Arc<CountingTokenManager>,
    service: Arc<TokenLifecycleService>,
    identity: Identity,
}

impl Harness {
    fn new(max_permissions: usize) -> Self {
        let keys = SigningKeys::from_secret(b"lifecycle-test-secret").unwrap();
        let manager = Arc::new(CountingTokenManager {
            inner: JwtTokenManager::new(
                keys,
                "https://auth.example.com",
                vec!["https://api.example.com".to_string()],
            ),
            refresh_generations: AtomicUsize::new(0),
            reuse_access_token: AtomicBool::new(false),
        });

        let backend = MemoryBackend::new();
        let service = Arc::new(
            backend
                .service(manager.clone())
                .with_max_permissions(max_permissions),
        );

        let identity = Identity::new(Uuid::new_v4(), "alice").with_user(User {
            id: Uuid::new_v4(),
            banned: false,
            deprovisioned: false,
        });
        backend.identities.insert(identity.clone());

        Self {
            backend,
            manager,
            service,
            identity,
        }
    }

    fn resource(&self, resource_id: &str, scopes: &[&str]) {
        self.backend.resources.insert(resource_id);
        self.backend
            .privilege_cache
            .grant(self.identity.id, resource_id, scopes.iter().copied());
    }

    async fn access_token(&self) -> String {
        let token = self
            .manager
            .inner
            .generate_access_token(self.identity.id, &[])
            .unwrap();
        self.service
            .register_token(self.identity.id, &token, TokenType::Access, &[])
            .await
            .unwrap();
        token
    }

    async fn refresh_token(&self) -> String {
        let token = self
            .manager
            .inner
            .generate_refresh_token(self.identity.id)
            .unwrap();
        self.service
            .register_token(self.identity.id, &token, TokenType::Refresh, &[])
            .await
            .unwrap();
        token
    }

    async fn audit(&self, token: &str, resource_id: &str) -> Option<String> {
        self.service
            .audit(&self.identity, token, resource_id)
            .await
            .unwrap()
    }

    fn claims(&self, token: &str) -> TokenClaims {
        self.manager.parse_token(token).unwrap()
    }

    async fn record(&self, token: &str) -> Token {
        let token_id = self.claims(token).token_id().unwrap();
        self.backend.tokens.load(token_id).await.unwrap()
    }

    async fn insert_token(&self, expiry_time: OffsetDateTime) -> Uuid {
        let token = Token::new(
            Uuid::new_v4(),
            self.identity.id,
            TokenType::Access,
            expiry_time,
        );
        let mut tx = self.backend.tokens.begin().await.unwrap();
        tx.create(&token).await.unwrap();
        tx.commit().await.unwrap();
        token.token_id
    }
}

fn resource_ids(claims: &TokenClaims) -> Vec<&str> {
    claims
        .permissions()
        .iter()
        .map(|p| p.resource_set_id.as_str())
        .collect()
}

#[tokio::test]
async fn audit_mints_rpt_with_live_scopes_and_one_privilege_row() {
    let h = Harness::new(10);
    h.resource("invoice", &["view", "pay"]);
    let access = h.access_token().await;

    let rpt = h.audit(&access, "invoice").await.expect("new RPT");

    let claims = h.claims(&rpt);
    let live = h
        .backend
        .privilege_cache
        .snapshot(
            h.backend
                .tokens
                .privilege_rows(claims.token_id().unwrap())
                .await[0]
                .privilege_cache_id,
        )
        .unwrap();
    assert_eq!(resource_ids(&claims), ["invoice"]);
    assert_eq!(claims.permissions()[0].scopes, live.scopes);
    assert_eq!(live.scopes, ["view", "pay"]);

    let record = h.record(&rpt).await;
    assert_eq!(record.token_type, TokenType::Rpt);
    assert_eq!(
        h.backend.tokens.privilege_rows(record.token_id).await.len(),
        1
    );
}

#[tokio::test]
async fn audit_returns_none_when_token_embeds_resource() {
    let h = Harness::new(10);
    h.resource("invoice", &["view"]);
    let access = h.access_token().await;
    let rpt = h.audit(&access, "invoice").await.unwrap();

    assert!(h.audit(&rpt, "invoice").await.is_none());
}

#[tokio::test]
async fn audit_rejects_deprovisioned_token() {
    let h = Harness::new(10);
    h.resource("invoice", &["view"]);
    let access = h.access_token().await;
    let rpt = h.audit(&access, "invoice").await.unwrap();

    h.service
        .set_status_for_all_identity_tokens(h.identity.id, TokenStatus::DEPROVISIONED)
        .await
        .unwrap();

    for resource in ["invoice", "other"] {
        h.resource(resource, &["view"]);
        let err = h
            .service
            .audit(&h.identity, &rpt, resource)
            .await
            .unwrap_err();
        assert_eq!(
            err.unauthorized_code(),
            Some(UnauthorizedCode::TokenDeprovisioned)
        );
    }
}

#[tokio::test]
async fn stale_token_with_unchanged_privileges_is_revalidated() {
    let h = Harness::new(10);
    h.resource("invoice", &["view"]);
    h.resource("order", &["view", "edit"]);
    let access = h.access_token().await;
    let rpt = h.audit(&access, "invoice").await.unwrap();
    let rpt = h.audit(&rpt, "order").await.unwrap();

    h.service
        .set_status_for_all_identity_tokens(h.identity.id, TokenStatus::STALE)
        .await
        .unwrap();
    h.backend.privilege_cache.mark_stale(h.identity.id);

    assert!(h.audit(&rpt, "order").await.is_none());
    assert!(h.record(&rpt).await.valid());
}

#[tokio::test]
async fn stale_token_with_changed_scopes_mints() {
    let h = Harness::new(10);
    h.resource("invoice", &["view"]);
    let access = h.access_token().await;
    let rpt = h.audit(&access, "invoice").await.unwrap();

    h.service
        .set_status_for_all_identity_tokens(h.identity.id, TokenStatus::STALE)
        .await
        .unwrap();
    h.resource("invoice", &["view", "refund"]);

    let minted = h.audit(&rpt, "invoice").await.expect("new RPT");
    let claims = h.claims(&minted);
    assert_eq!(claims.permissions()[0].scopes, ["view", "refund"]);
    assert!(h.record(&minted).await.valid());
    assert!(!h.record(&rpt).await.valid());
}

#[tokio::test]
async fn stale_token_with_extra_persisted_privilege_mints() {
    let h = Harness::new(10);
    h.resource("invoice", &["view"]);
    h.resource("order", &["view"]);
    let access = h.access_token().await;
    let rpt = h.audit(&access, "invoice").await.unwrap();
    let token_id = h.claims(&rpt).token_id().unwrap();

    // Persisted rows now outnumber the embedded permissions
    let extra = h
        .backend
        .privilege_cache
        .cached_privileges(h.identity.id, "order")
        .await
        .unwrap();
    let mut tx = h.backend.tokens.begin().await.unwrap();
    tx.create_privilege(&TokenPrivilege::new(token_id, extra.privilege_cache_id))
        .await
        .unwrap();
    tx.commit().await.unwrap();
    assert_eq!(h.backend.tokens.privilege_rows(token_id).await.len(), 2);

    h.service
        .set_status_for_all_identity_tokens(h.identity.id, TokenStatus::STALE)
        .await
        .unwrap();

    let minted = h.audit(&rpt, "invoice").await.expect("new RPT");
    assert_ne!(minted, rpt);
    assert!(resource_ids(&h.claims(&minted)).contains(&"invoice"));
    assert!(h.record(&minted).await.valid());
}

#[tokio::test]
async fn twelve_historical_privileges_are_capped_at_five() {
    let h = Harness::new(5);
    let access = h.access_token().await;

    // Build up history one resource at a time with a roomy engine
    let roomy = h.backend.service(h.manager.clone()).with_max_permissions(20);
    let mut token = access;
    for i in 1..=12 {
        let resource = format!("r{i:02}");
        h.resource(&resource, &["view"]);
        token = roomy
            .audit(&h.identity, &token, &resource)
            .await
            .unwrap()
            .unwrap();
    }
    assert_eq!(h.claims(&token).permissions().len(), 12);

    h.resource("requested", &["view"]);
    let minted = h.audit(&token, "requested").await.unwrap();
    let claims = h.claims(&minted);

    assert_eq!(claims.permissions().len(), 5);
    let ids = resource_ids(&claims);
    assert_eq!(ids[0], "requested");

    // The four latest-expiring snapshots, which are the most recently computed
    let history = h
        .backend
        .tokens
        .list_privileges(h.claims(&token).token_id().unwrap())
        .await
        .unwrap();
    let mut expected = history.clone();
    expected.sort_by(|a, b| b.expiry_time.cmp(&a.expiry_time));
    let expected: Vec<&str> = expected[..4].iter().map(|p| p.resource_id.as_str()).collect();
    assert_eq!(&ids[1..], expected.as_slice());
}

#[tokio::test]
async fn audited_resource_is_never_duplicated() {
    let h = Harness::new(10);
    h.resource("a", &["view"]);
    h.resource("b", &["view"]);
    let access = h.access_token().await;
    let rpt = h.audit(&access, "a").await.unwrap();
    let rpt = h.audit(&rpt, "b").await.unwrap();

    // Scope change forces a new mint for a resource already embedded
    h.service
        .set_status_for_all_identity_tokens(h.identity.id, TokenStatus::STALE)
        .await
        .unwrap();
    h.resource("a", &["view", "edit"]);
    let minted = h.audit(&rpt, "a").await.unwrap();

    let claims = h.claims(&minted);
    let mut ids = resource_ids(&claims);
    ids.sort_unstable();
    assert_eq!(ids, ["a", "b"]);
}

#[tokio::test]
async fn banned_identity_refresh_never_generates_tokens() {
    let h = Harness::new(10);
    let refresh = h.refresh_token().await;
    assert!(h.backend.identities.set_banned(h.identity.id, true));

    let err = h
        .service
        .exchange_refresh_token(&refresh, "")
        .await
        .unwrap_err();
    assert_eq!(
        err.unauthorized_code(),
        Some(UnauthorizedCode::IdentityBanned)
    );
    assert_eq!(h.manager.refresh_generations.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn refresh_exchange_carries_rpt_permissions() {
    let h = Harness::new(10);
    h.resource("invoice", &["view"]);
    let access = h.access_token().await;
    let rpt = h.audit(&access, "invoice").await.unwrap();
    let refresh = h.refresh_token().await;

    let set = h
        .service
        .exchange_refresh_token(&refresh, &rpt)
        .await
        .unwrap();

    let claims = h.claims(&set.access_token);
    assert_eq!(resource_ids(&claims), ["invoice"]);
    assert_eq!(h.record(&set.access_token).await.token_type, TokenType::Rpt);
    assert_eq!(
        h.record(&set.refresh_token).await.token_type,
        TokenType::Refresh
    );
    assert_eq!(h.manager.refresh_generations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_refresh_registration_leaves_nothing_behind() {
    let h = Harness::new(10);
    let refresh = h.refresh_token().await;
    h.manager.reuse_access_token.store(true, Ordering::SeqCst);
    let before = h.backend.tokens.len().await;

    // The second create collides with the first inside the same unit of work
    let err = h
        .service
        .exchange_refresh_token(&refresh, "")
        .await
        .unwrap_err();

    assert!(err.is_server_error());
    assert!(err.to_string().contains("already exists"));
    assert_eq!(h.manager.refresh_generations.load(Ordering::SeqCst), 1);
    assert_eq!(h.backend.tokens.len().await, before);
}

#[tokio::test]
async fn refresh_exchange_rejects_revoked_rpt() {
    let h = Harness::new(10);
    h.resource("invoice", &["view"]);
    let access = h.access_token().await;
    let rpt = h.audit(&access, "invoice").await.unwrap();

    h.service
        .set_status_for_all_identity_tokens(h.identity.id, TokenStatus::LOGGED_OUT)
        .await
        .unwrap();

    // The refresh token is registered after the bulk change, so it stays valid
    let refresh = h.refresh_token().await;
    let err = h
        .service
        .exchange_refresh_token(&refresh, &rpt)
        .await
        .unwrap_err();
    assert_eq!(err.unauthorized_code(), Some(UnauthorizedCode::TokenRevoked));
}

#[tokio::test]
async fn cleanup_is_idempotent() {
    let h = Harness::new(10);
    let live = h.access_token().await;
    let now = OffsetDateTime::now_utc();
    h.insert_token(now - Duration::seconds(1)).await;
    h.insert_token(now - Duration::days(3)).await;

    assert_eq!(h.service.cleanup_expired_tokens(0).await.unwrap(), 2);
    assert_eq!(h.service.cleanup_expired_tokens(0).await.unwrap(), 0);
    assert!(h.record(&live).await.valid());
}

#[tokio::test]
async fn cleanup_task_runs_and_shuts_down() {
    let h = Harness::new(10);
    h.insert_token(OffsetDateTime::now_utc() - Duration::days(2))
        .await;

    let handle =
        TokenCleanupTask::new(h.service.clone(), StdDuration::from_secs(3600), 24).start();

    let mut remaining = h.backend.tokens.len().await;
    for _ in 0..50 {
        if remaining == 0 {
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        remaining = h.backend.tokens.len().await;
    }
    assert_eq!(remaining, 0);

    handle.shutdown().await;
}

#[tokio::test]
async fn validate_token_touches_last_active() {
    let h = Harness::new(10);
    let access = h.access_token().await;
    let parsed = h.manager.parse(&access).unwrap();

    h.service.validate_token(&parsed).await.unwrap();
    assert!(
        h.backend
            .identities
            .get(h.identity.id)
            .unwrap()
            .last_active
            .is_some()
    );

    h.service
        .set_status_for_all_identity_tokens(h.identity.id, TokenStatus::REVOKED)
        .await
        .unwrap();
    assert!(h.service.validate_token(&parsed).await.unwrap_err().is_unauthorized());

    h.service
        .set_status_for_all_identity_tokens(h.identity.id, TokenStatus::VALID)
        .await
        .unwrap();
    h.service.validate_token(&parsed).await.unwrap();
}
