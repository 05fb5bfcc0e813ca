//! JWT-backed token manager.
//!
//! [`JwtTokenManager`] is the default [`TokenManager`] implementation. It
//! signs with a shared HMAC secret (HS256) or an RSA key pair (RS256, RS384)
//! loaded from PEM, and validates issuer, audience and expiry on every parse.
//!
//! ## Example
//!
//! ```ignore
//! use warden_auth::config::TokenServiceConfig;
//! use warden_auth::token::jwt::JwtTokenManager;
//!
//! let manager = JwtTokenManager::from_config(&config)?;
//! let access = manager.generate_access_token(identity_id, &[])?;
//! let claims = manager.parse_token(&access)?;
//! ```

use std::fmt;
use std::time::Duration;

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::config::{SigningConfig, TokenServiceConfig};
use crate::token::claims::{
    ParsedToken, Permission, TOKEN_TYP_BEARER, TOKEN_TYP_REFRESH, TokenClaims, TokenPair,
    TokenSet, UnsignedToken,
};
use crate::token::manager::TokenManager;
use crate::types::Identity;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during JWT operations.
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    /// Failed to encode a token.
    #[error("Failed to encode token: {message}")]
    EncodingError {
        /// Description of the encoding error.
        message: String,
    },

    /// Failed to decode a token.
    #[error("Failed to decode token: {message}")]
    DecodingError {
        /// Description of the decoding error.
        message: String,
    },

    /// The token has expired.
    #[error("Token expired")]
    Expired,

    /// The token signature is invalid.
    #[error("Invalid signature")]
    InvalidSignature,

    /// The token claims are invalid.
    #[error("Invalid claims: {message}")]
    InvalidClaims {
        /// Description of why claims are invalid.
        message: String,
    },

    /// A required claim is missing.
    #[error("Missing required claim: {claim}")]
    MissingClaim {
        /// Name of the missing claim.
        claim: String,
    },

    /// Invalid key format or data.
    #[error("Invalid key: {message}")]
    InvalidKey {
        /// Description of why the key is invalid.
        message: String,
    },
}

impl JwtError {
    /// Creates a new `EncodingError`.
    #[must_use]
    pub fn encoding_error(message: impl Into<String>) -> Self {
        Self::EncodingError {
            message: message.into(),
        }
    }

    /// Creates a new `DecodingError`.
    #[must_use]
    pub fn decoding_error(message: impl Into<String>) -> Self {
        Self::DecodingError {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidClaims` error.
    #[must_use]
    pub fn invalid_claims(message: impl Into<String>) -> Self {
        Self::InvalidClaims {
            message: message.into(),
        }
    }

    /// Creates a new `MissingClaim` error.
    #[must_use]
    pub fn missing_claim(claim: impl Into<String>) -> Self {
        Self::MissingClaim {
            claim: claim.into(),
        }
    }

    /// Creates a new `InvalidKey` error.
    #[must_use]
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            message: message.into(),
        }
    }

    /// Returns `true` if this is a validation error (expired, invalid signature, etc.).
    #[must_use]
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            Self::Expired | Self::InvalidSignature | Self::InvalidClaims { .. }
        )
    }
}

impl From<jsonwebtoken::errors::Error> for JwtError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::InvalidSignature => Self::InvalidSignature,
            ErrorKind::InvalidAudience
            | ErrorKind::InvalidIssuer
            | ErrorKind::InvalidSubject
            | ErrorKind::ImmatureSignature => Self::invalid_claims(err.to_string()),
            ErrorKind::MissingRequiredClaim(claim) => Self::missing_claim(claim.clone()),
            ErrorKind::InvalidRsaKey(_)
            | ErrorKind::InvalidEcdsaKey
            | ErrorKind::InvalidKeyFormat => Self::invalid_key(err.to_string()),
            _ => Self::decoding_error(err.to_string()),
        }
    }
}

// ============================================================================
// Signing Algorithm
// ============================================================================

/// Supported signing algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SigningAlgorithm {
    /// HMAC with SHA-256 over a shared secret.
    #[default]
    HS256,
    /// RSA with SHA-256.
    RS256,
    /// RSA with SHA-384.
    RS384,
}

impl SigningAlgorithm {
    /// Converts to the `jsonwebtoken` Algorithm type.
    #[must_use]
    pub fn to_jwt_algorithm(self) -> Algorithm {
        match self {
            Self::HS256 => Algorithm::HS256,
            Self::RS256 => Algorithm::RS256,
            Self::RS384 => Algorithm::RS384,
        }
    }

    /// Returns the algorithm name as used in JWT headers.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HS256 => "HS256",
            Self::RS256 => "RS256",
            Self::RS384 => "RS384",
        }
    }

    /// Returns `true` if this is an RSA-based algorithm.
    #[must_use]
    pub fn is_rsa(&self) -> bool {
        matches!(self, Self::RS256 | Self::RS384)
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Signing Keys
// ============================================================================

/// Keys used to sign and verify tokens.
pub struct SigningKeys {
    /// Key ID placed in the `kid` header, if any.
    pub kid: Option<String>,

    /// Signing algorithm.
    pub algorithm: SigningAlgorithm,

    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl SigningKeys {
    /// Creates HS256 keys from a shared secret.
    ///
    /// # Errors
    /// Returns an error if the secret is empty.
    pub fn from_secret(secret: &[u8]) -> Result<Self, JwtError> {
        if secret.is_empty() {
            return Err(JwtError::invalid_key("HMAC secret must not be empty"));
        }

        Ok(Self {
            kid: None,
            algorithm: SigningAlgorithm::HS256,
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
        })
    }

    /// Loads RSA keys from PEM strings.
    ///
    /// # Arguments
    /// * `algorithm` - Signing algorithm (must be RSA-based)
    /// * `private_pem` - PEM-encoded private key
    /// * `public_pem` - PEM-encoded public key
    ///
    /// # Errors
    /// Returns an error if the algorithm is not RSA-based or the PEM data is invalid.
    pub fn from_rsa_pem(
        algorithm: SigningAlgorithm,
        private_pem: &str,
        public_pem: &str,
    ) -> Result<Self, JwtError> {
        if !algorithm.is_rsa() {
            return Err(JwtError::invalid_key(format!(
                "Algorithm {} is not RSA-based",
                algorithm
            )));
        }

        let encoding_key = EncodingKey::from_rsa_pem(private_pem.as_bytes())
            .map_err(|e| JwtError::invalid_key(e.to_string()))?;
        let decoding_key = DecodingKey::from_rsa_pem(public_pem.as_bytes())
            .map_err(|e| JwtError::invalid_key(e.to_string()))?;

        Ok(Self {
            kid: None,
            algorithm,
            encoding_key,
            decoding_key,
        })
    }

    /// Builds keys from the signing section of the service configuration.
    ///
    /// # Errors
    /// Returns an error if the material required by the algorithm is missing or invalid.
    pub fn from_config(config: &SigningConfig) -> Result<Self, JwtError> {
        let mut keys = if config.algorithm.is_rsa() {
            let private_pem = config
                .private_key_pem
                .as_deref()
                .ok_or_else(|| JwtError::invalid_key("signing.private_key_pem is not set"))?;
            let public_pem = config
                .public_key_pem
                .as_deref()
                .ok_or_else(|| JwtError::invalid_key("signing.public_key_pem is not set"))?;
            Self::from_rsa_pem(config.algorithm, private_pem, public_pem)?
        } else {
            let secret = config
                .secret
                .as_deref()
                .ok_or_else(|| JwtError::invalid_key("signing.secret is not set"))?;
            Self::from_secret(secret.as_bytes())?
        };
        keys.kid = config.key_id.clone();
        Ok(keys)
    }

    fn header(&self) -> Header {
        let mut header = Header::new(self.algorithm.to_jwt_algorithm());
        header.kid = self.kid.clone();
        header
    }
}

// ============================================================================
// JWT Token Manager
// ============================================================================

/// Token manager that issues and verifies JWTs.
///
/// This type is `Send + Sync` and is usually shared as `Arc<dyn TokenManager>`.
pub struct JwtTokenManager {
    keys: SigningKeys,
    issuer: String,
    audience: Vec<String>,
    access_token_lifetime: Duration,
    refresh_token_lifetime: Duration,
}

impl JwtTokenManager {
    /// Creates a new token manager.
    ///
    /// # Arguments
    /// * `keys` - Keys used for signing and verification
    /// * `issuer` - The `iss` claim written and required on parse
    /// * `audience` - The `aud` claim written and required on parse (not checked when empty)
    #[must_use]
    pub fn new(keys: SigningKeys, issuer: impl Into<String>, audience: Vec<String>) -> Self {
        Self {
            keys,
            issuer: issuer.into(),
            audience,
            access_token_lifetime: Duration::from_secs(3600),
            refresh_token_lifetime: Duration::from_secs(30 * 24 * 3600),
        }
    }

    /// Sets the access and refresh token lifetimes.
    #[must_use]
    pub fn with_lifetimes(mut self, access: Duration, refresh: Duration) -> Self {
        self.access_token_lifetime = access;
        self.refresh_token_lifetime = refresh;
        self
    }

    /// Creates a token manager from the service configuration.
    ///
    /// # Errors
    /// Returns an error if the signing keys cannot be built.
    pub fn from_config(config: &TokenServiceConfig) -> Result<Self, JwtError> {
        let keys = SigningKeys::from_config(&config.signing)?;
        Ok(
            Self::new(keys, config.issuer.clone(), config.audience.clone()).with_lifetimes(
                config.access_token_lifetime,
                config.refresh_token_lifetime,
            ),
        )
    }

    /// Returns the issuer.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Issues a signed access token for an identity.
    ///
    /// The token is an RPT when `permissions` is non-empty.
    ///
    /// # Errors
    /// Returns an error if encoding fails.
    pub fn generate_access_token(
        &self,
        identity_id: Uuid,
        permissions: &[Permission],
    ) -> Result<String, JwtError> {
        let claims = self.new_claims(
            identity_id.to_string(),
            TOKEN_TYP_BEARER,
            self.access_token_lifetime,
            permissions,
        );
        self.encode(&claims)
    }

    /// Issues a signed refresh token for an identity.
    ///
    /// # Errors
    /// Returns an error if encoding fails.
    pub fn generate_refresh_token(&self, identity_id: Uuid) -> Result<String, JwtError> {
        let claims = self.new_claims(
            identity_id.to_string(),
            TOKEN_TYP_REFRESH,
            self.refresh_token_lifetime,
            &[],
        );
        self.encode(&claims)
    }

    /// Issues a fresh access and refresh token pair for an identity.
    ///
    /// # Errors
    /// Returns an error if encoding fails.
    pub fn generate_user_token(
        &self,
        identity_id: Uuid,
        permissions: &[Permission],
    ) -> Result<TokenPair, JwtError> {
        Ok(TokenPair {
            access_token: self.generate_access_token(identity_id, permissions)?,
            refresh_token: self.generate_refresh_token(identity_id)?,
            token_type: TOKEN_TYP_BEARER.to_string(),
        })
    }

    fn new_claims(
        &self,
        sub: String,
        typ: &str,
        lifetime: Duration,
        permissions: &[Permission],
    ) -> TokenClaims {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        TokenClaims {
            jti: Uuid::new_v4().to_string(),
            sub,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            exp: now.saturating_add(duration_secs(lifetime)),
            iat: now,
            typ: Some(typ.to_string()),
            azp: None,
            session_state: None,
            permissions: (!permissions.is_empty()).then(|| permissions.to_vec()),
            transient: None,
        }
    }

    fn encode(&self, claims: &TokenClaims) -> Result<String, JwtError> {
        encode(&self.keys.header(), claims, &self.keys.encoding_key)
            .map_err(|e| JwtError::encoding_error(e.to_string()))
    }

    fn validation(&self, validate_exp: bool) -> Validation {
        let mut validation = Validation::new(self.keys.algorithm.to_jwt_algorithm());
        validation.set_issuer(&[&self.issuer]);
        validation.validate_exp = validate_exp;
        if validate_exp {
            validation.set_required_spec_claims(&["exp"]);
        } else {
            validation.set_required_spec_claims::<&str>(&[]);
        }
        if self.audience.is_empty() {
            validation.validate_aud = false;
        } else {
            validation.set_audience(self.audience.as_slice());
        }
        validation
    }

    fn decode<T: DeserializeOwned>(&self, token: &str, validate_exp: bool) -> Result<T, JwtError> {
        decode::<T>(token, &self.keys.decoding_key, &self.validation(validate_exp))
            .map(|data| data.claims)
            .map_err(JwtError::from)
    }
}

impl TokenManager for JwtTokenManager {
    fn parse_token(&self, token: &str) -> Result<TokenClaims, JwtError> {
        self.decode(token, true)
    }

    fn generate_unsigned_rpt_token(
        &self,
        source: &TokenClaims,
        identity: &Identity,
        permissions: &[Permission],
    ) -> Result<UnsignedToken, JwtError> {
        let claims = TokenClaims {
            jti: Uuid::new_v4().to_string(),
            sub: identity.id.to_string(),
            iss: source.iss.clone(),
            aud: source.aud.clone(),
            exp: source.exp,
            iat: OffsetDateTime::now_utc().unix_timestamp(),
            typ: Some(TOKEN_TYP_BEARER.to_string()),
            azp: source.azp.clone(),
            session_state: source.session_state.clone(),
            permissions: Some(permissions.to_vec()),
            transient: None,
        };

        Ok(UnsignedToken {
            header: self.keys.header(),
            claims,
        })
    }

    fn sign_rpt_token(&self, token: &UnsignedToken) -> Result<String, JwtError> {
        encode(&token.header, &token.claims, &self.keys.encoding_key)
            .map_err(|e| JwtError::encoding_error(e.to_string()))
    }

    fn generate_user_token_using_refresh_token(
        &self,
        refresh_token: &str,
        identity: Option<&Identity>,
        permissions: &[Permission],
    ) -> Result<TokenPair, JwtError> {
        let refresh: TokenClaims = self.decode(refresh_token, true)?;
        if !refresh.is_refresh() {
            return Err(JwtError::invalid_claims("token is not a refresh token"));
        }

        let sub = match identity {
            Some(identity) => identity.id.to_string(),
            None if !refresh.sub.is_empty() => refresh.sub.clone(),
            None => return Err(JwtError::missing_claim("sub")),
        };

        let mut access = self.new_claims(
            sub.clone(),
            TOKEN_TYP_BEARER,
            self.access_token_lifetime,
            permissions,
        );
        access.azp = refresh.azp.clone();
        access.session_state = refresh.session_state.clone();

        let mut next_refresh =
            self.new_claims(sub, TOKEN_TYP_REFRESH, self.refresh_token_lifetime, &[]);
        next_refresh.azp = refresh.azp;
        next_refresh.session_state = refresh.session_state;

        Ok(TokenPair {
            access_token: self.encode(&access)?,
            refresh_token: self.encode(&next_refresh)?,
            token_type: TOKEN_TYP_BEARER.to_string(),
        })
    }

    fn convert_token(&self, pair: &TokenPair) -> Result<TokenSet, JwtError> {
        let access: TokenClaims = self.decode(&pair.access_token, false)?;
        let refresh: TokenClaims = self.decode(&pair.refresh_token, false)?;
        let now = OffsetDateTime::now_utc().unix_timestamp();

        Ok(TokenSet {
            access_token: pair.access_token.clone(),
            expires_in: access.exp.saturating_sub(now).max(0),
            refresh_token: pair.refresh_token.clone(),
            refresh_expires_in: refresh.exp.saturating_sub(now).max(0),
            token_type: pair.token_type.clone(),
            not_before_policy: 0,
        })
    }

    fn parse(&self, token: &str) -> Result<ParsedToken, JwtError> {
        let claims: Map<String, Value> = self.decode(token, true)?;
        Ok(ParsedToken {
            raw: token.to_string(),
            claims,
        })
    }
}

fn duration_secs(duration: Duration) -> i64 {
    i64::try_from(duration.as_secs()).unwrap_or(i64::MAX)
}

// ============================================================================
// Tests
// ============================================================================
