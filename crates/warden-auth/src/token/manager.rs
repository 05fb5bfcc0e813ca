//! Token manager contract.

use crate::token::claims::{
    ParsedToken, Permission, TokenClaims, TokenPair, TokenSet, UnsignedToken,
};
use crate::token::jwt::JwtError;
use crate::types::Identity;

/// Parses, mints and signs tokens on behalf of the lifecycle engine.
///
/// Implementations hold only key material and configuration, so every method
/// is synchronous. The engine shares a manager as `Arc<dyn TokenManager>`.
pub trait TokenManager: Send + Sync {
    /// Verifies a signed token and returns its typed claims.
    ///
    /// # Errors
    ///
    /// Returns an error if the signature, issuer, audience or expiry check fails.
    fn parse_token(&self, token: &str) -> Result<TokenClaims, JwtError>;

    /// Builds RPT claims from an existing token's claims.
    ///
    /// The new claims keep the source token's session and expiry but carry a
    /// fresh `jti` and exactly `permissions`.
    ///
    /// # Errors
    ///
    /// Returns an error if the claims cannot be built.
    fn generate_unsigned_rpt_token(
        &self,
        source: &TokenClaims,
        identity: &Identity,
        permissions: &[Permission],
    ) -> Result<UnsignedToken, JwtError>;

    /// Signs claims produced by [`generate_unsigned_rpt_token`](Self::generate_unsigned_rpt_token).
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    fn sign_rpt_token(&self, token: &UnsignedToken) -> Result<String, JwtError>;

    /// Issues a new access and refresh token pair in exchange for a refresh token.
    ///
    /// # Arguments
    ///
    /// * `refresh_token` - The signed refresh token being exchanged
    /// * `identity` - The resolved identity, `None` for API-client tokens
    /// * `permissions` - Permissions to embed in the access token (may be empty)
    ///
    /// # Errors
    ///
    /// Returns an error if the refresh token is invalid or encoding fails.
    fn generate_user_token_using_refresh_token(
        &self,
        refresh_token: &str,
        identity: Option<&Identity>,
        permissions: &[Permission],
    ) -> Result<TokenPair, JwtError>;

    /// Converts a token pair into the representation returned to callers.
    ///
    /// # Errors
    ///
    /// Returns an error if either token cannot be decoded.
    fn convert_token(&self, pair: &TokenPair) -> Result<TokenSet, JwtError>;

    /// Verifies a signed token and returns its claims untyped.
    ///
    /// # Errors
    ///
    /// Returns an error if verification fails.
    fn parse(&self, token: &str) -> Result<ParsedToken, JwtError>;
}
