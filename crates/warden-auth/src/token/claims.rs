//! Token claim types.
//!
//! [`TokenClaims`] is the typed view of a signed token used by the audit and
//! refresh paths. [`ParsedToken`] is the untyped view used on the request
//! path, where only a handful of claims (`jti`, `sub`, `transient`) matter.

use std::collections::HashSet;

use jsonwebtoken::Header;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// `typ` claim of access tokens and RPTs.
pub const TOKEN_TYP_BEARER: &str = "Bearer";

/// `typ` claim of refresh tokens.
pub const TOKEN_TYP_REFRESH: &str = "Refresh";

/// A per-resource grant embedded in an RPT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    /// Identifier of the resource the grant applies to.
    pub resource_set_id: String,

    /// Granted scope names.
    #[serde(default)]
    pub scopes: Vec<String>,

    /// Expiry of the grant (Unix timestamp).
    #[serde(rename = "exp")]
    pub expiry: i64,
}

impl Permission {
    /// Creates a new permission claim.
    #[must_use]
    pub fn new(resource_set_id: impl Into<String>, scopes: Vec<String>, expiry: i64) -> Self {
        Self {
            resource_set_id: resource_set_id.into(),
            scopes,
            expiry,
        }
    }
}

/// Claims carried by access tokens, refresh tokens and RPTs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// JWT ID; the persisted token's primary key.
    pub jti: String,

    /// Subject (identity ID).
    #[serde(default)]
    pub sub: String,

    /// Issuer.
    #[serde(default)]
    pub iss: String,

    /// Audience.
    #[serde(
        default,
        deserialize_with = "string_or_vec",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub aud: Vec<String>,

    /// Expiration time (Unix timestamp).
    pub exp: i64,

    /// Issued at (Unix timestamp).
    #[serde(default)]
    pub iat: i64,

    /// Token kind: `Bearer` or `Refresh`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,

    /// Authorized party (client ID).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azp: Option<String>,

    /// Login session the token belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_state: Option<String>,

    /// Embedded per-resource grants (RPTs only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Vec<Permission>>,

    /// Marks ephemeral, service-issued tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transient: Option<Value>,
}

impl TokenClaims {
    /// Parses the `jti` claim as a token ID.
    pub fn token_id(&self) -> Result<Uuid, uuid::Error> {
        Uuid::parse_str(&self.jti)
    }

    /// Returns the embedded permissions, empty for non-RPT tokens.
    #[must_use]
    pub fn permissions(&self) -> &[Permission] {
        self.permissions.as_deref().unwrap_or_default()
    }

    /// Returns the set of resource IDs embedded in the token.
    #[must_use]
    pub fn resource_ids(&self) -> HashSet<&str> {
        self.permissions()
            .iter()
            .map(|p| p.resource_set_id.as_str())
            .collect()
    }

    /// Returns `true` if this is a refresh token.
    #[must_use]
    pub fn is_refresh(&self) -> bool {
        self.typ.as_deref() == Some(TOKEN_TYP_REFRESH)
    }
}

fn string_or_vec<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(value) => vec![value],
        OneOrMany::Many(values) => values,
    })
}

/// A verified token with its claims left untyped.
#[derive(Debug, Clone)]
pub struct ParsedToken {
    /// The original token string.
    pub raw: String,

    /// All claims of the token.
    pub claims: Map<String, Value>,
}

impl ParsedToken {
    /// Returns a string claim, if present.
    #[must_use]
    pub fn claim_str(&self, name: &str) -> Option<&str> {
        self.claims.get(name).and_then(Value::as_str)
    }

    /// Returns the `jti` claim.
    #[must_use]
    pub fn jti(&self) -> Option<&str> {
        self.claim_str("jti")
    }

    /// Returns the `sub` claim.
    #[must_use]
    pub fn sub(&self) -> Option<&str> {
        self.claim_str("sub")
    }

    /// Interprets the `transient` claim.
    ///
    /// Accepts a JSON boolean or a string such as `"true"`. Returns
    /// `Ok(false)` when the claim is absent and `Err` with the raw value when
    /// it cannot be interpreted.
    pub fn transient(&self) -> Result<bool, String> {
        match self.claims.get("transient") {
            None | Some(Value::Null) => Ok(false),
            Some(Value::Bool(value)) => Ok(*value),
            Some(Value::String(value)) => match value.to_ascii_lowercase().as_str() {
                "true" | "1" | "t" => Ok(true),
                "false" | "0" | "f" => Ok(false),
                _ => Err(value.clone()),
            },
            Some(other) => Err(other.to_string()),
        }
    }
}

/// Claims and header of a token that has not been signed yet.
#[derive(Debug, Clone)]
pub struct UnsignedToken {
    /// JWT header, including the signing algorithm.
    pub header: Header,

    /// Claims to be signed.
    pub claims: TokenClaims,
}

/// A freshly generated access and refresh token pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    /// Signed access token (an RPT when permissions were embedded).
    pub access_token: String,

    /// Signed refresh token.
    pub refresh_token: String,

    /// Token type, always `Bearer`.
    pub token_type: String,
}

/// Token pair as returned to API callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    /// Signed access token.
    pub access_token: String,

    /// Seconds until the access token expires.
    pub expires_in: i64,

    /// Signed refresh token.
    pub refresh_token: String,

    /// Seconds until the refresh token expires.
    pub refresh_expires_in: i64,

    /// Token type, always `Bearer`.
    pub token_type: String,

    /// Not-before policy (Unix timestamp, 0 when unset).
    #[serde(rename = "not-before-policy")]
    pub not_before_policy: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn claims_with(permissions: Option<Vec<Permission>>) -> TokenClaims {
        TokenClaims {
            jti: Uuid::new_v4().to_string(),
            sub: Uuid::new_v4().to_string(),
            iss: "https://auth.example.com".to_string(),
            aud: vec!["https://api.example.com".to_string()],
            exp: 2_000_000_000,
            iat: 1_000_000_000,
            typ: Some(TOKEN_TYP_BEARER.to_string()),
            azp: None,
            session_state: None,
            permissions,
            transient: None,
        }
    }

    #[test]
    fn test_permission_wire_format() {
        let permission = Permission::new("res-1", vec!["read".to_string()], 1700000000);
        let value = serde_json::to_value(&permission).unwrap();
        assert_eq!(
            value,
            json!({"resource_set_id": "res-1", "scopes": ["read"], "exp": 1700000000})
        );
    }

    #[test]
    fn test_resource_ids() {
        let claims = claims_with(Some(vec![
            Permission::new("a", vec![], 1),
            Permission::new("b", vec![], 2),
        ]));
        let ids = claims.resource_ids();
        assert!(ids.contains("a"));
        assert!(ids.contains("b"));
        assert!(!ids.contains("c"));

        assert!(claims_with(None).resource_ids().is_empty());
        assert!(claims_with(None).permissions().is_empty());
    }

    #[test]
    fn test_token_id() {
        let claims = claims_with(None);
        assert!(claims.token_id().is_ok());

        let mut claims = claims_with(None);
        claims.jti = "not-a-uuid".to_string();
        assert!(claims.token_id().is_err());
    }

    #[test]
    fn test_audience_accepts_single_string() {
        let claims: TokenClaims = serde_json::from_value(json!({
            "jti": "x",
            "aud": "https://api.example.com",
            "exp": 10
        }))
        .unwrap();
        assert_eq!(claims.aud, vec!["https://api.example.com".to_string()]);
        assert!(claims.permissions.is_none());
    }

    #[test]
    fn test_transient_claim() {
        let mut parsed = ParsedToken {
            raw: String::new(),
            claims: Map::new(),
        };
        assert_eq!(parsed.transient(), Ok(false));

        parsed.claims.insert("transient".to_string(), json!("true"));
        assert_eq!(parsed.transient(), Ok(true));

        parsed.claims.insert("transient".to_string(), json!(false));
        assert_eq!(parsed.transient(), Ok(false));

        parsed.claims.insert("transient".to_string(), json!("maybe"));
        assert!(parsed.transient().is_err());
    }

    #[test]
    fn test_token_set_serialization() {
        let set = TokenSet {
            access_token: "a".to_string(),
            expires_in: 300,
            refresh_token: "r".to_string(),
            refresh_expires_in: 1800,
            token_type: "Bearer".to_string(),
            not_before_policy: 0,
        };
        let json = serde_json::to_value(&set).unwrap();
        assert_eq!(json["not-before-policy"], 0);
        assert_eq!(json["expires_in"], 300);
    }
}
