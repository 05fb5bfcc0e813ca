//! Persisted token record.
//!
//! A [`Token`] is the server-side record of one issued credential. Its ID is
//! the `jti` claim of the signed token string, so a token presented by a
//! client can always be mapped back to its record.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::token::status::TokenStatus;

/// Kind of an issued token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenType {
    /// Plain access token without embedded permissions.
    #[serde(rename = "ACC")]
    Access,
    /// Refresh token.
    #[serde(rename = "REF")]
    Refresh,
    /// Requesting party token carrying permissions.
    #[serde(rename = "RPT")]
    Rpt,
}

impl TokenType {
    /// Returns the persisted representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Access => "ACC",
            Self::Refresh => "REF",
            Self::Rpt => "RPT",
        }
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when parsing an unknown token type string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown token type '{0}'")]
pub struct UnknownTokenType(pub String);

impl FromStr for TokenType {
    type Err = UnknownTokenType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACC" => Ok(Self::Access),
            "REF" => Ok(Self::Refresh),
            "RPT" => Ok(Self::Rpt),
            other => Err(UnknownTokenType(other.to_string())),
        }
    }
}

/// Server-side record of an issued token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Equal to the `jti` claim of the signed token.
    pub token_id: Uuid,

    /// Identity the token was issued to.
    pub identity_id: Uuid,

    /// Status flags.
    pub status: TokenStatus,

    /// Kind of token.
    pub token_type: TokenType,

    /// Expiry taken from the signed `exp` claim.
    #[serde(with = "time::serde::rfc3339")]
    pub expiry_time: OffsetDateTime,
}

impl Token {
    /// Creates a new token record with no status flags set.
    #[must_use]
    pub fn new(
        token_id: Uuid,
        identity_id: Uuid,
        token_type: TokenType,
        expiry_time: OffsetDateTime,
    ) -> Self {
        Self {
            token_id,
            identity_id,
            status: TokenStatus::VALID,
            token_type,
            expiry_time,
        }
    }

    /// Returns `true` when no status flag is set.
    #[must_use]
    pub fn valid(&self) -> bool {
        self.status.is_valid()
    }

    /// Returns `true` if the given flag is set.
    #[must_use]
    pub fn has_status(&self, flag: TokenStatus) -> bool {
        self.status.contains(flag)
    }
}

/// Association between a token and the privilege snapshot embedded in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenPrivilege {
    /// Owning token.
    pub token_id: Uuid,

    /// Privilege cache entry used when the permission was embedded.
    pub privilege_cache_id: Uuid,
}

impl TokenPrivilege {
    /// Creates a new association.
    #[must_use]
    pub fn new(token_id: Uuid, privilege_cache_id: Uuid) -> Self {
        Self {
            token_id,
            privilege_cache_id,
        }
    }
}
