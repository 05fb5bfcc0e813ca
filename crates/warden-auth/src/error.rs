//! Token lifecycle error types.
//!
//! The engine reports four kinds of failure: malformed input
//! ([`AuthError::BadParameter`]), refused access ([`AuthError::Unauthorized`],
//! carrying an [`UnauthorizedCode`]), missing records on required lookups
//! ([`AuthError::NotFound`]) and wrapped collaborator failures
//! ([`AuthError::Internal`]).

use std::fmt;

/// Placeholder used instead of a raw token string in error values.
pub const REDACTED: &str = "<redacted>";

/// Distinguishes the reasons an operation was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnauthorizedCode {
    /// Ownership or authentication failure without a more specific reason.
    Unauthorized,
    /// The identity's user has been banned.
    IdentityBanned,
    /// The token carries the `DEPROVISIONED` flag.
    TokenDeprovisioned,
    /// The token carries the `REVOKED` or `LOGGED_OUT` flag.
    TokenRevoked,
}

impl UnauthorizedCode {
    /// Returns the machine-readable code.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::IdentityBanned => "identity_banned",
            Self::TokenDeprovisioned => "token_deprovisioned",
            Self::TokenRevoked => "token_revoked",
        }
    }
}

impl fmt::Display for UnauthorizedCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors that can occur during token lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// A caller-supplied value is malformed or refers to nothing.
    #[error("Bad parameter '{parameter}' ({value}): {message}")]
    BadParameter {
        /// Name of the offending parameter.
        parameter: String,
        /// The offending value, redacted for token strings.
        value: String,
        /// Description of the problem.
        message: String,
    },

    /// The caller is not allowed to use the token or identity.
    #[error("Unauthorized ({code}): {message}")]
    Unauthorized {
        /// Reason for the refusal.
        code: UnauthorizedCode,
        /// Human-readable description.
        message: String,
    },

    /// A required record does not exist.
    #[error("{entity} with id '{id}' not found")]
    NotFound {
        /// Kind of record that was looked up.
        entity: String,
        /// Identifier that was looked up.
        id: String,
    },

    /// A collaborator or infrastructure failure.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the failure.
        message: String,
    },
}

impl AuthError {
    /// Creates a new `BadParameter` error.
    #[must_use]
    pub fn bad_parameter(
        parameter: impl Into<String>,
        value: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::BadParameter {
            parameter: parameter.into(),
            value: value.into(),
            message: message.into(),
        }
    }

    /// Creates a plain `Unauthorized` error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::unauthorized_with_code(UnauthorizedCode::Unauthorized, message)
    }

    /// Creates an `Unauthorized` error with a specific code.
    #[must_use]
    pub fn unauthorized_with_code(code: UnauthorizedCode, message: impl Into<String>) -> Self {
        Self::Unauthorized {
            code,
            message: message.into(),
        }
    }

    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(entity: impl Into<String>, id: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` for `NotFound`.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` for `Unauthorized`, whatever its code.
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }

    /// Returns the unauthorized code, if this is an `Unauthorized` error.
    #[must_use]
    pub fn unauthorized_code(&self) -> Option<UnauthorizedCode> {
        match self {
            Self::Unauthorized { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Returns `true` if the caller caused the error.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::BadParameter { .. } | Self::Unauthorized { .. } | Self::NotFound { .. }
        )
    }

    /// Returns `true` if infrastructure caused the error.
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::BadParameter { .. } => ErrorCategory::Validation,
            Self::Unauthorized { .. } => ErrorCategory::Authorization,
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }
}

impl From<crate::token::jwt::JwtError> for AuthError {
    fn from(err: crate::token::jwt::JwtError) -> Self {
        Self::internal(err.to_string())
    }
}

/// Categories of errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Malformed input.
    Validation,
    /// Refused access.
    Authorization,
    /// Missing record.
    NotFound,
    /// Infrastructure failure.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::Authorization => write!(f, "authorization"),
            Self::NotFound => write!(f, "not_found"),
            Self::Internal => write!(f, "internal"),
        }
    }
}
