//! Identity and user records as seen by the token engine.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Account state of the user behind an identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// User ID.
    pub id: Uuid,

    /// Set when the user has been banned.
    #[serde(default)]
    pub banned: bool,

    /// Set when the user has been deprovisioned.
    #[serde(default)]
    pub deprovisioned: bool,
}

/// An identity tokens are issued to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Identity ID; the `sub` claim of its tokens.
    pub id: Uuid,

    /// Login name.
    pub username: String,

    /// Last time a token of this identity was used.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub last_active: Option<OffsetDateTime>,

    /// Owning user, when loaded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
}

impl Identity {
    /// Creates an identity without a user record.
    #[must_use]
    pub fn new(id: Uuid, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            last_active: None,
            user: None,
        }
    }

    /// Attaches the owning user.
    #[must_use]
    pub fn with_user(mut self, user: User) -> Self {
        self.user = Some(user);
        self
    }

    /// Returns `true` if the owning user is loaded and banned.
    #[must_use]
    pub fn is_banned(&self) -> bool {
        self.user.as_ref().is_some_and(|user| user.banned)
    }
}
