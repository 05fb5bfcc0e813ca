//! Domain records shared by the engine and its storage backends.
//!
//! ## Domain Types
//!
//! - [`Token`] - Persisted record of an issued token
//! - [`TokenPrivilege`] - Privilege snapshot embedded in a token
//! - [`PrivilegeCache`] - Memoized scopes of an identity on a resource
//! - [`Identity`] - Owner of tokens

pub mod identity;
pub mod privilege;
pub mod token;

pub use identity::{Identity, User};
pub use privilege::PrivilegeCache;
pub use token::{Token, TokenPrivilege, TokenType, UnknownTokenType};
