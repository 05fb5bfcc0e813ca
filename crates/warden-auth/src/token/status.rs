//! Token status flags.
//!
//! A token's status is a set of independent flags persisted as an integer
//! bitmask. A token is usable only when no flag is set.
//!
//! | Flag            | Bit | Cleared by                      |
//! |-----------------|-----|---------------------------------|
//! | `STALE`         | 1   | audit, once privileges re-check |
//! | `REVOKED`       | 2   | administrative reset only       |
//! | `LOGGED_OUT`    | 4   | administrative reset only       |
//! | `DEPROVISIONED` | 8   | administrative reset only       |

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

/// Set of status flags carried by a persisted token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenStatus(u32);

impl TokenStatus {
    /// No flag set; the token may be used.
    pub const VALID: Self = Self(0);
    /// The privileges embedded in the token may be outdated.
    pub const STALE: Self = Self(1);
    /// The token was explicitly revoked.
    pub const REVOKED: Self = Self(2);
    /// The owning identity logged out.
    pub const LOGGED_OUT: Self = Self(4);
    /// The owning identity was deprovisioned (banned).
    pub const DEPROVISIONED: Self = Self(8);

    /// Flags in reporting priority order, highest first.
    const PRIORITY: [(Self, &'static str); 4] = [
        (Self::DEPROVISIONED, "DEPROVISIONED"),
        (Self::REVOKED, "REVOKED"),
        (Self::LOGGED_OUT, "LOGGED_OUT"),
        (Self::STALE, "STALE"),
    ];

    /// Reconstructs a status from its persisted bitmask.
    ///
    /// Unknown bits are kept so that a status written by a newer version
    /// still reads back as invalid.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Returns the persisted bitmask.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns `true` when no flag is set.
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 == 0
    }

    /// Returns `true` if every flag in `other` is set.
    ///
    /// `contains(VALID)` is only true for a valid status.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        if other.0 == 0 {
            self.0 == 0
        } else {
            self.0 & other.0 == other.0
        }
    }

    /// Sets the flags in `other`.
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// Clears the flags in `other`.
    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    /// Returns the single highest-priority flag that is set, or `VALID`.
    ///
    /// Unknown bits are reported as themselves when no known flag is set.
    #[must_use]
    pub fn highest_priority(self) -> Self {
        Self::PRIORITY
            .iter()
            .map(|(flag, _)| *flag)
            .find(|flag| self.contains(*flag))
            .unwrap_or(self)
    }
}

impl BitOr for TokenStatus {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for TokenStatus {
    fn bitor_assign(&mut self, rhs: Self) {
        self.insert(rhs);
    }
}

impl fmt::Display for TokenStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            return write!(f, "VALID");
        }

        let mut names: Vec<String> = Self::PRIORITY
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| (*name).to_string())
            .collect();

        let known = Self::PRIORITY.iter().fold(0u32, |acc, (flag, _)| acc | flag.0);
        let unknown = self.0 & !known;
        if unknown != 0 {
            names.push(format!("0x{unknown:x}"));
        }

        write!(f, "{}", names.join("|"))
    }
}
