//! Value Objects for the Cointip Domain
//!
//! Immutable, validated domain primitives.
//! All value objects enforce invariants at construction time.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Domain errors for value object validation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    /// Username must be non-empty and platform-safe
    #[error("Invalid username: {0}")]
    InvalidUsername(String),

    /// Coin unit must be a non-empty identifier
    #[error("Invalid coin unit: {0}")]
    InvalidCoin(String),

    /// Fiat unit must be a non-empty identifier
    #[error("Invalid fiat unit: {0}")]
    InvalidFiat(String),

    /// Unknown action type or state name
    #[error("Unknown {kind}: {value}")]
    UnknownName {
        /// What was being parsed (action type, action state)
        kind: &'static str,
        /// The offending value
        value: String,
    },

    /// Invalid state transition
    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    /// Tip configuration is incomplete or inconsistent
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),
}

// =============================================================================
// Username
// =============================================================================

/// Platform username, normalised to lowercase.
///
/// The platform treats names case-insensitively, and both the ledger account
/// and the user table are keyed by the lowercase form.
///
/// # Invariants
/// - Non-empty
/// - Only `[a-z0-9_-]`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Username(String);

impl Username {
    /// Create a username, stripping a leading `/u/`, `u/` or `@` mention prefix.
    ///
    /// # Examples
    /// ```
    /// # use cointip_domain::value_objects::Username;
    /// let name = Username::new("/u/Alice_99").unwrap();
    /// assert_eq!(name.as_str(), "alice_99");
    /// ```
    ///
    /// # Errors
    /// Returns `DomainError::InvalidUsername` if the name is empty or contains
    /// characters the platform does not allow.
    pub fn new(raw: &str) -> Result<Self, DomainError> {
        let trimmed = raw.trim();
        let stripped = trimmed
            .strip_prefix("/u/")
            .or_else(|| trimmed.strip_prefix("u/"))
            .or_else(|| trimmed.strip_prefix('@'))
            .unwrap_or(trimmed);

        if stripped.is_empty() {
            return Err(DomainError::InvalidUsername("Username must be non-empty".to_string()));
        }

        if !stripped.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            return Err(DomainError::InvalidUsername(format!(
                "Username contains invalid characters: {}",
                stripped
            )));
        }

        Ok(Self(stripped.to_ascii_lowercase()))
    }

    /// Get the normalised name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Username {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<Username> for String {
    fn from(value: Username) -> Self {
        value.0
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Coin / Fiat units
// =============================================================================

macro_rules! unit_type {
    ($(#[$meta:meta])* $name:ident, $err:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Create a unit from its short code (case-insensitive)
            pub fn new(code: &str) -> Result<Self, DomainError> {
                let code = code.trim();
                if code.is_empty() || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
                    return Err(DomainError::$err(format!("Invalid unit code: '{}'", code)));
                }
                Ok(Self(code.to_ascii_lowercase()))
            }

            /// Lowercase unit code (e.g. "ltc", "usd")
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Uppercase code for display
            pub fn ticker(&self) -> String {
                self.0.to_ascii_uppercase()
            }
        }

        impl TryFrom<String> for $name {
            type Error = DomainError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(&value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

unit_type!(
    /// Cryptocurrency unit code (e.g. `btc`, `ltc`)
    CoinUnit,
    InvalidCoin
);

unit_type!(
    /// Fiat currency unit code (e.g. `usd`, `eur`)
    FiatUnit,
    InvalidFiat
);

// =============================================================================
// Transfer kind
// =============================================================================

/// Kind of transfer, used to pick minimum size and required confirmations.
///
/// User-to-user tips settle inside the ledger and need fewer confirmations;
/// address sends leave the wallet and need more.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferKind {
    /// Move between ledger accounts
    Givetip,
    /// Send to an external address
    Withdraw,
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferKind::Givetip => write!(f, "givetip"),
            TransferKind::Withdraw => write!(f, "withdraw"),
        }
    }
}

// =============================================================================
// Amount helpers
// =============================================================================

/// Clamp a computed amount to zero if it is negative.
///
/// Applied to persisted values only; user input is validated elsewhere.
pub fn non_negative(value: Decimal) -> Decimal {
    if value.is_sign_negative() {
        Decimal::ZERO
    } else {
        value
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_username_normalises_mentions() {
        assert_eq!(Username::new("/u/Bob").unwrap().as_str(), "bob");
        assert_eq!(Username::new("u/bob").unwrap().as_str(), "bob");
        assert_eq!(Username::new("@BOB").unwrap().as_str(), "bob");
        assert_eq!(Username::new("  bob-1 ").unwrap().as_str(), "bob-1");
    }

    #[test]
    fn test_username_rejects_garbage() {
        assert!(Username::new("").is_err());
        assert!(Username::new("/u/").is_err());
        assert!(Username::new("bob smith").is_err());
        assert!(Username::new("bob;drop").is_err());
    }

    #[test]
    fn test_units() {
        let coin = CoinUnit::new("LTC").unwrap();
        assert_eq!(coin.as_str(), "ltc");
        assert_eq!(coin.ticker(), "LTC");
        assert!(FiatUnit::new("").is_err());
        assert!(FiatUnit::new("u$d").is_err());
    }

    #[test]
    fn test_unit_serde_roundtrip_validates() {
        let parsed: CoinUnit = serde_json::from_str("\"BTC\"").unwrap();
        assert_eq!(parsed.as_str(), "btc");
        assert!(serde_json::from_str::<CoinUnit>("\"\"").is_err());
    }

    #[test]
    fn test_non_negative_clamp() {
        assert_eq!(non_negative(dec!(-0.5)), Decimal::ZERO);
        assert_eq!(non_negative(dec!(1.25)), dec!(1.25));
    }
}
