//! Cointip Engine Layer
//!
//! Pure decision logic, deterministic, no I/O.
//!
//! ```text
//! text ──→ RuleTable::find ──→ CommandMatch ──→ resolver ──→ concrete amounts
//!               ↑                                  ↑
//!        built once from                  balances and rates
//!          TipSettings                  passed in by the caller
//! ```

#![warn(clippy::all)]

pub mod error;
pub mod resolver;
pub mod rules;

pub use error::{EngineError, EngineResult};
pub use resolver::{
    coin_to_fiat, fiat_to_coin, keyword_amount, parse_amount, select_coin, CoinCandidate,
    COIN_SCALE,
};
pub use rules::{CommandMatch, Rule, RuleTable};

/// Settings from the example configuration shipped with the repository.
#[cfg(test)]
pub(crate) fn test_settings() -> cointip_domain::TipSettings {
    toml::from_str(include_str!("../../config/tip.example.toml")).unwrap()
}
