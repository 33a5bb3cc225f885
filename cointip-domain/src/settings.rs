//! Typed tip configuration
//!
//! The data-driven part of the bot: coins, fiats, amount keywords, command
//! synonyms, redeem and message routing. Deserialised once at startup and
//! validated with [`TipSettings::validate`] before anything else runs.

use crate::entities::ActionType;
use crate::value_objects::{CoinUnit, DomainError, FiatUnit, TransferKind, Username};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

fn yes() -> bool {
    true
}

fn default_history_limit() -> usize {
    10
}

// =============================================================================
// Coins and fiats
// =============================================================================

/// One configured cryptocurrency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoinSpec {
    pub unit: CoinUnit,
    /// Display name ("Litecoin")
    pub name: String,
    #[serde(default = "yes")]
    pub enabled: bool,
    /// Minimum amount for a user-to-user tip
    pub min_tip: Decimal,
    /// Minimum amount for a send to an address
    pub min_withdraw: Decimal,
    /// Confirmations required for balances used by user-to-user tips
    pub minconf_givetip: u32,
    /// Confirmations required for balances used by address sends
    pub minconf_withdraw: u32,
    /// Network fee added to the balance requirement of address sends
    #[serde(default)]
    pub txfee: Decimal,
    /// Regex fragment matching this coin's unit names in text (`ltc|litecoins?`)
    pub units_regex: String,
    /// Regex fragment matching a syntactically plausible address
    pub address_regex: String,
}

impl CoinSpec {
    /// Minimum transfer size for `kind`
    pub fn min_amount(&self, kind: TransferKind) -> Decimal {
        match kind {
            TransferKind::Givetip => self.min_tip,
            TransferKind::Withdraw => self.min_withdraw,
        }
    }

    /// Required confirmations for `kind`
    pub fn minconf(&self, kind: TransferKind) -> u32 {
        match kind {
            TransferKind::Givetip => self.minconf_givetip,
            TransferKind::Withdraw => self.minconf_withdraw,
        }
    }

    /// Fee added on top of the amount when checking the sender's balance
    pub fn fee(&self, kind: TransferKind) -> Decimal {
        match kind {
            TransferKind::Givetip => Decimal::ZERO,
            TransferKind::Withdraw => self.txfee,
        }
    }
}

/// One configured fiat currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiatSpec {
    pub unit: FiatUnit,
    pub name: String,
    /// Prefix symbol ("$"); amounts written as `$1` match this fiat
    pub symbol: String,
    #[serde(default = "yes")]
    pub enabled: bool,
    /// Regex fragment matching the unit names written after an amount (`usd|dollars?`)
    pub units_regex: String,
}

// =============================================================================
// Keywords
// =============================================================================

/// What a symbolic amount resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeywordValue {
    /// A fixed value in the unit written next to it (or the default fiat)
    Fixed(Decimal),
    /// The sender's whole spendable balance in the coin
    All,
    /// A fraction (0, 1] of the sender's spendable balance in the coin
    Fraction(Decimal),
}

impl KeywordValue {
    /// Whether the value depends on the sender's balance (needs an explicit coin)
    pub fn needs_balance(&self) -> bool {
        !matches!(self, KeywordValue::Fixed(_))
    }
}

/// A named symbolic amount ("all", "a beer").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordSpec {
    pub name: String,
    /// Regex fragment matching the keyword in text
    pub pattern: String,
    pub value: KeywordValue,
}

// =============================================================================
// Commands
// =============================================================================

/// Enable switch and trigger words for one command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    #[serde(default = "yes")]
    pub enabled: bool,
    /// Literal trigger words ("+register", "register"); matched case-insensitively
    pub synonyms: Vec<String>,
}

/// Every command the bot knows, one entry each.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commands {
    pub givetip: CommandSpec,
    pub withdraw: CommandSpec,
    pub redeem: CommandSpec,
    pub register: CommandSpec,
    pub info: CommandSpec,
    pub history: CommandSpec,
    pub rates: CommandSpec,
    pub accept: CommandSpec,
    pub decline: CommandSpec,
}

impl Commands {
    /// Spec for one action type
    pub fn get(&self, action_type: ActionType) -> &CommandSpec {
        match action_type {
            ActionType::Givetip => &self.givetip,
            ActionType::Withdraw => &self.withdraw,
            ActionType::Redeem => &self.redeem,
            ActionType::Register => &self.register,
            ActionType::Info => &self.info,
            ActionType::History => &self.history,
            ActionType::Rates => &self.rates,
            ActionType::Accept => &self.accept,
            ActionType::Decline => &self.decline,
        }
    }
}

// =============================================================================
// Redeem and messages
// =============================================================================

/// Karma redemption parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedeemSpec {
    /// Ledger account the grants are paid from
    pub account: Username,
    /// Fiat the grant is denominated in
    pub fiat: FiatUnit,
    /// Fiat granted per karma point
    pub per_karma: Decimal,
    /// Cap on a single grant
    pub max: Decimal,
    /// Minimum karma to qualify
    pub min_karma: i64,
    /// Allow one redeem per coin instead of one in total
    #[serde(default)]
    pub multicoin: bool,
}

/// Whether confirmations go to the source item as a public reply (true) or
/// to the sender as a private message (false).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSettings {
    #[serde(default = "yes")]
    pub verified: bool,
    #[serde(default = "yes")]
    pub declined: bool,
    #[serde(default = "yes")]
    pub expired: bool,
    /// Reply "didn't understand" to private messages that match nothing
    #[serde(default = "yes")]
    pub sorry: bool,
}

impl Default for MessageSettings {
    fn default() -> Self {
        Self {
            verified: true,
            declined: true,
            expired: true,
            sorry: true,
        }
    }
}

// =============================================================================
// TipSettings
// =============================================================================

/// Complete tip configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TipSettings {
    /// System account holding tips pending acceptance (the bot's own name)
    pub escrow_account: Username,
    /// Fiat used when a command names none
    pub default_fiat: FiatUnit,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default)]
    pub banned_users: Vec<Username>,
    /// Regex fragment matching a username mention in a tip
    #[serde(default = "default_username_regex")]
    pub username_regex: String,
    /// Regex fragment matching a numeric amount
    #[serde(default = "default_amount_regex")]
    pub amount_regex: String,
    pub coins: Vec<CoinSpec>,
    pub fiats: Vec<FiatSpec>,
    #[serde(default)]
    pub keywords: Vec<KeywordSpec>,
    pub commands: Commands,
    pub redeem: Option<RedeemSpec>,
    #[serde(default)]
    pub messages: MessageSettings,
    /// Static fallback rates, `rates.<coin>.<fiat> = "value"`
    #[serde(default)]
    pub rates: BTreeMap<String, BTreeMap<String, Decimal>>,
}

fn default_username_regex() -> String {
    r"/?u/[A-Za-z0-9_-]+".to_string()
}

fn default_amount_regex() -> String {
    r"\d+(?:\.\d+)?|\.\d+".to_string()
}

impl TipSettings {
    /// Enabled coins, sorted by unit
    pub fn active_coins(&self) -> Vec<&CoinSpec> {
        let mut coins: Vec<_> = self.coins.iter().filter(|c| c.enabled).collect();
        coins.sort_by(|a, b| a.unit.cmp(&b.unit));
        coins
    }

    /// Enabled fiats, sorted by unit
    pub fn active_fiats(&self) -> Vec<&FiatSpec> {
        let mut fiats: Vec<_> = self.fiats.iter().filter(|f| f.enabled).collect();
        fiats.sort_by(|a, b| a.unit.cmp(&b.unit));
        fiats
    }

    /// Enabled coin by unit
    pub fn coin(&self, unit: &CoinUnit) -> Option<&CoinSpec> {
        self.coins.iter().find(|c| c.enabled && &c.unit == unit)
    }

    /// Enabled fiat by unit
    pub fn fiat(&self, unit: &FiatUnit) -> Option<&FiatSpec> {
        self.fiats.iter().find(|f| f.enabled && &f.unit == unit)
    }

    /// Keyword by name
    pub fn keyword(&self, name: &str) -> Option<&KeywordSpec> {
        self.keywords.iter().find(|k| k.name == name)
    }

    /// Whether items from `user` must be ignored
    pub fn is_banned(&self, user: &Username) -> bool {
        self.banned_users.contains(user)
    }

    /// Static rate for a coin/fiat pair, if configured
    pub fn static_rate(&self, coin: &CoinUnit, fiat: &FiatUnit) -> Option<Decimal> {
        self.rates
            .get(coin.as_str())
            .and_then(|by_fiat| by_fiat.get(fiat.as_str()))
            .copied()
    }

    /// Check the configuration is complete and consistent.
    ///
    /// # Errors
    /// Returns `DomainError::InvalidSettings` naming the first problem found.
    pub fn validate(&self) -> Result<(), DomainError> {
        let invalid = |msg: String| Err(DomainError::InvalidSettings(msg));

        if self.active_coins().is_empty() {
            return invalid("at least one enabled coin is required".to_string());
        }
        if self.fiat(&self.default_fiat).is_none() {
            return invalid(format!("default fiat '{}' is not an enabled fiat", self.default_fiat));
        }
        if self.history_limit == 0 {
            return invalid("history_limit must be at least 1".to_string());
        }
        if self.username_regex.trim().is_empty() || self.amount_regex.trim().is_empty() {
            return invalid("username_regex and amount_regex must be non-empty".to_string());
        }

        let mut seen = HashSet::new();
        for coin in &self.coins {
            if !seen.insert(coin.unit.as_str()) {
                return invalid(format!("coin '{}' is configured twice", coin.unit));
            }
            if coin.name.trim().is_empty() {
                return invalid(format!("coin '{}' has no name", coin.unit));
            }
            if coin.units_regex.trim().is_empty() || coin.address_regex.trim().is_empty() {
                return invalid(format!("coin '{}' is missing a units or address pattern", coin.unit));
            }
            if coin.min_tip <= Decimal::ZERO || coin.min_withdraw <= Decimal::ZERO {
                return invalid(format!("coin '{}' minimums must be positive", coin.unit));
            }
            if coin.txfee.is_sign_negative() {
                return invalid(format!("coin '{}' has a negative txfee", coin.unit));
            }
        }

        let mut seen = HashSet::new();
        for fiat in &self.fiats {
            if !seen.insert(fiat.unit.as_str()) {
                return invalid(format!("fiat '{}' is configured twice", fiat.unit));
            }
            if fiat.symbol.trim().is_empty() || fiat.units_regex.trim().is_empty() {
                return invalid(format!("fiat '{}' is missing a symbol or units pattern", fiat.unit));
            }
        }

        let mut seen = HashSet::new();
        for keyword in &self.keywords {
            if keyword.name.is_empty() || !seen.insert(keyword.name.as_str()) {
                return invalid(format!("keyword '{}' is empty or duplicated", keyword.name));
            }
            if keyword.pattern.trim().is_empty() {
                return invalid(format!("keyword '{}' has no pattern", keyword.name));
            }
            match keyword.value {
                KeywordValue::Fixed(v) if v <= Decimal::ZERO => {
                    return invalid(format!("keyword '{}' must have a positive value", keyword.name));
                }
                KeywordValue::Fraction(f) if f <= Decimal::ZERO || f > Decimal::ONE => {
                    return invalid(format!("keyword '{}' fraction must be in (0, 1]", keyword.name));
                }
                _ => {}
            }
        }

        for action_type in ActionType::ALL {
            let spec = self.commands.get(action_type);
            if spec.synonyms.iter().all(|s| s.trim().is_empty()) {
                return invalid(format!("command '{}' has no synonyms", action_type));
            }
        }

        if self.commands.redeem.enabled {
            let Some(redeem) = &self.redeem else {
                return invalid("redeem is enabled but [redeem] is missing".to_string());
            };
            if self.fiat(&redeem.fiat).is_none() {
                return invalid(format!("redeem fiat '{}' is not an enabled fiat", redeem.fiat));
            }
            if redeem.per_karma <= Decimal::ZERO || redeem.max <= Decimal::ZERO {
                return invalid("redeem per_karma and max must be positive".to_string());
            }
        }

        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
