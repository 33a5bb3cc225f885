//! Rule Table Builder and Command Matcher
//!
//! The table is built once from [`TipSettings`]: every command template is
//! crossed with the configured coins, fiats and keywords, and each
//! combination becomes one compiled [`Rule`]. Rules capture their variable
//! parts through named groups (`to_user`, `address`, `amount`), so
//! extraction never depends on group positions.
//!
//! Rules are tried in build order and the first match wins. Build order is
//! most specific first:
//!
//! ```text
//! givetip:  address+amount  →  amount+address  →  user+amount  →  amount+user  →  amount only
//!           (each: coin amount, coin keyword, fiat symbol, fiat amount, fiat keyword, bare keyword)
//! withdraw: address+amount  →  amount+address
//! redeem:   coin
//! others:   trigger word only
//! ```

use crate::error::{EngineError, EngineResult};
use cointip_domain::{
    ActionType, CoinSpec, CoinUnit, FiatSpec, FiatUnit, ItemKind, KeywordSpec, TipSettings,
    Username,
};
use regex::{Regex, RegexBuilder};
use tracing::debug;

// =============================================================================
// Pattern assembly
// =============================================================================

/// Incremental pattern assembly; every config fragment is wrapped in a group
/// so alternations inside it cannot leak into the surrounding rule.
#[derive(Debug, Clone)]
struct Pattern(String);

impl Pattern {
    /// Trigger word(s) at the start of the text or after whitespace
    fn trigger(synonyms: &[String]) -> Self {
        let words: Vec<String> = synonyms
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(regex::escape)
            .collect();
        Pattern(format!(r"(?:^|\s)(?:{})", words.join("|")))
    }

    /// Whitespace, then a named capture
    fn capture(mut self, name: &str, fragment: &str) -> Self {
        self.0.push_str(&format!(r"\s+(?P<{}>(?:{}))\b", name, fragment));
        self
    }

    /// Whitespace, optional "to", then a named capture
    fn capture_after_to(mut self, name: &str, fragment: &str) -> Self {
        self.0.push_str(&format!(r"\s+(?:to\s+)?(?P<{}>(?:{}))\b", name, fragment));
        self
    }

    /// Whitespace, then an amount specification
    fn amount(mut self, spec: &AmountSpec<'_>, amount_regex: &str) -> Self {
        self.0.push_str(r"\s+");
        self.0.push_str(&spec.fragment(amount_regex));
        self
    }

    /// Whitespace, then a fixed fragment followed by a word boundary
    fn word(mut self, fragment: &str) -> Self {
        self.0.push_str(&format!(r"\s+(?:{})\b", fragment));
        self
    }

    /// Trigger must be the whole word (followed by whitespace or end of text)
    fn end_of_word(mut self) -> Self {
        self.0.push_str(r"(?:\s|$)");
        self
    }

    fn compile(&self, rule: &str) -> EngineResult<Regex> {
        RegexBuilder::new(&self.0)
            .case_insensitive(true)
            .dot_matches_new_line(true)
            .build()
            .map_err(|source| EngineError::InvalidPattern {
                rule: rule.to_string(),
                source,
            })
    }
}

/// How the amount and its unit are written in one rule.
#[derive(Debug, Clone, Copy)]
enum AmountSpec<'a> {
    /// `1.5 ltc`
    CoinAmount(&'a CoinSpec),
    /// `all ltc`
    CoinKeyword(&'a CoinSpec, &'a KeywordSpec),
    /// `$1.5`
    FiatSymbol(&'a FiatSpec),
    /// `1.5 usd`
    FiatAmount(&'a FiatSpec),
    /// `a beer usd`
    FiatKeyword(&'a FiatSpec, &'a KeywordSpec),
    /// `a beer` (default fiat)
    BareKeyword(&'a KeywordSpec, &'a FiatUnit),
}

impl AmountSpec<'_> {
    fn fragment(&self, amount_regex: &str) -> String {
        match self {
            AmountSpec::CoinAmount(coin) => {
                format!(r"(?P<amount>(?:{}))\s*(?:{})\b", amount_regex, coin.units_regex)
            }
            AmountSpec::CoinKeyword(coin, keyword) => {
                format!(r"(?:{})\s+(?:{})\b", keyword.pattern, coin.units_regex)
            }
            AmountSpec::FiatSymbol(fiat) => {
                format!(r"{}(?P<amount>(?:{}))\b", regex::escape(&fiat.symbol), amount_regex)
            }
            AmountSpec::FiatAmount(fiat) => {
                format!(r"(?P<amount>(?:{}))\s*(?:{})\b", amount_regex, fiat.units_regex)
            }
            AmountSpec::FiatKeyword(fiat, keyword) => {
                format!(r"(?:{})\s+(?:{})\b", keyword.pattern, fiat.units_regex)
            }
            AmountSpec::BareKeyword(keyword, _) => format!(r"(?:{})\b", keyword.pattern),
        }
    }

    fn coin(&self) -> Option<CoinUnit> {
        match self {
            AmountSpec::CoinAmount(coin) | AmountSpec::CoinKeyword(coin, _) => {
                Some(coin.unit.clone())
            }
            _ => None,
        }
    }

    fn fiat(&self) -> Option<FiatUnit> {
        match self {
            AmountSpec::FiatSymbol(fiat)
            | AmountSpec::FiatAmount(fiat)
            | AmountSpec::FiatKeyword(fiat, _) => Some(fiat.unit.clone()),
            AmountSpec::BareKeyword(_, fiat) => Some((*fiat).clone()),
            _ => None,
        }
    }

    fn keyword(&self) -> Option<String> {
        match self {
            AmountSpec::CoinKeyword(_, keyword)
            | AmountSpec::FiatKeyword(_, keyword)
            | AmountSpec::BareKeyword(keyword, _) => Some(keyword.name.clone()),
            _ => None,
        }
    }

    fn describe(&self) -> String {
        match self {
            AmountSpec::CoinAmount(coin) => format!("amount {}", coin.unit),
            AmountSpec::CoinKeyword(coin, k) => format!("keyword {} {}", k.name, coin.unit),
            AmountSpec::FiatSymbol(fiat) => format!("symbol {}", fiat.unit),
            AmountSpec::FiatAmount(fiat) => format!("amount {}", fiat.unit),
            AmountSpec::FiatKeyword(fiat, k) => format!("keyword {} {}", k.name, fiat.unit),
            AmountSpec::BareKeyword(k, fiat) => format!("keyword {} ({})", k.name, fiat),
        }
    }
}

// =============================================================================
// Rule
// =============================================================================

/// One compiled match rule.
#[derive(Debug, Clone)]
pub struct Rule {
    /// Command this rule recognises
    pub action_type: ActionType,
    /// Coin fixed by the rule, if any
    pub coin: Option<CoinUnit>,
    /// Fiat fixed by the rule, if any
    pub fiat: Option<FiatUnit>,
    /// Keyword fixed by the rule, if any
    pub keyword: Option<String>,
    /// Short description for logs
    pub label: String,
    regex: Regex,
}

impl Rule {
    /// The assembled pattern
    pub fn pattern(&self) -> &str {
        self.regex.as_str()
    }

    /// Try this rule against `text`.
    ///
    /// A captured username that does not normalise is treated as no match.
    pub fn apply(&self, text: &str) -> Option<CommandMatch> {
        let caps = self.regex.captures(text)?;

        let to_user = match caps.name("to_user") {
            Some(m) => Some(Username::new(m.as_str()).ok()?),
            None => None,
        };

        Some(CommandMatch {
            action_type: self.action_type,
            to_user,
            to_address: caps.name("address").map(|m| m.as_str().to_string()),
            amount: caps.name("amount").map(|m| m.as_str().to_string()),
            keyword: self.keyword.clone(),
            coin: self.coin.clone(),
            fiat: self.fiat.clone(),
            rule: self.label.clone(),
        })
    }
}

/// Raw fields extracted by a matching rule, before amount resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandMatch {
    pub action_type: ActionType,
    pub to_user: Option<Username>,
    pub to_address: Option<String>,
    /// Numeric literal as written
    pub amount: Option<String>,
    pub keyword: Option<String>,
    pub coin: Option<CoinUnit>,
    pub fiat: Option<FiatUnit>,
    /// Label of the rule that matched
    pub rule: String,
}

impl CommandMatch {
    /// Whether the text named a destination itself
    pub fn has_destination(&self) -> bool {
        self.to_user.is_some() || self.to_address.is_some()
    }
}

// =============================================================================
// RuleTable
// =============================================================================

/// Ordered list of compiled rules.
#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    rules: Vec<Rule>,
}

#[derive(Debug, Clone, Copy)]
enum Dest<'a> {
    AddressFirst(&'a CoinSpec),
    AddressLast(&'a CoinSpec),
    UserFirst,
    UserLast,
    Parent,
}

impl RuleTable {
    /// Build the table from settings. Disabled commands still get rules so
    /// their authors can be told the command is off.
    ///
    /// # Errors
    /// Returns `EngineError::InvalidPattern` if a configured fragment does not compile.
    pub fn build(settings: &TipSettings) -> EngineResult<Self> {
        let mut table = RuleTable::default();
        let coins = settings.active_coins();
        let fiats = settings.active_fiats();

        for action_type in ActionType::ALL {
            let trigger = Pattern::trigger(&settings.commands.get(action_type).synonyms);
            match action_type {
                ActionType::Givetip => {
                    let mut dests: Vec<Dest<'_>> = Vec::new();
                    dests.extend(coins.iter().map(|c| Dest::AddressFirst(*c)));
                    dests.extend(coins.iter().map(|c| Dest::AddressLast(*c)));
                    dests.push(Dest::UserFirst);
                    dests.push(Dest::UserLast);
                    dests.push(Dest::Parent);
                    for dest in dests {
                        let specs = match dest {
                            Dest::AddressFirst(coin) | Dest::AddressLast(coin) => {
                                coin_specs(coin, settings)
                            }
                            _ => all_specs(&coins, &fiats, settings),
                        };
                        for spec in specs {
                            table.push_transfer(action_type, &trigger, dest, &spec, settings)?;
                        }
                    }
                }
                ActionType::Withdraw => {
                    for &coin in &coins {
                        for dest in [Dest::AddressFirst(coin), Dest::AddressLast(coin)] {
                            for spec in coin_specs(coin, settings) {
                                table.push_transfer(action_type, &trigger, dest, &spec, settings)?;
                            }
                        }
                    }
                }
                ActionType::Redeem => {
                    for &coin in &coins {
                        let label = format!("redeem {}", coin.unit);
                        let regex = trigger.clone().word(&coin.units_regex).compile(&label)?;
                        table.push(Rule {
                            action_type,
                            coin: Some(coin.unit.clone()),
                            fiat: None,
                            keyword: None,
                            label,
                            regex,
                        });
                    }
                }
                _ => {
                    let label = action_type.to_string();
                    let regex = trigger.clone().end_of_word().compile(&label)?;
                    table.push(Rule {
                        action_type,
                        coin: None,
                        fiat: None,
                        keyword: None,
                        label,
                        regex,
                    });
                }
            }
        }

        debug!(rules = table.rules.len(), "Rule table built");
        Ok(table)
    }

    fn push_transfer(
        &mut self,
        action_type: ActionType,
        trigger: &Pattern,
        dest: Dest<'_>,
        spec: &AmountSpec<'_>,
        settings: &TipSettings,
    ) -> EngineResult<()> {
        let amount_regex = settings.amount_regex.as_str();
        let user_regex = settings.username_regex.as_str();
        let (pattern, dest_label) = match dest {
            Dest::AddressFirst(coin) => (
                trigger
                    .clone()
                    .capture("address", &coin.address_regex)
                    .amount(spec, amount_regex),
                "address first",
            ),
            Dest::AddressLast(coin) => (
                trigger
                    .clone()
                    .amount(spec, amount_regex)
                    .capture_after_to("address", &coin.address_regex),
                "address last",
            ),
            Dest::UserFirst => (
                trigger.clone().capture("to_user", user_regex).amount(spec, amount_regex),
                "user first",
            ),
            Dest::UserLast => (
                trigger
                    .clone()
                    .amount(spec, amount_regex)
                    .capture_after_to("to_user", user_regex),
                "user last",
            ),
            Dest::Parent => (trigger.clone().amount(spec, amount_regex), "parent"),
        };

        let label = format!("{} {} {}", action_type, dest_label, spec.describe());
        let regex = pattern.compile(&label)?;
        self.push(Rule {
            action_type,
            coin: spec.coin(),
            fiat: spec.fiat(),
            keyword: spec.keyword(),
            label,
            regex,
        });
        Ok(())
    }

    fn push(&mut self, rule: Rule) {
        debug!(rule = %rule.label, pattern = %rule.pattern(), "Added rule");
        self.rules.push(rule);
    }

    /// First matching rule for `text`, in build order.
    ///
    /// Private messages only see non-public commands; comments only public ones.
    pub fn find(&self, text: &str, kind: ItemKind) -> Option<CommandMatch> {
        let found = self
            .rules
            .iter()
            .filter(|rule| match kind {
                ItemKind::Message => !rule.action_type.is_public(),
                ItemKind::Comment => rule.action_type.is_public(),
            })
            .find_map(|rule| rule.apply(text));

        match &found {
            Some(m) => debug!(rule = %m.rule, "Command matched"),
            None => debug!("No command matched"),
        }
        found
    }

    /// All rules, in match order
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Number of rules
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the table has no rules
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Coin-denominated specs for one coin: numeric amount, then each keyword.
fn coin_specs<'a>(coin: &'a CoinSpec, settings: &'a TipSettings) -> Vec<AmountSpec<'a>> {
    let mut specs = vec![AmountSpec::CoinAmount(coin)];
    specs.extend(settings.keywords.iter().map(|k| AmountSpec::CoinKeyword(coin, k)));
    specs
}

/// Every amount spec for user and parent destinations, most specific first.
fn all_specs<'a>(
    coins: &[&'a CoinSpec],
    fiats: &[&'a FiatSpec],
    settings: &'a TipSettings,
) -> Vec<AmountSpec<'a>> {
    let mut specs = Vec::new();
    for coin in coins {
        specs.extend(coin_specs(coin, settings));
    }
    for fiat in fiats {
        specs.push(AmountSpec::FiatSymbol(fiat));
        specs.push(AmountSpec::FiatAmount(fiat));
        specs.extend(
            settings
                .keywords
                .iter()
                .filter(|k| !k.value.needs_balance())
                .map(|k| AmountSpec::FiatKeyword(fiat, k)),
        );
    }
    specs.extend(
        settings
            .keywords
            .iter()
            .filter(|k| !k.value.needs_balance())
            .map(|k| AmountSpec::BareKeyword(k, &settings.default_fiat)),
    );
    specs
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_settings;

    fn table() -> RuleTable {
        RuleTable::build(&test_settings()).unwrap()
    }

    fn comment(text: &str) -> Option<CommandMatch> {
        table().find(text, ItemKind::Comment)
    }

    fn message(text: &str) -> Option<CommandMatch> {
        table().find(text, ItemKind::Message)
    }

    #[test]
    fn test_tip_to_user_with_coin() {
        let m = comment("nice post +tip /u/Bob 1.5 ltc").unwrap();
        assert_eq!(m.action_type, ActionType::Givetip);
        assert_eq!(m.to_user, Some(Username::new("bob").unwrap()));
        assert_eq!(m.amount.as_deref(), Some("1.5"));
        assert_eq!(m.coin, Some(CoinUnit::new("ltc").unwrap()));
        assert_eq!(m.fiat, None);
    }

    #[test]
    fn test_tip_without_destination() {
        let m = comment("+tip 2 LTC").unwrap();
        assert!(!m.has_destination());
        assert_eq!(m.amount.as_deref(), Some("2"));
    }

    #[test]
    fn test_tip_fiat_symbol_and_suffix() {
        let m = comment("+tip /u/bob $1.25").unwrap();
        assert_eq!(m.fiat, Some(FiatUnit::new("usd").unwrap()));
        assert_eq!(m.coin, None);
        assert_eq!(m.amount.as_deref(), Some("1.25"));

        let m = comment("+tip /u/bob 3 dollars").unwrap();
        assert_eq!(m.fiat, Some(FiatUnit::new("usd").unwrap()));
        assert_eq!(m.amount.as_deref(), Some("3"));
    }

    #[test]
    fn test_tip_keywords() {
        let m = comment("+tip /u/bob all ltc").unwrap();
        assert_eq!(m.keyword.as_deref(), Some("all"));
        assert_eq!(m.coin, Some(CoinUnit::new("ltc").unwrap()));
        assert_eq!(m.amount, None);

        let m = comment("+tip /u/bob a beer").unwrap();
        assert_eq!(m.keyword.as_deref(), Some("beer"));
        assert_eq!(m.fiat, Some(FiatUnit::new("usd").unwrap()));

        // balance keywords need an explicit coin
        assert!(comment("+tip /u/bob all").is_none());
    }

    #[test]
    fn test_tip_to_address() {
        let m = comment("+tip LQ3B36Yv2rBTxdgAdYpU2UcEZsaNwXeATk 1 ltc").unwrap();
        assert_eq!(m.to_address.as_deref(), Some("LQ3B36Yv2rBTxdgAdYpU2UcEZsaNwXeATk"));
        assert_eq!(m.to_user, None);
    }

    #[test]
    fn test_specific_rule_wins_over_prefix() {
        // "+tip 1 ltc" alone is a parent-author tip; the longer form names the recipient
        let m = comment("+tip 1 ltc to /u/carol").unwrap();
        assert_eq!(m.to_user, Some(Username::new("carol").unwrap()));

        let m = comment("+tip 1 ltc LQ3B36Yv2rBTxdgAdYpU2UcEZsaNwXeATk").unwrap();
        assert_eq!(m.to_address.as_deref(), Some("LQ3B36Yv2rBTxdgAdYpU2UcEZsaNwXeATk"));
    }

    #[test]
    fn test_private_messages_skip_public_rules() {
        assert!(message("+tip /u/bob 1 ltc").is_none());
        assert!(comment("+register").is_none());
        assert_eq!(message("+register").unwrap().action_type, ActionType::Register);
        assert_eq!(message("please +INFO").unwrap().action_type, ActionType::Info);
    }

    #[test]
    fn test_trigger_must_be_whole_word() {
        assert!(message("+registered").is_none());
        assert!(comment("x+tip /u/bob 1 ltc").is_none());
    }

    #[test]
    fn test_withdraw_and_redeem() {
        let m = message("+withdraw LQ3B36Yv2rBTxdgAdYpU2UcEZsaNwXeATk 0.7 ltc").unwrap();
        assert_eq!(m.action_type, ActionType::Withdraw);
        assert_eq!(m.amount.as_deref(), Some("0.7"));

        let m = message("+redeem litecoin").unwrap();
        assert_eq!(m.action_type, ActionType::Redeem);
        assert_eq!(m.coin, Some(CoinUnit::new("ltc").unwrap()));
    }

    #[test]
    fn test_unparseable_username_is_no_match() {
        // mention with only the prefix
        assert!(comment("+tip /u/ 1 ltc").is_none());
    }

    #[test]
    fn test_bad_fragment_is_reported() {
        let mut settings = test_settings();
        settings.coins[0].units_regex = "ltc(".to_string();
        assert!(matches!(
            RuleTable::build(&settings),
            Err(EngineError::InvalidPattern { .. })
        ));
    }
}
