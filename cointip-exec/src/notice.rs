//! User-facing notices.
//!
//! Every reply or private message the engine sends is a [`Notice`]. Where it
//! is delivered (public reply or private message) is decided by the executor.

use rust_decimal::Decimal;
use std::fmt::Write as _;

use cointip_domain::{Action, ActionType, CoinUnit, FiatUnit, Username};

/// One line of an `info` report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceLine {
    pub coin: CoinUnit,
    /// Spendable balance (tip confirmations)
    pub balance: Decimal,
    /// Value in the report fiat, if a rate was available
    pub fiat_value: Option<Decimal>,
    pub address: String,
}

/// Balances and addresses of a registered user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoReport {
    pub user: Username,
    pub fiat: FiatUnit,
    pub lines: Vec<BalanceLine>,
}

impl InfoReport {
    /// Sum of the fiat values that could be computed
    pub fn total_fiat(&self) -> Decimal {
        self.lines.iter().filter_map(|l| l.fiat_value).sum()
    }
}

/// Rates of every active coin against every active fiat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateTable {
    pub fiats: Vec<FiatUnit>,
    /// One row per coin, one cell per entry of `fiats`
    pub rows: Vec<(CoinUnit, Vec<Option<Decimal>>)>,
}

impl RateTable {
    /// Whether at least one rate is known
    pub fn has_rates(&self) -> bool {
        self.rows.iter().any(|(_, cells)| cells.iter().any(Option::is_some))
    }
}

/// Something the bot tells a user.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    // Validation failures
    NotRegistered,
    RecipientNotFound { user: Username },
    NoCoin,
    NoAddress { coin: CoinUnit },
    BelowMinimum { amount: Decimal, min: Decimal, coin: CoinUnit },
    LowBalance { balance: Decimal, needed: Decimal, coin: CoinUnit },
    AlreadyPending { to: Username, coin: CoinUnit },
    InvalidAddress { address: String, coin: CoinUnit },

    // Transfer lifecycle
    TipPending(Action),
    TipIncoming(Action),
    TipVerified(Action),
    TipReceived(Action),
    TipDeclined(Action),
    TipExpired(Action),
    TransferFailed(Action),

    // Account commands
    NothingPending,
    PendingDeclined { count: usize },
    Info(InfoReport),
    History { user: Username, actions: Vec<Action> },
    Rates(RateTable),
    RatesUnavailable,

    // Redeem
    RedeemAlreadyDone,
    RedeemLowKarma { karma: i64, min_karma: i64 },
    RedeemUncomputable,
    RedeemLowFunds { coin: CoinUnit },
    Redeemed(Action),

    // Misc
    CommandDisabled { command: ActionType },
    Sorry,
}

impl Notice {
    /// Subject line used when the notice is sent as a private message
    pub fn subject(&self) -> &'static str {
        match self {
            Self::NotRegistered
            | Self::RecipientNotFound { .. }
            | Self::NoCoin
            | Self::NoAddress { .. }
            | Self::BelowMinimum { .. }
            | Self::LowBalance { .. }
            | Self::AlreadyPending { .. }
            | Self::InvalidAddress { .. }
            | Self::TransferFailed(_) => "tip failed",
            Self::TipPending(_) | Self::TipVerified(_) => "tip sent",
            Self::TipIncoming(_) => "incoming tip",
            Self::TipReceived(_) => "tip received",
            Self::TipDeclined(_) => "tip declined",
            Self::TipExpired(_) => "tip expired",
            Self::NothingPending | Self::PendingDeclined { .. } => "pending tips",
            Self::Info(_) => "account info",
            Self::History { .. } => "history",
            Self::Rates(_) | Self::RatesUnavailable => "rates",
            Self::RedeemAlreadyDone
            | Self::RedeemLowKarma { .. }
            | Self::RedeemUncomputable
            | Self::RedeemLowFunds { .. }
            | Self::Redeemed(_) => "redeem",
            Self::CommandDisabled { .. } => "command disabled",
            Self::Sorry => "not understood",
        }
    }

    /// Rendered body text
    pub fn text(&self) -> String {
        match self {
            Self::NotRegistered => {
                "You are not registered. Send `+register` to create an account.".to_string()
            }
            Self::RecipientNotFound { user } => format!("User {} does not exist.", user),
            Self::NoCoin => {
                "Could not work out which coin to use. Name a coin with the amount.".to_string()
            }
            Self::NoAddress { coin } => {
                format!("You have no {} deposit address. Send `+register` again.", coin.ticker())
            }
            Self::BelowMinimum { amount, min, coin } => format!(
                "{} {} is below the minimum of {} {}.",
                amount.normalize(),
                coin.ticker(),
                min.normalize(),
                coin.ticker()
            ),
            Self::LowBalance { balance, needed, coin } => format!(
                "Insufficient balance: you have {} {} available and need {} {}.",
                balance.normalize(),
                coin.ticker(),
                needed.normalize(),
                coin.ticker()
            ),
            Self::AlreadyPending { to, coin } => format!(
                "You already have a pending {} tip to {}. Wait until it is accepted, declined or expires.",
                coin.ticker(),
                to
            ),
            Self::InvalidAddress { address, coin } => {
                format!("{} is not a valid {} address.", address, coin.ticker())
            }
            Self::TipPending(action) => format!(
                "Your tip of {} to {} is waiting for them to accept it.",
                amount(action),
                destination(action)
            ),
            Self::TipIncoming(action) => format!(
                "{} sent you a tip of {}. Reply `+accept` to claim it or `+decline` to return it.",
                action.from_user,
                amount(action)
            ),
            Self::TipVerified(action) => {
                let mut text = format!(
                    "Verified: {} -> {}, {}",
                    action.from_user,
                    destination(action),
                    amount(action)
                );
                if let Some(txid) = &action.transaction_id {
                    let _ = write!(text, " (transaction {})", txid);
                }
                text
            }
            Self::TipReceived(action) => {
                format!("You received {} from {}.", amount(action), action.from_user)
            }
            Self::TipDeclined(action) => format!(
                "Your tip of {} to {} was declined and returned to you.",
                amount(action),
                destination(action)
            ),
            Self::TipExpired(action) => format!(
                "Your tip of {} to {} expired and was returned to you.",
                amount(action),
                destination(action)
            ),
            Self::TransferFailed(action) => format!(
                "Something went wrong sending {} to {}. The operator has been alerted.",
                amount(action),
                destination(action)
            ),
            Self::NothingPending => "You have no pending tips.".to_string(),
            Self::PendingDeclined { count } => format!("Declined {} pending tip(s).", count),
            Self::Info(report) => render_info(report),
            Self::History { user, actions } => render_history(user, actions),
            Self::Rates(table) => render_rates(table),
            Self::RatesUnavailable => "No exchange rates are available right now.".to_string(),
            Self::RedeemAlreadyDone => "You have already redeemed your karma.".to_string(),
            Self::RedeemLowKarma { karma, min_karma } => format!(
                "You need at least {} karma to redeem; you have {}.",
                min_karma, karma
            ),
            Self::RedeemUncomputable => {
                "Could not compute a redeem amount right now. Try again later.".to_string()
            }
            Self::RedeemLowFunds { coin } => {
                format!("The redeem account is out of {}. Try another coin.", coin.ticker())
            }
            Self::Redeemed(action) => format!("Redeemed your karma for {}.", amount(action)),
            Self::CommandDisabled { command } => {
                format!("The `{}` command is currently disabled.", command)
            }
            Self::Sorry => "Sorry, I did not understand your message.".to_string(),
        }
    }
}

fn amount(action: &Action) -> String {
    let mut text = match (action.coin_value, &action.coin) {
        (Some(value), Some(coin)) => format!("{} {}", value.normalize(), coin.ticker()),
        _ => "an unknown amount".to_string(),
    };
    if let (Some(value), Some(fiat)) = (action.fiat_value, &action.fiat) {
        let _ = write!(text, " (~{} {})", value.round_dp(2), fiat.ticker());
    }
    text
}

fn destination(action: &Action) -> String {
    action
        .destination
        .as_ref()
        .map_or_else(|| action.from_user.to_string(), ToString::to_string)
}

fn render_info(report: &InfoReport) -> String {
    let mut text = format!("Account {}\n\n| coin | balance | {} | address |\n|---|---|---|---|\n", report.user, report.fiat.ticker());
    for line in &report.lines {
        let fiat = line
            .fiat_value
            .map_or_else(|| "?".to_string(), |v| v.round_dp(2).to_string());
        let _ = writeln!(
            text,
            "| {} | {} | {} | {} |",
            line.coin.ticker(),
            line.balance.normalize(),
            fiat,
            line.address
        );
    }
    let _ = write!(
        text,
        "\nTotal: ~{} {}",
        report.total_fiat().round_dp(2),
        report.fiat.ticker()
    );
    text
}

fn render_history(user: &Username, actions: &[Action]) -> String {
    if actions.is_empty() {
        return format!("No history for {}.", user);
    }
    let mut text = format!("Last {} actions of {}\n\n", actions.len(), user);
    for action in actions {
        let _ = write!(
            text,
            "* {} {} {}",
            action.source.created_at.format("%Y-%m-%d %H:%M"),
            action.action_type,
            action.state
        );
        if action.action_type.moves_funds() {
            let _ = write!(
                text,
                ": {} -> {}, {}",
                action.from_user,
                destination(action),
                amount(action)
            );
        }
        text.push('\n');
    }
    text
}

fn render_rates(table: &RateTable) -> String {
    let mut text = String::from("| coin |");
    for fiat in &table.fiats {
        let _ = write!(text, " {} |", fiat.ticker());
    }
    text.push_str("\n|---|");
    text.push_str(&"---|".repeat(table.fiats.len()));
    text.push('\n');
    for (coin, cells) in &table.rows {
        let _ = write!(text, "| {} |", coin.ticker());
        for cell in cells {
            match cell {
                Some(rate) => {
                    let _ = write!(text, " {} |", rate.round_dp(4).normalize());
                }
                None => text.push_str(" - |"),
            }
        }
        text.push('\n');
    }
    text
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_below_minimum_text() {
        let notice = Notice::BelowMinimum {
            amount: dec!(0.0100),
            min: dec!(0.1),
            coin: CoinUnit::new("ltc").unwrap(),
        };
        assert_eq!(notice.subject(), "tip failed");
        assert_eq!(notice.text(), "0.01 LTC is below the minimum of 0.1 LTC.");
    }

    #[test]
    fn test_info_total_skips_unknown_rates() {
        let report = InfoReport {
            user: Username::new("alice").unwrap(),
            fiat: FiatUnit::new("usd").unwrap(),
            lines: vec![
                BalanceLine {
                    coin: CoinUnit::new("btc").unwrap(),
                    balance: dec!(0.001),
                    fiat_value: None,
                    address: "1abc".into(),
                },
                BalanceLine {
                    coin: CoinUnit::new("ltc").unwrap(),
                    balance: dec!(1.5),
                    fiat_value: Some(dec!(120)),
                    address: "Labc".into(),
                },
            ],
        };
        assert_eq!(report.total_fiat(), dec!(120));
        let text = Notice::Info(report).text();
        assert!(text.contains("| LTC | 1.5 | 120 | Labc |"));
        assert!(text.contains("| BTC | 0.001 | ? | 1abc |"));
    }

    #[test]
    fn test_rate_table_rendering() {
        let table = RateTable {
            fiats: vec![FiatUnit::new("usd").unwrap(), FiatUnit::new("eur").unwrap()],
            rows: vec![(CoinUnit::new("ltc").unwrap(), vec![Some(dec!(80)), None])],
        };
        assert!(table.has_rates());
        let text = Notice::Rates(table).text();
        assert!(text.contains("| LTC | 80 | - |"));
    }
}
