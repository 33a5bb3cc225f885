//! Action construction.
//!
//! Turns a [`CommandMatch`] into a fully resolved [`Action`]: destination,
//! coin, coin amount and its fiat value. A match that cannot be resolved is
//! not a command; nothing is recorded and nobody is told.

use rust_decimal::Decimal;
use thiserror::Error;
use tracing::debug;

use cointip_domain::{
    Action, ActionType, CoinSpec, CoinUnit, Destination, FiatUnit, SourceRef,
    TransferKind, Username,
};
use cointip_engine::{
    coin_to_fiat, keyword_amount, parse_amount, resolver::round_coin, select_coin,
    CoinCandidate, CommandMatch, EngineError,
};

use crate::context::Services;
use crate::error::ExecError;

/// Why a match did not produce an action.
#[derive(Debug, Error)]
pub enum ConstructionError {
    #[error("no destination user or address")]
    MissingDestination,

    #[error("both a destination user and an address")]
    ConflictingDestination,

    #[error("no coin or fiat unit")]
    MissingUnit,

    #[error("no amount or keyword")]
    MissingAmount,

    #[error("unknown keyword '{0}'")]
    UnknownKeyword(String),

    #[error("coin '{0}' is not configured")]
    UnknownCoin(CoinUnit),

    #[error("amount could not be resolved: {0}")]
    Amount(#[from] EngineError),

    #[error("no coin can pay {0} {1}")]
    NoUsableCoin(Decimal, FiatUnit),

    /// Ledger or store failure while resolving; fatal, not a bad command
    #[error(transparent)]
    Exec(#[from] ExecError),
}

/// Build an action of the matched type for `from`.
///
/// # Errors
/// A `ConstructionError`; only the `Exec` variant is fatal.
pub async fn construct(
    services: &Services,
    m: CommandMatch,
    from: Username,
    source: SourceRef,
) -> Result<Action, ConstructionError> {
    let mut action = Action::new(m.action_type, from, source);

    match m.action_type {
        ActionType::Givetip | ActionType::Withdraw => {
            resolve_transfer(services, &mut action, m).await?;
        }
        ActionType::Redeem => {
            let coin = m.coin.ok_or(ConstructionError::MissingUnit)?;
            known_coin(services, &coin)?;
            action.coin = Some(coin);
        }
        ActionType::Register
        | ActionType::Info
        | ActionType::History
        | ActionType::Rates
        | ActionType::Accept
        | ActionType::Decline => {}
    }

    debug!(
        action_type = %action.action_type,
        message_id = %action.message_id(),
        coin = ?action.coin,
        coin_value = ?action.coin_value,
        "Constructed action"
    );
    Ok(action)
}

async fn resolve_transfer(
    services: &Services,
    action: &mut Action,
    m: CommandMatch,
) -> Result<(), ConstructionError> {
    let destination = Destination::from_parts(m.to_user, m.to_address)
        .map_err(|_| ConstructionError::ConflictingDestination)?
        .ok_or(ConstructionError::MissingDestination)?;
    if m.amount.is_none() && m.keyword.is_none() {
        return Err(ConstructionError::MissingAmount);
    }
    let kind = destination.transfer_kind();
    let from = action.from_user.clone();
    action.destination = Some(destination);

    match (m.coin, m.fiat) {
        (Some(coin), _) => {
            let spec = known_coin(services, &coin)?;
            // Balance keywords resolve against what is left once the send fee is paid
            let balance = match &m.keyword {
                Some(name) if needs_balance(services, name)? => Some(
                    services
                        .ledger
                        .balance(&coin, &from, spec.minconf(kind))
                        .await?
                        - spec.fee(kind),
                ),
                _ => None,
            };
            let coin_value = positive_coin(raw_value(services, &m.amount, &m.keyword, balance)?)?;

            let fiat = services.settings.default_fiat.clone();
            let rate = services.rate(&coin, &fiat).await;
            action.fiat_value = coin_to_fiat(coin_value, rate, &coin, &fiat).ok();
            action.fiat = Some(fiat);
            action.coin = Some(coin);
            action.coin_value = Some(coin_value);
        }
        (None, Some(fiat)) => {
            let fiat_value = raw_value(services, &m.amount, &m.keyword, None)?;
            let (coin, coin_value) = auto_select(services, &from, kind, fiat_value, &fiat).await?;
            action.coin = Some(coin);
            action.coin_value = Some(positive_coin(coin_value)?);
            action.fiat = Some(fiat);
            action.fiat_value = Some(fiat_value);
        }
        (None, None) => return Err(ConstructionError::MissingUnit),
    }
    Ok(())
}

/// Pick the first active coin (by unit) whose spendable balance covers the
/// fiat amount. The sender must be registered to have balances at all.
async fn auto_select(
    services: &Services,
    from: &Username,
    kind: TransferKind,
    fiat_value: Decimal,
    fiat: &FiatUnit,
) -> Result<(CoinUnit, Decimal), ConstructionError> {
    let no_coin = || ConstructionError::NoUsableCoin(fiat_value, fiat.clone());
    if services.store.users().find(from).await.map_err(ExecError::from)?.is_none() {
        return Err(no_coin());
    }

    let mut candidates = Vec::new();
    for spec in services.settings.active_coins() {
        let rate = services.rate(&spec.unit, fiat).await;
        if rate.is_none() {
            continue;
        }
        let balance = services
            .ledger
            .balance(&spec.unit, from, spec.minconf(kind))
            .await?;
        candidates.push(CoinCandidate {
            coin: spec.unit.clone(),
            rate,
            balance,
        });
    }
    select_coin(&candidates, fiat_value).ok_or_else(no_coin)
}

fn raw_value(
    services: &Services,
    amount: &Option<String>,
    keyword: &Option<String>,
    balance: Option<Decimal>,
) -> Result<Decimal, ConstructionError> {
    match (amount, keyword) {
        (Some(raw), _) => Ok(parse_amount(raw)?),
        (None, Some(name)) => {
            let spec = services
                .settings
                .keyword(name)
                .ok_or_else(|| ConstructionError::UnknownKeyword(name.clone()))?;
            Ok(keyword_amount(name, &spec.value, balance)?)
        }
        (None, None) => Err(ConstructionError::MissingAmount),
    }
}

fn needs_balance(services: &Services, keyword: &str) -> Result<bool, ConstructionError> {
    services
        .settings
        .keyword(keyword)
        .map(|k| k.value.needs_balance())
        .ok_or_else(|| ConstructionError::UnknownKeyword(keyword.to_string()))
}

fn known_coin<'a>(services: &'a Services, coin: &CoinUnit) -> Result<&'a CoinSpec, ConstructionError> {
    services
        .settings
        .coin(coin)
        .filter(|c| c.enabled)
        .ok_or_else(|| ConstructionError::UnknownCoin(coin.clone()))
}

fn positive_coin(value: Decimal) -> Result<Decimal, ConstructionError> {
    let value = round_coin(value);
    if value <= Decimal::ZERO {
        return Err(EngineError::InvalidAmount(format!("{} rounds to zero", value)).into());
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registrar::Registrar;
    use crate::test_support::{comment, harness, ltc, user, Harness};
    use cointip_domain::ItemKind;
    use cointip_engine::RuleTable;
    use rust_decimal_macros::dec;

    fn tip_match() -> CommandMatch {
        CommandMatch {
            action_type: ActionType::Givetip,
            to_user: Some(user("bob")),
            to_address: None,
            amount: Some("1".to_string()),
            keyword: None,
            coin: Some(ltc()),
            fiat: None,
            rule: "test".to_string(),
        }
    }

    async fn build(h: &Harness, text: &str) -> Result<Action, ConstructionError> {
        let rules = RuleTable::build(&h.services.settings).unwrap();
        let m = rules.find(text, ItemKind::Comment).unwrap();
        let item = comment("t1_c", "alice", text);
        construct(&h.services, m, user("alice"), item.source()).await
    }

    #[tokio::test]
    async fn test_destination_is_user_xor_address() {
        let h = harness();
        let source = comment("t1_c", "alice", "").source();

        let mut both = tip_match();
        both.to_address = Some("Labc".to_string());
        let result = construct(&h.services, both, user("alice"), source.clone()).await;
        assert!(matches!(result, Err(ConstructionError::ConflictingDestination)));

        let mut neither = tip_match();
        neither.to_user = None;
        let result = construct(&h.services, neither, user("alice"), source).await;
        assert!(matches!(result, Err(ConstructionError::MissingDestination)));
    }

    #[tokio::test]
    async fn test_coin_amount_gets_default_fiat_value() {
        let h = harness();
        let action = build(&h, "+tip /u/bob 1.5 ltc").await.unwrap();
        assert_eq!(action.to_user(), Some(&user("bob")));
        assert_eq!(action.coin_value, Some(dec!(1.5)));
        assert_eq!(action.fiat, Some(FiatUnit::new("usd").unwrap()));
        assert_eq!(action.fiat_value, Some(dec!(120)));

        // No rate: the tip still resolves, without a fiat value
        h.rates.clear();
        let action = build(&h, "+tip /u/bob 1.5 ltc").await.unwrap();
        assert_eq!(action.fiat_value, None);
    }

    #[tokio::test]
    async fn test_balance_keyword_reads_sender_balance() {
        let h = harness();
        h.ledger.deposit(&ltc(), &user("alice"), dec!(2), 6);
        // Unconfirmed funds do not count
        h.ledger.deposit(&ltc(), &user("alice"), dec!(10), 0);

        let action = build(&h, "+tip /u/bob half ltc").await.unwrap();
        assert_eq!(action.coin_value, Some(dec!(1)));

        let action = build(&h, "+tip /u/bob all ltc").await.unwrap();
        assert_eq!(action.coin_value, Some(dec!(2)));
    }

    #[tokio::test]
    async fn test_balance_keyword_leaves_fee_for_address_sends() {
        let h = harness();
        h.ledger.deposit(&ltc(), &user("alice"), dec!(2), 6);

        // ltc txfee is 0.001
        let action = build(&h, "+tip LQ3B36Yv2rBTxdgAdYpU2UcEZsaNwXeATk all ltc")
            .await
            .unwrap();
        assert_eq!(action.coin_value, Some(dec!(1.999)));

        let action = build(&h, "+tip LQ3B36Yv2rBTxdgAdYpU2UcEZsaNwXeATk half ltc")
            .await
            .unwrap();
        assert_eq!(action.coin_value, Some(dec!(0.9995)));
    }

    #[tokio::test]
    async fn test_zero_balance_keyword_is_not_a_command() {
        let h = harness();
        let result = build(&h, "+tip /u/bob all ltc").await;
        assert!(matches!(result, Err(ConstructionError::Amount(_))));
    }

    #[tokio::test]
    async fn test_fiat_keyword_selects_coin() {
        let h = harness();
        Registrar::new(h.services.clone())
            .register(&user("alice"))
            .await
            .unwrap();
        h.ledger.deposit(&ltc(), &user("alice"), dec!(2), 6);

        // "a beer" is 3 of the default fiat; btc has no balance
        let action = build(&h, "+tip /u/bob a beer").await.unwrap();
        assert_eq!(action.coin, Some(ltc()));
        assert_eq!(action.coin_value, Some(dec!(0.0375)));
        assert_eq!(action.fiat_value, Some(dec!(3)));
    }

    #[tokio::test]
    async fn test_fiat_tip_from_unregistered_sender_is_not_a_command() {
        let h = harness();
        let result = build(&h, "+tip /u/bob $5").await;
        assert!(matches!(result, Err(ConstructionError::NoUsableCoin(_, _))));
    }

    #[tokio::test]
    async fn test_ledger_failure_is_fatal() {
        let h = harness();
        h.ledger.set_fail_next(true);
        let result = build(&h, "+tip /u/bob all ltc").await;
        assert!(matches!(result, Err(ConstructionError::Exec(ExecError::Ledger(_)))));
    }
}
