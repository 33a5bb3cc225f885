//! Amount/Coin Resolver
//!
//! Pure arithmetic over decimals: parse captured amounts, apply keyword
//! values, convert between coin and fiat at a given rate, and pick a coin
//! for fiat-only tips. Anything needing a balance or a rate takes it as an
//! argument; fetching them is the caller's job.

use crate::error::{EngineError, EngineResult};
use cointip_domain::{CoinUnit, FiatUnit, KeywordValue};
use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;

/// Decimal places kept for coin amounts (smallest on-chain unit).
pub const COIN_SCALE: u32 = 8;

/// Decimal places kept for fiat amounts.
pub const FIAT_SCALE: u32 = 4;

/// Parse a captured numeric literal into a positive amount.
///
/// # Errors
/// Returns `EngineError::InvalidAmount` for non-numeric or non-positive input.
pub fn parse_amount(raw: &str) -> EngineResult<Decimal> {
    let value = Decimal::from_str(raw.trim())
        .map_err(|e| EngineError::InvalidAmount(format!("'{}': {}", raw, e)))?;
    if value <= Decimal::ZERO {
        return Err(EngineError::InvalidAmount(format!("'{}' is not positive", raw)));
    }
    Ok(value)
}

/// Value of a keyword, given the sender's spendable balance in the coin.
///
/// `balance` is required for `All`/`Fraction` keywords and ignored for `Fixed`.
///
/// # Errors
/// - `KeywordNeedsBalance` when a balance keyword has no balance to apply to
/// - `InvalidAmount` when the result is not positive (empty balance)
pub fn keyword_amount(
    name: &str,
    value: &KeywordValue,
    balance: Option<Decimal>,
) -> EngineResult<Decimal> {
    let amount = match value {
        KeywordValue::Fixed(v) => *v,
        KeywordValue::All => balance.ok_or_else(|| EngineError::KeywordNeedsBalance(name.into()))?,
        KeywordValue::Fraction(f) => {
            let balance =
                balance.ok_or_else(|| EngineError::KeywordNeedsBalance(name.into()))?;
            round_coin(balance * f)
        }
    };
    if amount <= Decimal::ZERO {
        return Err(EngineError::InvalidAmount(format!(
            "keyword '{}' resolves to {}",
            name, amount
        )));
    }
    Ok(amount)
}

/// Truncate to coin precision; never rounds up past what the sender has.
pub fn round_coin(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(COIN_SCALE, RoundingStrategy::ToZero)
}

/// Round to fiat precision
pub fn round_fiat(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(FIAT_SCALE, RoundingStrategy::MidpointNearestEven)
}

/// Coin amount worth `fiat_value` at `rate` (fiat per coin).
///
/// # Errors
/// Returns `EngineError::NoRate` if the rate is missing or not positive.
pub fn fiat_to_coin(
    fiat_value: Decimal,
    rate: Option<Decimal>,
    coin: &CoinUnit,
    fiat: &FiatUnit,
) -> EngineResult<Decimal> {
    let rate = usable_rate(rate, coin, fiat)?;
    Ok(round_coin(fiat_value / rate))
}

/// Fiat value of `coin_value` at `rate` (fiat per coin).
///
/// # Errors
/// Returns `EngineError::NoRate` if the rate is missing or not positive.
pub fn coin_to_fiat(
    coin_value: Decimal,
    rate: Option<Decimal>,
    coin: &CoinUnit,
    fiat: &FiatUnit,
) -> EngineResult<Decimal> {
    let rate = usable_rate(rate, coin, fiat)?;
    Ok(round_fiat(coin_value * rate))
}

fn usable_rate(rate: Option<Decimal>, coin: &CoinUnit, fiat: &FiatUnit) -> EngineResult<Decimal> {
    match rate {
        Some(r) if r > Decimal::ZERO => Ok(r),
        _ => Err(EngineError::NoRate {
            coin: coin.clone(),
            fiat: fiat.clone(),
        }),
    }
}

/// A coin the sender could pay a fiat-denominated tip with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinCandidate {
    pub coin: CoinUnit,
    /// Fiat per coin, if known
    pub rate: Option<Decimal>,
    /// Sender's spendable balance in this coin
    pub balance: Decimal,
}

/// Pick the first coin (in candidate order) whose balance covers `fiat_value`.
///
/// Candidates without a positive rate are skipped. Returns the coin and the
/// coin amount needed, or `None` if no candidate qualifies.
pub fn select_coin(candidates: &[CoinCandidate], fiat_value: Decimal) -> Option<(CoinUnit, Decimal)> {
    candidates.iter().find_map(|c| {
        let rate = c.rate.filter(|r| *r > Decimal::ZERO)?;
        let needed = round_coin(fiat_value / rate);
        (needed > Decimal::ZERO && c.balance >= needed).then(|| (c.coin.clone(), needed))
    })
}

// =============================================================================
// Tests
// =============================================================================
