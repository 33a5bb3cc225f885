//! Startup self-checks.
//!
//! The escrow account must always hold at least the sum of pending tips per
//! coin. Nothing enforces this transactionally; it holds because a single
//! process applies actions one at a time. These checks catch the cases where
//! it no longer does (manual wallet moves, a crash between ledger call and
//! persistence) before any new command is processed.

use rust_decimal::Decimal;
use tracing::{info, warn};

use cointip_domain::{CoinUnit, TransferKind};

use crate::context::Services;
use crate::error::{ExecError, ExecResult};
use crate::registrar::Registrar;

/// Escrow balance against pending tips, for one coin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscrowStatus {
    pub coin: CoinUnit,
    pub escrow_balance: Decimal,
    pub pending_total: Decimal,
}

impl EscrowStatus {
    /// Whether escrow covers every pending tip
    pub fn is_covered(&self) -> bool {
        self.escrow_balance >= self.pending_total
    }
}

/// Escrow coverage for every active coin.
pub async fn escrow_status(services: &Services) -> ExecResult<Vec<EscrowStatus>> {
    let totals = services.store.actions().pending_totals().await?;
    let escrow = &services.settings.escrow_account;

    let mut status = Vec::new();
    for spec in services.settings.active_coins() {
        let escrow_balance = services
            .ledger
            .balance(&spec.unit, escrow, spec.minconf(TransferKind::Givetip))
            .await?;
        status.push(EscrowStatus {
            coin: spec.unit.clone(),
            escrow_balance,
            pending_total: totals.get(&spec.unit).copied().unwrap_or(Decimal::ZERO),
        });
    }
    Ok(status)
}

/// Run every self-check.
///
/// Registers the escrow account if needed and allocates addresses for
/// newly enabled coins before checking.
///
/// # Errors
/// `SelfCheck` naming the first violated invariant.
pub async fn run_self_checks(
    services: &Services,
    registrar: &Registrar,
) -> ExecResult<Vec<EscrowStatus>> {
    // Coverage first: an escrow row from before a coin was enabled is
    // incomplete until add_coin has run
    for spec in services.settings.active_coins() {
        registrar.add_coin(&spec.unit).await?;
    }

    let escrow = &services.settings.escrow_account;
    if !registrar.is_registered(escrow).await? {
        warn!(account = %escrow, "Escrow account not registered, registering");
        registrar.register(escrow).await?;
    }

    let status = escrow_status(services).await?;
    if let Some(short) = status.iter().find(|s| !s.is_covered()) {
        return Err(ExecError::SelfCheck(format!(
            "escrow {} balance {} is below pending tips {}",
            short.coin, short.escrow_balance, short.pending_total
        )));
    }

    for spec in services.settings.active_coins() {
        let wallet = services.ledger.wallet_balance(&spec.unit).await?;
        if wallet.is_sign_negative() {
            return Err(ExecError::SelfCheck(format!(
                "negative {} wallet balance {}",
                spec.unit, wallet
            )));
        }
    }

    for user in services.store.users().list().await? {
        match registrar.is_registered(&user.name).await {
            Ok(_) => {}
            Err(ExecError::InvalidState(reason)) => {
                return Err(ExecError::SelfCheck(format!("user {}: {}", user.name, reason)))
            }
            Err(e) => return Err(e),
        }
    }

    info!(coins = status.len(), "Self-checks passed");
    Ok(status)
}

// =============================================================================
// Tests
// =============================================================================
