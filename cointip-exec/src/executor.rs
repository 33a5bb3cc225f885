//! Tip Executor
//!
//! Drives one platform item from text to a terminal, persisted action.
//!
//! # Flow
//!
//! ```text
//! item ─→ match ─→ construct ─→ guard ─→ validate ─→ execute ─→ persist
//!           │          │          │          │
//!       no match   not a cmd   duplicate  failed (recorded + one notice)
//! ```
//!
//! Validation failures are recorded as `failed` and reported to the user.
//! Ledger failures after validation are recorded, reported generically and
//! returned as a fatal [`ExecError`].

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use cointip_domain::{
    Action, ActionState, ActionType, CoinUnit, Destination, TransferKind, Username,
};
use cointip_engine::{
    coin_to_fiat, fiat_to_coin, resolver::round_fiat, CommandMatch, RuleTable,
};
use cointip_store::ActionQuery;

use crate::construct::{construct, ConstructionError};
use crate::context::Services;
use crate::error::{ExecError, ExecResult};
use crate::guard::IdempotencyGuard;
use crate::notice::{BalanceLine, InfoReport, Notice, RateTable};
use crate::ports::{PlatformError, PlatformItem};
use crate::registrar::Registrar;

// =============================================================================
// Results
// =============================================================================

/// Outcome of handling one item (the non-fatal side).
#[derive(Debug, Clone, PartialEq)]
pub enum ActionResult {
    /// Action ran to `completed`
    Completed,
    /// Tip parked in escrow until the recipient accepts
    Pending,
    /// A business rule was not met; recorded as `failed`
    Failed(ValidationFailure),
    /// Item was already processed (idempotency short-circuit)
    AlreadyProcessed,
    /// Text was not a command, or could not be resolved into one
    NotACommand,
    /// Command is switched off in the configuration
    Disabled,
}

/// A business rule that was not met.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationFailure {
    #[error("sender is not registered")]
    NotRegistered,
    #[error("recipient {0} does not exist")]
    RecipientNotFound(Username),
    #[error("no usable coin")]
    NoCoin,
    #[error("sender has no {0} address")]
    NoAddress(CoinUnit),
    #[error("{amount} is below the minimum of {min}")]
    BelowMinimum {
        amount: Decimal,
        min: Decimal,
        coin: CoinUnit,
    },
    #[error("balance {balance} does not cover {needed}")]
    LowBalance {
        balance: Decimal,
        needed: Decimal,
        coin: CoinUnit,
    },
    #[error("a {coin} tip to {to} is already pending")]
    AlreadyPending { to: Username, coin: CoinUnit },
    #[error("invalid {coin} address {address}")]
    InvalidAddress { address: String, coin: CoinUnit },
    #[error("nothing pending")]
    NothingPending,
    #[error("no rates available")]
    RatesUnavailable,
    #[error("already redeemed")]
    RedeemAlreadyDone,
    #[error("karma {karma} below {min_karma}")]
    RedeemLowKarma { karma: i64, min_karma: i64 },
    #[error("redeem amount not computable")]
    RedeemUncomputable,
    #[error("redeem account has no {0}")]
    RedeemLowFunds(CoinUnit),
}

impl ValidationFailure {
    /// The notice explaining this failure to the user
    pub fn notice(&self) -> Notice {
        match self.clone() {
            Self::NotRegistered => Notice::NotRegistered,
            Self::RecipientNotFound(user) => Notice::RecipientNotFound { user },
            Self::NoCoin => Notice::NoCoin,
            Self::NoAddress(coin) => Notice::NoAddress { coin },
            Self::BelowMinimum { amount, min, coin } => Notice::BelowMinimum { amount, min, coin },
            Self::LowBalance {
                balance,
                needed,
                coin,
            } => Notice::LowBalance {
                balance,
                needed,
                coin,
            },
            Self::AlreadyPending { to, coin } => Notice::AlreadyPending { to, coin },
            Self::InvalidAddress { address, coin } => Notice::InvalidAddress { address, coin },
            Self::NothingPending => Notice::NothingPending,
            Self::RatesUnavailable => Notice::RatesUnavailable,
            Self::RedeemAlreadyDone => Notice::RedeemAlreadyDone,
            Self::RedeemLowKarma { karma, min_karma } => {
                Notice::RedeemLowKarma { karma, min_karma }
            }
            Self::RedeemUncomputable => Notice::RedeemUncomputable,
            Self::RedeemLowFunds(coin) => Notice::RedeemLowFunds { coin },
        }
    }
}

enum Validation {
    Proceed,
    Parked,
    Failed(ValidationFailure),
}

// =============================================================================
// Executor
// =============================================================================

/// The action state machine.
pub struct TipExecutor {
    services: Services,
    rules: RuleTable,
    guard: IdempotencyGuard,
    registrar: Registrar,
}

impl TipExecutor {
    /// Create an executor, compiling the rule table from the settings.
    ///
    /// # Errors
    /// `Engine` if a configured pattern does not compile.
    pub fn new(services: Services) -> ExecResult<Self> {
        let rules = RuleTable::build(&services.settings)?;
        info!(rules = rules.len(), "Rule table built");
        Ok(Self {
            guard: IdempotencyGuard::new(services.store.clone()),
            registrar: Registrar::new(services.clone()),
            rules,
            services,
        })
    }

    /// Shared collaborators
    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Registration component
    pub fn registrar(&self) -> &Registrar {
        &self.registrar
    }

    /// Compiled rules
    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }

    /// Handle one platform item end to end.
    ///
    /// # Errors
    /// Only fatal errors; everything else is an [`ActionResult`].
    pub async fn handle(&self, item: &PlatformItem) -> ExecResult<ActionResult> {
        let Some(author) = item.author.clone() else {
            return Ok(ActionResult::NotACommand);
        };
        let Some(m) = self.evaluate(item, &author).await else {
            return Ok(ActionResult::NotACommand);
        };

        let action_type = m.action_type;
        if !self.services.settings.commands.get(action_type).enabled {
            info!(message_id = %item.id, action_type = %action_type, "Command disabled");
            self.reply_or_tell(&item.id, &author, &Notice::CommandDisabled { command: action_type })
                .await;
            return Ok(ActionResult::Disabled);
        }

        let action = match construct(&self.services, m, author, item.source()).await {
            Ok(action) => action,
            Err(ConstructionError::Exec(e)) => return Err(e),
            Err(e) => {
                debug!(message_id = %item.id, reason = %e, "Not a command");
                return Ok(ActionResult::NotACommand);
            }
        };

        self.process(action).await
    }

    /// Match `item` against the rule table.
    ///
    /// A tip without a destination goes to the author of the parent comment;
    /// if that cannot be resolved, or resolves to the author, there is no match.
    pub async fn evaluate(&self, item: &PlatformItem, author: &Username) -> Option<CommandMatch> {
        let mut m = self.rules.find(&item.body, item.kind)?;

        if m.action_type == ActionType::Givetip && !m.has_destination() {
            match self.services.platform.parent_author(&item.id).await {
                Ok(Some(parent)) => m.to_user = Some(parent),
                Ok(None) => {
                    debug!(message_id = %item.id, "Parent author unavailable");
                    return None;
                }
                Err(e) => {
                    warn!(message_id = %item.id, error = %e, "Parent author lookup failed");
                    return None;
                }
            }
        }

        if m.to_user.as_ref() == Some(author) {
            debug!(message_id = %item.id, %author, "Ignoring self tip");
            return None;
        }
        Some(m)
    }

    /// Run a constructed action.
    pub async fn process(&self, action: Action) -> ExecResult<ActionResult> {
        if self
            .guard
            .already_processed(action.action_type, action.message_id(), false)
            .await?
        {
            return Ok(ActionResult::AlreadyProcessed);
        }

        info!(
            message_id = %action.message_id(),
            action_type = %action.action_type,
            from = %action.from_user,
            "Processing action"
        );
        match action.action_type {
            ActionType::Givetip | ActionType::Withdraw => self.transfer(action, false).await,
            ActionType::Accept => self.accept(action).await,
            ActionType::Decline => self.decline(action).await,
            ActionType::Register => self.register(action).await,
            ActionType::Info => self.info(action).await,
            ActionType::History => self.history(action).await,
            ActionType::Rates => self.rates(action).await,
            ActionType::Redeem => self.redeem(action).await,
        }
    }

    /// Return escrowed funds of pending tips created before `cutoff`.
    ///
    /// # Returns
    ///
    /// Number of tips expired.
    pub async fn expire_pending(&self, cutoff: DateTime<Utc>) -> ExecResult<usize> {
        let stale = self
            .services
            .store
            .actions()
            .find(
                &ActionQuery::new()
                    .action_type(ActionType::Givetip)
                    .state(ActionState::Pending)
                    .created_before(cutoff),
            )
            .await?;

        let mut expired = 0;
        for tip in stale {
            if self.return_escrow(tip, ActionState::Expired).await? {
                expired += 1;
            }
        }
        if expired > 0 {
            info!(expired, "Expired pending tips");
        }
        Ok(expired)
    }

    // =========================================================================
    // Transfers
    // =========================================================================

    /// Validate and execute a givetip/withdraw.
    ///
    /// `replay` is set when accept re-runs a parked tip: funds come from
    /// escrow and the checks already done when parking are skipped.
    async fn transfer(&self, action: Action, replay: bool) -> ExecResult<ActionResult> {
        if replay
            && self
                .guard
                .already_processed(action.action_type, action.message_id(), true)
                .await?
        {
            return Ok(ActionResult::AlreadyProcessed);
        }

        match self.validate(&action, replay).await? {
            Validation::Proceed => self.execute(action, replay).await,
            Validation::Parked => Ok(ActionResult::Pending),
            Validation::Failed(reason) if replay => Err(ExecError::InvalidState(format!(
                "pending tip {} no longer valid: {}",
                action.message_id(),
                reason
            ))),
            Validation::Failed(reason) => self.fail(action, reason).await,
        }
    }

    async fn validate(&self, action: &Action, replay: bool) -> ExecResult<Validation> {
        let from = action.from_user.clone();

        if !self.registrar.is_registered(&from).await? {
            return Ok(Validation::Failed(ValidationFailure::NotRegistered));
        }

        if let Some(to) = action.to_user() {
            if !self.user_exists(to).await? {
                return Ok(Validation::Failed(ValidationFailure::RecipientNotFound(
                    to.clone(),
                )));
            }
        }

        let Some(spec) = action
            .coin
            .as_ref()
            .and_then(|c| self.services.settings.coin(c))
            .filter(|c| c.enabled)
        else {
            return Ok(Validation::Failed(ValidationFailure::NoCoin));
        };
        let coin = spec.unit.clone();
        let amount = action.amount().ok_or_else(|| {
            ExecError::InvalidState(format!("action {} has no amount", action.message_id()))
        })?;
        let kind = transfer_kind(action)?;

        let sender = self.services.store.users().find(&from).await?;
        if sender.as_ref().and_then(|u| u.address(&coin)).is_none() {
            return Ok(Validation::Failed(ValidationFailure::NoAddress(coin)));
        }

        if !replay {
            let min = spec.min_amount(kind);
            if amount < min {
                return Ok(Validation::Failed(ValidationFailure::BelowMinimum {
                    amount,
                    min,
                    coin,
                }));
            }

            let needed = amount + spec.fee(kind);
            let balance = self
                .services
                .ledger
                .balance(&coin, &from, spec.minconf(kind))
                .await?;
            if balance < needed {
                return Ok(Validation::Failed(ValidationFailure::LowBalance {
                    balance,
                    needed,
                    coin,
                }));
            }
        }

        if let Some(to) = action.to_user().cloned() {
            if !replay {
                let pending = ActionQuery::new()
                    .action_type(ActionType::Givetip)
                    .state(ActionState::Pending)
                    .from_user(from.clone())
                    .to_user(to.clone())
                    .coin(coin.clone());
                if self.services.store.actions().exists(&pending).await? {
                    return Ok(Validation::Failed(ValidationFailure::AlreadyPending {
                        to,
                        coin,
                    }));
                }
            }

            if !self.registrar.is_registered(&to).await? {
                if replay {
                    return Err(ExecError::InvalidState(format!(
                        "recipient {} of pending tip {} is not registered",
                        to,
                        action.message_id()
                    )));
                }
                self.park(action.clone(), &coin, amount, &to).await?;
                return Ok(Validation::Parked);
            }
        }

        if let Some(address) = action.to_address() {
            if !self.services.ledger.is_valid_address(&coin, address).await? {
                return Ok(Validation::Failed(ValidationFailure::InvalidAddress {
                    address: address.to_string(),
                    coin,
                }));
            }
        }

        Ok(Validation::Proceed)
    }

    /// Move a tip for an unregistered recipient into escrow.
    async fn park(
        &self,
        mut action: Action,
        coin: &CoinUnit,
        amount: Decimal,
        to: &Username,
    ) -> ExecResult<()> {
        let escrow = &self.services.settings.escrow_account;
        if let Err(e) = self
            .services
            .ledger
            .move_between(coin, &action.from_user, escrow, amount)
            .await
        {
            return self.abort(action, e).await;
        }

        action.transition(ActionState::Pending)?;
        self.save(&action).await?;
        info!(
            message_id = %action.message_id(),
            from = %action.from_user,
            to = %to,
            coin = %coin,
            %amount,
            "Tip parked in escrow"
        );

        let verified = self.services.settings.messages.verified;
        self.announce(&action, &Notice::TipPending(action.clone()), verified)
            .await;
        self.tell(to, &Notice::TipIncoming(action.clone())).await;
        Ok(())
    }

    async fn execute(&self, mut action: Action, replay: bool) -> ExecResult<ActionResult> {
        let (coin, amount) = match (action.coin.clone(), action.amount()) {
            (Some(coin), Some(amount)) => (coin, amount),
            _ => {
                return Err(ExecError::InvalidState(format!(
                    "action {} reached execution unresolved",
                    action.message_id()
                )))
            }
        };

        match action.destination.clone() {
            Some(Destination::User(to)) => {
                let from = if replay {
                    self.services.settings.escrow_account.clone()
                } else {
                    action.from_user.clone()
                };
                if let Err(e) = self
                    .services
                    .ledger
                    .move_between(&coin, &from, &to, amount)
                    .await
                {
                    return self.abort(action, e).await;
                }

                action.transition(ActionState::Completed)?;
                self.save(&action).await?;
                info!(
                    message_id = %action.message_id(),
                    from = %from,
                    to = %to,
                    coin = %coin,
                    %amount,
                    replay,
                    "Tip completed"
                );

                self.tell(&to, &Notice::TipReceived(action.clone())).await;
                if !replay {
                    let verified = self.services.settings.messages.verified;
                    self.announce(&action, &Notice::TipVerified(action.clone()), verified)
                        .await;
                }
            }
            Some(Destination::Address(address)) => {
                let minconf = self
                    .services
                    .settings
                    .coin(&coin)
                    .map_or(0, |spec| spec.minconf(TransferKind::Withdraw));
                let txid = match self
                    .services
                    .ledger
                    .send_to_address(&coin, &action.from_user, &address, amount, minconf)
                    .await
                {
                    Ok(txid) => txid,
                    Err(e) => return self.abort(action, e).await,
                };

                action.transaction_id = Some(txid.clone());
                action.transition(ActionState::Completed)?;
                self.save(&action).await?;
                info!(
                    message_id = %action.message_id(),
                    from = %action.from_user,
                    %address,
                    coin = %coin,
                    %amount,
                    %txid,
                    "Sent to address"
                );

                let verified = self.services.settings.messages.verified;
                self.announce(&action, &Notice::TipVerified(action.clone()), verified)
                    .await;
            }
            None => {
                return Err(ExecError::InvalidState(format!(
                    "action {} has no destination",
                    action.message_id()
                )))
            }
        }
        Ok(ActionResult::Completed)
    }

    /// Give escrowed funds of a pending tip back to its sender.
    ///
    /// Returns false if the tip was already settled.
    async fn return_escrow(&self, mut tip: Action, outcome: ActionState) -> ExecResult<bool> {
        if self
            .guard
            .already_processed(tip.action_type, tip.message_id(), true)
            .await?
        {
            return Ok(false);
        }
        let (coin, amount) = match (tip.coin.clone(), tip.amount()) {
            (Some(coin), Some(amount)) => (coin, amount),
            _ => {
                return Err(ExecError::InvalidState(format!(
                    "pending tip {} has no coin amount",
                    tip.message_id()
                )))
            }
        };

        let escrow = &self.services.settings.escrow_account;
        if let Err(e) = self
            .services
            .ledger
            .move_between(&coin, escrow, &tip.from_user, amount)
            .await
        {
            error!(
                message_id = %tip.message_id(),
                error = %e,
                "Could not return escrowed tip"
            );
            return Err(e);
        }

        tip.transition(outcome)?;
        self.save(&tip).await?;
        info!(
            message_id = %tip.message_id(),
            to = %tip.from_user,
            coin = %coin,
            %amount,
            state = %outcome,
            "Escrow returned to sender"
        );

        let messages = self.services.settings.messages;
        let (notice, public) = if outcome == ActionState::Expired {
            (Notice::TipExpired(tip.clone()), messages.expired)
        } else {
            (Notice::TipDeclined(tip.clone()), messages.declined)
        };
        self.announce(&tip, &notice, public).await;
        Ok(true)
    }

    // =========================================================================
    // Account commands
    // =========================================================================

    async fn accept(&self, mut action: Action) -> ExecResult<ActionResult> {
        let user = action.from_user.clone();
        if !self.registrar.is_registered(&user).await? {
            if let Err(e) = self.registrar.register(&user).await {
                return self.record_fatal(action, e).await;
            }
        }

        let pending = self.pending_for(&user).await?;
        if pending.is_empty() {
            return self.fail(action, ValidationFailure::NothingPending).await;
        }

        let mut accepted = 0;
        for tip in pending {
            if self.transfer(tip, true).await? == ActionResult::Completed {
                accepted += 1;
            }
        }
        info!(%user, accepted, "Accepted pending tips");

        action.transition(ActionState::Completed)?;
        self.save(&action).await?;
        let report = self.info_report(&user).await?;
        self.respond(&action, &Notice::Info(report)).await;
        Ok(ActionResult::Completed)
    }

    async fn decline(&self, mut action: Action) -> ExecResult<ActionResult> {
        let user = action.from_user.clone();
        let mut declined = 0;
        for tip in self.pending_for(&user).await? {
            if self.return_escrow(tip, ActionState::Declined).await? {
                declined += 1;
            }
        }

        let notice = if declined == 0 {
            Notice::NothingPending
        } else {
            Notice::PendingDeclined { count: declined }
        };
        action.transition(ActionState::Completed)?;
        self.save(&action).await?;
        self.respond(&action, &notice).await;
        Ok(ActionResult::Completed)
    }

    async fn register(&self, mut action: Action) -> ExecResult<ActionResult> {
        let user = action.from_user.clone();
        if let Err(e) = self.registrar.register(&user).await {
            return self.record_fatal(action, e).await;
        }

        action.transition(ActionState::Completed)?;
        self.save(&action).await?;
        let report = self.info_report(&user).await?;
        self.respond(&action, &Notice::Info(report)).await;
        Ok(ActionResult::Completed)
    }

    async fn info(&self, mut action: Action) -> ExecResult<ActionResult> {
        let user = action.from_user.clone();
        if !self.registrar.is_registered(&user).await? {
            return self.fail(action, ValidationFailure::NotRegistered).await;
        }

        let report = self.info_report(&user).await?;
        action.transition(ActionState::Completed)?;
        self.save(&action).await?;
        self.respond(&action, &Notice::Info(report)).await;
        Ok(ActionResult::Completed)
    }

    async fn history(&self, mut action: Action) -> ExecResult<ActionResult> {
        let user = action.from_user.clone();
        let actions = self
            .services
            .store
            .actions()
            .history(&user, self.services.settings.history_limit)
            .await?;

        action.transition(ActionState::Completed)?;
        self.save(&action).await?;
        self.respond(&action, &Notice::History { user, actions }).await;
        Ok(ActionResult::Completed)
    }

    async fn rates(&self, mut action: Action) -> ExecResult<ActionResult> {
        let settings = &self.services.settings;
        let fiats: Vec<_> = settings.active_fiats().into_iter().map(|f| f.unit.clone()).collect();

        let mut rows = Vec::new();
        for coin in settings.active_coins() {
            let mut cells = Vec::with_capacity(fiats.len());
            for fiat in &fiats {
                cells.push(self.services.rate(&coin.unit, fiat).await);
            }
            rows.push((coin.unit.clone(), cells));
        }
        let table = RateTable { fiats, rows };

        if !table.has_rates() {
            return self.fail(action, ValidationFailure::RatesUnavailable).await;
        }
        action.transition(ActionState::Completed)?;
        self.save(&action).await?;
        self.respond(&action, &Notice::Rates(table)).await;
        Ok(ActionResult::Completed)
    }

    async fn redeem(&self, mut action: Action) -> ExecResult<ActionResult> {
        let spec = self.services.settings.redeem.clone().ok_or_else(|| {
            ExecError::Config("redeem is enabled but not configured".to_string())
        })?;
        let user = action.from_user.clone();

        if !self.registrar.is_registered(&user).await? {
            return self.fail(action, ValidationFailure::NotRegistered).await;
        }
        let Some(coin) = action.coin.clone() else {
            return self.fail(action, ValidationFailure::NoCoin).await;
        };

        let mut done = ActionQuery::new()
            .action_type(ActionType::Redeem)
            .state(ActionState::Completed)
            .from_user(user.clone());
        if spec.multicoin {
            done = done.coin(coin.clone());
        }
        if self.services.store.actions().exists(&done).await? {
            return self.fail(action, ValidationFailure::RedeemAlreadyDone).await;
        }

        let karma = self.services.platform.karma(&user).await?;
        if karma < spec.min_karma {
            let failure = ValidationFailure::RedeemLowKarma {
                karma,
                min_karma: spec.min_karma,
            };
            return self.fail(action, failure).await;
        }

        let fiat_value = round_fiat((Decimal::from(karma) * spec.per_karma).min(spec.max));
        let rate = self.services.rate(&coin, &spec.fiat).await;
        let coin_value = match fiat_to_coin(fiat_value, rate, &coin, &spec.fiat) {
            Ok(value) if value > Decimal::ZERO => value,
            _ => return self.fail(action, ValidationFailure::RedeemUncomputable).await,
        };
        action.fiat = Some(spec.fiat.clone());
        action.fiat_value = Some(fiat_value);
        action.coin_value = Some(coin_value);

        let funds = self.services.ledger.balance(&coin, &spec.account, 1).await?;
        if funds < coin_value {
            return self.fail(action, ValidationFailure::RedeemLowFunds(coin)).await;
        }

        if let Err(e) = self
            .services
            .ledger
            .move_between(&coin, &spec.account, &user, coin_value)
            .await
        {
            return self.abort(action, e).await;
        }
        action.transition(ActionState::Completed)?;
        self.save(&action).await?;
        info!(%user, coin = %coin, %coin_value, %karma, "Karma redeemed");
        self.respond(&action, &Notice::Redeemed(action.clone())).await;
        Ok(ActionResult::Completed)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn pending_for(&self, user: &Username) -> ExecResult<Vec<Action>> {
        Ok(self
            .services
            .store
            .actions()
            .find(
                &ActionQuery::new()
                    .action_type(ActionType::Givetip)
                    .state(ActionState::Pending)
                    .to_user(user.clone()),
            )
            .await?)
    }

    async fn info_report(&self, user: &Username) -> ExecResult<InfoReport> {
        let row = self.services.store.users().find(user).await?.ok_or_else(|| {
            ExecError::InvalidState(format!("registered user {} has no row", user))
        })?;
        let fiat = self.services.settings.default_fiat.clone();

        let mut lines = Vec::new();
        for spec in self.services.settings.active_coins() {
            let coin = &spec.unit;
            let address = row.address(coin).ok_or_else(|| {
                ExecError::InvalidState(format!("user {} has no {} address", user, coin))
            })?;
            let balance = self
                .services
                .ledger
                .balance(coin, user, spec.minconf(TransferKind::Givetip))
                .await?;
            let rate = self.services.rate(coin, &fiat).await;
            lines.push(BalanceLine {
                coin: coin.clone(),
                balance,
                fiat_value: coin_to_fiat(balance, rate, coin, &fiat).ok(),
                address: address.to_string(),
            });
        }
        Ok(InfoReport {
            user: user.clone(),
            fiat,
            lines,
        })
    }

    async fn user_exists(&self, user: &Username) -> ExecResult<bool> {
        match self.services.platform.user_exists(user).await {
            Ok(exists) => Ok(exists),
            Err(PlatformError::NotFound(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, action: &Action) -> ExecResult<()> {
        self.services.store.actions().save(action).await?;
        debug!(
            message_id = %action.message_id(),
            action_type = %action.action_type,
            state = %action.state,
            "Action saved"
        );
        Ok(())
    }

    /// Record a validation failure and tell the user why.
    async fn fail(&self, mut action: Action, reason: ValidationFailure) -> ExecResult<ActionResult> {
        action.transition(ActionState::Failed)?;
        self.save(&action).await?;
        info!(
            message_id = %action.message_id(),
            action_type = %action.action_type,
            from = %action.from_user,
            %reason,
            "Action failed validation"
        );

        let notice = reason.notice();
        if action.action_type == ActionType::Givetip {
            // Keep failures out of public threads
            self.tell(&action.from_user, &notice).await;
        } else {
            self.respond(&action, &notice).await;
        }
        Ok(ActionResult::Failed(reason))
    }

    /// A ledger call failed after validation: record, tell the sender, halt.
    async fn abort<T>(&self, action: Action, e: ExecError) -> ExecResult<T> {
        let sender = action.from_user.clone();
        let notice = Notice::TransferFailed(action.clone());
        let result = self.record_fatal(action, e).await;
        self.tell(&sender, &notice).await;
        result
    }

    /// Record a transient action as failed and return `e`.
    ///
    /// A pending record stays pending; its escrow is untouched.
    async fn record_fatal<T>(&self, mut action: Action, e: ExecError) -> ExecResult<T> {
        error!(
            message_id = %action.message_id(),
            action_type = %action.action_type,
            from = %action.from_user,
            error = %e,
            "Action execution failed"
        );
        if action.state == ActionState::New {
            action.transition(ActionState::Failed)?;
            self.save(&action).await?;
        }
        Err(e)
    }

    /// Confirmation routed by a message flag: public reply to the source
    /// item, or a private message to the sender.
    async fn announce(&self, action: &Action, notice: &Notice, public: bool) {
        if public {
            self.reply_or_tell(action.message_id(), &action.from_user, notice)
                .await;
        } else {
            self.tell(&action.from_user, notice).await;
        }
    }

    /// Reply to the source item of `action`.
    async fn respond(&self, action: &Action, notice: &Notice) {
        self.reply_or_tell(action.message_id(), &action.from_user, notice)
            .await;
    }

    async fn reply_or_tell(&self, item_id: &str, user: &Username, notice: &Notice) {
        match self.services.platform.reply(item_id, &notice.text()).await {
            Ok(()) => {}
            Err(e) => {
                warn!(%item_id, error = %e, "Reply failed, sending private message instead");
                self.tell(user, notice).await;
            }
        }
    }

    async fn tell(&self, user: &Username, notice: &Notice) {
        if let Err(e) = self
            .services
            .platform
            .send_message(user, notice.subject(), &notice.text())
            .await
        {
            warn!(%user, error = %e, "Could not deliver notice");
        }
    }
}

fn transfer_kind(action: &Action) -> ExecResult<TransferKind> {
    action
        .destination
        .as_ref()
        .map(Destination::transfer_kind)
        .ok_or_else(|| {
            ExecError::InvalidState(format!("action {} has no destination", action.message_id()))
        })
}

// =============================================================================
// Tests
// =============================================================================
