//! Stub implementations for testing.
//!
//! These implementations simulate the coin daemon, the social platform and
//! the rate provider without making real network calls.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use cointip_domain::{CoinUnit, FiatUnit, TipSettings, Username};

use crate::error::ExecError;
use crate::ports::{LedgerPort, PlatformError, PlatformItem, PlatformPort, RatePort};

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Confirmations given to internal moves (always spendable).
const INTERNAL: u32 = u32::MAX;

// =============================================================================
// Stub Ledger
// =============================================================================

/// A transaction sent to an external address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentTransaction {
    pub txid: String,
    pub coin: CoinUnit,
    pub from: Username,
    pub address: String,
    pub amount: Decimal,
    /// Confirmations the send required of the sender's funds
    pub minconf: u32,
}

/// Stub coin daemon.
///
/// Keeps a list of (amount, confirmations) entries per coin and account.
/// Deposits count toward a balance once they reach the requested minconf;
/// internal moves and debits always count.
pub struct StubLedger {
    entries: RwLock<HashMap<(CoinUnit, Username), Vec<(Decimal, u32)>>>,
    /// Network fee charged on top of each external send
    fees: RwLock<HashMap<CoinUnit, Decimal>>,
    invalid_addresses: RwLock<HashSet<String>>,
    sent: RwLock<Vec<SentTransaction>>,
    counter: RwLock<u64>,
    /// Calls left before a simulated failure (`Some(0)` fails the next call)
    fail_after: RwLock<Option<usize>>,
}

impl StubLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            fees: RwLock::new(HashMap::new()),
            invalid_addresses: RwLock::new(HashSet::new()),
            sent: RwLock::new(Vec::new()),
            counter: RwLock::new(0),
            fail_after: RwLock::new(None),
        }
    }

    /// Credit a deposit with the given number of confirmations.
    pub fn deposit(&self, coin: &CoinUnit, account: &Username, amount: Decimal, confirmations: u32) {
        write(&self.entries)
            .entry((coin.clone(), account.clone()))
            .or_default()
            .push((amount, confirmations));
    }

    /// Balance counting every entry, regardless of confirmations.
    pub fn balance_of(&self, coin: &CoinUnit, account: &Username) -> Decimal {
        self.sum(coin, account, 0)
    }

    /// Set the network fee charged on external sends.
    pub fn set_fee(&self, coin: &CoinUnit, fee: Decimal) {
        write(&self.fees).insert(coin.clone(), fee);
    }

    /// Make `is_valid_address` reject `address`.
    pub fn mark_invalid(&self, address: &str) {
        write(&self.invalid_addresses).insert(address.to_string());
    }

    /// External sends so far.
    pub fn sent(&self) -> Vec<SentTransaction> {
        read(&self.sent).clone()
    }

    /// Configure the next call to fail.
    pub fn set_fail_next(&self, fail: bool) {
        *write(&self.fail_after) = fail.then_some(0);
    }

    /// Let `calls` calls succeed, then fail the one after.
    pub fn fail_after(&self, calls: usize) {
        *write(&self.fail_after) = Some(calls);
    }

    /// Check if we should fail the next operation.
    fn should_fail(&self) -> bool {
        let mut fail_after = write(&self.fail_after);
        match *fail_after {
            Some(0) => {
                *fail_after = None;
                true
            }
            Some(n) => {
                *fail_after = Some(n - 1);
                false
            }
            None => false,
        }
    }

    fn next_id(&self) -> u64 {
        let mut counter = write(&self.counter);
        *counter += 1;
        *counter
    }

    fn sum(&self, coin: &CoinUnit, account: &Username, minconf: u32) -> Decimal {
        read(&self.entries)
            .get(&(coin.clone(), account.clone()))
            .map(|entries| {
                entries
                    .iter()
                    .filter(|(amount, confs)| amount.is_sign_negative() || *confs >= minconf)
                    .map(|(amount, _)| *amount)
                    .sum()
            })
            .unwrap_or(Decimal::ZERO)
    }

    fn push(&self, coin: &CoinUnit, account: &Username, amount: Decimal) {
        write(&self.entries)
            .entry((coin.clone(), account.clone()))
            .or_default()
            .push((amount, INTERNAL));
    }
}

impl Default for StubLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerPort for StubLedger {
    async fn balance(
        &self,
        coin: &CoinUnit,
        account: &Username,
        minconf: u32,
    ) -> Result<Decimal, ExecError> {
        if self.should_fail() {
            return Err(ExecError::Ledger("Simulated getbalance failure".to_string()));
        }
        Ok(self.sum(coin, account, minconf))
    }

    async fn move_between(
        &self,
        coin: &CoinUnit,
        from: &Username,
        to: &Username,
        amount: Decimal,
    ) -> Result<(), ExecError> {
        if self.should_fail() {
            return Err(ExecError::Ledger("Simulated move failure".to_string()));
        }
        if self.sum(coin, from, 0) < amount {
            return Err(ExecError::Ledger(format!(
                "Account {} has insufficient {} for move of {}",
                from, coin, amount
            )));
        }
        self.push(coin, from, -amount);
        self.push(coin, to, amount);
        Ok(())
    }

    async fn send_to_address(
        &self,
        coin: &CoinUnit,
        from: &Username,
        address: &str,
        amount: Decimal,
        minconf: u32,
    ) -> Result<String, ExecError> {
        if self.should_fail() {
            return Err(ExecError::Ledger("Simulated sendfrom failure".to_string()));
        }
        let fee = read(&self.fees).get(coin).copied().unwrap_or(Decimal::ZERO);
        if self.sum(coin, from, minconf) < amount + fee {
            return Err(ExecError::Ledger(format!(
                "Account {} has insufficient {} for send of {}",
                from, coin, amount
            )));
        }
        self.push(coin, from, -(amount + fee));

        let txid = format!("stubtx-{}", self.next_id());
        write(&self.sent).push(SentTransaction {
            txid: txid.clone(),
            coin: coin.clone(),
            from: from.clone(),
            address: address.to_string(),
            amount,
            minconf,
        });
        Ok(txid)
    }

    async fn is_valid_address(&self, _coin: &CoinUnit, address: &str) -> Result<bool, ExecError> {
        if self.should_fail() {
            return Err(ExecError::Ledger("Simulated validateaddress failure".to_string()));
        }
        Ok(!address.is_empty() && !read(&self.invalid_addresses).contains(address))
    }

    async fn new_address(&self, coin: &CoinUnit, account: &Username) -> Result<String, ExecError> {
        if self.should_fail() {
            return Err(ExecError::Ledger("Simulated getnewaddress failure".to_string()));
        }
        Ok(format!("{}-{}-{}", coin, account, self.next_id()))
    }

    async fn wallet_balance(&self, coin: &CoinUnit) -> Result<Decimal, ExecError> {
        if self.should_fail() {
            return Err(ExecError::Ledger("Simulated getbalance failure".to_string()));
        }
        Ok(read(&self.entries)
            .iter()
            .filter(|((c, _), _)| c == coin)
            .flat_map(|(_, entries)| entries.iter().map(|(amount, _)| *amount))
            .sum())
    }
}

// =============================================================================
// Stub Platform
// =============================================================================

/// A private message the bot sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub to: Username,
    pub subject: String,
    pub text: String,
}

/// A public reply the bot posted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedReply {
    pub item_id: String,
    pub text: String,
}

/// Stub social platform.
///
/// Every user exists unless removed with [`StubPlatform::remove_user`].
pub struct StubPlatform {
    inbox: RwLock<Vec<PlatformItem>>,
    read_ids: RwLock<HashSet<String>>,
    comments: RwLock<Vec<PlatformItem>>,
    parents: RwLock<HashMap<String, Username>>,
    missing_users: RwLock<HashSet<Username>>,
    karma: RwLock<HashMap<Username, i64>>,
    replies: RwLock<Vec<PostedReply>>,
    messages: RwLock<Vec<SentMessage>>,
    /// Errors returned by the next calls, in order
    failures: RwLock<VecDeque<PlatformError>>,
}

impl StubPlatform {
    /// Create an empty platform.
    pub fn new() -> Self {
        Self {
            inbox: RwLock::new(Vec::new()),
            read_ids: RwLock::new(HashSet::new()),
            comments: RwLock::new(Vec::new()),
            parents: RwLock::new(HashMap::new()),
            missing_users: RwLock::new(HashSet::new()),
            karma: RwLock::new(HashMap::new()),
            replies: RwLock::new(Vec::new()),
            messages: RwLock::new(Vec::new()),
            failures: RwLock::new(VecDeque::new()),
        }
    }

    /// Deliver a private message to the inbox.
    pub fn push_message(&self, item: PlatformItem) {
        write(&self.inbox).push(item);
    }

    /// Post a comment in a watched channel.
    pub fn push_comment(&self, item: PlatformItem) {
        write(&self.comments).push(item);
    }

    /// Set the author of the comment `item_id` replies to.
    pub fn set_parent(&self, item_id: &str, author: Username) {
        write(&self.parents).insert(item_id.to_string(), author);
    }

    /// Make `user` unknown to the platform.
    pub fn remove_user(&self, user: &Username) {
        write(&self.missing_users).insert(user.clone());
    }

    /// Set the karma of `user`.
    pub fn set_karma(&self, user: &Username, karma: i64) {
        write(&self.karma).insert(user.clone(), karma);
    }

    /// Fail the next calls with these errors, one per call.
    pub fn fail_next_calls(&self, errors: Vec<PlatformError>) {
        write(&self.failures).extend(errors);
    }

    /// Public replies posted so far.
    pub fn replies(&self) -> Vec<PostedReply> {
        read(&self.replies).clone()
    }

    /// Replies posted to `item_id`.
    pub fn replies_to(&self, item_id: &str) -> Vec<String> {
        read(&self.replies)
            .iter()
            .filter(|r| r.item_id == item_id)
            .map(|r| r.text.clone())
            .collect()
    }

    /// Private messages sent so far.
    pub fn messages(&self) -> Vec<SentMessage> {
        read(&self.messages).clone()
    }

    /// Private messages sent to `user`.
    pub fn messages_to(&self, user: &Username) -> Vec<SentMessage> {
        read(&self.messages)
            .iter()
            .filter(|m| &m.to == user)
            .cloned()
            .collect()
    }

    /// Whether an inbox item was marked read.
    pub fn is_read(&self, item_id: &str) -> bool {
        read(&self.read_ids).contains(item_id)
    }

    fn next_failure(&self) -> Result<(), PlatformError> {
        match write(&self.failures).pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl Default for StubPlatform {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlatformPort for StubPlatform {
    async fn unread_messages(&self, limit: usize) -> Result<Vec<PlatformItem>, PlatformError> {
        self.next_failure()?;
        let read_ids = read(&self.read_ids);
        Ok(read(&self.inbox)
            .iter()
            .filter(|item| !read_ids.contains(&item.id))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_read(&self, item_id: &str) -> Result<(), PlatformError> {
        self.next_failure()?;
        write(&self.read_ids).insert(item_id.to_string());
        Ok(())
    }

    async fn recent_comments(&self, limit: usize) -> Result<Vec<PlatformItem>, PlatformError> {
        self.next_failure()?;
        // Newest first, like the platform listing
        Ok(read(&self.comments).iter().rev().take(limit).cloned().collect())
    }

    async fn reply(&self, item_id: &str, text: &str) -> Result<(), PlatformError> {
        self.next_failure()?;
        write(&self.replies).push(PostedReply {
            item_id: item_id.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn send_message(
        &self,
        to: &Username,
        subject: &str,
        text: &str,
    ) -> Result<(), PlatformError> {
        self.next_failure()?;
        write(&self.messages).push(SentMessage {
            to: to.clone(),
            subject: subject.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn parent_author(&self, item_id: &str) -> Result<Option<Username>, PlatformError> {
        self.next_failure()?;
        Ok(read(&self.parents).get(item_id).cloned())
    }

    async fn user_exists(&self, user: &Username) -> Result<bool, PlatformError> {
        self.next_failure()?;
        Ok(!read(&self.missing_users).contains(user))
    }

    async fn karma(&self, user: &Username) -> Result<i64, PlatformError> {
        self.next_failure()?;
        Ok(read(&self.karma).get(user).copied().unwrap_or(0))
    }
}

// =============================================================================
// Static Rates
// =============================================================================

/// Rate provider backed by a fixed table (the `[rates]` section of the tip
/// configuration, or rates set by a test).
pub struct StaticRates {
    rates: RwLock<HashMap<(CoinUnit, FiatUnit), Decimal>>,
    fail_next: RwLock<bool>,
}

impl StaticRates {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            rates: RwLock::new(HashMap::new()),
            fail_next: RwLock::new(false),
        }
    }

    /// Table with every configured rate between active coins and fiats.
    pub fn from_settings(settings: &TipSettings) -> Self {
        let rates = Self::new();
        for coin in settings.active_coins() {
            for fiat in settings.active_fiats() {
                if let Some(rate) = settings.static_rate(&coin.unit, &fiat.unit) {
                    rates.set_rate(&coin.unit, &fiat.unit, rate);
                }
            }
        }
        rates
    }

    /// Set the rate for a pair.
    pub fn set_rate(&self, coin: &CoinUnit, fiat: &FiatUnit, rate: Decimal) {
        write(&self.rates).insert((coin.clone(), fiat.clone()), rate);
    }

    /// Remove every rate.
    pub fn clear(&self) {
        write(&self.rates).clear();
    }

    /// Configure the next lookup to fail.
    pub fn set_fail_next(&self, fail: bool) {
        *write(&self.fail_next) = fail;
    }

    fn should_fail(&self) -> bool {
        std::mem::take(&mut *write(&self.fail_next))
    }
}

impl Default for StaticRates {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RatePort for StaticRates {
    async fn rate(&self, coin: &CoinUnit, fiat: &FiatUnit) -> Result<Option<Decimal>, ExecError> {
        if self.should_fail() {
            return Err(ExecError::Rates("Simulated rate provider failure".to_string()));
        }
        Ok(read(&self.rates).get(&(coin.clone(), fiat.clone())).copied())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn ltc() -> CoinUnit {
        CoinUnit::new("ltc").unwrap()
    }

    fn user(name: &str) -> Username {
        Username::new(name).unwrap()
    }

    #[tokio::test]
    async fn test_ledger_minconf() {
        let ledger = StubLedger::new();
        ledger.deposit(&ltc(), &user("alice"), dec!(1), 6);
        ledger.deposit(&ltc(), &user("alice"), dec!(2), 0);

        assert_eq!(ledger.balance(&ltc(), &user("alice"), 1).await.unwrap(), dec!(1));
        assert_eq!(ledger.balance(&ltc(), &user("alice"), 0).await.unwrap(), dec!(3));
    }

    #[tokio::test]
    async fn test_ledger_move_and_insufficient_funds() {
        let ledger = StubLedger::new();
        ledger.deposit(&ltc(), &user("alice"), dec!(2), 6);

        ledger
            .move_between(&ltc(), &user("alice"), &user("bob"), dec!(1.5))
            .await
            .unwrap();
        assert_eq!(ledger.balance_of(&ltc(), &user("alice")), dec!(0.5));
        assert_eq!(ledger.balance_of(&ltc(), &user("bob")), dec!(1.5));

        assert!(ledger
            .move_between(&ltc(), &user("alice"), &user("bob"), dec!(1))
            .await
            .is_err());
        assert_eq!(ledger.wallet_balance(&ltc()).await.unwrap(), dec!(2));
    }

    #[tokio::test]
    async fn test_ledger_send_charges_fee() {
        let ledger = StubLedger::new();
        ledger.set_fee(&ltc(), dec!(0.001));
        ledger.deposit(&ltc(), &user("alice"), dec!(1), 6);

        let txid = ledger
            .send_to_address(&ltc(), &user("alice"), "Laddr", dec!(0.5), 3)
            .await
            .unwrap();
        assert!(txid.starts_with("stubtx-"));
        assert_eq!(ledger.balance_of(&ltc(), &user("alice")), dec!(0.499));
        assert_eq!(ledger.sent()[0].amount, dec!(0.5));
    }

    #[tokio::test]
    async fn test_ledger_fail_after() {
        let ledger = StubLedger::new();
        ledger.fail_after(1);
        assert!(ledger.new_address(&ltc(), &user("alice")).await.is_ok());
        assert!(ledger.new_address(&ltc(), &user("alice")).await.is_err());
        assert!(ledger.new_address(&ltc(), &user("alice")).await.is_ok());
    }

    #[tokio::test]
    async fn test_platform_inbox_read_tracking() {
        let platform = StubPlatform::new();
        platform.push_message(PlatformItem {
            id: "m1".into(),
            author: Some(user("alice")),
            body: "+info".into(),
            kind: cointip_domain::ItemKind::Message,
            created_at: chrono::Utc::now(),
            permalink: None,
            channel: None,
        });

        assert_eq!(platform.unread_messages(10).await.unwrap().len(), 1);
        platform.mark_read("m1").await.unwrap();
        platform.mark_read("m1").await.unwrap();
        assert!(platform.unread_messages(10).await.unwrap().is_empty());
        assert!(platform.is_read("m1"));
    }

    #[tokio::test]
    async fn test_static_rates_from_settings() {
        let settings: TipSettings =
            toml::from_str(include_str!("../../config/tip.example.toml")).unwrap();
        let rates = StaticRates::from_settings(&settings);
        let usd = FiatUnit::new("usd").unwrap();

        assert_eq!(rates.rate(&ltc(), &usd).await.unwrap(), Some(dec!(80)));
        rates.set_fail_next(true);
        assert!(rates.rate(&ltc(), &usd).await.is_err());
        assert_eq!(rates.rate(&ltc(), &usd).await.unwrap(), Some(dec!(80)));
    }
}
