//! Fixtures shared by the unit tests of this crate.

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;

use cointip_domain::{
    Action, ActionState, ActionType, CoinUnit, Destination, FiatUnit, ItemKind, SourceRef,
    TipSettings, Username,
};
use cointip_store::MemoryStore;

use crate::context::Services;
use crate::ports::PlatformItem;
use crate::stub::{StaticRates, StubLedger, StubPlatform};

pub(crate) struct Harness {
    pub services: Services,
    pub ledger: Arc<StubLedger>,
    pub platform: Arc<StubPlatform>,
    pub rates: Arc<StaticRates>,
}

pub(crate) fn settings() -> TipSettings {
    toml::from_str(include_str!("../../config/tip.example.toml")).unwrap()
}

pub(crate) fn harness() -> Harness {
    harness_with(settings())
}

pub(crate) fn harness_with(settings: TipSettings) -> Harness {
    let ledger = Arc::new(StubLedger::new());
    let platform = Arc::new(StubPlatform::new());
    let rates = Arc::new(StaticRates::from_settings(&settings));
    let services = Services {
        ledger: ledger.clone(),
        platform: platform.clone(),
        rates: rates.clone(),
        store: Arc::new(MemoryStore::new()),
        settings: Arc::new(settings),
    };
    Harness {
        services,
        ledger,
        platform,
        rates,
    }
}

pub(crate) fn user(name: &str) -> Username {
    Username::new(name).unwrap()
}

pub(crate) fn ltc() -> CoinUnit {
    CoinUnit::new("ltc").unwrap()
}

pub(crate) fn item(id: &str, author: &str, body: &str, kind: ItemKind) -> PlatformItem {
    PlatformItem {
        id: id.to_string(),
        author: Some(user(author)),
        body: body.to_string(),
        kind,
        created_at: Utc::now(),
        permalink: None,
        channel: None,
    }
}

pub(crate) fn comment(id: &str, author: &str, body: &str) -> PlatformItem {
    item(id, author, body, ItemKind::Comment)
}

pub(crate) fn message(id: &str, author: &str, body: &str) -> PlatformItem {
    item(id, author, body, ItemKind::Message)
}

/// A persisted pending LTC tip, created an hour ago.
pub(crate) fn pending_tip(id: &str, from: &str, to: &str, amount: Decimal) -> Action {
    let source = SourceRef {
        message_id: id.to_string(),
        permalink: None,
        channel: None,
        created_at: Utc::now() - Duration::hours(1),
        kind: ItemKind::Comment,
    };
    let mut action = Action::new(ActionType::Givetip, user(from), source);
    action.destination = Some(Destination::User(user(to)));
    action.coin = Some(ltc());
    action.coin_value = Some(amount);
    action.fiat = Some(FiatUnit::new("usd").unwrap());
    action.state = ActionState::Pending;
    action
}
