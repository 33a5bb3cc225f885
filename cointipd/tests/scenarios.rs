//! End-to-end tip scenarios driven through the polling bot.
//!
//! Each test wires the bot over stub ledger, stub platform and in-memory
//! store, posts items the way users would, and checks balances, action
//! states and the notices the users received.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use cointip_domain::{Action, ActionState, CoinUnit, ItemKind, Username};
use cointip_exec::{escrow_status, LedgerPort, PlatformItem, Services, StaticRates, StubLedger, StubPlatform};
use cointip_store::{ActionQuery, MemoryStore, LAST_PROCESSED_COMMENT_TIME};
use cointipd::{parse_tip_settings, Bot, BotConfig, Config};

struct World {
    bot: Bot,
    services: Services,
    ledger: Arc<StubLedger>,
    platform: Arc<StubPlatform>,
}

fn world_with(bot_config: BotConfig) -> World {
    let settings = parse_tip_settings(include_str!("../../config/tip.example.toml")).unwrap();
    let ledger = Arc::new(StubLedger::new());
    let platform = Arc::new(StubPlatform::new());
    let services = Services {
        ledger: ledger.clone(),
        platform: platform.clone(),
        rates: Arc::new(StaticRates::from_settings(&settings)),
        store: Arc::new(MemoryStore::new()),
        settings: Arc::new(settings),
    };
    World {
        bot: Bot::new(services.clone(), bot_config).unwrap(),
        services,
        ledger,
        platform,
    }
}

fn world() -> World {
    world_with(Config::test().bot)
}

fn ltc() -> CoinUnit {
    CoinUnit::new("ltc").unwrap()
}

fn user(name: &str) -> Username {
    Username::new(name).unwrap()
}

fn escrow() -> Username {
    user("cointipbot")
}

fn posted(id: &str, author: &str, body: &str, kind: ItemKind, age_secs: i64) -> PlatformItem {
    PlatformItem {
        id: id.to_string(),
        author: Some(user(author)),
        body: body.to_string(),
        kind,
        created_at: Utc::now() - Duration::seconds(age_secs),
        permalink: None,
        channel: Some("cointip".to_string()),
    }
}

impl World {
    async fn register(&self, name: &str) {
        self.bot.executor().registrar().register(&user(name)).await.unwrap();
    }

    async fn funded(&self, name: &str, amount: Decimal) {
        self.register(name).await;
        self.ledger.deposit(&ltc(), &user(name), amount, 6);
    }

    fn balance(&self, name: &str) -> Decimal {
        self.ledger.balance_of(&ltc(), &user(name))
    }

    async fn action(&self, message_id: &str) -> Action {
        let mut found = self
            .services
            .store
            .actions()
            .find(&ActionQuery::new().message_id(message_id))
            .await
            .unwrap();
        assert_eq!(found.len(), 1, "one action for {}", message_id);
        found.remove(0)
    }

    async fn checkpoint(&self) -> Option<String> {
        self.services
            .store
            .values()
            .get(LAST_PROCESSED_COMMENT_TIME)
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn test_tip_to_registered_user_completes() {
    let w = world();
    w.funded("alice", dec!(2.0)).await;
    w.register("bob").await;

    w.platform
        .push_comment(posted("c1", "alice", "+tip /u/bob 1.5 ltc", ItemKind::Comment, 30));
    w.bot.run_once().await.unwrap();

    assert_eq!(w.action("c1").await.state, ActionState::Completed);
    assert_eq!(w.balance("alice"), dec!(0.5));
    assert_eq!(w.balance("bob"), dec!(1.5));
    assert_eq!(w.balance("cointipbot"), dec!(0));
}

#[tokio::test]
async fn test_tip_to_unregistered_user_parks_then_accepts() {
    let w = world();
    w.funded("alice", dec!(2.0)).await;

    w.platform
        .push_comment(posted("c1", "alice", "+tip /u/bob 1.5 ltc", ItemKind::Comment, 30));
    w.bot.run_once().await.unwrap();

    assert_eq!(w.action("c1").await.state, ActionState::Pending);
    assert_eq!(w.balance("alice"), dec!(0.5));
    assert_eq!(w.ledger.balance_of(&ltc(), &escrow()), dec!(1.5));

    w.platform
        .push_message(posted("m1", "bob", "+accept", ItemKind::Message, 5));
    w.bot.run_once().await.unwrap();

    assert_eq!(w.action("c1").await.state, ActionState::Completed);
    assert_eq!(w.action("m1").await.state, ActionState::Completed);
    assert_eq!(w.ledger.balance_of(&ltc(), &escrow()), dec!(0));
    assert_eq!(w.balance("bob"), dec!(1.5));
    assert!(w.platform.is_read("m1"));
}

#[tokio::test]
async fn test_pending_tip_expires_back_to_sender() {
    let w = world_with(BotConfig {
        pending_expiry: StdDuration::ZERO,
        ..Config::test().bot
    });
    w.funded("alice", dec!(2.0)).await;

    w.platform
        .push_comment(posted("c1", "alice", "+tip /u/bob 1.5 ltc", ItemKind::Comment, 30));

    // Expiry runs before the comment scan, so the tip survives its own pass
    let first = w.bot.run_once().await.unwrap();
    assert_eq!(first.expired, 0);
    assert_eq!(w.action("c1").await.state, ActionState::Pending);

    let second = w.bot.run_once().await.unwrap();
    assert_eq!(second.expired, 1);
    assert_eq!(w.action("c1").await.state, ActionState::Expired);
    assert_eq!(w.ledger.balance_of(&ltc(), &escrow()), dec!(0));
    assert_eq!(w.balance("alice"), dec!(2.0));
}

#[tokio::test]
async fn test_tip_below_minimum_fails_without_moving_funds() {
    let w = world();
    w.funded("alice", dec!(2.0)).await;
    w.register("bob").await;

    w.platform
        .push_comment(posted("c1", "alice", "+tip /u/bob 0.01 ltc", ItemKind::Comment, 30));
    w.bot.run_once().await.unwrap();

    assert_eq!(w.action("c1").await.state, ActionState::Failed);
    assert_eq!(w.balance("alice"), dec!(2.0));
    assert_eq!(w.balance("bob"), dec!(0));

    let notices = w.platform.messages_to(&user("alice"));
    assert_eq!(notices.len(), 1);
    assert!(notices[0].text.contains("below the minimum"));
}

#[tokio::test]
async fn test_escrow_covers_pending_tips_throughout() {
    let w = world();
    w.funded("alice", dec!(3.0)).await;
    w.funded("carol", dec!(1.0)).await;

    let tips = [
        ("c1", "alice", "+tip /u/bob 1 ltc", 50),
        ("c2", "carol", "+tip /u/dave 0.5 ltc", 40),
        ("c3", "alice", "+tip /u/carol 0.75 ltc", 30),
        ("c4", "alice", "+tip /u/dave 0.25 ltc", 20),
    ];
    for (id, author, body, age) in tips {
        w.platform.push_comment(posted(id, author, body, ItemKind::Comment, age));
    }
    w.bot.run_once().await.unwrap();

    let status = escrow_status(&w.services).await.unwrap();
    let ltc_status = status.iter().find(|s| s.coin == ltc()).unwrap();
    assert_eq!(ltc_status.pending_total, dec!(1.75));
    assert_eq!(ltc_status.escrow_balance, dec!(1.75));
    assert!(ltc_status.is_covered());

    // dave declines, bob accepts
    w.platform.push_message(posted("m1", "dave", "+decline", ItemKind::Message, 10));
    w.platform.push_message(posted("m2", "bob", "+accept", ItemKind::Message, 5));
    w.bot.run_once().await.unwrap();

    let status = escrow_status(&w.services).await.unwrap();
    assert!(status.iter().all(|s| s.pending_total == dec!(0) && s.is_covered()));

    // Internal moves never create or destroy funds
    assert_eq!(w.ledger.wallet_balance(&ltc()).await.unwrap(), dec!(4.0));
    assert_eq!(w.balance("alice"), dec!(1.25));
    assert_eq!(w.balance("carol"), dec!(1.75));
    assert_eq!(w.balance("bob"), dec!(1.0));
    assert_eq!(w.balance("dave"), dec!(0));
}

#[tokio::test]
async fn test_rescanned_comments_are_not_paid_twice() {
    let w = world();
    w.funded("alice", dec!(2.0)).await;
    w.register("bob").await;

    w.platform
        .push_comment(posted("c1", "alice", "+tip /u/bob 1 ltc", ItemKind::Comment, 30));
    w.bot.run_once().await.unwrap();
    assert_eq!(w.balance("bob"), dec!(1));

    // A crash before the checkpoint write means the batch is seen again
    w.services
        .store
        .values()
        .set(LAST_PROCESSED_COMMENT_TIME, "0")
        .await
        .unwrap();
    let report = w.bot.run_once().await.unwrap();

    assert_eq!(report.comments, 1);
    assert_eq!(report.actions, 0);
    assert_eq!(w.balance("alice"), dec!(1));
    assert_eq!(w.balance("bob"), dec!(1));
}

#[tokio::test]
async fn test_fatal_error_leaves_checkpoint_for_restart() {
    let w = world();
    w.funded("alice", dec!(2.0)).await;
    w.register("bob").await;

    w.platform
        .push_comment(posted("c1", "alice", "+tip /u/bob 0.5 ltc", ItemKind::Comment, 60));
    w.platform
        .push_comment(posted("c2", "alice", "+tip /u/bob 0.25 ltc", ItemKind::Comment, 30));
    w.ledger.set_fail_next(true);

    let result = w.bot.run_once().await;
    match result {
        Err(e) => assert!(e.is_fatal()),
        Ok(report) => panic!("expected fatal error, got {:?}", report),
    }
    assert_eq!(w.checkpoint().await, None);
    assert_eq!(w.balance("bob"), dec!(0));

    // A restarted bot over the same store picks the batch up again
    let restarted = Bot::new(w.services.clone(), Config::test().bot).unwrap();
    restarted.run_once().await.unwrap();

    assert_eq!(w.action("c2").await.state, ActionState::Completed);
    assert!(w.checkpoint().await.is_some());
    let paid = w.balance("bob");
    assert!(paid == dec!(0.25) || paid == dec!(0.75), "bob has {}", paid);
    assert_eq!(w.balance("alice") + paid, dec!(2.0));
}
