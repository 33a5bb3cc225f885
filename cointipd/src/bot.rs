//! The polling bot.
//!
//! One pass:
//!
//! 1. Return escrow of pending tips older than the expiry age
//! 2. Process unread inbox items, marking each read afterwards
//! 3. Process new comments oldest-first, then advance the high-water mark
//!
//! Items are handled strictly one at a time. A fatal execution error aborts
//! the pass before the item is marked read or the high-water mark moves, so
//! a restarted bot sees the item again and the idempotency guard settles it.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use cointip_domain::Username;
use cointip_exec::{ActionResult, Notice, PlatformItem, Services, TipExecutor};
use cointip_store::LAST_PROCESSED_COMMENT_TIME;

use crate::config::BotConfig;
use crate::error::{DaemonError, DaemonResult};

/// Counts for one polling pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Pending tips returned to their senders
    pub expired: usize,
    /// Inbox items looked at
    pub messages: usize,
    /// New comments looked at
    pub comments: usize,
    /// Items that produced an action record
    pub actions: usize,
}

/// Drives platform items through the executor.
pub struct Bot {
    executor: TipExecutor,
    username: Username,
    config: BotConfig,
}

impl Bot {
    /// Create a bot over `services`.
    pub fn new(services: Services, config: BotConfig) -> DaemonResult<Self> {
        let username = config
            .username
            .clone()
            .unwrap_or_else(|| services.settings.escrow_account.clone());
        Ok(Self {
            executor: TipExecutor::new(services)?,
            username,
            config,
        })
    }

    /// The executor driven by this bot
    pub fn executor(&self) -> &TipExecutor {
        &self.executor
    }

    /// The bot's own account name
    pub fn username(&self) -> &Username {
        &self.username
    }

    /// Run one polling pass.
    ///
    /// # Errors
    /// `Platform` when a listing is unavailable after retries (the pass can
    /// be retried later); anything else is fatal.
    pub async fn run_once(&self) -> DaemonResult<PassReport> {
        let mut report = PassReport {
            expired: self.expire().await?,
            ..PassReport::default()
        };
        self.check_inbox(&mut report).await?;
        self.check_comments(&mut report).await?;

        if report != PassReport::default() {
            info!(
                expired = report.expired,
                messages = report.messages,
                comments = report.comments,
                actions = report.actions,
                "Pass complete"
            );
        }
        Ok(report)
    }

    /// Expire pending tips older than the configured age.
    pub async fn expire(&self) -> DaemonResult<usize> {
        let age = chrono::Duration::from_std(self.config.pending_expiry)
            .map_err(|e| DaemonError::Config(format!("Invalid pending expiry: {}", e)))?;
        Ok(self.executor.expire_pending(Utc::now() - age).await?)
    }

    async fn check_inbox(&self, report: &mut PassReport) -> DaemonResult<()> {
        let services = self.executor.services();
        let mut items = services.platform.unread_messages(self.config.batch_limit).await?;
        items.sort_by_key(|item| item.created_at);

        for item in items {
            report.messages += 1;
            if let Some(result) = self.handle(&item).await? {
                if result == ActionResult::NotACommand && services.settings.messages.sorry {
                    if let Err(e) = services.platform.reply(&item.id, &Notice::Sorry.text()).await {
                        warn!(item_id = %item.id, error = %e, "Could not send sorry reply");
                    }
                }
                if records_action(&result) {
                    report.actions += 1;
                }
            }
            services.platform.mark_read(&item.id).await?;
        }
        Ok(())
    }

    async fn check_comments(&self, report: &mut PassReport) -> DaemonResult<()> {
        let services = self.executor.services();
        let values = services.store.values();
        let high_water = values
            .get(LAST_PROCESSED_COMMENT_TIME)
            .await?
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);

        let mut comments: Vec<PlatformItem> = services
            .platform
            .recent_comments(self.config.batch_limit)
            .await?
            .into_iter()
            .filter(|c| c.created_at.timestamp() > high_water)
            .collect();
        comments.sort_by_key(|c| c.created_at);

        let mut newest: Option<DateTime<Utc>> = None;
        for comment in comments {
            report.comments += 1;
            if let Some(result) = self.handle(&comment).await? {
                if records_action(&result) {
                    report.actions += 1;
                }
            }
            newest = Some(comment.created_at);
        }

        // Only after the whole batch; a crash mid-batch rescans it
        if let Some(newest) = newest {
            values
                .set(LAST_PROCESSED_COMMENT_TIME, &newest.timestamp().to_string())
                .await?;
            debug!(high_water = newest.timestamp(), "Comment checkpoint advanced");
        }
        Ok(())
    }

    /// Handle one item unless it is the bot's own or from a banned user.
    async fn handle(&self, item: &PlatformItem) -> DaemonResult<Option<ActionResult>> {
        let Some(author) = &item.author else {
            debug!(item_id = %item.id, "Skipping item without author");
            return Ok(None);
        };
        if author == &self.username {
            return Ok(None);
        }
        if self.executor.services().settings.is_banned(author) {
            warn!(item_id = %item.id, %author, "Ignoring banned user");
            return Ok(None);
        }

        let result = self.executor.handle(item).await?;
        debug!(item_id = %item.id, ?result, "Item handled");
        Ok(Some(result))
    }
}

fn records_action(result: &ActionResult) -> bool {
    matches!(
        result,
        ActionResult::Completed | ActionResult::Pending | ActionResult::Failed(_)
    )
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{parse_tip_settings, Config};
    use chrono::Duration;
    use cointip_domain::{CoinUnit, ItemKind};
    use cointip_exec::{StaticRates, StubLedger, StubPlatform};
    use cointip_store::MemoryStore;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    struct Fixture {
        bot: Bot,
        ledger: Arc<StubLedger>,
        platform: Arc<StubPlatform>,
        services: Services,
    }

    fn fixture() -> Fixture {
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
        Fixture {
            bot: Bot::new(services.clone(), Config::test().bot).unwrap(),
            ledger,
            platform,
            services,
        }
    }

    fn user(name: &str) -> Username {
        Username::new(name).unwrap()
    }

    fn item(id: &str, author: &str, body: &str, kind: ItemKind, age_secs: i64) -> PlatformItem {
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

    #[tokio::test]
    async fn test_inbox_items_are_marked_read() {
        let f = fixture();
        f.platform.push_message(item("m1", "alice", "+register", ItemKind::Message, 10));
        f.platform.push_message(item("m2", "spambot", "+register", ItemKind::Message, 5));
        f.platform.push_message(item("m3", "cointipbot", "+info", ItemKind::Message, 1));

        let report = f.bot.run_once().await.unwrap();
        assert_eq!(report.messages, 3);
        assert_eq!(report.actions, 1);
        assert!(["m1", "m2", "m3"].iter().all(|id| f.platform.is_read(id)));

        // Banned and own items produce nothing
        assert!(f.platform.replies_to("m2").is_empty());
        assert!(f.platform.replies_to("m3").is_empty());
        assert!(f.bot.executor().registrar().is_registered(&user("alice")).await.unwrap());
    }

    #[tokio::test]
    async fn test_unrecognised_message_gets_sorry() {
        let f = fixture();
        f.platform.push_message(item("m1", "alice", "hello bot", ItemKind::Message, 1));

        f.bot.run_once().await.unwrap();
        assert_eq!(f.platform.replies_to("m1"), vec![Notice::Sorry.text()]);
    }

    #[tokio::test]
    async fn test_comments_oldest_first_and_checkpointed() {
        let f = fixture();
        let ltc = CoinUnit::new("ltc").unwrap();
        for name in ["alice", "bob"] {
            f.bot.executor().registrar().register(&user(name)).await.unwrap();
        }
        f.ledger.deposit(&ltc, &user("alice"), dec!(1.0), 6);

        // The newer tip would fail for lack of funds if processed first
        f.platform.push_comment(item("c1", "bob", "+tip /u/alice 0.5 ltc", ItemKind::Comment, 60));
        f.platform.push_comment(item("c2", "alice", "+tip /u/bob 1 ltc", ItemKind::Comment, 120));

        let report = f.bot.run_once().await.unwrap();
        assert_eq!(report.comments, 2);
        assert_eq!(f.ledger.balance_of(&ltc, &user("alice")), dec!(0.5));
        assert_eq!(f.ledger.balance_of(&ltc, &user("bob")), dec!(0.5));

        let checkpoint = f
            .services
            .store
            .values()
            .get(LAST_PROCESSED_COMMENT_TIME)
            .await
            .unwrap()
            .unwrap();
        assert!(checkpoint.parse::<i64>().unwrap() > 0);

        // Nothing new on the next pass
        let report = f.bot.run_once().await.unwrap();
        assert_eq!(report.comments, 0);
    }

    #[tokio::test]
    async fn test_platform_outage_is_not_fatal() {
        let f = fixture();
        f.platform
            .fail_next_calls(vec![cointip_exec::PlatformError::Transient("503".into())]);

        let result = f.bot.run_once().await;
        match result {
            Err(e) => assert!(!e.is_fatal()),
            Ok(_) => panic!("expected platform error"),
        }
    }
}
