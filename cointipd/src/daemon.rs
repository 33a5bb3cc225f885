//! Daemon: Main runtime orchestrator.
//!
//! The Daemon ties together all components:
//! - Bot (polling passes over the platform)
//! - Executor (action state machine, via the bot)
//! - API Server (HTTP status endpoints)
//!
//! # Lifecycle
//!
//! 1. Load configuration and the tip configuration file
//! 2. Build ledger, store and platform adapters
//! 3. Run escrow self-checks
//! 4. Start API server
//! 5. Polling loop until SIGINT, or until a fatal error
//!
//! A fatal error ends `run` with the error. Restarting is the recovery: the
//! idempotency guard settles whatever item was in flight.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info, warn};

use cointip_connectors::CoinDaemons;
use cointip_domain::TipSettings;
use cointip_exec::{
    run_self_checks, LedgerPort, RetryingPlatform, Services, StaticRates, StubLedger, StubPlatform,
};
use cointip_store::{MemoryStore, Store};

use crate::api::{create_router, ApiState};
use crate::bot::Bot;
use crate::config::{load_tip_settings, Config, Environment};
use crate::error::{DaemonError, DaemonResult};

// =============================================================================
// Daemon
// =============================================================================

/// The main cointip daemon.
pub struct Daemon {
    /// Configuration
    config: Config,
    /// Polling bot
    bot: Bot,
}

impl Daemon {
    /// Create a daemon over the given services.
    pub fn new(config: Config, services: Services) -> DaemonResult<Self> {
        let bot = Bot::new(services, config.bot.clone())?;
        Ok(Self { config, bot })
    }

    /// Create a new daemon with stub components (for testing/development).
    pub fn new_stub(config: Config, settings: TipSettings) -> DaemonResult<Self> {
        let services = Services {
            ledger: Arc::new(StubLedger::new()),
            platform: Arc::new(StubPlatform::new()),
            rates: Arc::new(StaticRates::from_settings(&settings)),
            store: Arc::new(MemoryStore::new()),
            settings: Arc::new(settings),
        };
        Self::new(config, services)
    }

    /// Build a daemon from configuration, choosing real adapters where
    /// they are configured.
    pub async fn from_config(config: Config) -> DaemonResult<Self> {
        let settings = load_tip_settings(&config.tip_config)?;
        let ledger = build_ledger(&config, &settings)?;
        let store = build_store(&config).await?;

        // No platform connector ships with the daemon; the stub keeps the
        // loop, the ledger and the API exercisable.
        warn!("No platform connector configured, using the in-memory platform");
        let platform = Arc::new(RetryingPlatform::new(
            Arc::new(StubPlatform::new()),
            config.retry,
        ));

        let services = Services {
            ledger,
            platform,
            rates: Arc::new(StaticRates::from_settings(&settings)),
            store,
            settings: Arc::new(settings),
        };
        Self::new(config, services)
    }

    /// The polling bot
    pub fn bot(&self) -> &Bot {
        &self.bot
    }

    /// Run the daemon.
    ///
    /// This method blocks until shutdown is requested (SIGINT) or a fatal
    /// error occurs.
    pub async fn run(self) -> DaemonResult<()> {
        info!(
            version = env!("CARGO_PKG_VERSION"),
            environment = %self.config.environment,
            bot = %self.bot.username(),
            "Starting cointip daemon"
        );

        // 1. Escrow self-checks
        if self.config.self_checks {
            self.self_checks().await?;
        }

        // 2. Start API server
        let api_addr = self.start_api_server().await?;
        info!(%api_addr, "API server started");

        // 3. Polling loop
        info!(poll_interval = ?self.config.bot.poll_interval, "Entering polling loop");
        loop {
            // A pass is never interrupted; shutdown waits for it to finish
            match self.bot.run_once().await {
                Ok(_) => {}
                Err(e) if !e.is_fatal() => {
                    warn!(error = %e, "Pass skipped");
                }
                Err(e) => {
                    error!(error = %e, "Fatal error, stopping");
                    return Err(e);
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.bot.poll_interval) => {}

                // Handle shutdown signals
                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal");
                    break;
                }
            }
        }

        info!("Shutdown complete");
        Ok(())
    }

    /// Run the escrow self-checks and log coverage per coin.
    async fn self_checks(&self) -> DaemonResult<()> {
        let executor = self.bot.executor();
        let status = run_self_checks(executor.services(), executor.registrar()).await?;
        for coin in status {
            info!(
                coin = %coin.coin,
                escrow = %coin.escrow_balance,
                pending = %coin.pending_total,
                "Escrow covered"
            );
        }
        Ok(())
    }

    /// Start the API server.
    async fn start_api_server(&self) -> DaemonResult<SocketAddr> {
        let state = Arc::new(ApiState {
            services: self.bot.executor().services().clone(),
        });

        let router = create_router(state);
        let addr = format!("{}:{}", self.config.api.host, self.config.api.port);

        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| DaemonError::Config(format!("Failed to bind to {}: {}", addr, e)))?;

        let local_addr = listener
            .local_addr()
            .map_err(|e| DaemonError::Config(format!("Failed to get local address: {}", e)))?;

        // Spawn the server task
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                error!(error = %e, "API server error");
            }
        });

        Ok(local_addr)
    }
}

// =============================================================================
// Adapter selection
// =============================================================================

/// Coin daemons when every active coin has an endpoint, the stub ledger
/// otherwise (refused in production).
fn build_ledger(config: &Config, settings: &TipSettings) -> DaemonResult<Arc<dyn LedgerPort>> {
    let mut daemons = CoinDaemons::new();
    let mut missing = Vec::new();
    for spec in settings.active_coins() {
        match config.daemon_endpoint(&spec.unit)? {
            Some(endpoint) => daemons = daemons.with(spec.unit.clone(), endpoint),
            None => missing.push(spec.unit.to_string()),
        }
    }

    if missing.is_empty() {
        info!(coins = daemons.coins().count(), "Using coin daemons");
        return Ok(Arc::new(daemons));
    }
    if config.environment == Environment::Production {
        return Err(DaemonError::Config(format!(
            "No coin daemon endpoint for: {}",
            missing.join(", ")
        )));
    }
    warn!(missing = %missing.join(", "), "Coin daemon endpoints missing, using the in-memory ledger");
    Ok(Arc::new(StubLedger::new()))
}

#[cfg(feature = "postgres")]
async fn build_store(config: &Config) -> DaemonResult<Arc<dyn Store>> {
    let Some(url) = &config.database_url else {
        return memory_store(config);
    };
    let pool = sqlx::PgPool::connect(url)
        .await
        .map_err(|e| DaemonError::Config(format!("Database connection failed: {}", e)))?;
    info!("Using PostgreSQL store");
    Ok(Arc::new(cointip_store::PgStore::new(pool)))
}

#[cfg(not(feature = "postgres"))]
async fn build_store(config: &Config) -> DaemonResult<Arc<dyn Store>> {
    if config.database_url.is_some() {
        return Err(DaemonError::Config(
            "DATABASE_URL is set but cointipd was built without the postgres feature".to_string(),
        ));
    }
    memory_store(config)
}

/// The in-memory store loses the idempotency records on restart, so
/// production refuses it.
fn memory_store(config: &Config) -> DaemonResult<Arc<dyn Store>> {
    if config.environment == Environment::Production {
        return Err(DaemonError::Config(
            "DATABASE_URL is required in production".to_string(),
        ));
    }
    warn!("No database configured, using the in-memory store");
    Ok(Arc::new(MemoryStore::new()))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_tip_settings;
    use chrono::Utc;
    use cointip_domain::{CoinUnit, ItemKind, Username};
    use cointip_exec::{ExecError, PlatformItem};
    use rust_decimal_macros::dec;

    fn settings() -> TipSettings {
        parse_tip_settings(include_str!("../../config/tip.example.toml")).unwrap()
    }

    #[tokio::test]
    async fn test_daemon_stub_creation() {
        let daemon = Daemon::new_stub(Config::test(), settings()).unwrap();
        assert_eq!(daemon.bot().username().as_str(), "cointipbot");

        let report = daemon.bot().run_once().await.unwrap();
        assert_eq!(report, crate::bot::PassReport::default());
    }

    #[tokio::test]
    async fn test_daemon_api_server_start() {
        let daemon = Daemon::new_stub(Config::test(), settings()).unwrap();

        let addr = daemon.start_api_server().await.unwrap();

        // Server should be running on a port
        assert!(addr.port() > 0);

        // Can make a health check request
        let client = reqwest::Client::new();
        let response = client
            .get(format!("http://{}/health", addr))
            .send()
            .await
            .unwrap();

        assert!(response.status().is_success());
    }

    #[tokio::test]
    async fn test_self_checks_register_escrow() {
        let daemon = Daemon::new_stub(Config::test(), settings()).unwrap();

        daemon.self_checks().await.unwrap();
        let escrow = Username::new("cointipbot").unwrap();
        assert!(daemon.bot().executor().registrar().is_registered(&escrow).await.unwrap());
    }

    #[tokio::test]
    async fn test_run_stops_on_fatal_error() {
        let settings = settings();
        let ledger = Arc::new(StubLedger::new());
        let platform = Arc::new(StubPlatform::new());
        let services = Services {
            ledger: ledger.clone(),
            platform: platform.clone(),
            rates: Arc::new(StaticRates::from_settings(&settings)),
            store: Arc::new(MemoryStore::new()),
            settings: Arc::new(settings),
        };
        let config = Config {
            self_checks: false,
            ..Config::test()
        };
        let daemon = Daemon::new(config, services).unwrap();

        let alice = Username::new("alice").unwrap();
        daemon.bot().executor().registrar().register(&alice).await.unwrap();
        ledger.deposit(&CoinUnit::new("ltc").unwrap(), &alice, dec!(1), 6);
        platform.push_comment(PlatformItem {
            id: "c1".to_string(),
            author: Some(alice),
            body: "+tip /u/bob 0.5 ltc".to_string(),
            kind: ItemKind::Comment,
            created_at: Utc::now(),
            permalink: None,
            channel: None,
        });
        ledger.set_fail_next(true);

        let result = daemon.run().await;
        assert!(matches!(result, Err(DaemonError::Exec(ExecError::Ledger(_)))));
    }

    #[test]
    fn test_production_requires_coin_daemons() {
        let config = Config {
            environment: Environment::Production,
            ..Config::test()
        };
        // The example coins have no COINTIP_RPC_* variables in the test env
        let result = build_ledger(&config, &settings());
        assert!(matches!(result, Err(DaemonError::Config(_))));
    }

    #[test]
    fn test_production_refuses_memory_store() {
        let config = Config {
            environment: Environment::Production,
            ..Config::test()
        };
        assert!(matches!(memory_store(&config), Err(DaemonError::Config(_))));
        assert!(memory_store(&Config::test()).is_ok());
    }
}
