//! Cointip Daemon
//!
//! Polls the platform for tip commands and executes them against the coin
//! daemons.
//!
//! # Usage
//!
//! ```bash
//! # Start with default configuration
//! cargo run -p cointipd
//!
//! # Start with custom environment
//! COINTIP_ENV=test COINTIP_API_PORT=8081 cargo run -p cointipd
//!
//! # Database lifecycle (postgres feature)
//! cargo run -p cointipd --features postgres -- db migrate
//! ```
//!
//! # Environment Variables
//!
//! - `COINTIP_ENV`: Environment (test, development, production)
//! - `COINTIP_API_HOST`: API host (default: 0.0.0.0)
//! - `COINTIP_API_PORT`: API port (default: 8080)
//! - `COINTIP_TIP_CONFIG`: Tip configuration file (default: config/tip.toml)
//! - `COINTIP_BOT_USERNAME`: Bot account (default: the escrow account)
//! - `COINTIP_POLL_INTERVAL_SECS`: Pause between passes (default: 30)
//! - `COINTIP_PENDING_EXPIRY_HOURS`: Pending tip lifetime (default: 72)
//! - `COINTIP_RPC_<COIN>_URL`, `_USER`, `_PASSWORD`: Coin daemon endpoints
//! - `DATABASE_URL`: PostgreSQL store (postgres feature)

use cointipd::{Config, Daemon};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("cointipd=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.get(1).map(String::as_str) == Some("db") {
        return run_db(args).await;
    }

    // Load configuration
    let config = Config::from_env()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.environment,
        api_host = %config.api.host,
        api_port = config.api.port,
        tip_config = %config.tip_config.display(),
        "Cointip Daemon"
    );

    // Create and run daemon
    let daemon = Daemon::from_config(config).await?;
    daemon.run().await?;

    Ok(())
}

#[cfg(feature = "postgres")]
async fn run_db(args: Vec<String>) -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    cointipd::db::run_db_command(args).await
}

#[cfg(not(feature = "postgres"))]
async fn run_db(_args: Vec<String>) -> anyhow::Result<()> {
    anyhow::bail!("db commands need cointipd built with the postgres feature")
}
