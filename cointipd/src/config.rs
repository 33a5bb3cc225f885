//! Daemon configuration.
//!
//! Runtime settings come from environment variables (a `.env` file is
//! honoured). The tip configuration (coins, fiats, keywords, commands) is a
//! TOML file whose path is itself configured.

use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use cointip_connectors::DaemonEndpoint;
use cointip_domain::{CoinUnit, TipSettings, Username};
use cointip_exec::RetryPolicy;

use crate::error::{DaemonError, DaemonResult};

// =============================================================================
// Configuration
// =============================================================================

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// API server configuration
    pub api: ApiConfig,

    /// Polling bot configuration
    pub bot: BotConfig,

    /// Platform retry policy
    pub retry: RetryPolicy,

    /// Coin daemon request timeout
    pub rpc_timeout: Duration,

    /// Path of the TOML tip configuration
    pub tip_config: PathBuf,

    /// PostgreSQL URL; the in-memory store is used when absent
    pub database_url: Option<String>,

    /// Run the escrow self-checks before the first pass
    pub self_checks: bool,

    /// Environment (test, development, production)
    pub environment: Environment,
}

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
}

/// Polling bot configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// The bot's own platform account, whose items are never processed.
    /// Defaults to the escrow account of the tip configuration.
    pub username: Option<Username>,
    /// Pause between polling passes
    pub poll_interval: Duration,
    /// Maximum items fetched per listing
    pub batch_limit: usize,
    /// Age after which a pending tip is returned to its sender
    pub pending_expiry: Duration,
}

/// Environment type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Test environment (uses stubs)
    Test,
    /// Development environment
    Development,
    /// Production environment
    Production,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> DaemonResult<Self> {
        // Load .env file if present (ignore errors)
        let _ = dotenvy::dotenv();

        let environment = Self::load_environment()?;
        let api = Self::load_api_config()?;
        let bot = Self::load_bot_config()?;

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy::new(
            load_env("COINTIP_RETRY_MAX_ATTEMPTS", defaults.max_attempts)?,
            Duration::from_secs(load_env(
                "COINTIP_RETRY_INITIAL_BACKOFF_SECS",
                defaults.initial_backoff.as_secs(),
            )?),
            Duration::from_secs(load_env(
                "COINTIP_RETRY_MAX_BACKOFF_SECS",
                defaults.max_backoff.as_secs(),
            )?),
        );

        Ok(Self {
            api,
            bot,
            retry,
            rpc_timeout: Duration::from_secs(load_env("COINTIP_RPC_TIMEOUT_SECS", 30)?),
            tip_config: env::var("COINTIP_TIP_CONFIG")
                .map_or_else(|_| PathBuf::from("config/tip.toml"), PathBuf::from),
            database_url: env::var("DATABASE_URL").ok().filter(|url| !url.is_empty()),
            self_checks: load_env("COINTIP_SELF_CHECKS", true)?,
            environment,
        })
    }

    /// Create test configuration.
    pub fn test() -> Self {
        Self {
            api: ApiConfig {
                host: "127.0.0.1".to_string(),
                port: 0, // Let OS assign port
            },
            bot: BotConfig {
                poll_interval: Duration::from_millis(10),
                batch_limit: 100,
                ..BotConfig::default()
            },
            retry: RetryPolicy::new(1, Duration::ZERO, Duration::ZERO),
            rpc_timeout: Duration::from_secs(5),
            tip_config: PathBuf::from("../config/tip.example.toml"),
            database_url: None,
            self_checks: true,
            environment: Environment::Test,
        }
    }

    /// Endpoint of the coin daemon for `coin`, from
    /// `COINTIP_RPC_<COIN>_URL`, `_USER` and `_PASSWORD`.
    ///
    /// Returns `None` when no URL is set for the coin.
    pub fn daemon_endpoint(&self, coin: &CoinUnit) -> DaemonResult<Option<DaemonEndpoint>> {
        let prefix = format!("COINTIP_RPC_{}", coin.as_str().to_ascii_uppercase());
        let Ok(url) = env::var(format!("{}_URL", prefix)) else {
            return Ok(None);
        };
        let user = env::var(format!("{}_USER", prefix))
            .map_err(|_| DaemonError::Config(format!("{}_USER is required with {}_URL", prefix, prefix)))?;
        let password = env::var(format!("{}_PASSWORD", prefix)).map_err(|_| {
            DaemonError::Config(format!("{}_PASSWORD is required with {}_URL", prefix, prefix))
        })?;
        Ok(Some(
            DaemonEndpoint::new(url, user, password).with_timeout(self.rpc_timeout),
        ))
    }

    fn load_environment() -> DaemonResult<Environment> {
        let env_str = env::var("COINTIP_ENV").unwrap_or_else(|_| "development".to_string());

        match env_str.to_lowercase().as_str() {
            "test" => Ok(Environment::Test),
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(DaemonError::Config(format!(
                "Invalid COINTIP_ENV: {}. Expected: test, development, production",
                other
            ))),
        }
    }

    fn load_api_config() -> DaemonResult<ApiConfig> {
        let host = env::var("COINTIP_API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = load_env("COINTIP_API_PORT", 8080u16)?;

        Ok(ApiConfig { host, port })
    }

    fn load_bot_config() -> DaemonResult<BotConfig> {
        let defaults = BotConfig::default();

        let username = match env::var("COINTIP_BOT_USERNAME") {
            Ok(name) => Some(Username::new(&name)?),
            Err(_) => defaults.username,
        };
        let batch_limit = load_env("COINTIP_BATCH_LIMIT", defaults.batch_limit)?;
        if batch_limit == 0 {
            return Err(DaemonError::Config("COINTIP_BATCH_LIMIT must be positive".to_string()));
        }

        Ok(BotConfig {
            username,
            poll_interval: Duration::from_secs(load_env(
                "COINTIP_POLL_INTERVAL_SECS",
                defaults.poll_interval.as_secs(),
            )?),
            batch_limit,
            pending_expiry: Duration::from_secs(
                load_env::<u64>("COINTIP_PENDING_EXPIRY_HOURS", 72)? * 3600,
            ),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            bot: BotConfig::default(),
            retry: RetryPolicy::default(),
            rpc_timeout: Duration::from_secs(30),
            tip_config: PathBuf::from("config/tip.toml"),
            database_url: None,
            self_checks: true,
            environment: Environment::Development,
        }
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            username: None,
            poll_interval: Duration::from_secs(30),
            batch_limit: 100,
            pending_expiry: Duration::from_secs(72 * 3600),
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Test => write!(f, "test"),
            Environment::Development => write!(f, "development"),
            Environment::Production => write!(f, "production"),
        }
    }
}

/// Read an environment variable, falling back to `default` when unset.
fn load_env<T: FromStr>(key: &str, default: T) -> DaemonResult<T> {
    match env::var(key) {
        Ok(val) => val
            .trim()
            .parse()
            .map_err(|_| DaemonError::Config(format!("Invalid {} value: {}", key, val))),
        Err(_) => Ok(default),
    }
}

// =============================================================================
// Tip configuration
// =============================================================================

/// Parse and validate a TOML tip configuration.
pub fn parse_tip_settings(text: &str) -> DaemonResult<TipSettings> {
    let settings: TipSettings = toml::from_str(text)
        .map_err(|e| DaemonError::Config(format!("Invalid tip configuration: {}", e)))?;
    settings.validate()?;
    Ok(settings)
}

/// Load the tip configuration file at `path`.
pub fn load_tip_settings(path: &Path) -> DaemonResult<TipSettings> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        DaemonError::Config(format!("Cannot read tip configuration {}: {}", path.display(), e))
    })?;
    parse_tip_settings(&text)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = include_str!("../../config/tip.example.toml");

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.api.port, 8080);
        assert_eq!(config.environment, Environment::Development);
        assert!(config.bot.username.is_none());
        assert_eq!(config.bot.pending_expiry, Duration::from_secs(259_200));
    }

    #[test]
    fn test_test_config() {
        let config = Config::test();

        assert_eq!(config.api.port, 0);
        assert_eq!(config.environment, Environment::Test);
        assert_eq!(config.retry.max_attempts, 1);
    }

    #[test]
    fn test_example_tip_config_is_valid() {
        let settings = parse_tip_settings(EXAMPLE).unwrap();
        assert_eq!(settings.active_coins().len(), 2);
        assert_eq!(settings.escrow_account.as_str(), "cointipbot");
    }

    #[test]
    fn test_example_file_loads() {
        let settings = load_tip_settings(&Config::test().tip_config).unwrap();
        assert_eq!(settings.default_fiat.as_str(), "usd");
    }

    #[test]
    fn test_broken_tip_config_is_rejected() {
        let result = parse_tip_settings("escrow_account = 42");
        assert!(matches!(result, Err(DaemonError::Config(_))));

        let missing = Path::new("/nonexistent/tip.toml");
        assert!(matches!(load_tip_settings(missing), Err(DaemonError::Config(_))));
    }

    #[test]
    fn test_environment_display() {
        assert_eq!(Environment::Test.to_string(), "test");
        assert_eq!(Environment::Development.to_string(), "development");
        assert_eq!(Environment::Production.to_string(), "production");
    }
}
