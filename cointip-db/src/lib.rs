//! Schema lifecycle for the cointip store.
//!
//! `migrate` applies the workspace migrations, `status` reports what the bot
//! would see on startup (schema version, comment checkpoint, pending escrow
//! per coin), and `init_checkpoints` seeds the checkpoint row.

mod init;

pub use init::init_checkpoints;

use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use tracing::{info, warn};

use cointip_store::LAST_PROCESSED_COMMENT_TIME;

/// Result type for DB operations.
pub type Result<T> = std::result::Result<T, anyhow::Error>;

/// Apply pending migrations from the workspace `migrations` directory.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    info!("Applying cointip migrations");
    sqlx::migrate!("../migrations").run(pool).await?;
    info!("Schema up to date");
    Ok(())
}

/// Most recent row of `_sqlx_migrations`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMigration {
    pub version: i64,
    pub description: String,
    pub success: bool,
}

/// Snapshot of the store as the bot would find it on startup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DbStatus {
    /// `None` when the migration table is missing or empty
    pub latest_migration: Option<AppliedMigration>,
    /// Raw `last_processed_comment_time` value
    pub checkpoint: Option<String>,
    pub registered_users: i64,
    /// (state, count), ordered by state
    pub actions_by_state: Vec<(String, i64)>,
    /// (coin, total) of pending tips, i.e. what escrow must hold
    pub pending_by_coin: Vec<(String, Decimal)>,
}

impl DbStatus {
    /// Conditions that would make the bot refuse to start or misbehave.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        match &self.latest_migration {
            None => warnings.push("schema not migrated (run `cointipd db migrate`)".to_string()),
            Some(m) if !m.success => warnings.push(format!(
                "migration v{} ({}) did not complete",
                m.version, m.description
            )),
            Some(_) => {}
        }
        if self.latest_migration.is_some() && self.checkpoint.is_none() {
            warnings.push(
                "no comment checkpoint; the first pass scans every visible comment \
                 (run `cointipd db init --start-from SECS`)"
                    .to_string(),
            );
        }
        warnings
    }
}

/// Gather a [`DbStatus`]. A database without the migration table yields a
/// status with only `latest_migration: None`.
pub async fn collect_status(pool: &PgPool) -> Result<DbStatus> {
    let one: i32 = sqlx::query_scalar("SELECT 1").fetch_one(pool).await?;
    if one != 1 {
        anyhow::bail!("Database connectivity check failed");
    }

    let latest = sqlx::query(
        r#"
        SELECT version, description, success
        FROM _sqlx_migrations
        ORDER BY version DESC
        LIMIT 1
        "#,
    )
    .fetch_optional(pool)
    .await;

    let latest_migration = match latest {
        Ok(row) => row.map(|row| AppliedMigration {
            version: row.get("version"),
            description: row.get("description"),
            success: row.get("success"),
        }),
        // Fresh database: nothing else to read yet
        Err(e) if e.to_string().contains("_sqlx_migrations") => return Ok(DbStatus::default()),
        Err(e) => return Err(e.into()),
    };
    if latest_migration.is_none() {
        return Ok(DbStatus::default());
    }

    let checkpoint: Option<String> =
        sqlx::query_scalar("SELECT value FROM bot_values WHERE key = $1")
            .bind(LAST_PROCESSED_COMMENT_TIME)
            .fetch_optional(pool)
            .await?;

    let registered_users: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(pool)
        .await?;

    let actions_by_state: Vec<(String, i64)> = sqlx::query(
        "SELECT state, COUNT(*) AS n FROM actions GROUP BY state ORDER BY state",
    )
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(|row| (row.get("state"), row.get("n")))
    .collect();

    let pending_by_coin: Vec<(String, Decimal)> = sqlx::query(
        r#"
        SELECT coin, SUM(coin_value) AS total
        FROM actions
        WHERE action_type = 'givetip' AND state = 'pending' AND coin IS NOT NULL
        GROUP BY coin
        ORDER BY coin
        "#,
    )
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(|row| {
        let total: Option<Decimal> = row.get("total");
        (row.get("coin"), total.unwrap_or(Decimal::ZERO))
    })
    .collect();

    Ok(DbStatus {
        latest_migration,
        checkpoint,
        registered_users,
        actions_by_state,
        pending_by_coin,
    })
}

/// Log the store status for `cointipd db status`.
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let report = collect_status(pool).await?;

    if let Some(m) = &report.latest_migration {
        info!(version = m.version, description = %m.description, "Schema version");
        info!(
            checkpoint = report.checkpoint.as_deref().unwrap_or("-"),
            users = report.registered_users,
            "Bot state"
        );
        for (state, n) in &report.actions_by_state {
            info!(%state, count = n, "Actions");
        }
        for (coin, total) in &report.pending_by_coin {
            info!(%coin, %total, "Pending tips held in escrow");
        }
    }
    for warning in report.warnings() {
        warn!("{}", warning);
    }
    Ok(report)
}
