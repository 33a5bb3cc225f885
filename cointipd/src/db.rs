//! Database CLI subcommands for cointipd.
//!
//! Provides `db migrate`, `db status`, and `db init` commands.

use anyhow::{anyhow, Result};
use std::env;
use tracing::info;

use cointip_db::{init_checkpoints, migrate, status};

/// Run database CLI subcommands.
///
/// Supported commands:
/// - `cointipd db migrate` - Run pending migrations
/// - `cointipd db status` - Report schema version, checkpoint and pending escrow
/// - `cointipd db init [--start-from SECS]` - Seed the comment checkpoint
pub async fn run_db_command(args: Vec<String>) -> Result<()> {
    if args.len() < 3 {
        return Err(anyhow!("Usage: cointipd db <migrate|status|init> [options]"));
    }

    let database_url = env::var("DATABASE_URL")
        .map_err(|_| anyhow!("DATABASE_URL environment variable is required for db commands"))?;

    let pool = sqlx::PgPool::connect(&database_url).await?;

    match args[2].as_str() {
        "migrate" => {
            migrate(&pool).await?;
        },
        "status" => {
            status(&pool).await?;
        },
        "init" => {
            let start_from = match args.get(3).map(String::as_str) {
                None => None,
                Some("--start-from") => {
                    let value = args
                        .get(4)
                        .ok_or_else(|| anyhow!("--start-from requires a value"))?;
                    Some(value.parse::<i64>()?)
                },
                Some(other) => return Err(anyhow!("Unknown option: {}", other)),
            };

            let created = init_checkpoints(&pool, start_from).await?;
            info!(created, "Checkpoints initialized");
        },
        _ => {
            return Err(anyhow!("Unknown db command: {}. Use migrate, status, or init", args[2]));
        },
    }

    Ok(())
}
