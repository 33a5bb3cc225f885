//! Checkpoint seeding.

use sqlx::PgPool;
use tracing::info;

use cointip_store::LAST_PROCESSED_COMMENT_TIME;

use super::Result;

/// Seed the checkpoint rows the bot reads at startup.
///
/// `start_from` is the comment high-water mark in Unix seconds; comments
/// created at or before it are never scanned. Existing checkpoints are kept
/// (INSERT ... ON CONFLICT DO NOTHING), so this is safe to re-run.
///
/// # Returns
///
/// Whether a new checkpoint row was written.
pub async fn init_checkpoints(pool: &PgPool, start_from: Option<i64>) -> Result<bool> {
    let value = start_from.unwrap_or(0).to_string();

    let result = sqlx::query(
        r#"
        INSERT INTO bot_values (key, value, updated_at)
        VALUES ($1, $2, NOW())
        ON CONFLICT (key) DO NOTHING
        "#,
    )
    .bind(LAST_PROCESSED_COMMENT_TIME)
    .bind(&value)
    .execute(pool)
    .await?;

    let created = result.rows_affected() > 0;
    if created {
        info!(key = LAST_PROCESSED_COMMENT_TIME, %value, "Checkpoint initialized");
    } else {
        info!(key = LAST_PROCESSED_COMMENT_TIME, "Checkpoint already present");
    }
    Ok(created)
}
