//! PostgreSQL store implementation.
//!
//! This module uses dynamic queries (sqlx::query) instead of compile-time
//! checked macros (sqlx::query!) to allow compilation without DATABASE_URL.
//!
//! Schema lives in `migrations/` at the workspace root:
//! - `actions`: the action log, unique on (action_type, message_id)
//! - `users` / `user_addresses`: registered users and one address per coin
//! - `bot_values`: process-wide checkpoints

use crate::error::StoreError;
use crate::repository::{
    check_write, ActionQuery, ActionRepository, Store, UserRepository, ValueRepository,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cointip_domain::{
    Action, ActionState, ActionType, CoinUnit, Destination, FiatUnit, ItemKind, SourceRef, User,
    Username,
};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use std::str::FromStr;
use tracing::debug;

const ACTION_COLUMNS: &str = "id, action_type, state, created_at, from_user, to_user, to_address, \
     coin, fiat, coin_value, fiat_value, transaction_id, message_id, permalink, channel, item_kind";

/// PostgreSQL-backed store.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Wrap an existing pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the underlying pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn decode<T, E: std::fmt::Display>(column: &str, result: Result<T, E>) -> Result<T, StoreError> {
    result.map_err(|e| StoreError::Deserialization(format!("column {}: {}", column, e)))
}

fn item_kind_str(kind: ItemKind) -> &'static str {
    match kind {
        ItemKind::Message => "message",
        ItemKind::Comment => "comment",
    }
}

fn parse_action_row(row: &PgRow) -> Result<Action, StoreError> {
    let action_type: String = row.try_get("action_type")?;
    let state: String = row.try_get("state")?;
    let from_user: String = row.try_get("from_user")?;
    let to_user: Option<String> = row.try_get("to_user")?;
    let to_address: Option<String> = row.try_get("to_address")?;
    let coin: Option<String> = row.try_get("coin")?;
    let fiat: Option<String> = row.try_get("fiat")?;
    let item_kind: String = row.try_get("item_kind")?;

    let to_user = to_user.map(|u| decode("to_user", Username::new(&u))).transpose()?;
    let destination = decode("to_user", Destination::from_parts(to_user, to_address))?;

    Ok(Action {
        id: row.try_get("id")?,
        action_type: decode("action_type", ActionType::from_str(&action_type))?,
        state: decode("state", ActionState::from_str(&state))?,
        from_user: decode("from_user", Username::new(&from_user))?,
        destination,
        coin: coin.map(|c| decode("coin", CoinUnit::new(&c))).transpose()?,
        fiat: fiat.map(|f| decode("fiat", FiatUnit::new(&f))).transpose()?,
        coin_value: row.try_get::<Option<Decimal>, _>("coin_value")?,
        fiat_value: row.try_get::<Option<Decimal>, _>("fiat_value")?,
        source: SourceRef {
            message_id: row.try_get("message_id")?,
            permalink: row.try_get("permalink")?,
            channel: row.try_get("channel")?,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            kind: match item_kind.as_str() {
                "comment" => ItemKind::Comment,
                "message" => ItemKind::Message,
                other => {
                    return Err(StoreError::Deserialization(format!("item_kind: {}", other)))
                },
            },
        },
        transaction_id: row.try_get("transaction_id")?,
    })
}

// =============================================================================
// ActionRepository
// =============================================================================

#[async_trait]
impl ActionRepository for PgStore {
    async fn save(&self, action: &Action) -> Result<(), StoreError> {
        check_write(None, action)?;
        let record = action.for_persistence();

        // The WHERE clause keeps terminal rows immutable; only a pending row
        // may be overwritten, and only by a non-pending state.
        let result = sqlx::query(
            r#"
            INSERT INTO actions (
                id, action_type, state, created_at, from_user, to_user, to_address,
                coin, fiat, coin_value, fiat_value, transaction_id,
                message_id, permalink, channel, item_kind
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (action_type, message_id) DO UPDATE SET
                state = EXCLUDED.state,
                coin_value = EXCLUDED.coin_value,
                fiat_value = EXCLUDED.fiat_value,
                transaction_id = EXCLUDED.transaction_id,
                updated_at = NOW()
            WHERE actions.state = 'pending'
              AND EXCLUDED.state IN ('completed', 'declined', 'expired')
            "#,
        )
        .bind(record.id)
        .bind(record.action_type.as_str())
        .bind(record.state.as_str())
        .bind(record.source.created_at)
        .bind(record.from_user.as_str())
        .bind(record.to_user().map(|u| u.as_str().to_string()))
        .bind(record.to_address().map(str::to_string))
        .bind(record.coin.as_ref().map(|c| c.as_str().to_string()))
        .bind(record.fiat.as_ref().map(|f| f.as_str().to_string()))
        .bind(record.coin_value)
        .bind(record.fiat_value)
        .bind(record.transaction_id.as_deref())
        .bind(record.message_id())
        .bind(record.source.permalink.as_deref())
        .bind(record.source.channel.as_deref())
        .bind(item_kind_str(record.source.kind))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::invalid_state(format!(
                "{} action {} already has a terminal record",
                record.action_type,
                record.message_id()
            )));
        }

        debug!(
            action_type = %record.action_type,
            message_id = %record.message_id(),
            state = %record.state,
            "Action saved"
        );
        Ok(())
    }

    async fn find(&self, query: &ActionQuery) -> Result<Vec<Action>, StoreError> {
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {} FROM actions WHERE TRUE", ACTION_COLUMNS));

        if let Some(t) = query.action_type {
            qb.push(" AND action_type = ").push_bind(t.as_str());
        }
        if let Some(s) = query.state {
            qb.push(" AND state = ").push_bind(s.as_str());
        }
        if let Some(m) = &query.message_id {
            qb.push(" AND message_id = ").push_bind(m.clone());
        }
        if let Some(u) = &query.from_user {
            qb.push(" AND from_user = ").push_bind(u.as_str().to_string());
        }
        if let Some(u) = &query.to_user {
            qb.push(" AND to_user = ").push_bind(u.as_str().to_string());
        }
        if let Some(c) = &query.coin {
            qb.push(" AND coin = ").push_bind(c.as_str().to_string());
        }
        if query.exclude_pending {
            qb.push(" AND state <> 'pending'");
        }
        if let Some(t) = query.created_before {
            qb.push(" AND created_at < ").push_bind(t);
        }
        qb.push(" ORDER BY created_at ASC, id ASC");

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(parse_action_row).collect()
    }

    async fn history(&self, user: &Username, limit: usize) -> Result<Vec<Action>, StoreError> {
        let sql = format!(
            "SELECT {} FROM actions WHERE from_user = $1 OR to_user = $1 \
             ORDER BY created_at DESC, id DESC LIMIT $2",
            ACTION_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(user.as_str())
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(parse_action_row).collect()
    }
}

// =============================================================================
// UserRepository
// =============================================================================

#[async_trait]
impl UserRepository for PgStore {
    async fn create(&self, name: &Username) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO users (username) VALUES ($1)")
            .bind(name.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| match StoreError::from(e) {
                StoreError::UniqueViolation(_) => StoreError::UserExists(name.clone()),
                other => other,
            })?;
        Ok(())
    }

    async fn find(&self, name: &Username) -> Result<Option<User>, StoreError> {
        let Some(row) = sqlx::query("SELECT username, joined_at FROM users WHERE username = $1")
            .bind(name.as_str())
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };

        let rows = sqlx::query(
            "SELECT coin, address FROM user_addresses WHERE username = $1 ORDER BY coin",
        )
        .bind(name.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut addresses = Vec::with_capacity(rows.len());
        for r in rows {
            let coin: String = r.try_get("coin")?;
            addresses.push((decode("coin", CoinUnit::new(&coin))?, r.try_get("address")?));
        }

        Ok(Some(User {
            name: name.clone(),
            addresses,
            joined_at: row.try_get("joined_at")?,
        }))
    }

    async fn add_address(
        &self,
        name: &Username,
        coin: &CoinUnit,
        address: &str,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO user_addresses (username, coin, address)
            SELECT username, $2, $3 FROM users WHERE username = $1
            "#,
        )
        .bind(name.as_str())
        .bind(coin.as_str())
        .bind(address)
        .execute(&self.pool)
        .await
        .map_err(|e| match StoreError::from(e) {
            StoreError::UniqueViolation(_) => StoreError::AddressExists {
                user: name.clone(),
                coin: coin.clone(),
            },
            other => other,
        })?;

        if result.rows_affected() == 0 {
            return Err(StoreError::UserNotFound(name.clone()));
        }
        Ok(())
    }

    async fn delete(&self, name: &Username) -> Result<(), StoreError> {
        // addresses cascade
        sqlx::query("DELETE FROM users WHERE username = $1")
            .bind(name.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<User>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT u.username, u.joined_at, a.coin, a.address
            FROM users u
            LEFT JOIN user_addresses a ON a.username = u.username
            ORDER BY u.username, a.coin
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut users: Vec<User> = Vec::new();
        for row in rows {
            let username: String = row.try_get("username")?;
            let name = decode("username", Username::new(&username))?;
            if users.last().map(|u| u.name != name).unwrap_or(true) {
                users.push(User {
                    name,
                    addresses: Vec::new(),
                    joined_at: row.try_get("joined_at")?,
                });
            }
            let coin: Option<String> = row.try_get("coin")?;
            let address: Option<String> = row.try_get("address")?;
            if let (Some(coin), Some(address), Some(user)) = (coin, address, users.last_mut()) {
                user.addresses.push((decode("coin", CoinUnit::new(&coin))?, address));
            }
        }
        Ok(users)
    }
}

// =============================================================================
// ValueRepository
// =============================================================================

#[async_trait]
impl ValueRepository for PgStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value = sqlx::query_scalar::<_, String>("SELECT value FROM bot_values WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO bot_values (key, value) VALUES ($1, $2)
            ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

impl Store for PgStore {
    fn actions(&self) -> &dyn ActionRepository {
        self
    }

    fn users(&self) -> &dyn UserRepository {
        self
    }

    fn values(&self) -> &dyn ValueRepository {
        self
    }
}
