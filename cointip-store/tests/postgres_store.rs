//! PostgreSQL repository tests.
//!
//! Run with `DATABASE_URL` set and `--features postgres`; each test gets a
//! fresh database with the workspace migrations applied.

#![cfg(feature = "postgres")]

use chrono::{Duration, Utc};
use cointip_domain::{
    Action, ActionState, ActionType, CoinUnit, Destination, ItemKind, SourceRef, Username,
};
use cointip_store::{ActionQuery, PgStore, Store, StoreError};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sqlx::PgPool;

fn user(name: &str) -> Username {
    Username::new(name).unwrap()
}

fn ltc() -> CoinUnit {
    CoinUnit::new("ltc").unwrap()
}

fn tip(msg: &str, from: &str, to: &str, amount: Decimal, state: ActionState) -> Action {
    let mut action = Action::new(
        ActionType::Givetip,
        user(from),
        SourceRef {
            message_id: msg.to_string(),
            permalink: Some(format!("https://example.invalid/c/{}", msg)),
            channel: Some("tipping".to_string()),
            created_at: Utc::now() - Duration::minutes(5),
            kind: ItemKind::Comment,
        },
    );
    action.destination = Some(Destination::User(user(to)));
    action.coin = Some(ltc());
    action.coin_value = Some(amount);
    action.transition(state).unwrap();
    action
}

#[sqlx::test(migrations = "../migrations")]
async fn test_pending_tip_completes_once(pool: PgPool) -> anyhow::Result<()> {
    let store = PgStore::new(pool);

    let mut action = tip("t1_a", "alice", "bob", dec!(1.5), ActionState::Pending);
    store.actions().save(&action).await?;
    assert_eq!(store.actions().pending_totals().await?.get(&ltc()), Some(&dec!(1.5)));

    action.transition(ActionState::Completed)?;
    store.actions().save(&action).await?;

    let failed = tip("t1_a", "alice", "bob", dec!(1.5), ActionState::Failed);
    let err = store.actions().save(&failed).await.unwrap_err();
    assert!(matches!(err, StoreError::InvalidState { .. }));

    let stored = store.actions().find(&ActionQuery::new().message_id("t1_a")).await?;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].state, ActionState::Completed);
    assert_eq!(stored[0].to_user(), Some(&user("bob")));
    Ok(())
}

#[sqlx::test(migrations = "../migrations")]
async fn test_negative_amounts_are_clamped(pool: PgPool) -> anyhow::Result<()> {
    let store = PgStore::new(pool);
    let mut action = tip("t1_b", "alice", "bob", dec!(-1), ActionState::Failed);
    action.fiat_value = Some(dec!(-80));
    store.actions().save(&action).await?;

    let stored = store.actions().find(&ActionQuery::new()).await?;
    assert_eq!(stored[0].coin_value, Some(Decimal::ZERO));
    assert_eq!(stored[0].fiat_value, Some(Decimal::ZERO));
    Ok(())
}

#[sqlx::test(migrations = "../migrations")]
async fn test_user_addresses_cascade(pool: PgPool) -> anyhow::Result<()> {
    let store = PgStore::new(pool);
    let alice = user("alice");

    store.users().create(&alice).await?;
    assert!(matches!(
        store.users().create(&alice).await,
        Err(StoreError::UserExists(_))
    ));
    store.users().add_address(&alice, &ltc(), "LaliceAddress").await?;
    assert!(matches!(
        store.users().add_address(&user("ghost"), &ltc(), "Lx").await,
        Err(StoreError::UserNotFound(_))
    ));

    let listed = store.users().list().await?;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].address(&ltc()), Some("LaliceAddress"));

    store.users().delete(&alice).await?;
    assert!(store.users().find(&alice).await?.is_none());
    Ok(())
}

#[sqlx::test(migrations = "../migrations")]
async fn test_checkpoint_values(pool: PgPool) -> anyhow::Result<()> {
    let store = PgStore::new(pool);
    store.values().set("last_processed_comment_time", "100").await?;
    store.values().set("last_processed_comment_time", "200").await?;
    assert_eq!(
        store.values().get("last_processed_comment_time").await?.as_deref(),
        Some("200")
    );
    Ok(())
}
