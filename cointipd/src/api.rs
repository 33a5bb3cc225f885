//! HTTP API for the cointip daemon.
//!
//! Read-only endpoints:
//! - `GET /health`: liveness
//! - `GET /status`: escrow coverage per coin and the comment checkpoint

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::error;

use cointip_exec::{escrow_status, Services};
use cointip_store::LAST_PROCESSED_COMMENT_TIME;

// =============================================================================
// API State
// =============================================================================

/// Shared state for API handlers.
pub struct ApiState {
    pub services: Services,
}

// =============================================================================
// Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Status response.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub escrow_account: String,
    pub coins: Vec<CoinStatus>,
    /// Unix seconds of the newest processed comment
    pub last_processed_comment_time: Option<i64>,
}

/// Escrow coverage of one coin.
#[derive(Debug, Serialize, Deserialize)]
pub struct CoinStatus {
    pub coin: String,
    pub escrow_balance: Decimal,
    pub pending_total: Decimal,
    pub covered: bool,
}

/// Error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

// =============================================================================
// Router
// =============================================================================

/// Create the API router.
pub fn create_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// =============================================================================
// Handlers
// =============================================================================

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn status_handler(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<StatusResponse>, (StatusCode, Json<ErrorResponse>)> {
    let services = &state.services;

    let coins = escrow_status(services).await.map_err(internal_error)?;
    let checkpoint = services
        .store
        .values()
        .get(LAST_PROCESSED_COMMENT_TIME)
        .await
        .map_err(internal_error)?
        .and_then(|v| v.parse().ok());

    Ok(Json(StatusResponse {
        escrow_account: services.settings.escrow_account.to_string(),
        coins: coins
            .into_iter()
            .map(|s| CoinStatus {
                coin: s.coin.to_string(),
                covered: s.is_covered(),
                escrow_balance: s.escrow_balance,
                pending_total: s.pending_total,
            })
            .collect(),
        last_processed_comment_time: checkpoint,
    }))
}

fn internal_error(e: impl std::fmt::Display) -> (StatusCode, Json<ErrorResponse>) {
    error!(error = %e, "Status request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
}

// =============================================================================
// Tests
// =============================================================================
