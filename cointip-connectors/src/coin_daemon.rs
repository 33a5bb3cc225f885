//! Coin daemon JSON-RPC client.
//!
//! Talks to bitcoind-style daemons (bitcoind, litecoind, ...) that keep
//! per-account balances inside one wallet:
//!
//! | port operation     | RPC method                                    |
//! |--------------------|-----------------------------------------------|
//! | `balance`          | `getbalance account minconf`                  |
//! | `move_between`     | `move from to amount`                         |
//! | `send_to_address`  | `sendfrom account address amount minconf`     |
//! | `is_valid_address` | `validateaddress address`                     |
//! | `new_address`      | `getnewaddress account`                       |
//! | `wallet_balance`   | `getbalance`                                  |
//!
//! # Amounts
//!
//! Responses are parsed into `Decimal` from the number's textual form, never
//! through `f64` arithmetic. Requests carry amounts as JSON numbers because
//! older daemons reject string amounts; eight decimal places survive the
//! conversion.

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, warn};

use cointip_domain::{CoinUnit, Username};
use cointip_exec::{ExecError, LedgerPort};

// =============================================================================
// Constants
// =============================================================================

/// Default request timeout in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// Errors
// =============================================================================

/// Errors that can occur talking to a coin daemon.
#[derive(Debug, Clone, Error)]
pub enum RpcError {
    /// HTTP request could not be sent
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    /// Request timed out
    #[error("Request timed out")]
    Timeout,

    /// Non-JSON HTTP error (bad credentials, proxy errors)
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Daemon returned a JSON-RPC error
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// Response could not be interpreted
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// No daemon configured for the coin
    #[error("No daemon configured for coin {0}")]
    UnknownCoin(String),
}

// =============================================================================
// Endpoint
// =============================================================================

/// Where and how to reach one coin daemon.
#[derive(Debug, Clone)]
pub struct DaemonEndpoint {
    /// RPC URL, e.g. `http://127.0.0.1:9332`
    pub url: String,
    pub user: String,
    pub password: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl DaemonEndpoint {
    /// Endpoint with the default timeout.
    pub fn new(url: impl Into<String>, user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            user: user.into(),
            password: password.into(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Override the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

// =============================================================================
// Coin Daemon Client
// =============================================================================

/// JSON-RPC client for a single coin daemon.
pub struct CoinDaemonClient {
    client: Client,
    endpoint: DaemonEndpoint,
    next_id: AtomicU64,
}

impl CoinDaemonClient {
    /// Create a client for `endpoint`.
    pub fn new(endpoint: DaemonEndpoint) -> Self {
        Self {
            client: Client::new(),
            endpoint,
            next_id: AtomicU64::new(1),
        }
    }

    /// The endpoint this client talks to.
    pub fn endpoint(&self) -> &DaemonEndpoint {
        &self.endpoint
    }

    /// Issue one JSON-RPC call and return its `result`.
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = json!({
            "jsonrpc": "1.0",
            "id": id,
            "method": method,
            "params": params,
        });
        debug!(method, id, "Coin daemon call");

        let response = timeout(
            self.endpoint.timeout,
            self.client
                .post(&self.endpoint.url)
                .basic_auth(&self.endpoint.user, Some(&self.endpoint.password))
                .json(&request)
                .send(),
        )
        .await
        .map_err(|_| RpcError::Timeout)?
        .map_err(|e| RpcError::RequestFailed(e.to_string()))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| RpcError::ParseError(e.to_string()))?;

        // RPC errors arrive as HTTP 500 with a JSON body
        match parse_response(&body) {
            Ok(result) => Ok(result),
            Err(RpcError::ParseError(_)) if !status.is_success() => Err(RpcError::Http {
                status: status.as_u16(),
                body,
            }),
            Err(e) => {
                warn!(method, id, error = %e, "Coin daemon call failed");
                Err(e)
            }
        }
    }

    /// `getbalance account minconf`
    pub async fn get_balance(&self, account: &str, minconf: u32) -> Result<Decimal, RpcError> {
        let result = self.call("getbalance", vec![json!(account), json!(minconf)]).await?;
        decimal(&result)
    }

    /// `getbalance` over the whole wallet
    pub async fn get_wallet_balance(&self) -> Result<Decimal, RpcError> {
        let result = self.call("getbalance", Vec::new()).await?;
        decimal(&result)
    }

    /// `move from to amount`
    pub async fn move_funds(&self, from: &str, to: &str, amount: Decimal) -> Result<(), RpcError> {
        let result = self
            .call("move", vec![json!(from), json!(to), amount_param(amount)?])
            .await?;
        match result {
            Value::Bool(true) => Ok(()),
            other => Err(RpcError::ParseError(format!("move returned {}", other))),
        }
    }

    /// `sendfrom account address amount minconf`, returning the txid
    pub async fn send_from(
        &self,
        account: &str,
        address: &str,
        amount: Decimal,
        minconf: u32,
    ) -> Result<String, RpcError> {
        let result = self
            .call(
                "sendfrom",
                vec![json!(account), json!(address), amount_param(amount)?, json!(minconf)],
            )
            .await?;
        string(result, "sendfrom")
    }

    /// `validateaddress address`
    pub async fn validate_address(&self, address: &str) -> Result<bool, RpcError> {
        #[derive(Deserialize)]
        struct Validation {
            isvalid: bool,
        }

        let result = self.call("validateaddress", vec![json!(address)]).await?;
        let validation: Validation =
            serde_json::from_value(result).map_err(|e| RpcError::ParseError(e.to_string()))?;
        Ok(validation.isvalid)
    }

    /// `getnewaddress account`
    pub async fn get_new_address(&self, account: &str) -> Result<String, RpcError> {
        let result = self.call("getnewaddress", vec![json!(account)]).await?;
        string(result, "getnewaddress")
    }
}

// =============================================================================
// Response decoding
// =============================================================================

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

fn parse_response(body: &str) -> Result<Value, RpcError> {
    let response: RpcResponse =
        serde_json::from_str(body).map_err(|e| RpcError::ParseError(e.to_string()))?;
    if let Some(error) = response.error {
        return Err(RpcError::Rpc {
            code: error.code,
            message: error.message,
        });
    }
    Ok(response.result.unwrap_or(Value::Null))
}

fn decimal(value: &Value) -> Result<Decimal, RpcError> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => return Err(RpcError::ParseError(format!("expected an amount, got {}", other))),
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|e| RpcError::ParseError(format!("invalid amount '{}': {}", text, e)))
}

fn string(value: Value, method: &str) -> Result<String, RpcError> {
    match value {
        Value::String(s) if !s.is_empty() => Ok(s),
        other => Err(RpcError::ParseError(format!("{} returned {}", method, other))),
    }
}

fn amount_param(amount: Decimal) -> Result<Value, RpcError> {
    amount
        .round_dp(8)
        .to_f64()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| RpcError::ParseError(format!("amount {} is not representable", amount)))
}

// =============================================================================
// Ledger port
// =============================================================================

/// One daemon client per coin, routed by coin unit.
#[derive(Default)]
pub struct CoinDaemons {
    clients: BTreeMap<CoinUnit, CoinDaemonClient>,
}

impl CoinDaemons {
    /// Empty set of daemons.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) the daemon serving `coin`.
    pub fn with(mut self, coin: CoinUnit, endpoint: DaemonEndpoint) -> Self {
        self.clients.insert(coin, CoinDaemonClient::new(endpoint));
        self
    }

    /// Coins with a configured daemon.
    pub fn coins(&self) -> impl Iterator<Item = &CoinUnit> {
        self.clients.keys()
    }

    fn client(&self, coin: &CoinUnit) -> Result<&CoinDaemonClient, ExecError> {
        self.clients
            .get(coin)
            .ok_or_else(|| ledger_error(coin, RpcError::UnknownCoin(coin.to_string())))
    }
}

fn ledger_error(coin: &CoinUnit, e: RpcError) -> ExecError {
    ExecError::Ledger(format!("{} daemon: {}", coin, e))
}

#[async_trait]
impl LedgerPort for CoinDaemons {
    async fn balance(
        &self,
        coin: &CoinUnit,
        account: &Username,
        minconf: u32,
    ) -> Result<Decimal, ExecError> {
        self.client(coin)?
            .get_balance(account.as_str(), minconf)
            .await
            .map_err(|e| ledger_error(coin, e))
    }

    async fn move_between(
        &self,
        coin: &CoinUnit,
        from: &Username,
        to: &Username,
        amount: Decimal,
    ) -> Result<(), ExecError> {
        self.client(coin)?
            .move_funds(from.as_str(), to.as_str(), amount)
            .await
            .map_err(|e| ledger_error(coin, e))
    }

    async fn send_to_address(
        &self,
        coin: &CoinUnit,
        from: &Username,
        address: &str,
        amount: Decimal,
        minconf: u32,
    ) -> Result<String, ExecError> {
        self.client(coin)?
            .send_from(from.as_str(), address, amount, minconf)
            .await
            .map_err(|e| ledger_error(coin, e))
    }

    async fn is_valid_address(&self, coin: &CoinUnit, address: &str) -> Result<bool, ExecError> {
        self.client(coin)?
            .validate_address(address)
            .await
            .map_err(|e| ledger_error(coin, e))
    }

    async fn new_address(&self, coin: &CoinUnit, account: &Username) -> Result<String, ExecError> {
        self.client(coin)?
            .get_new_address(account.as_str())
            .await
            .map_err(|e| ledger_error(coin, e))
    }

    async fn wallet_balance(&self, coin: &CoinUnit) -> Result<Decimal, ExecError> {
        self.client(coin)?
            .get_wallet_balance()
            .await
            .map_err(|e| ledger_error(coin, e))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_result_and_error() {
        let ok = parse_response(r#"{"result": 1.5, "error": null, "id": 1}"#).unwrap();
        assert_eq!(decimal(&ok).unwrap(), dec!(1.5));

        let err = parse_response(
            r#"{"result": null, "error": {"code": -6, "message": "Insufficient funds"}, "id": 2}"#,
        )
        .unwrap_err();
        assert!(matches!(err, RpcError::Rpc { code: -6, .. }));

        assert!(matches!(
            parse_response("<html>401</html>"),
            Err(RpcError::ParseError(_))
        ));
    }

    #[test]
    fn test_decimal_keeps_precision() {
        assert_eq!(decimal(&json!(0.1)).unwrap(), dec!(0.1));
        assert_eq!(decimal(&json!(0.00000001)).unwrap(), dec!(0.00000001));
        assert_eq!(decimal(&json!("20999999.99999999")).unwrap(), dec!(20999999.99999999));
        assert!(decimal(&json!(true)).is_err());
    }

    #[test]
    fn test_amount_param() {
        assert_eq!(amount_param(dec!(0.7)).unwrap(), json!(0.7));
        assert_eq!(amount_param(dec!(0.123456789)).unwrap(), json!(0.12345679));
    }

    #[tokio::test]
    async fn test_unknown_coin_is_ledger_error() {
        let daemons = CoinDaemons::new();
        let coin = CoinUnit::new("ltc").unwrap();
        let result = daemons.wallet_balance(&coin).await;
        assert!(matches!(result, Err(ExecError::Ledger(_))));
    }
}
