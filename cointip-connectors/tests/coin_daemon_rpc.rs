//! CoinDaemons against a fake JSON-RPC daemon served by axum.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use cointip_connectors::{CoinDaemons, DaemonEndpoint};
use cointip_domain::{CoinUnit, Username};
use cointip_exec::{ExecError, LedgerPort};

/// Per-account balances and a log of received methods.
#[derive(Default)]
struct FakeDaemon {
    balances: HashMap<String, f64>,
    calls: Vec<String>,
}

type Shared = Arc<Mutex<FakeDaemon>>;

async fn rpc(State(daemon): State<Shared>, Json(request): Json<Value>) -> (StatusCode, Json<Value>) {
    let mut daemon = daemon.lock().unwrap();
    let method = request["method"].as_str().unwrap_or_default().to_string();
    let params = request["params"].as_array().cloned().unwrap_or_default();
    let id = request["id"].clone();
    daemon.calls.push(method.clone());

    let result = match method.as_str() {
        "getbalance" if params.is_empty() => Ok(json!(daemon.balances.values().sum::<f64>())),
        "getbalance" => {
            let account = params[0].as_str().unwrap_or_default();
            Ok(json!(daemon.balances.get(account).copied().unwrap_or(0.0)))
        }
        "move" => {
            let from = params[0].as_str().unwrap_or_default().to_string();
            let to = params[1].as_str().unwrap_or_default().to_string();
            let amount = params[2].as_f64().unwrap_or_default();
            if daemon.balances.get(&from).copied().unwrap_or(0.0) < amount {
                Err((-6, "Account has insufficient funds"))
            } else {
                *daemon.balances.entry(from).or_default() -= amount;
                *daemon.balances.entry(to).or_default() += amount;
                Ok(json!(true))
            }
        }
        "sendfrom" => Ok(json!("f00dfeed")),
        "validateaddress" => Ok(json!({ "isvalid": params[0] == json!("Lgood") })),
        "getnewaddress" => Ok(json!(format!("L{}", params[0].as_str().unwrap_or_default()))),
        _ => Err((-32601, "Method not found")),
    };

    match result {
        Ok(result) => (StatusCode::OK, Json(json!({ "result": result, "error": null, "id": id }))),
        Err((code, message)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "result": null, "error": { "code": code, "message": message }, "id": id })),
        ),
    }
}

async fn spawn_daemon(daemon: Shared) -> String {
    let router = Router::new().route("/", post(rpc)).with_state(daemon);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}/", addr)
}

fn ltc() -> CoinUnit {
    CoinUnit::new("ltc").unwrap()
}

fn user(name: &str) -> Username {
    Username::new(name).unwrap()
}

async fn setup() -> (Shared, CoinDaemons) {
    let daemon: Shared = Arc::default();
    daemon.lock().unwrap().balances.insert("alice".to_string(), 2.0);
    let url = spawn_daemon(daemon.clone()).await;
    let daemons = CoinDaemons::new().with(
        ltc(),
        DaemonEndpoint::new(url, "rpcuser", "rpcpass").with_timeout(Duration::from_secs(5)),
    );
    (daemon, daemons)
}

#[tokio::test]
async fn test_balance_and_move() -> anyhow::Result<()> {
    let (daemon, daemons) = setup().await;

    assert_eq!(daemons.balance(&ltc(), &user("alice"), 1).await?, dec!(2));
    daemons
        .move_between(&ltc(), &user("alice"), &user("cointipbot"), dec!(1.5))
        .await?;
    assert_eq!(daemons.balance(&ltc(), &user("cointipbot"), 1).await?, dec!(1.5));
    assert_eq!(daemons.wallet_balance(&ltc()).await?, dec!(2));

    assert_eq!(
        daemon.lock().unwrap().calls,
        vec!["getbalance", "move", "getbalance", "getbalance"]
    );
    Ok(())
}

#[tokio::test]
async fn test_rpc_error_is_ledger_error_and_not_retried() {
    let (daemon, daemons) = setup().await;

    let result = daemons
        .move_between(&ltc(), &user("bob"), &user("alice"), dec!(1))
        .await;
    match result {
        Err(ExecError::Ledger(message)) => assert!(message.contains("insufficient funds")),
        other => panic!("expected ledger error, got {:?}", other),
    }
    assert_eq!(daemon.lock().unwrap().calls, vec!["move"]);
}

#[tokio::test]
async fn test_addresses_and_send() -> anyhow::Result<()> {
    let (_daemon, daemons) = setup().await;

    assert!(daemons.is_valid_address(&ltc(), "Lgood").await?);
    assert!(!daemons.is_valid_address(&ltc(), "Lbad").await?);
    assert_eq!(daemons.new_address(&ltc(), &user("carol")).await?, "Lcarol");
    assert_eq!(
        daemons
            .send_to_address(&ltc(), &user("alice"), "Lgood", dec!(0.7), 3)
            .await?,
        "f00dfeed"
    );
    Ok(())
}

#[tokio::test]
async fn test_unreachable_daemon() {
    // Nothing listens on the discard port
    let daemons = CoinDaemons::new().with(
        ltc(),
        DaemonEndpoint::new("http://127.0.0.1:9/", "u", "p").with_timeout(Duration::from_secs(2)),
    );
    let result = daemons.balance(&ltc(), &user("alice"), 1).await;
    assert!(matches!(result, Err(ExecError::Ledger(_))));
}
