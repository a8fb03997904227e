mod common;

use std::{sync::Arc, time::Duration};

use chrono::{TimeZone, Utc};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use common::{
    FakeBank, FixedCode, SilentUser, SlowCode, common as path, ok, operation, status, trading,
};
use engine::{CallContext, EngineError, SessionState};

fn ctx() -> CallContext {
    CallContext::new(CancellationToken::new())
}

#[tokio::test]
async fn authorizes_with_confirmation_code() {
    let bank = FakeBank::default();
    bank.handshake("tok-1").reply(
        path("operations"),
        vec![ok(json!([
            operation(3, "acc-1", 1_700_000_000_000, true),
            operation(1, "acc-1", 1_700_000_100_000, true),
        ]))],
    );
    let base_url = bank.serve().await;
    let confirm = FixedCode::new(" 1234\n");
    let client = common::client_with(common::config(&base_url), None, confirm.clone()).await;
    assert_eq!(client.session_state().await, SessionState::Unauthenticated);

    let now = Utc::now();
    let operations = client
        .operations(&ctx(), "acc-1", now - chrono::Duration::days(1), now)
        .await
        .unwrap();

    assert_eq!(
        operations.iter().map(|op| op.id).collect::<Vec<_>>(),
        [1, 3]
    );
    assert_eq!(confirm.asked(), 1);
    assert_eq!(client.session_state().await, SessionState::Authorized);

    let sign_up = bank.calls(&path("sign_up"));
    assert_eq!(sign_up.len(), 2);
    assert!(sign_up[0].body.contains("phone="));
    assert!(sign_up[1].body.contains("password=secret"));

    let confirmation = bank.calls(&path("confirm"));
    assert_eq!(confirmation.len(), 1);
    assert!(confirmation[0].body.contains("initialOperation=sign_up"));
    assert!(confirmation[0].body.contains("initialOperationTicket=ticket-1"));
    assert!(
        confirmation[0]
            .body
            .contains("%7B%22SMSBYID%22%3A%221234%22%7D")
    );

    let fetched = bank.calls(&path("operations"));
    assert_eq!(fetched[0].query["sessionid"], "tok-1");
    assert_eq!(fetched[0].query["account"], "acc-1");
    assert_eq!(fetched[0].query["origin"], "web,ib5,platform");
}

#[tokio::test]
async fn stored_session_skips_handshake() {
    let bank = FakeBank::default();
    bank.reply(path("operations"), vec![ok(json!([]))]);
    let base_url = bank.serve().await;
    let client = common::client(&base_url, Some("stored")).await;

    assert_eq!(client.session_state().await, SessionState::Authorized);
    let now = Utc::now();
    client.operations(&ctx(), "acc-1", now, now).await.unwrap();

    assert!(bank.calls(&path("session")).is_empty());
    assert_eq!(bank.calls(&path("operations"))[0].query["sessionId"], "stored");
}

#[tokio::test]
async fn keep_alive_invalidates_downgraded_session() {
    let bank = FakeBank::default();
    bank.handshake("tok-1")
        .reply(path("operations"), vec![ok(json!([]))])
        .reply(
            path("ping"),
            vec![
                ok(json!({ "accessLevel": "CLIENT" })),
                ok(json!({ "accessLevel": "ANONYMOUS" })),
            ],
        );
    let base_url = bank.serve().await;
    let mut config = common::config(&base_url);
    config.keep_alive = Duration::from_millis(40);
    let client = common::client_with(config, None, FixedCode::new("1234")).await;

    let now = Utc::now();
    client.operations(&ctx(), "acc-1", now, now).await.unwrap();
    assert_eq!(client.session_state().await, SessionState::Authorized);

    tokio::time::sleep(Duration::from_millis(400)).await;

    let pings = bank.calls(&path("ping"));
    assert_eq!(pings.len(), 2);
    assert_eq!(pings[0].query["sessionid"], "tok-1");
    assert_eq!(client.session_state().await, SessionState::Invalid);
}

#[tokio::test]
async fn dropped_client_stops_keep_alive() {
    let bank = FakeBank::default();
    bank.reply(path("ping"), vec![ok(json!({ "accessLevel": "CLIENT" }))]);
    let base_url = bank.serve().await;
    let mut config = common::config(&base_url);
    config.keep_alive = Duration::from_millis(40);
    let client = common::client_with(config, Some("tok"), FixedCode::new("0000")).await;

    drop(client);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(bank.calls(&path("ping")).is_empty());
}

#[tokio::test]
async fn rate_limited_requests_are_retried() {
    let bank = FakeBank::default();
    bank.reply(
        path("operations"),
        vec![
            status("REQUEST_RATE_LIMIT_EXCEEDED"),
            status("REQUEST_RATE_LIMIT_EXCEEDED"),
            ok(json!([operation(7, "acc-1", 1_700_000_000_000, false)])),
        ],
    );
    let base_url = bank.serve().await;
    let client = common::client(&base_url, Some("tok")).await;

    let now = Utc::now();
    let operations = client.operations(&ctx(), "acc-1", now, now).await.unwrap();

    assert_eq!(operations.len(), 1);
    assert!(operations[0].is_pending());
    assert_eq!(bank.calls(&path("operations")).len(), 3);
}

#[tokio::test]
async fn cancellation_interrupts_rate_limit_retry() {
    let bank = FakeBank::default();
    bank.reply(path("operations"), vec![status("REQUEST_RATE_LIMIT_EXCEEDED")]);
    let base_url = bank.serve().await;
    let client = common::client(&base_url, Some("tok")).await;

    let cancel = CancellationToken::new();
    let ctx = CallContext::new(cancel.clone());
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    let now = Utc::now();
    let err = client.operations(&ctx, "acc-1", now, now).await.unwrap_err();
    assert_eq!(err, EngineError::Cancelled);
}

#[tokio::test]
async fn lost_privileges_reauthorize_once_per_context() {
    let bank = FakeBank::default();
    bank.handshake("fresh").reply(
        path("operations"),
        vec![
            status("INSUFFICIENT_PRIVILEGES"),
            ok(json!([])),
            status("INSUFFICIENT_PRIVILEGES"),
        ],
    );
    let base_url = bank.serve().await;
    let confirm = FixedCode::new("1111");
    let client = common::client_with(common::config(&base_url), Some("stale"), confirm.clone()).await;

    let ctx = ctx();
    let now = Utc::now();
    client.operations(&ctx, "acc-1", now, now).await.unwrap();
    assert_eq!(confirm.asked(), 1);
    assert!(ctx.already_retried());

    let calls = bank.calls(&path("operations"));
    assert_eq!(calls[0].query["sessionid"], "stale");
    assert_eq!(calls[1].query["sessionid"], "fresh");

    let err = client.operations(&ctx, "acc-1", now, now).await.unwrap_err();
    assert_eq!(err, EngineError::InsufficientPrivileges);
    assert_eq!(confirm.asked(), 1);
}

#[tokio::test]
async fn confirmation_timeout_invalidates_session() {
    let bank = FakeBank::default();
    bank.handshake("tok");
    let base_url = bank.serve().await;
    let mut config = common::config(&base_url);
    config.confirmation_timeout = Duration::from_millis(50);
    let client = common::client_with(config, None, Arc::new(SilentUser)).await;

    let now = Utc::now();
    let err = client.operations(&ctx(), "acc-1", now, now).await.unwrap_err();

    assert_eq!(err, EngineError::ConfirmationTimeout);
    assert_eq!(client.session_state().await, SessionState::Invalid);
    assert!(bank.calls(&path("confirm")).is_empty());
}

#[tokio::test]
async fn failed_reauthorization_is_not_repeated_in_one_context() {
    let bank = FakeBank::default();
    bank.handshake("fresh")
        .reply(path("operations"), vec![status("INSUFFICIENT_PRIVILEGES")]);
    let base_url = bank.serve().await;
    let mut config = common::config(&base_url);
    config.confirmation_timeout = Duration::from_millis(50);
    let client = common::client_with(config, Some("stale"), Arc::new(SilentUser)).await;

    let run = ctx();
    let now = Utc::now();
    let err = client.operations(&run, "acc-1", now, now).await.unwrap_err();
    assert_eq!(err, EngineError::ConfirmationTimeout);

    for _ in 0..2 {
        let err = client.operations(&run, "acc-1", now, now).await.unwrap_err();
        assert!(matches!(err, EngineError::AuthorizationFailed(_)), "{err}");
    }
    assert_eq!(run.authorization_failure(), Some("confirmation code was not received in time"));
    assert_eq!(bank.calls(&path("session")).len(), 1);
    assert_eq!(bank.calls(&path("operations")).len(), 1);

    // The next invocation gets its own attempt.
    let err = client.operations(&ctx(), "acc-1", now, now).await.unwrap_err();
    assert!(!matches!(err, EngineError::AuthorizationFailed(_)), "{err}");
    assert_eq!(bank.calls(&path("session")).len(), 2);
}

#[tokio::test]
async fn unexpected_status_is_an_error() {
    let bank = FakeBank::default();
    bank.reply(
        path("operations"),
        vec![json!({"resultCode": "INTERNAL_ERROR", "errorMessage": "boom"})],
    );
    let base_url = bank.serve().await;
    let client = common::client(&base_url, Some("tok")).await;

    let now = Utc::now();
    let err = client.operations(&ctx(), "acc-1", now, now).await.unwrap_err();
    assert_eq!(
        err,
        EngineError::UnexpectedStatus {
            expected: "OK".to_string(),
            actual: "INTERNAL_ERROR".to_string(),
            message: "boom".to_string(),
        }
    );
}

#[tokio::test]
async fn accounts_skip_foreign_ones() {
    let bank = FakeBank::default();
    bank.reply(
        path("grouped_requests"),
        vec![ok(json!({
            "0": ok(json!([
                {"id": "acc-1", "name": "Debit card", "accountType": "Current"},
                {"id": "acc-2", "name": "Shared", "accountType": "SharedCredit"},
                {"id": "acc-3", "name": "Savings", "accountType": "Saving"},
            ])),
        }))],
    );
    let base_url = bank.serve().await;
    let client = common::client(&base_url, Some("tok")).await;

    let accounts = client.accounts(&ctx()).await.unwrap();

    assert_eq!(
        accounts.iter().map(|a| a.id.as_str()).collect::<Vec<_>>(),
        ["acc-1", "acc-3"]
    );
    assert!(accounts.iter().all(|a| a.username == common::USERNAME));
    let call = &bank.calls(&path("grouped_requests"))[0];
    assert_eq!(call.query["_methods"], "accounts_flat");
    assert!(call.body.starts_with("requestsData="));
}

#[tokio::test]
async fn rate_limited_group_is_requested_again() {
    let bank = FakeBank::default();
    bank.reply(
        path("grouped_requests"),
        vec![
            ok(json!({ "0": status("REQUEST_RATE_LIMIT_EXCEEDED") })),
            ok(json!({
                "0": ok(json!([
                    {"id": "acc-1", "name": "Debit card", "accountType": "Current"},
                ])),
            })),
        ],
    );
    let base_url = bank.serve().await;
    let client = common::client(&base_url, Some("tok")).await;

    let accounts = client.accounts(&ctx()).await.unwrap();

    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0].id, "acc-1");
    assert_eq!(bank.calls(&path("grouped_requests")).len(), 2);
}

#[tokio::test]
async fn missing_receipt_is_none() {
    let bank = FakeBank::default();
    bank.reply(path("shopping_receipt"), vec![status("NO_DATA_FOUND")]);
    let base_url = bank.serve().await;
    let client = common::client(&base_url, Some("tok")).await;

    assert_eq!(client.shopping_receipt(&ctx(), 42).await.unwrap(), None);
    assert_eq!(
        bank.calls(&path("shopping_receipt"))[0].query["operationId"],
        "42"
    );
}

#[tokio::test]
async fn receipt_items_are_merged() {
    let bank = FakeBank::default();
    bank.reply(
        path("shopping_receipt"),
        vec![ok(json!({
            "receipt": {
                "totalSum": 70.0,
                "operator": "Cashier",
                "retailPlaceAddress": "Main st. 1",
                "items": [
                    {"name": "Bread", "price": 30.0, "quantity": 1.0, "sum": 30.0},
                    {"name": "Tea", "price": 10.0, "quantity": 1.0, "sum": 10.0},
                    {"name": "Bread", "price": 30.0, "quantity": 1.0, "sum": 30.0},
                ],
            }
        }))],
    );
    let base_url = bank.serve().await;
    let client = common::client(&base_url, Some("tok")).await;

    let receipt = client.shopping_receipt(&ctx(), 5).await.unwrap().unwrap();

    assert_eq!(receipt.operation_id, 5);
    assert_eq!(receipt.items.len(), 2);
    assert_eq!(receipt.items[0].name, "Bread");
    assert_eq!(receipt.items[0].quantity, 2.0);
    assert_eq!(receipt.items[0].sum, 60.0);
}

#[tokio::test]
async fn slow_receipt_times_out() {
    let bank = FakeBank::default();
    bank.reply(path("shopping_receipt"), vec![status("REQUEST_RATE_LIMIT_EXCEEDED")]);
    let base_url = bank.serve().await;
    let mut config = common::config(&base_url);
    config.receipt_timeout = Duration::from_millis(100);
    let client = common::client_with(config, Some("tok"), FixedCode::new("0000")).await;

    let err = client.shopping_receipt(&ctx(), 5).await.unwrap_err();
    assert_eq!(err, EngineError::Timeout);
    assert!(err.suspends_receipts());
}

#[tokio::test]
async fn receipt_timeout_leaves_room_for_reauthorization() {
    let bank = FakeBank::default();
    bank.handshake("fresh").reply(
        path("shopping_receipt"),
        vec![
            status("INSUFFICIENT_PRIVILEGES"),
            ok(json!({
                "receipt": {
                    "totalSum": 10.0,
                    "items": [{"name": "Tea", "price": 10.0, "quantity": 1.0, "sum": 10.0}]
                }
            })),
        ],
    );
    let base_url = bank.serve().await;
    let mut config = common::config(&base_url);
    config.receipt_timeout = Duration::from_millis(100);
    let confirm = Arc::new(SlowCode {
        code: "1234".to_string(),
        delay: Duration::from_millis(300),
    });
    let client = common::client_with(config, Some("stale"), confirm).await;

    let receipt = client.shopping_receipt(&ctx(), 5).await.unwrap().unwrap();

    assert_eq!(receipt.items.len(), 1);
    assert_eq!(client.session_state().await, SessionState::Authorized);
    let calls = bank.calls(&path("shopping_receipt"));
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].query["sessionid"], "fresh");
}

#[tokio::test]
async fn requests_are_paced() {
    let bank = FakeBank::default();
    bank.reply(path("operations"), vec![ok(json!([]))]);
    let base_url = bank.serve().await;
    let mut config = common::config(&base_url);
    config.pace = Duration::from_millis(150);
    let client = common::client_with(config, Some("tok"), FixedCode::new("0000")).await;

    let started = std::time::Instant::now();
    let now = Utc::now();
    client.operations(&ctx(), "acc-1", now, now).await.unwrap();
    client.operations(&ctx(), "acc-1", now, now).await.unwrap();

    assert!(started.elapsed() >= Duration::from_millis(150));
    assert_eq!(bank.calls(&path("operations")).len(), 2);
}

#[tokio::test]
async fn cancellation_interrupts_pacing() {
    let bank = FakeBank::default();
    bank.reply(path("operations"), vec![ok(json!([]))]);
    let base_url = bank.serve().await;
    let mut config = common::config(&base_url);
    config.pace = Duration::from_secs(30);
    let client = common::client_with(config, Some("tok"), FixedCode::new("0000")).await;

    let now = Utc::now();
    client.operations(&ctx(), "acc-1", now, now).await.unwrap();

    let cancel = CancellationToken::new();
    let run = CallContext::new(cancel.clone());
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    let err = client.operations(&run, "acc-1", now, now).await.unwrap_err();
    assert_eq!(err, EngineError::Cancelled);
    assert_eq!(bank.calls(&path("operations")).len(), 1);
}

#[tokio::test]
async fn trading_errors_are_decoded() {
    let bank = FakeBank::default();
    bank.reply(
        trading("user/operations"),
        vec![json!({"status": "Error", "payload": {"code": "Forbidden", "message": "nope"}})],
    );
    let base_url = bank.serve().await;
    let client = common::client(&base_url, Some("tok")).await;

    let now = Utc::now();
    let err = client
        .trading_operations(&ctx(), now - chrono::Duration::days(1), now)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        EngineError::Trading {
            code: "Forbidden".to_string(),
            message: "nope".to_string(),
        }
    );
}

#[tokio::test]
async fn trading_operations_are_clamped_to_floor() {
    let bank = FakeBank::default();
    bank.reply(
        trading("user/operations"),
        vec![common::trading_ok(json!({"items": [{
            "id": "55",
            "date": "2020-02-03T10:00:00Z",
            "operationType": "Buy",
            "ticker": "AAPL",
            "quantity": 2,
            "payment": -300.0,
            "currency": "USD",
        }]}))],
    );
    let base_url = bank.serve().await;
    let client = common::client(&base_url, Some("tok")).await;

    let since = Utc.with_ymd_and_hms(2010, 1, 1, 0, 0, 0).unwrap();
    let operations = client
        .trading_operations(&ctx(), since, Utc::now())
        .await
        .unwrap();

    assert_eq!(operations.len(), 1);
    assert_eq!(operations[0].id, 55);
    assert_eq!(operations[0].username, common::USERNAME);

    let body: Value = serde_json::from_str(&bank.calls(&trading("user/operations"))[0].body).unwrap();
    assert_eq!(body["from"], "2015-01-01T00:00:00Z");
    assert_eq!(body["overnightsDisabled"], false);
}

#[tokio::test]
async fn candles_are_fetched_per_window() {
    let bank = FakeBank::default();
    bank.reply(
        trading("symbols/candles"),
        vec![common::trading_ok(json!({"candles": [
            {"date": 1_600_000_000, "o": 1.0, "c": 2.0, "h": 3.0, "l": 0.5, "v": 100.0},
        ]}))],
    );
    let base_url = bank.serve().await;
    let client = common::client(&base_url, Some("tok")).await;

    let start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
    let end = start + chrono::Duration::days(730);
    let candles = client
        .candles(&ctx(), "AAPL", "D", start, end)
        .await
        .unwrap();

    let calls = bank.calls(&trading("symbols/candles"));
    assert_eq!(calls.len(), 3);
    assert_eq!(candles.len(), 3);
    assert!(candles.iter().all(|c| c.ticker == "AAPL"));

    let first: Value = serde_json::from_str(&calls[0].body).unwrap();
    assert_eq!(first["ticker"], "AAPL");
    assert_eq!(first["resolution"], "D");
    assert_eq!(first["from"], "2020-01-01T00:00:00Z");
}

#[tokio::test]
async fn purchased_securities_are_stamped_with_today() {
    let bank = FakeBank::default();
    bank.reply(
        trading("portfolio/purchased_securities"),
        vec![common::trading_ok(json!({"data": [{
            "ticker": "SBER",
            "securityType": "Stock",
            "currentPrice": {"currency": "RUB", "value": 250.5},
        }]}))],
    );
    let base_url = bank.serve().await;
    let client = common::client(&base_url, Some("tok")).await;

    let now = Utc.with_ymd_and_hms(2024, 3, 10, 15, 0, 0).unwrap();
    let securities = client.purchased_securities(&ctx(), now).await.unwrap();

    assert_eq!(securities.len(), 1);
    assert_eq!(securities[0].date, now.date_naive());
    assert_eq!(securities[0].price, 250.5);
    assert_eq!(securities[0].username, common::USERNAME);
}
