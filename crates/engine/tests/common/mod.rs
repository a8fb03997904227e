#![allow(dead_code)]

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::{Query, State},
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
};
use sea_orm::{Database, DatabaseConnection};
use serde_json::{Value, json};

use engine::{Client, Confirm, Credential, ProviderConfig, ResultEngine, SqlStorage};
use migration::MigratorTrait;

pub const USERNAME: &str = "alice";

/// One request seen by the fake bank.
#[derive(Clone, Debug)]
pub struct Call {
    pub path: String,
    pub query: HashMap<String, String>,
    pub body: String,
}

#[derive(Default)]
struct Inner {
    replies: HashMap<String, VecDeque<Value>>,
    calls: Vec<Call>,
}

/// Scripted stand-in for the bank web API. Each path answers its queued
/// replies in order and then keeps repeating the last one.
#[derive(Clone, Default)]
pub struct FakeBank {
    inner: Arc<Mutex<Inner>>,
}

pub fn common(operation: &str) -> String {
    format!("/api/common/v1/{operation}")
}

pub fn trading(path: &str) -> String {
    format!("/api/trading/{path}")
}

impl FakeBank {
    pub fn reply(&self, path: impl Into<String>, replies: Vec<Value>) -> &Self {
        self.inner
            .lock()
            .unwrap()
            .replies
            .insert(path.into(), replies.into());
        self
    }

    /// Answers for a full sign-up handshake ending in `token`.
    pub fn handshake(&self, token: &str) -> &Self {
        self.reply(common("session"), vec![ok(json!(token))])
            .reply(
                common("sign_up"),
                vec![
                    json!({"resultCode": "WAITING_CONFIRMATION", "operationTicket": "ticket-1"}),
                    ok(Value::Null),
                ],
            )
            .reply(common("confirm"), vec![ok(Value::Null)])
            .reply(common("level_up"), vec![ok(Value::Null)])
    }

    pub fn calls(&self, path: &str) -> Vec<Call> {
        self.inner
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|call| call.path == path)
            .cloned()
            .collect()
    }

    pub async fn serve(&self) -> String {
        let app = Router::new().fallback(answer).with_state(self.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }
}

async fn answer(
    State(bank): State<FakeBank>,
    uri: Uri,
    Query(query): Query<HashMap<String, String>>,
    body: String,
) -> Response {
    let path = uri.path().to_string();
    let mut inner = bank.inner.lock().unwrap();
    inner.calls.push(Call {
        path: path.clone(),
        query,
        body,
    });

    let Some(queue) = inner.replies.get_mut(&path) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let reply = if queue.len() > 1 {
        queue.pop_front()
    } else {
        queue.front().cloned()
    };
    match reply {
        Some(reply) => Json(reply).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

pub fn ok(payload: Value) -> Value {
    json!({"resultCode": "OK", "payload": payload})
}

pub fn trading_ok(payload: Value) -> Value {
    json!({"status": "Ok", "payload": payload})
}

pub fn status(code: &str) -> Value {
    json!({"resultCode": code})
}

pub fn operation(id: i64, account: &str, millis: i64, debited: bool) -> Value {
    let mut raw = json!({
        "id": id.to_string(),
        "account": account,
        "operationTime": {"milliseconds": millis},
        "type": "Debit",
        "status": "OK",
        "description": format!("operation {id}"),
        "amount": {"currency": {"name": "RUB"}, "value": 100.0},
        "spendingCategory": {"name": "Groceries"},
        "mccString": "5411",
        "hasShoppingReceipt": true,
    });
    if debited {
        raw["debitingTime"] = json!({"milliseconds": millis + 1_000});
    }
    raw
}

/// Confirmation source answering a fixed code and counting the requests.
#[derive(Default)]
pub struct FixedCode {
    pub code: String,
    pub asked: AtomicUsize,
}

impl FixedCode {
    pub fn new(code: &str) -> Arc<Self> {
        Arc::new(Self {
            code: code.to_string(),
            asked: AtomicUsize::new(0),
        })
    }

    pub fn asked(&self) -> usize {
        self.asked.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Confirm for FixedCode {
    async fn confirmation_code(&self, _username: &str) -> ResultEngine<String> {
        self.asked.fetch_add(1, Ordering::SeqCst);
        Ok(self.code.clone())
    }
}

/// Answers `code` after `delay`.
pub struct SlowCode {
    pub code: String,
    pub delay: Duration,
}

#[async_trait]
impl Confirm for SlowCode {
    async fn confirmation_code(&self, _username: &str) -> ResultEngine<String> {
        tokio::time::sleep(self.delay).await;
        Ok(self.code.clone())
    }
}

/// Never answers.
pub struct SilentUser;

#[async_trait]
impl Confirm for SilentUser {
    async fn confirmation_code(&self, _username: &str) -> ResultEngine<String> {
        std::future::pending().await
    }
}

pub fn config(base_url: &str) -> ProviderConfig {
    ProviderConfig {
        base_url: base_url.to_string(),
        pace: Duration::ZERO,
        rate_limit_backoff: Duration::from_millis(10),
        keep_alive: Duration::from_secs(3600),
        confirmation_timeout: Duration::from_secs(2),
        receipt_timeout: Duration::from_secs(2),
    }
}

pub fn credential(session_id: Option<&str>) -> Credential {
    Credential {
        username: USERNAME.to_string(),
        phone: "+70000000000".to_string(),
        password: "secret".to_string(),
        session_id: session_id.map(str::to_string),
    }
}

pub async fn client_with(
    config: ProviderConfig,
    session_id: Option<&str>,
    confirm: Arc<dyn Confirm>,
) -> Client {
    Client::builder()
        .credential(credential(session_id))
        .confirm(confirm)
        .config(config)
        .build()
        .await
        .unwrap()
}

pub async fn client(base_url: &str, session_id: Option<&str>) -> Client {
    client_with(config(base_url), session_id, FixedCode::new("0000")).await
}

pub async fn database() -> DatabaseConnection {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    migration::Migrator::up(&db, None).await.unwrap();
    db
}

pub async fn storage() -> SqlStorage {
    SqlStorage::new(database().await)
}
