//! Typed record calls on top of [`Transport`] and [`SessionManager`].
//!
//! Every call goes through [`Client::authorized`]: when the provider reports
//! lost privileges the session is dropped and authorized again, once per
//! [`CallContext`]. A second loss within the same context is returned as is,
//! and once an authorization failed every later call of that context fails
//! without asking for another code.

use std::{
    collections::BTreeMap,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use chrono_tz::Europe::Moscow;
use reqwest::{Method, RequestBuilder};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::{
    Account, Candle, Credential, EngineError, Operation, PurchasedSecurity, ResultEngine,
    ShoppingReceipt, TradingOperation,
    candles::{CandlesPayload, MAX_CANDLE_INTERVAL, candle_windows},
    provider::{
        Envelope, Outcome, ProviderConfig, Reply, Transport, classify,
        envelope::{OK, TRADING_OK},
    },
    purchased_securities::PurchasedSecuritiesPayload,
    receipts::RawReceiptPayload,
    session::{Confirm, SessionManager, SessionState, session_query},
    trading_operations::TradingOperationsPayload,
    util::format_trading_time,
};

const BROKER_ACCOUNT_TYPE: &str = "Tinkoff";
const PORTFOLIO_CURRENCY: &str = "RUB";

/// State shared by all the calls of one sync invocation.
#[derive(Clone, Debug, Default)]
pub struct CallContext {
    cancel: CancellationToken,
    reauthorized: Arc<AtomicBool>,
    auth_failure: Arc<OnceLock<String>>,
}

impl CallContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            reauthorized: Arc::new(AtomicBool::new(false)),
            auth_failure: Arc::new(OnceLock::new()),
        }
    }

    pub fn cancel(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The session was already recreated once in this invocation.
    pub fn already_retried(&self) -> bool {
        self.reauthorized.load(Ordering::SeqCst)
    }

    fn mark_retried(&self) {
        self.reauthorized.store(true, Ordering::SeqCst);
    }

    /// Why the authorization attempted in this invocation failed, if it did.
    pub fn authorization_failure(&self) -> Option<&str> {
        self.auth_failure.get().map(String::as_str)
    }

    pub(crate) fn fail_authorization(&self, reason: String) {
        let _ = self.auth_failure.set(reason);
    }
}

pub struct Client {
    session: SessionManager,
    transport: Transport,
    receipt_timeout: Duration,
}

impl Client {
    /// Return a builder for `Client`. Help to build the struct.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    pub fn username(&self) -> &str {
        self.session.username()
    }

    pub async fn session_state(&self) -> SessionState {
        self.session.state().await
    }

    /// Accounts of the credential owner, without shared or external ones.
    pub async fn accounts(&self, ctx: &CallContext) -> ResultEngine<Vec<Account>> {
        let requests_data = json!([{ "key": 0, "operation": "accounts_flat" }]).to_string();
        let accounts = loop {
            let responses: BTreeMap<String, Envelope> = self
                .authorized(ctx, OK, None, |token| {
                    self.transport
                        .common(Method::POST, "grouped_requests")
                        .query(&session_query(token))
                        .query(&[("_methods", "accounts_flat")])
                        .form(&[("requestsData", requests_data.as_str())])
                })
                .await?
                .payload("grouped accounts")?;

            match grouped_accounts(responses)? {
                Some(accounts) => break accounts,
                None => self.transport.back_off(ctx.cancel()).await?,
            }
        };

        Ok(accounts
            .into_iter()
            .filter(|account| !account.is_foreign())
            .map(|mut account| {
                account.username = self.username().to_string();
                account
            })
            .collect())
    }

    /// Operations of `account_id` in `[since, now]`, sorted by id.
    pub async fn operations(
        &self,
        ctx: &CallContext,
        account_id: &str,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> ResultEngine<Vec<Operation>> {
        let window = [
            ("account", account_id.to_string()),
            ("start", since.timestamp_millis().to_string()),
            ("end", now.timestamp_millis().to_string()),
        ];
        let mut operations: Vec<Operation> = self
            .authorized(ctx, OK, None, |token| {
                self.transport
                    .common(Method::GET, "operations")
                    .query(&session_query(token))
                    .query(&window)
            })
            .await?
            .payload("operations")?;

        operations.sort_by_key(|operation| operation.id);
        Ok(operations)
    }

    /// Receipt of one operation. `None` when the bank has no receipt.
    pub async fn shopping_receipt(
        &self,
        ctx: &CallContext,
        operation_id: i64,
    ) -> ResultEngine<Option<ShoppingReceipt>> {
        let id = operation_id.to_string();
        let reply = self
            .authorized(ctx, OK, Some(self.receipt_timeout), |token| {
                self.transport
                    .common(Method::GET, "shopping_receipt")
                    .query(&session_query(token))
                    .query(&[("operationId", id.as_str())])
            })
            .await?;

        Ok(reply
            .optional::<RawReceiptPayload>("shopping receipt")?
            .map(|payload| ShoppingReceipt::from_payload(operation_id, payload)))
    }

    pub async fn trading_operations(
        &self,
        ctx: &CallContext,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> ResultEngine<Vec<TradingOperation>> {
        let body = json!({
            "from": format_trading_time(since),
            "to": format_trading_time(now),
            "overnightsDisabled": false,
        });
        let payload: TradingOperationsPayload = self
            .authorized(ctx, TRADING_OK, None, |token| {
                self.transport
                    .trading("user/operations")
                    .query(&session_query(token))
                    .json(&body)
            })
            .await?
            .payload("trading operations")?;

        Ok(payload
            .items
            .into_iter()
            .map(|mut operation| {
                operation.username = self.username().to_string();
                operation
            })
            .collect())
    }

    /// Portfolio snapshot stamped with the date of `now` on the bank's
    /// (Moscow) calendar.
    pub async fn purchased_securities(
        &self,
        ctx: &CallContext,
        now: DateTime<Utc>,
    ) -> ResultEngine<Vec<PurchasedSecurity>> {
        let body = json!({
            "brokerAccountType": BROKER_ACCOUNT_TYPE,
            "currency": PORTFOLIO_CURRENCY,
        });
        let payload: PurchasedSecuritiesPayload = self
            .authorized(ctx, TRADING_OK, None, |token| {
                self.transport
                    .trading("portfolio/purchased_securities")
                    .query(&session_query(token))
                    .json(&body)
            })
            .await?
            .payload("purchased securities")?;

        let date = now.with_timezone(&Moscow).date_naive();
        Ok(payload
            .data
            .into_iter()
            .map(|raw| raw.stamp(self.username(), date))
            .collect())
    }

    /// Candles of `ticker` in `[start, end)`, one request per window.
    pub async fn candles(
        &self,
        ctx: &CallContext,
        ticker: &str,
        resolution: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ResultEngine<Vec<Candle>> {
        let mut candles = Vec::new();
        for (from, to) in candle_windows(start, end, MAX_CANDLE_INTERVAL) {
            let body = json!({
                "from": format_trading_time(from),
                "to": format_trading_time(to),
                "ticker": ticker,
                "resolution": resolution,
            });
            let payload: CandlesPayload = self
                .authorized(ctx, TRADING_OK, None, |token| {
                    self.transport
                        .trading("symbols/candles")
                        .query(&session_query(token))
                        .json(&body)
                })
                .await?
                .payload("candles")?;

            candles.extend(payload.candles.into_iter().map(|mut candle| {
                candle.ticker = ticker.to_string();
                candle
            }));
        }

        Ok(candles)
    }

    /// Run `request` with the current session. `limit` bounds the exchange
    /// itself; authorizing the session is not counted against it.
    async fn authorized<F>(
        &self,
        ctx: &CallContext,
        expected: &str,
        limit: Option<Duration>,
        request: F,
    ) -> ResultEngine<Reply>
    where
        F: Fn(&str) -> RequestBuilder,
    {
        let mut already_retried = ctx.already_retried();
        loop {
            let token = self.session.ensure(ctx).await?;
            let exchange = self
                .transport
                .exchange(request(&token), expected, ctx.cancel());
            let result = match limit {
                Some(limit) => tokio::time::timeout(limit, exchange)
                    .await
                    .unwrap_or(Err(EngineError::Timeout)),
                None => exchange.await,
            };

            match result {
                Err(EngineError::InsufficientPrivileges) if !already_retried => {
                    tracing::warn!(
                        "insufficient privileges for {}, authorizing again",
                        self.username()
                    );
                    self.session.invalidate(&token).await;
                    ctx.mark_retried();
                    already_retried = true;
                }
                result => return result,
            }
        }
    }
}

/// Accounts of every sub-response, or `None` when one of them was rate
/// limited and the whole group has to be asked again.
fn grouped_accounts(responses: BTreeMap<String, Envelope>) -> ResultEngine<Option<Vec<Account>>> {
    let mut accounts = Vec::new();
    for (key, response) in responses {
        let batch: Vec<Account> = match classify(response, OK) {
            Outcome::Success { payload, .. } => serde_json::from_value(payload)
                .map_err(|err| EngineError::decode(format!("accounts #{key}"), err))?,
            Outcome::NoData => continue,
            Outcome::RateLimited => return Ok(None),
            Outcome::PrivilegesLost => return Err(EngineError::InsufficientPrivileges),
            Outcome::Failed(err) => return Err(err),
        };
        accounts.extend(batch);
    }
    Ok(Some(accounts))
}

#[derive(Default)]
pub struct ClientBuilder {
    credential: Option<Credential>,
    confirm: Option<Arc<dyn Confirm>>,
    config: ProviderConfig,
}

impl ClientBuilder {
    pub fn credential(mut self, credential: Credential) -> ClientBuilder {
        self.credential = Some(credential);
        self
    }

    pub fn confirm(mut self, confirm: Arc<dyn Confirm>) -> ClientBuilder {
        self.confirm = Some(confirm);
        self
    }

    pub fn config(mut self, config: ProviderConfig) -> ClientBuilder {
        self.config = config;
        self
    }

    pub async fn build(self) -> ResultEngine<Client> {
        let credential = self
            .credential
            .ok_or_else(|| EngineError::InvalidRequest("missing credential".to_string()))?;
        let confirm = self
            .confirm
            .ok_or_else(|| EngineError::InvalidRequest("missing confirmation source".to_string()))?;

        let transport = Transport::new(&self.config)?;
        let session =
            SessionManager::start(credential, transport.clone(), confirm, &self.config).await;

        Ok(Client {
            session,
            transport,
            receipt_timeout: self.config.receipt_timeout,
        })
    }
}
