//! HTTP plumbing towards the bank web API.
//!
//! [`Transport`] executes one exchange at a time: it paces requests, decodes
//! the [`Envelope`], classifies it and keeps retrying while the provider
//! answers `REQUEST_RATE_LIMIT_EXCEEDED`. That retry has no upper bound: it
//! only stops when the provider accepts the request or the caller cancels.

use std::{sync::Arc, time::Duration};

use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::{sync::Mutex, time::Instant};
use tokio_util::sync::CancellationToken;

use crate::{EngineError, ResultEngine};

pub use envelope::{Envelope, Outcome, classify};

pub mod envelope;

pub const DEFAULT_BASE_URL: &str = "https://www.tinkoff.ru";
const ORIGIN: &str = "web,ib5,platform";

/// Tunables of the provider connection.
#[derive(Clone, Debug)]
pub struct ProviderConfig {
    pub base_url: String,
    /// Minimum distance between two HTTP round trips.
    pub pace: Duration,
    pub rate_limit_backoff: Duration,
    pub keep_alive: Duration,
    pub confirmation_timeout: Duration,
    pub receipt_timeout: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            pace: Duration::from_secs(1),
            rate_limit_backoff: Duration::from_secs(10),
            keep_alive: Duration::from_secs(60),
            confirmation_timeout: Duration::from_secs(60),
            receipt_timeout: Duration::from_secs(10),
        }
    }
}

/// Decoded body of a successful exchange.
#[derive(Clone, Debug, PartialEq)]
pub enum Reply {
    Payload {
        payload: Value,
        ticket: Option<String>,
    },
    NoData,
}

impl Reply {
    /// Decode the payload, treating `NO_DATA_FOUND` as an error.
    pub fn payload<T: DeserializeOwned>(self, context: &str) -> ResultEngine<T> {
        self.optional(context)?.ok_or(EngineError::NoDataFound)
    }

    /// Decode the payload, mapping `NO_DATA_FOUND` to `None`.
    pub fn optional<T: DeserializeOwned>(self, context: &str) -> ResultEngine<Option<T>> {
        match self {
            Self::Payload { payload, .. } => serde_json::from_value(payload)
                .map(Some)
                .map_err(|err| EngineError::decode(context, err)),
            Self::NoData => Ok(None),
        }
    }

    pub fn ticket(&self) -> Option<&str> {
        match self {
            Self::Payload { ticket, .. } => ticket.as_deref(),
            Self::NoData => None,
        }
    }
}

#[derive(Debug)]
struct Pacer {
    interval: Duration,
    next: Mutex<Option<Instant>>,
}

impl Pacer {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: Mutex::new(None),
        }
    }

    async fn wait(&self, cancel: &CancellationToken) -> ResultEngine<()> {
        if self.interval.is_zero() {
            return Ok(());
        }

        let slot = {
            let mut next = self.next.lock().await;
            let now = Instant::now();
            let slot = match *next {
                Some(at) if at > now => at,
                _ => now,
            };
            *next = Some(slot + self.interval);
            slot
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(EngineError::Cancelled),
            _ = tokio::time::sleep_until(slot) => Ok(()),
        }
    }
}

async fn sleep_or_cancel(
    duration: Duration,
    cancel: &CancellationToken,
) -> ResultEngine<()> {
    tokio::select! {
        _ = cancel.cancelled() => Err(EngineError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

#[derive(Clone, Debug)]
pub struct Transport {
    http: reqwest::Client,
    base_url: String,
    pacer: Arc<Pacer>,
    rate_limit_backoff: Duration,
}

impl Transport {
    pub fn new(config: &ProviderConfig) -> ResultEngine<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("homebot/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            pacer: Arc::new(Pacer::new(config.pace)),
            rate_limit_backoff: config.rate_limit_backoff,
        })
    }

    /// Request against `/api/common/v1/{operation}`.
    pub fn common(&self, method: Method, operation: &str) -> RequestBuilder {
        self.http
            .request(
                method,
                format!("{}/api/common/v1/{operation}", self.base_url),
            )
            .query(&[("origin", ORIGIN)])
    }

    /// Request against `/api/trading/{path}`.
    pub fn trading(&self, path: &str) -> RequestBuilder {
        self.http
            .post(format!("{}/api/trading/{path}", self.base_url))
            .query(&[("origin", ORIGIN)])
    }

    pub async fn exchange(
        &self,
        request: RequestBuilder,
        expected: &str,
        cancel: &CancellationToken,
    ) -> ResultEngine<Reply> {
        loop {
            let attempt = request.try_clone().ok_or_else(|| {
                EngineError::InvalidRequest("request body cannot be replayed".to_string())
            })?;

            self.pacer.wait(cancel).await?;
            let envelope = tokio::select! {
                _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                envelope = self.round_trip(attempt) => envelope?,
            };

            match classify(envelope, expected) {
                Outcome::Success { payload, ticket } => {
                    return Ok(Reply::Payload { payload, ticket });
                }
                Outcome::NoData => return Ok(Reply::NoData),
                Outcome::PrivilegesLost => return Err(EngineError::InsufficientPrivileges),
                Outcome::Failed(err) => return Err(err),
                Outcome::RateLimited => self.back_off(cancel).await?,
            }
        }
    }

    /// Wait out a `REQUEST_RATE_LIMIT_EXCEEDED` before asking again.
    pub(crate) async fn back_off(&self, cancel: &CancellationToken) -> ResultEngine<()> {
        tracing::warn!(
            "request rate limit exceeded, retrying in {:?}",
            self.rate_limit_backoff
        );
        sleep_or_cancel(self.rate_limit_backoff, cancel).await
    }

    async fn round_trip(&self, request: RequestBuilder) -> ResultEngine<Envelope> {
        let request = request.build()?;
        let label = format!("{} {}", request.method(), request.url().path());

        let response = self.http.execute(request).await?;
        let status = response.status();
        tracing::debug!("{label} => {status}");
        if !status.is_success() {
            return Err(EngineError::HttpStatus(status.as_u16()));
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|err| EngineError::decode(label, err))
    }
}
