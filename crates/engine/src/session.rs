//! Session lifecycle against the provider.
//!
//! A session goes through
//! `Unauthenticated -> SessionRequested -> AwaitingPhoneConfirmation ->
//! AwaitingPassword -> LevelingUp -> Authorized`, and lands in `Invalid` when
//! the handshake fails or the keep-alive notices the session is gone.
//!
//! The slot is guarded by a [`RwLock`]: record calls read the token, the
//! handshake and invalidation write it. The handshake holds the write lock
//! from the first request to the last one, so concurrent callers wait for
//! its result instead of starting their own.

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use tokio::{sync::RwLock, task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;

use crate::{
    CallContext, Credential, EngineError, ResultEngine,
    provider::{
        ProviderConfig, Transport,
        envelope::{OK, WAITING_CONFIRMATION},
    },
};

const CLIENT_ACCESS_LEVEL: &str = "CLIENT";
const SIGN_UP: &str = "sign_up";

/// Source of the one-time code sent by the bank during authorization.
#[async_trait]
pub trait Confirm: Send + Sync {
    async fn confirmation_code(&self, username: &str) -> ResultEngine<String>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Unauthenticated,
    SessionRequested,
    AwaitingPhoneConfirmation,
    AwaitingPassword,
    LevelingUp,
    Authorized,
    Invalid,
}

#[derive(Debug, Default)]
struct Slot {
    state: SessionState,
    token: Option<String>,
    generation: u64,
    keep_alive: Option<JoinHandle<()>>,
}

impl Slot {
    fn authorized_token(&self) -> Option<&str> {
        match self.state {
            SessionState::Authorized => self.token.as_deref(),
            _ => None,
        }
    }

    fn stop_keep_alive(&mut self) {
        if let Some(handle) = self.keep_alive.take() {
            handle.abort();
        }
    }

    fn invalidate(&mut self) {
        self.stop_keep_alive();
        self.token = None;
        self.state = SessionState::Invalid;
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Pong {
    #[serde(default)]
    access_level: String,
}

/// Query parameters identifying the session on authorized requests.
pub(crate) fn session_query(token: &str) -> [(&'static str, &str); 2] {
    [("sessionid", token), ("sessionId", token)]
}

pub struct SessionManager {
    credential: Credential,
    transport: Transport,
    confirm: Arc<dyn Confirm>,
    keep_alive: Duration,
    confirmation_timeout: Duration,
    slot: Arc<RwLock<Slot>>,
    /// Stops every keep-alive task of this manager.
    shutdown: CancellationToken,
}

impl SessionManager {
    /// Create the manager. A credential carrying a session token starts
    /// authorized and is kept alive right away.
    pub async fn start(
        credential: Credential,
        transport: Transport,
        confirm: Arc<dyn Confirm>,
        config: &ProviderConfig,
    ) -> Self {
        let manager = Self {
            transport,
            confirm,
            keep_alive: config.keep_alive,
            confirmation_timeout: config.confirmation_timeout,
            slot: Arc::new(RwLock::new(Slot::default())),
            shutdown: CancellationToken::new(),
            credential,
        };

        if let Some(token) = manager.credential.session_id.clone() {
            let mut slot = manager.slot.write().await;
            slot.state = SessionState::Authorized;
            slot.generation += 1;
            slot.keep_alive = Some(manager.spawn_keep_alive(token.clone(), slot.generation));
            slot.token = Some(token);
        }

        manager
    }

    pub fn username(&self) -> &str {
        &self.credential.username
    }

    pub async fn state(&self) -> SessionState {
        self.slot.read().await.state
    }

    /// Current session token, running the handshake when there is none.
    /// A handshake that failed within `ctx` is not attempted again.
    pub async fn ensure(&self, ctx: &CallContext) -> ResultEngine<String> {
        if let Some(token) = self.slot.read().await.authorized_token() {
            return Ok(token.to_string());
        }
        if let Some(reason) = ctx.authorization_failure() {
            return Err(EngineError::AuthorizationFailed(reason.to_string()));
        }

        match self.authorize(ctx.cancel()).await {
            Err(err) if !err.is_cancellation() => {
                ctx.fail_authorization(err.to_string());
                Err(err)
            }
            result => result,
        }
    }

    /// Drop `stale` if it is still the live session. A token that was
    /// already replaced by another caller is left alone.
    pub async fn invalidate(&self, stale: &str) {
        let mut slot = self.slot.write().await;
        if slot.token.as_deref() == Some(stale) {
            tracing::info!("session of {} invalidated", self.credential.username);
            slot.invalidate();
        }
    }

    async fn authorize(&self, cancel: &CancellationToken) -> ResultEngine<String> {
        let mut slot = self.slot.write().await;
        if let Some(token) = slot.authorized_token() {
            return Ok(token.to_string());
        }

        slot.stop_keep_alive();
        slot.token = None;

        match self.handshake(&mut slot, cancel).await {
            Ok(token) => {
                tracing::info!("authorized session for {}", self.credential.username);
                slot.state = SessionState::Authorized;
                slot.generation += 1;
                slot.keep_alive = Some(self.spawn_keep_alive(token.clone(), slot.generation));
                slot.token = Some(token.clone());
                Ok(token)
            }
            Err(err) => {
                tracing::warn!(
                    "authorization of {} failed: {err}",
                    self.credential.username
                );
                slot.invalidate();
                Err(err)
            }
        }
    }

    async fn handshake(&self, slot: &mut Slot, cancel: &CancellationToken) -> ResultEngine<String> {
        let transport = &self.transport;

        slot.state = SessionState::SessionRequested;
        let token: String = transport
            .exchange(transport.common(Method::GET, "session"), OK, cancel)
            .await?
            .payload("session")?;
        let query = session_query(&token);

        let reply = transport
            .exchange(
                transport
                    .common(Method::POST, SIGN_UP)
                    .query(&query)
                    .form(&[("phone", self.credential.phone.as_str())]),
                WAITING_CONFIRMATION,
                cancel,
            )
            .await?;
        let ticket = reply
            .ticket()
            .ok_or_else(|| EngineError::Confirmation("missing operation ticket".to_string()))?
            .to_string();

        slot.state = SessionState::AwaitingPhoneConfirmation;
        let code = self.confirmation_code(cancel).await?;
        let confirmation_data = serde_json::json!({ "SMSBYID": code }).to_string();
        transport
            .exchange(
                transport.common(Method::POST, "confirm").query(&query).form(&[
                    ("initialOperation", SIGN_UP),
                    ("initialOperationTicket", ticket.as_str()),
                    ("confirmationData", confirmation_data.as_str()),
                ]),
                OK,
                cancel,
            )
            .await?;

        slot.state = SessionState::AwaitingPassword;
        transport
            .exchange(
                transport
                    .common(Method::POST, SIGN_UP)
                    .query(&query)
                    .form(&[("password", self.credential.password.as_str())]),
                OK,
                cancel,
            )
            .await?;

        slot.state = SessionState::LevelingUp;
        transport
            .exchange(
                transport.common(Method::GET, "level_up").query(&query),
                OK,
                cancel,
            )
            .await?;

        Ok(token)
    }

    async fn confirmation_code(&self, cancel: &CancellationToken) -> ResultEngine<String> {
        let wait = tokio::time::timeout(
            self.confirmation_timeout,
            self.confirm.confirmation_code(&self.credential.username),
        );

        let code = tokio::select! {
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            code = wait => code.map_err(|_| EngineError::ConfirmationTimeout)??,
        };

        Ok(code
            .trim_matches(|c| matches!(c, ' ' | '\n' | '\t'))
            .to_string())
    }

    fn spawn_keep_alive(&self, token: String, generation: u64) -> JoinHandle<()> {
        let transport = self.transport.clone();
        let slot = Arc::downgrade(&self.slot);
        let every = self.keep_alive;
        let username = self.credential.username.clone();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            keep_alive(transport, slot, token, generation, every, username, shutdown).await;
        })
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn keep_alive(
    transport: Transport,
    slot: Weak<RwLock<Slot>>,
    token: String,
    generation: u64,
    every: Duration,
    username: String,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + every, every);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = ticker.tick() => {}
        }
        if slot.strong_count() == 0 {
            return;
        }

        let request = transport
            .common(Method::GET, "ping")
            .query(&session_query(&token));
        let pong = transport
            .exchange(request, OK, &shutdown)
            .await
            .and_then(|reply| reply.payload::<Pong>("ping"));

        match pong {
            Ok(pong) if pong.access_level == CLIENT_ACCESS_LEVEL => {
                tracing::debug!("ping {username} => {}", pong.access_level);
            }
            Ok(pong) => {
                tracing::warn!("ping {username} => access level {}", pong.access_level);
                break;
            }
            Err(err) if err.is_cancellation() => return,
            Err(err) => {
                tracing::warn!("ping {username} failed: {err}");
                break;
            }
        }
    }

    let Some(slot) = slot.upgrade() else {
        return;
    };
    let mut slot = slot.write().await;
    if slot.generation == generation {
        // Our own handle: dropping it detaches this task, which is ending.
        slot.keep_alive = None;
        slot.token = None;
        slot.state = SessionState::Invalid;
    }
}
