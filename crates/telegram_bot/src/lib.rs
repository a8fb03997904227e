//! Telegram bot.
//!
//! Serves `/update_bank_statement` to the users found in the credential
//! store: it runs a sync with the engine, relays the confirmation code the
//! bank asks for and sends the report back to the chat.

use std::sync::Arc;

use engine::{CredentialStore, ProviderConfig, Synchronizer};
use teloxide::prelude::*;

pub use error::BotError;

mod confirm;
mod error;
mod handlers;
mod state;

#[derive(Clone)]
pub struct ConfigParameters {
    credentials: Arc<CredentialStore>,
    synchronizer: Synchronizer,
    provider: ProviderConfig,
    clients: state::ClientStore,
    codes: state::PendingCodes,
    runs: state::RunStore,
}

pub struct Bot {
    token: String,
    credentials: Arc<CredentialStore>,
    synchronizer: Synchronizer,
    provider: ProviderConfig,
}

impl Bot {
    pub fn builder() -> BotBuilder {
        BotBuilder::default()
    }

    pub async fn run(&self) {
        tracing::info!(
            "Starting telegram bot for {} users...",
            self.credentials.user_ids().len()
        );

        let bot = teloxide::Bot::new(&self.token);

        let parameters = ConfigParameters {
            credentials: self.credentials.clone(),
            synchronizer: self.synchronizer.clone(),
            provider: self.provider.clone(),
            clients: state::ClientStore::default(),
            codes: state::PendingCodes::default(),
            runs: state::RunStore::default(),
        };

        let handler =
            dptree::entry().branch(Update::filter_message().endpoint(handlers::handle_message));

        Dispatcher::builder(bot, handler)
            .dependencies(dptree::deps![parameters])
            .default_handler(|upd| async move {
                tracing::warn!("Unhandled update: {:?}", upd);
            })
            .error_handler(LoggingErrorHandler::with_custom_text(
                "An error has occurred in the dispatcher",
            ))
            .enable_ctrlc_handler()
            .build()
            .dispatch()
            .await;
    }
}

#[derive(Default)]
pub struct BotBuilder {
    token: String,
    credentials: CredentialStore,
    synchronizer: Option<Synchronizer>,
    provider: ProviderConfig,
}

impl BotBuilder {
    pub fn token(mut self, token: &str) -> BotBuilder {
        self.token = token.to_string();
        self
    }

    pub fn credentials(mut self, credentials: CredentialStore) -> BotBuilder {
        self.credentials = credentials;
        self
    }

    pub fn synchronizer(mut self, synchronizer: Synchronizer) -> BotBuilder {
        self.synchronizer = Some(synchronizer);
        self
    }

    pub fn provider(mut self, provider: ProviderConfig) -> BotBuilder {
        self.provider = provider;
        self
    }

    pub fn build(self) -> Result<Bot, BotError> {
        tracing::info!("Initializing telegram bot...");
        if self.token.is_empty() {
            return Err(BotError::MissingToken);
        }
        let synchronizer = self.synchronizer.ok_or(BotError::MissingSynchronizer)?;
        if self.credentials.is_empty() {
            tracing::warn!("credential store is empty, nobody will be served");
        }

        Ok(Bot {
            token: self.token,
            credentials: Arc::new(self.credentials),
            synchronizer,
            provider: self.provider,
        })
    }
}
