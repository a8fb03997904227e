use std::{collections::HashMap, sync::Arc};

use engine::Client;
use teloxide::types::ChatId;
use tokio::sync::{Mutex, oneshot};
use tokio_util::sync::CancellationToken;

/// Chats waiting for a confirmation code. The next text message of such a
/// chat is the code.
#[derive(Clone, Default)]
pub(crate) struct PendingCodes {
    inner: Arc<Mutex<HashMap<ChatId, oneshot::Sender<String>>>>,
}

impl PendingCodes {
    pub(crate) async fn expect(&self, chat_id: ChatId) -> oneshot::Receiver<String> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().await.insert(chat_id, tx);
        rx
    }

    /// Hand `text` to the waiting sync, if any.
    pub(crate) async fn deliver(&self, chat_id: ChatId, text: &str) -> bool {
        let Some(tx) = self.inner.lock().await.remove(&chat_id) else {
            return false;
        };
        tx.send(text.to_string()).is_ok()
    }
}

/// Syncs in flight, one per chat.
#[derive(Clone, Default)]
pub(crate) struct RunStore {
    inner: Arc<Mutex<HashMap<ChatId, CancellationToken>>>,
}

impl RunStore {
    /// Register a new run. `None` when the chat already has one.
    pub(crate) async fn start(&self, chat_id: ChatId) -> Option<CancellationToken> {
        let mut guard = self.inner.lock().await;
        if guard.contains_key(&chat_id) {
            return None;
        }
        let cancel = CancellationToken::new();
        guard.insert(chat_id, cancel.clone());
        Some(cancel)
    }

    pub(crate) async fn finish(&self, chat_id: ChatId) {
        self.inner.lock().await.remove(&chat_id);
    }

    pub(crate) async fn cancel(&self, chat_id: ChatId) -> bool {
        match self.inner.lock().await.get(&chat_id) {
            Some(cancel) => {
                cancel.cancel();
                true
            }
            None => false,
        }
    }
}

/// Provider clients by telegram user id. A client keeps its session alive
/// between runs.
#[derive(Clone, Default)]
pub(crate) struct ClientStore {
    inner: Arc<Mutex<HashMap<u64, Arc<Client>>>>,
}

impl ClientStore {
    pub(crate) async fn get(&self, user_id: u64) -> Option<Arc<Client>> {
        self.inner.lock().await.get(&user_id).cloned()
    }

    pub(crate) async fn insert(&self, user_id: u64, client: Arc<Client>) -> Arc<Client> {
        self.inner
            .lock()
            .await
            .entry(user_id)
            .or_insert(client)
            .clone()
    }
}
