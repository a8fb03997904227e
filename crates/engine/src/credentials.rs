//! Bank credentials of the bot users.
//!
//! The store file holds base64 of a JSON object mapping the end-user id
//! (the telegram user id) to a [`Credential`].

use std::{collections::BTreeMap, fmt, fs, path::Path};

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::{EngineError, ResultEngine};

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub username: String,
    pub phone: String,
    pub password: String,
    /// While valid, no interactive authorization is needed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("phone", &self.phone)
            .field("password", &"***")
            .field("session_id", &self.session_id.as_ref().map(|_| "***"))
            .finish()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialStore(BTreeMap<u64, Credential>);

impl CredentialStore {
    pub fn decode(encoded: &str) -> ResultEngine<Self> {
        let raw = base64::prelude::BASE64_STANDARD
            .decode(encoded.trim())
            .map_err(|err| EngineError::Credentials(format!("invalid base64: {err}")))?;
        serde_json::from_slice(&raw).map_err(|err| EngineError::decode("credential store", err))
    }

    pub fn encode(&self) -> ResultEngine<String> {
        let raw =
            serde_json::to_vec(self).map_err(|err| EngineError::decode("credential store", err))?;
        Ok(base64::prelude::BASE64_STANDARD.encode(raw))
    }

    pub fn load(path: impl AsRef<Path>) -> ResultEngine<Self> {
        let path = path.as_ref();
        let encoded = fs::read_to_string(path).map_err(|err| {
            EngineError::Credentials(format!("read {}: {err}", path.display()))
        })?;
        Self::decode(&encoded)
    }

    /// Like [`load`](Self::load), but a missing file is an empty store.
    pub fn load_or_empty(path: impl AsRef<Path>) -> ResultEngine<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> ResultEngine<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| {
                EngineError::Credentials(format!("create {}: {err}", parent.display()))
            })?;
        }
        fs::write(path, self.encode()?)
            .map_err(|err| EngineError::Credentials(format!("write {}: {err}", path.display())))
    }

    pub fn get(&self, user_id: u64) -> Option<&Credential> {
        self.0.get(&user_id)
    }

    pub fn insert(&mut self, user_id: u64, credential: Credential) -> Option<Credential> {
        self.0.insert(user_id, credential)
    }

    pub fn remove(&mut self, user_id: u64) -> Option<Credential> {
        self.0.remove(&user_id)
    }

    pub fn user_ids(&self) -> Vec<u64> {
        self.0.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &Credential)> {
        self.0.iter().map(|(id, credential)| (*id, credential))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
