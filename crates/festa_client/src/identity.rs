//! Connection identity: a durable client id plus the latest server-issued
//! reconnect token.

use chrono::Utc;
use tracing::{debug, warn};

use crate::storage::{SharedStore, StoreError, CLIENT_ID_KEY, RECONNECT_TOKEN_KEY};

#[derive(Clone)]
pub struct ConnectionIdentity {
    client_id: String,
    reconnect_token: Option<String>,
    storage: SharedStore,
}

impl ConnectionIdentity {
    /// Load the persisted identity, generating and persisting a time-derived
    /// client id on first use.
    pub fn load_or_create(storage: SharedStore) -> Result<Self, StoreError> {
        let client_id = match storage.get(CLIENT_ID_KEY)? {
            Some(id) if !id.is_empty() => id,
            _ => {
                let id = Utc::now().timestamp_millis().to_string();
                storage.set(CLIENT_ID_KEY, &id)?;
                debug!(client_id = %id, "generated client id");
                id
            }
        };
        let reconnect_token = storage.get(RECONNECT_TOKEN_KEY)?.filter(|t| !t.is_empty());
        Ok(Self {
            client_id,
            reconnect_token,
            storage,
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn reconnect_token(&self) -> Option<&str> {
        self.reconnect_token.as_deref()
    }

    /// Supersede the reconnect token. The in-memory value is replaced even if
    /// persisting fails, so the running session still resumes with it.
    pub fn replace_token(&mut self, token: String) {
        if let Err(err) = self.storage.set(RECONNECT_TOKEN_KEY, &token) {
            warn!("failed to persist reconnect token: {err}");
        }
        self.reconnect_token = Some(token);
    }
}

impl std::fmt::Debug for ConnectionIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionIdentity")
            .field("client_id", &self.client_id)
            .field("has_reconnect_token", &self.reconnect_token.is_some())
            .finish()
    }
}
