//! Session store
//!
//! Owns the two process-wide indices: `token → session` (source of truth)
//! and `(userId, characterId) → token` (used only to find and evict a
//! predecessor session on login from another device). Cross-session
//! operations snapshot the handles they need and never hold the store
//! lock across an `.await`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, RwLock};

use crate::config::Config;
use crate::error::{ProxyError, Result};
use crate::session::{PendingAuth, Session};
use crate::ws::Outbound;

fn user_char_key(user_id: &str, character_id: &str) -> String {
    format!("{user_id}\u{0}{character_id}")
}

/// Process-wide session registry.
pub struct SessionStore {
    by_token: RwLock<HashMap<String, Arc<Session>>>,
    by_user_char: RwLock<HashMap<String, String>>,
    config: Arc<Config>,
}

impl SessionStore {
    pub fn new(config: Arc<Config>) -> Arc<Self> {
        Arc::new(Self {
            by_token: RwLock::new(HashMap::new()),
            by_user_char: RwLock::new(HashMap::new()),
            config,
        })
    }

    /// Handle an `auth` frame: evict a predecessor `(user, character)`
    /// session if present, then either take over an existing token's
    /// session or create a fresh one. Returns the session and the
    /// outbound receiver the caller should drain to the WebSocket.
    pub async fn authenticate(
        self: &Arc<Self>,
        auth: PendingAuth,
    ) -> Result<(Arc<Session>, mpsc::UnboundedReceiver<Outbound>)> {
        if !crate::session::is_valid_token(&auth.token) {
            return Err(ProxyError::Auth("token must be exactly 64 hex characters".to_string()));
        }

        if let (Some(user_id), Some(character_id)) = (&auth.user_id, &auth.character_id) {
            self.evict_predecessor(user_id, character_id, &auth.token).await;
            let mut by_user_char = self.by_user_char.write().await;
            by_user_char.insert(user_char_key(user_id, character_id), auth.token.clone());
        }

        let existing = {
            let by_token = self.by_token.read().await;
            by_token.get(&auth.token).cloned()
        };

        if let Some(session) = existing {
            let rx = session.take_over(&auth).await;
            return Ok((session, rx));
        }

        let session = Session::new(&auth, self.config.clone());
        {
            let mut by_token = self.by_token.write().await;
            by_token.insert(auth.token.clone(), session.clone());
        }
        let rx = session.attach_browser().await;
        {
            let mut state = session.state.lock().await;
            if let Some(tx) = &state.ws_tx {
                let _ = tx.send(Outbound::SessionNew {});
            }
            drop(state);
        }
        Ok((session, rx))
    }

    async fn evict_predecessor(&self, user_id: &str, character_id: &str, new_token: &str) {
        let predecessor_token = {
            let by_user_char = self.by_user_char.read().await;
            by_user_char.get(&user_char_key(user_id, character_id)).cloned()
        };
        let Some(predecessor_token) = predecessor_token else { return };
        if predecessor_token == new_token {
            return;
        }
        let predecessor = {
            let by_token = self.by_token.read().await;
            by_token.get(&predecessor_token).cloned()
        };
        if let Some(session) = predecessor {
            session.evict_for_takeover().await;
            session.teardown().await;
            let mut by_token = self.by_token.write().await;
            by_token.remove(&predecessor_token);
        }
    }

    /// Permanently remove a session (explicit disconnect, MUD `end`, or
    /// idle-timeout expiry).
    pub async fn remove(&self, token: &str) {
        let session = {
            let mut by_token = self.by_token.write().await;
            by_token.remove(token)
        };
        if let Some(session) = session {
            session.teardown().await;
        }
    }

    /// Send `broadcast` to every session with an attached (OPEN) browser.
    pub async fn broadcast(&self, message: &str, timestamp: &str) {
        let sessions: Vec<Arc<Session>> = {
            let by_token = self.by_token.read().await;
            by_token.values().cloned().collect()
        };
        for session in sessions {
            let state = session.state.lock().await;
            if let Some(tx) = &state.ws_tx {
                let _ = tx.send(Outbound::Broadcast {
                    message: message.to_string(),
                    timestamp: timestamp.to_string(),
                });
            }
        }
    }

    /// A snapshot row for the `/sessions` admin listing.
    pub async fn list_summaries(&self) -> Vec<SessionSummary> {
        let sessions: Vec<Arc<Session>> = {
            let by_token = self.by_token.read().await;
            by_token.values().cloned().collect()
        };
        let mut out = Vec::with_capacity(sessions.len());
        for session in sessions {
            let state = session.state.lock().await;
            out.push(SessionSummary {
                user_id: state.user_id.clone(),
                character_id: state.character_id.clone(),
                character_name: state.character_name.clone(),
                server: state.target_host.as_deref().map(crate::config::server_tag),
                mud_connected: state.mud.is_some(),
                browser_attached: state.ws_tx.is_some(),
            });
        }
        out
    }

    /// Run the idle-timeout sweep once. Intended to be called from a
    /// `tokio::time::interval` loop at `config.timing.sweep_interval_secs`.
    pub async fn sweep_idle(self: &Arc<Self>) {
        let idle_timeout = Duration::from_secs(self.config.timing.idle_timeout_secs);
        let sessions: Vec<(String, Arc<Session>)> = {
            let by_token = self.by_token.read().await;
            by_token.iter().map(|(t, s)| (t.clone(), s.clone())).collect()
        };
        for (token, session) in sessions {
            if session.is_idle_evictable(idle_timeout).await {
                self.remove(&token).await;
            }
        }
    }
}

/// A row in the `/sessions` admin listing.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionSummary {
    pub user_id: Option<String>,
    pub character_id: Option<String>,
    pub character_name: Option<String>,
    pub server: Option<String>,
    pub mud_connected: bool,
    pub browser_attached: bool,
}
