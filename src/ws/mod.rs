//! WebSocket dispatcher
//!
//! Decodes/encodes the JSON frame protocol and routes inbound messages to
//! session handlers, enforcing that `auth` is the first frame on every
//! connection.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};

use crate::script::{Alias, Ticker, Trigger};
use crate::session::store::SessionStore;
use crate::session::Session;

/// Inbound message union, discriminated by `type`. Unknown kinds are a
/// recoverable error: log and drop the frame.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum Inbound {
    #[serde(rename = "auth")]
    Auth {
        token: String,
        #[serde(rename = "userId", default)]
        user_id: Option<String>,
        #[serde(rename = "characterId", default)]
        character_id: Option<String>,
        #[serde(rename = "characterName", default)]
        character_name: Option<String>,
        #[serde(rename = "isWizard", default)]
        is_wizard: Option<bool>,
    },
    #[serde(rename = "command")]
    Command {
        command: String,
        #[serde(default)]
        raw: bool,
    },
    #[serde(rename = "set_triggers")]
    SetTriggers { triggers: Vec<Trigger> },
    #[serde(rename = "set_aliases")]
    SetAliases { aliases: Vec<Alias> },
    #[serde(rename = "set_tickers")]
    SetTickers { tickers: Vec<Ticker> },
    #[serde(rename = "set_mip")]
    SetMip {
        enabled: bool,
        #[serde(rename = "mipId", default)]
        mip_id: Option<String>,
        #[serde(default)]
        debug: bool,
    },
    #[serde(rename = "set_discord_prefs")]
    SetDiscordPrefs {
        #[serde(default)]
        username: Option<String>,
        #[serde(rename = "channelPrefs", default)]
        channel_prefs: std::collections::HashMap<String, ChannelPrefs>,
    },
    #[serde(rename = "set_server")]
    SetServer { host: String, port: u16 },
    #[serde(rename = "keepalive")]
    Keepalive {},
    #[serde(rename = "health_check")]
    HealthCheck {},
    #[serde(rename = "reconnect")]
    Reconnect {},
    #[serde(rename = "test_line")]
    TestLine { line: String },
    #[serde(rename = "disconnect")]
    Disconnect {},
}

/// Per-channel Discord notification routing preferences.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelPrefs {
    #[serde(default)]
    pub sound: bool,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub discord: bool,
    #[serde(rename = "webhookUrl", default)]
    pub webhook_url: Option<String>,
}

/// Outbound message union. Field names match the wire contract in §6.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type")]
pub enum Outbound {
    #[serde(rename = "session_new")]
    SessionNew {},
    #[serde(rename = "session_resumed")]
    SessionResumed {
        #[serde(rename = "mudConnected")]
        mud_connected: bool,
    },
    #[serde(rename = "session_taken")]
    SessionTaken { message: String },
    #[serde(rename = "error")]
    Error { message: String },
    #[serde(rename = "system")]
    System { message: String },
    #[serde(rename = "mud")]
    Mud {
        line: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        highlight: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        sound: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        test: Option<bool>,
    },
    #[serde(rename = "mip_stats")]
    MipStats { stats: crate::mip::MipStats },
    #[serde(rename = "mip_chat")]
    MipChat {
        #[serde(rename = "chatType")]
        chat_type: String,
        channel: String,
        raw: String,
        #[serde(rename = "rawText")]
        raw_text: String,
        message: String,
    },
    #[serde(rename = "mip_debug")]
    MipDebug {
        #[serde(rename = "msgType")]
        msg_type: String,
        #[serde(rename = "msgData")]
        msg_data: String,
    },
    #[serde(rename = "client_command")]
    ClientCommand { command: String },
    #[serde(rename = "disable_trigger")]
    DisableTrigger {
        #[serde(rename = "triggerId")]
        trigger_id: String,
    },
    #[serde(rename = "trigger_chatmon")]
    TriggerChatmon { message: String, channel: String },
    #[serde(rename = "broadcast")]
    Broadcast { message: String, timestamp: String },
    #[serde(rename = "keepalive_ack")]
    KeepaliveAck {},
    #[serde(rename = "health_ok")]
    HealthOk {},
}

/// Serve one browser connection end-to-end: wait for `auth`, attach to (or
/// create) a session, then dispatch subsequent frames until the socket
/// closes.
pub async fn handle_socket(socket: WebSocket, store: Arc<SessionStore>) {
    let (mut sender, mut receiver) = socket.split();

    let auth = match receive_auth(&mut receiver).await {
        Ok(auth) => auth,
        Err(reason) => {
            let err = Outbound::Error { message: reason };
            if let Ok(text) = serde_json::to_string(&err) {
                let _ = sender.send(Message::Text(text)).await;
            }
            let _ = sender.close().await;
            return;
        }
    };

    let (session, mut outbound_rx): (Arc<Session>, _) = match store.authenticate(auth.into()).await {
        Ok(pair) => pair,
        Err(e) => {
            let err = Outbound::Error { message: e.to_string() };
            if let Ok(text) = serde_json::to_string(&err) {
                let _ = sender.send(Message::Text(text)).await;
            }
            let _ = sender.close().await;
            return;
        }
    };

    let writer_task = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            if let Ok(text) = serde_json::to_string(&msg) {
                if sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        }
    });

    while let Some(Ok(msg)) = receiver.next().await {
        let Message::Text(text) = msg else {
            if matches!(msg, Message::Close(_)) {
                break;
            }
            continue;
        };
        match serde_json::from_str::<Inbound>(&text) {
            Ok(inbound) => session.dispatch(inbound).await,
            Err(e) => {
                tracing::debug!("dropping malformed frame: {e}");
            }
        }
    }

    session.detach_browser().await;
    writer_task.abort();

    let explicit = session.state.lock().await.explicit_disconnect;
    if explicit {
        store.remove(&session.token).await;
    }
}

struct AuthRequest {
    token: String,
    user_id: Option<String>,
    character_id: Option<String>,
    character_name: Option<String>,
    is_wizard: bool,
}

async fn receive_auth(
    receiver: &mut futures::stream::SplitStream<WebSocket>,
) -> Result<AuthRequest, String> {
    let Some(Ok(Message::Text(text))) = receiver.next().await else {
        return Err("first frame must be auth".to_string());
    };
    let inbound: Inbound =
        serde_json::from_str(&text).map_err(|_| "malformed auth frame".to_string())?;
    let Inbound::Auth { token, user_id, character_id, character_name, is_wizard } = inbound else {
        return Err("first frame must be auth".to_string());
    };
    if !crate::session::is_valid_token(&token) {
        return Err("token must be exactly 64 hex characters".to_string());
    }
    Ok(AuthRequest {
        token,
        user_id,
        character_id,
        character_name,
        is_wizard: is_wizard.unwrap_or(false),
    })
}

impl From<AuthRequest> for crate::session::PendingAuth {
    fn from(req: AuthRequest) -> Self {
        crate::session::PendingAuth {
            token: req.token,
            user_id: req.user_id,
            character_id: req.character_id,
            character_name: req.character_name,
            is_wizard: req.is_wizard,
        }
    }
}
