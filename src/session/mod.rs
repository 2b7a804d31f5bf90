//! Session lifecycle
//!
//! A `Session` is the central entity: one per active token, holding the
//! attached browser (if any), the upstream MUD connection (if any), the
//! active rule sets, and all protocol-layer state (line buffer, ANSI
//! carry, MIP decoder). All mutable fields live behind one `tokio::sync`
//! mutex so triggers mutating `loopTracker`, the MIP decoder mutating
//! `mipStats`, and the dispatcher mutating rule sets never race.

pub mod mud;
pub mod store;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, Mutex};

use crate::ansi::AnsiTracker;
use crate::config::Config;
use crate::mip::{MipDecoder, MipOutcome};
use crate::script::trigger::LoopWindow;
use crate::script::{ticker::TickerScheduler, Alias, Ticker, Trigger};
use crate::session::mud::MudHandle;
use crate::telnet::LineAssembler;
use crate::ws::{ChannelPrefs, Inbound, Outbound};

/// Validate a session token: exactly 64 hex characters.
pub fn is_valid_token(token: &str) -> bool {
    token.len() == 64 && token.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Identity and credentials carried by the first (`auth`) frame.
#[derive(Debug, Clone)]
pub struct PendingAuth {
    pub token: String,
    pub user_id: Option<String>,
    pub character_id: Option<String>,
    pub character_name: Option<String>,
    pub is_wizard: bool,
}

/// Mutable session state, guarded by `Session::state`.
pub struct SessionState {
    pub user_id: Option<String>,
    pub character_id: Option<String>,
    pub character_name: Option<String>,
    pub is_wizard: bool,

    pub ws_tx: Option<mpsc::UnboundedSender<Outbound>>,
    pub mud: Option<MudHandle>,
    pub target_host: Option<String>,
    pub target_port: Option<u16>,

    pub buffer: VecDeque<Outbound>,
    pub buffer_overflow: bool,
    pub disconnected_at: Option<Instant>,
    pub explicit_disconnect: bool,

    pub line_assembler: LineAssembler,
    pub ansi: AnsiTracker,
    pub mip: MipDecoder,

    pub triggers: Arc<Vec<Trigger>>,
    pub aliases: Arc<Vec<Alias>>,
    pub tickers: Arc<Vec<Ticker>>,
    pub loop_tracker: HashMap<String, LoopWindow>,
    pub disabled_triggers: HashSet<String>,
    pub ticker_scheduler: TickerScheduler,
    pub ticker_tx: mpsc::UnboundedSender<String>,

    pub discord_username: Option<String>,
    pub discord_channel_prefs: HashMap<String, ChannelPrefs>,
}

/// A session: one per active token.
pub struct Session {
    pub token: String,
    pub config: Arc<Config>,
    pub state: Mutex<SessionState>,
}

impl Session {
    /// Construct a fresh session and spawn its ticker-tick consumer task.
    fn new(auth: &PendingAuth, config: Arc<Config>) -> Arc<Self> {
        let (ticker_tx, mut ticker_rx) = mpsc::unbounded_channel::<String>();
        let session = Self::new_with_ticker_tx(auth, config, ticker_tx);
        let consumer = session.clone();
        tokio::spawn(async move {
            while let Some(ticker_id) = ticker_rx.recv().await {
                consumer.handle_ticker_tick(&ticker_id).await;
            }
        });
        session
    }

    fn new_with_ticker_tx(
        auth: &PendingAuth,
        config: Arc<Config>,
        ticker_tx: mpsc::UnboundedSender<String>,
    ) -> Arc<Self> {
        Arc::new(Session {
            token: auth.token.clone(),
            config,
            state: Mutex::new(SessionState {
                user_id: auth.user_id.clone(),
                character_id: auth.character_id.clone(),
                character_name: auth.character_name.clone(),
                is_wizard: auth.is_wizard,
                ws_tx: None,
                mud: None,
                target_host: None,
                target_port: None,
                buffer: VecDeque::new(),
                buffer_overflow: false,
                disconnected_at: None,
                explicit_disconnect: false,
                line_assembler: LineAssembler::new(),
                ansi: AnsiTracker::new(),
                mip: MipDecoder::new(),
                triggers: Arc::new(Vec::new()),
                aliases: Arc::new(Vec::new()),
                tickers: Arc::new(Vec::new()),
                loop_tracker: HashMap::new(),
                disabled_triggers: HashSet::new(),
                ticker_scheduler: TickerScheduler::new(),
                ticker_tx,
                discord_username: None,
                discord_channel_prefs: HashMap::new(),
            }),
        })
    }

    /// Attach a fresh browser connection, returning the receiver half the
    /// caller should drain into the WebSocket sink.
    pub async fn attach_browser(self: &Arc<Self>) -> mpsc::UnboundedReceiver<Outbound> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock().await;
        state.ws_tx = Some(tx);
        state.disconnected_at = None;
        rx
    }

    /// The browser connection has closed (gracefully or otherwise). The
    /// MUD connection and all scripts survive unless `explicitDisconnect`
    /// was set, in which case the caller (store) should remove this
    /// session entirely.
    pub async fn detach_browser(self: &Arc<Self>) {
        let mut state = self.state.lock().await;
        state.ws_tx = None;
        state.disconnected_at = Some(Instant::now());
    }

    /// Send `session_taken` to the current browser (if any) and detach it,
    /// as the losing side of a takeover.
    pub async fn evict_for_takeover(self: &Arc<Self>) {
        let mut state = self.state.lock().await;
        if let Some(tx) = state.ws_tx.take() {
            let _ = tx.send(Outbound::SessionTaken {
                message: "Your session was taken over from another connection.".to_string(),
            });
        }
        state.disconnected_at = Some(Instant::now());
    }

    /// Claim this existing session for a reconnecting browser: discard the
    /// buffer, clear overflow, and prepare `session_resumed` + (if present)
    /// a `mipStats` snapshot for the caller to send.
    pub async fn take_over(self: &Arc<Self>, auth: &PendingAuth) -> mpsc::UnboundedReceiver<Outbound> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock().await;

        if let Some(old_tx) = state.ws_tx.take() {
            let _ = old_tx.send(Outbound::SessionTaken {
                message: "Your session was taken over from another connection.".to_string(),
            });
        }

        state.user_id = auth.user_id.clone().or_else(|| state.user_id.clone());
        state.character_id = auth.character_id.clone().or_else(|| state.character_id.clone());
        state.character_name = auth.character_name.clone().or_else(|| state.character_name.clone());

        state.ws_tx = Some(tx);
        state.disconnected_at = None;
        state.buffer.clear();
        state.buffer_overflow = false;

        let mud_connected = state.mud.is_some();
        let _ = state.ws_tx.as_ref().unwrap().send(Outbound::SessionResumed { mud_connected });

        if state.mip.stats.hp_max.unwrap_or(0) > 0 {
            let _ = state
                .ws_tx
                .as_ref()
                .unwrap()
                .send(Outbound::MipStats { stats: state.mip.stats.clone() });
        }

        rx
    }

    /// Enqueue an outbound message: send immediately if a browser is
    /// attached, otherwise buffer it (dropping from the head on overflow).
    fn enqueue(state: &mut SessionState, msg: Outbound) {
        if let Some(tx) = &state.ws_tx {
            if tx.send(msg).is_ok() {
                return;
            }
        }
        if state.buffer.len() >= 150 {
            state.buffer.pop_front();
            state.buffer_overflow = true;
        }
        state.buffer.push_back(msg);
    }

    /// Dispatch one post-auth inbound frame.
    pub async fn dispatch(self: &Arc<Self>, inbound: Inbound) {
        match inbound {
            Inbound::Auth { .. } => {
                // Auth-after-auth is ignored; the handshake already happened.
            }
            Inbound::Command { command, raw } => self.handle_command(command, raw).await,
            Inbound::SetTriggers { triggers } => {
                let mut state = self.state.lock().await;
                state.triggers = Arc::new(triggers);
            }
            Inbound::SetAliases { aliases } => {
                let mut state = self.state.lock().await;
                state.aliases = Arc::new(aliases);
            }
            Inbound::SetTickers { tickers } => {
                let mut state = self.state.lock().await;
                let tx = state.ticker_tx.clone();
                state.ticker_scheduler.rearm(&tickers, tx);
                state.tickers = Arc::new(tickers);
            }
            Inbound::SetMip { enabled, mip_id, debug } => {
                let mut state = self.state.lock().await;
                state.mip.enabled = enabled;
                if let Some(id) = mip_id {
                    state.mip.mip_id = Some(id);
                }
                state.mip.debug = debug;
            }
            Inbound::SetDiscordPrefs { username, channel_prefs } => {
                let mut state = self.state.lock().await;
                state.discord_username = username;
                state.discord_channel_prefs = channel_prefs;
            }
            Inbound::SetServer { host, port } => self.handle_set_server(host, port).await,
            Inbound::Keepalive {} => {
                let mut state = self.state.lock().await;
                Self::enqueue(&mut state, Outbound::KeepaliveAck {});
            }
            Inbound::HealthCheck {} => {
                let mut state = self.state.lock().await;
                Self::enqueue(&mut state, Outbound::HealthOk {});
            }
            Inbound::Reconnect {} => self.handle_reconnect().await,
            Inbound::TestLine { line } => {
                let mut state = self.state.lock().await;
                self.process_rendered_line(&mut state, &line, true);
            }
            Inbound::Disconnect {} => {
                let mut state = self.state.lock().await;
                state.explicit_disconnect = true;
                state.mud = None;
            }
        }
    }

    /// A ticker fired: look up its command, expand via aliases, dispatch.
    /// No-ops if the MUD socket is absent (tickers never emit without one).
    async fn handle_ticker_tick(self: &Arc<Self>, ticker_id: &str) {
        let mut state = self.state.lock().await;
        if state.mud.is_none() {
            return;
        }
        let Some(ticker) = state.tickers.iter().find(|t| t.id == ticker_id).cloned() else {
            return;
        };
        let aliases = state.aliases.clone();
        for expanded in crate::script::alias::expand(&ticker.command, &aliases) {
            Self::write_mud_line(&mut state, &expanded);
        }
    }

    async fn handle_command(self: &Arc<Self>, command: String, raw: bool) {
        let mut state = self.state.lock().await;
        if raw {
            Self::write_mud_line(&mut state, &command);
            return;
        }

        let aliases = state.aliases.clone();
        for expanded in crate::script::alias::expand(&command, &aliases) {
            if let Some(rest) = expanded.strip_prefix('#') {
                if let Some((count_str, cmd)) = rest.split_once(' ') {
                    if let Ok(count) = count_str.parse::<u32>() {
                        let capped = count.min(100);
                        for _ in 0..capped {
                            Self::write_mud_line(&mut state, cmd);
                        }
                        continue;
                    }
                }
                Self::enqueue(&mut state, Outbound::ClientCommand { command: expanded });
                continue;
            }
            Self::write_mud_line(&mut state, &expanded);
        }
    }

    fn write_mud_line(state: &mut SessionState, line: &str) {
        if let Some(mud) = &state.mud {
            mud.send_line(line);
        }
    }

    async fn handle_set_server(self: &Arc<Self>, host: String, port: u16) {
        if !self.config.is_whitelisted(&host, port) {
            let mut state = self.state.lock().await;
            Self::enqueue(
                &mut state,
                Outbound::System {
                    message: format!("{host}:{port} is not a whitelisted MUD server"),
                },
            );
            return;
        }

        {
            let mut state = self.state.lock().await;
            state.target_host = Some(host.clone());
            state.target_port = Some(port);
        }

        match crate::session::mud::connect(self.clone(), host.clone(), port).await {
            Ok(handle) => {
                let mut state = self.state.lock().await;
                state.mud = Some(handle);
                Self::enqueue(
                    &mut state,
                    Outbound::System { message: format!("Connected to {host}:{port}") },
                );
            }
            Err(e) => {
                let mut state = self.state.lock().await;
                Self::enqueue(&mut state, Outbound::System { message: format!("Connect failed: {e}") });
            }
        }
    }

    async fn handle_reconnect(self: &Arc<Self>) {
        let (host, port) = {
            let mut state = self.state.lock().await;
            if let Some(mud) = state.mud.take() {
                mud.shutdown();
            }
            state.line_assembler = LineAssembler::new();
            state.ansi = AnsiTracker::new();
            state.mip.mip_id = None;
            (state.target_host.clone(), state.target_port.clone())
        };
        if let (Some(host), Some(port)) = (host, port) {
            self.handle_set_server(host, port).await;
        }
    }

    /// The MUD socket closed cleanly from the remote side (`Ok(0)`). Keep
    /// the session alive so the browser can `reconnect`; this is the
    /// expected linkdead/idle-timeout path, reported as `system`.
    pub async fn handle_mud_remote_close(self: &Arc<Self>) {
        let mut state = self.state.lock().await;
        state.mud = None;
        Self::enqueue(
            &mut state,
            Outbound::System { message: "idle timeout or linkdead".to_string() },
        );
    }

    /// The MUD socket errored mid-stream. Distinct from a clean remote
    /// close: this surfaces as `error` with the specific reason rather
    /// than the generic linkdead `system` message, but the session is
    /// kept alive the same way so the browser can `reconnect`.
    pub async fn handle_mud_socket_error(self: &Arc<Self>, reason: String) {
        let mut state = self.state.lock().await;
        state.mud = None;
        Self::enqueue(&mut state, Outbound::Error { message: reason });
    }

    /// Process one fully-assembled, ANSI-tracked line arriving from the
    /// MUD: run it through the MIP decoder and, for anything that still
    /// needs rendering, the trigger engine.
    pub async fn process_mud_line(self: &Arc<Self>, line: &str) {
        let mut state = self.state.lock().await;
        let colored = state.ansi.apply(line);
        let (outcome, effects) = state.mip.decode_line(&colored);

        if effects.stats_changed {
            let stats = state.mip.stats.clone();
            Self::enqueue(&mut state, Outbound::MipStats { stats });
        }
        if let Some(chat) = effects.chat {
            Self::enqueue(
                &mut state,
                Outbound::MipChat {
                    chat_type: chat.chat_type,
                    channel: chat.channel,
                    raw: chat.raw,
                    raw_text: chat.raw_text,
                    message: chat.message,
                },
            );
        }
        if let Some(debug) = effects.debug {
            Self::enqueue(
                &mut state,
                Outbound::MipDebug { msg_type: debug.msg_type, msg_data: debug.msg_data },
            );
        }

        match outcome {
            MipOutcome::Gagged => {}
            MipOutcome::Passthrough(text) | MipOutcome::Surrounding(text) | MipOutcome::Stripped(text) => {
                if !text.is_empty() {
                    self.process_rendered_line(&mut state, &text, false);
                }
            }
        }
    }

    fn process_rendered_line(self: &Arc<Self>, state: &mut SessionState, line: &str, is_test: bool) {
        let triggers = state.triggers.clone();
        let now = Instant::now();
        let result = crate::script::trigger::apply(
            line,
            &triggers,
            &mut state.loop_tracker,
            &mut state.disabled_triggers,
            now,
        );

        for loop_event in &result.loop_detected {
            Self::enqueue(
                state,
                Outbound::System {
                    message: format!("Trigger {} disabled: possible runaway loop", loop_event.trigger_id),
                },
            );
            Self::enqueue(
                state,
                Outbound::DisableTrigger { trigger_id: loop_event.trigger_id.clone() },
            );
        }

        for command in &result.commands {
            Self::write_mud_line(state, command);
        }
        for chatmon in &result.chatmon {
            Self::enqueue(
                state,
                Outbound::TriggerChatmon {
                    message: chatmon.message.clone(),
                    channel: chatmon.channel.clone(),
                },
            );
        }
        for discord in &result.discord {
            let webhook_url = discord.webhook_url.clone();
            let message = discord.message.clone();
            tokio::spawn(async move {
                let _ = crate::discord::send_raw(&webhook_url, &message).await;
            });
        }

        if !result.gag {
            Self::enqueue(
                state,
                Outbound::Mud {
                    line: result.line,
                    highlight: None,
                    sound: result.sound,
                    test: if is_test { Some(true) } else { None },
                },
            );
        }
    }

    /// Cancel all session timers and the MUD connection on destruction.
    pub async fn teardown(self: &Arc<Self>) {
        let mut state = self.state.lock().await;
        state.ticker_scheduler.cancel_all();
        if let Some(mud) = state.mud.take() {
            mud.shutdown();
        }
    }

    pub async fn is_idle_evictable(self: &Arc<Self>, idle_timeout: std::time::Duration) -> bool {
        let state = self.state.lock().await;
        if state.is_wizard || state.ws_tx.is_some() || state.explicit_disconnect {
            return false;
        }
        match state.disconnected_at {
            Some(t) => t.elapsed() > idle_timeout,
            None => false,
        }
    }
}
