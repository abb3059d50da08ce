//! Per-server connection state, independent of any transport.
//!
//! A [`Session`] is fed inbound lines and user operations and produces a
//! queue of [`Output`]s: lines to write, events to emit and timers to arm.
//! The tokio driver in [`crate::client`] owns one per connection and is the
//! only thing that performs IO on its behalf, which keeps every protocol
//! rule testable without sockets.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::channel_list::{self, ChannelListCache};
use crate::config::{normalize_channel, ServerConfig, AUTO_JOIN_BASE_DELAY, AUTO_JOIN_STAGGER, MOTD_FALLBACK};
use crate::event::{Event, Security};
use crate::irc::Message;
use crate::keyring::{Conversation, KeyRing};
use crate::router;
use crate::store::Db;

pub const DEFAULT_QUIT_MESSAGE: &str = "Client quit";

/// Lifecycle of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    TcpConnected,
    TlsHandshaking,
    AwaitingMotd,
    Ready,
    Disconnecting,
}

/// Deferred work the driver schedules on the session's behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerKind {
    /// The server never finished its MOTD; auto-join anyway.
    MotdFallback,
    /// Join one auto-join channel.
    AutoJoin(String),
}

/// Something the driver must do after feeding the session.
#[derive(Debug, Clone)]
pub enum Output {
    Send(Message),
    Emit(Event),
    Schedule(Duration, TimerKind),
}

pub struct Session {
    pub(crate) config: ServerConfig,
    pub(crate) keyring: Arc<KeyRing>,
    pub(crate) store: Option<Arc<Mutex<Db>>>,
    pub(crate) state: ConnectionState,
    /// Our nick as the server currently knows it.
    pub(crate) nick: String,
    pub(crate) registered: bool,
    /// Set once the alternate nick has been tried.
    pub(crate) tried_alt_nick: bool,
    pub(crate) joined: BTreeSet<String>,
    pub(crate) motd_lines: Vec<String>,
    pub(crate) motd_complete: bool,
    pub(crate) auto_join_pending: bool,
    pub(crate) channel_list: ChannelListCache,
    outputs: Vec<Output>,
}

impl Session {
    pub fn new(config: ServerConfig, keyring: Arc<KeyRing>) -> Self {
        let nick = config.nickname.clone();
        Self {
            config,
            keyring,
            store: None,
            state: ConnectionState::Disconnected,
            nick,
            registered: false,
            tried_alt_nick: false,
            joined: BTreeSet::new(),
            motd_lines: Vec::new(),
            motd_complete: false,
            auto_join_pending: false,
            channel_list: ChannelListCache::default(),
            outputs: Vec::new(),
        }
    }

    /// Attach the record store: channel listings are persisted to it and
    /// the last saved listing for this server is restored.
    pub fn with_store(mut self, store: Arc<Mutex<Db>>) -> Self {
        {
            let db = store.lock().unwrap();
            let default_age = channel_list::DEFAULT_MAX_AGE.as_secs().to_string();
            let max_age = match db.get_setting("channel_list_expiration", &default_age) {
                Ok(value) => value.parse().unwrap_or(channel_list::DEFAULT_MAX_AGE.as_secs()),
                Err(e) => {
                    tracing::warn!(server = %self.config.name, "Failed to read channel_list_expiration: {e}");
                    channel_list::DEFAULT_MAX_AGE.as_secs()
                }
            };
            self.channel_list = ChannelListCache::new(Duration::from_secs(max_age));
            match db.channel_list(&self.config.name) {
                Ok(Some((channels, fetched_at))) => self.channel_list.restore(channels, fetched_at),
                Ok(None) => {}
                Err(e) => tracing::warn!(server = %self.config.name, "Failed to load cached channel list: {e}"),
            }
        }
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn server_name(&self) -> &str {
        &self.config.name
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn nick(&self) -> &str {
        &self.nick
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    pub fn motd_complete(&self) -> bool {
        self.motd_complete
    }

    pub fn auto_join_pending(&self) -> bool {
        self.auto_join_pending
    }

    /// Channels we are currently in, sorted.
    pub fn joined_channels(&self) -> impl Iterator<Item = &str> {
        self.joined.iter().map(String::as_str)
    }

    pub fn is_joined(&self, channel: &str) -> bool {
        self.joined.contains(channel)
    }

    /// Whether the transport is up and lines may be written.
    pub fn is_connected(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::TcpConnected
                | ConnectionState::TlsHandshaking
                | ConnectionState::AwaitingMotd
                | ConnectionState::Ready
        )
    }

    /// Take everything produced since the last call.
    pub fn take_outputs(&mut self) -> Vec<Output> {
        std::mem::take(&mut self.outputs)
    }

    // ── Transport lifecycle ────────────────────────────────────────────

    pub fn begin_connect(&mut self) {
        tracing::info!(server = %self.config.name, addr = %self.config.address(), "Connecting");
        self.state = ConnectionState::Connecting;
    }

    pub fn tcp_connected(&mut self) {
        self.state = ConnectionState::TcpConnected;
    }

    pub fn tls_handshaking(&mut self) {
        self.state = ConnectionState::TlsHandshaking;
    }

    /// Transport (and TLS, if any) is up.
    pub fn transport_ready(&mut self) {
        self.state = ConnectionState::TcpConnected;
        tracing::info!(server = %self.config.name, tls = self.config.tls, "Connected");
        self.emit(Event::Connected {
            server: self.config.name.clone(),
        });
    }

    /// Send `NICK`/`USER` and arm the MOTD fallback when auto-join is
    /// configured.
    pub fn register(&mut self) {
        if !self.is_connected() {
            tracing::warn!(server = %self.config.name, state = ?self.state, "Socket not ready for registration");
            return;
        }
        self.motd_complete = false;
        self.motd_lines.clear();
        self.registered = false;
        self.tried_alt_nick = false;
        self.nick = self.config.nickname.clone();
        self.state = ConnectionState::AwaitingMotd;

        let nick = self.nick.clone();
        self.send(Message::new("NICK", vec![nick.as_str()]));
        let username = self.config.username.clone();
        let realname = self.config.realname.clone();
        self.send(Message::new("USER", vec![username.as_str(), "0", "*", realname.as_str()]));

        if !self.config.auto_join().is_empty() {
            self.auto_join_pending = true;
            self.schedule(MOTD_FALLBACK, TimerKind::MotdFallback);
        }
    }

    /// Start a graceful disconnect. Returns true when a `QUIT` was sent and
    /// the transport should be given time to flush it.
    pub fn quit(&mut self, reason: Option<&str>) -> bool {
        let reason = reason.unwrap_or(DEFAULT_QUIT_MESSAGE);
        let was_connected = self.is_connected();
        if was_connected {
            self.send(Message::new("QUIT", vec![reason]));
        }
        self.state = ConnectionState::Disconnecting;
        was_connected
    }

    /// The transport is gone. Clears per-connection state and emits
    /// [`Event::Disconnected`].
    pub fn on_disconnected(&mut self, reason: &str) {
        tracing::info!(server = %self.config.name, %reason, "Disconnected");
        self.state = ConnectionState::Disconnected;
        self.registered = false;
        self.tried_alt_nick = false;
        self.motd_complete = false;
        self.motd_lines.clear();
        self.auto_join_pending = false;
        self.joined.clear();
        self.channel_list.begin();
        self.outputs.retain(|o| matches!(o, Output::Emit(_)));
        self.emit(Event::Disconnected {
            server: self.config.name.clone(),
            reason: reason.to_string(),
        });
    }

    // ── Inbound ────────────────────────────────────────────────────────

    /// Handle one complete line from the server.
    pub fn handle_line(&mut self, line: &str) {
        match Message::parse(line) {
            Some(msg) => {
                tracing::trace!(server = %self.config.name, "<< {}", msg.raw);
                router::dispatch(self, msg);
            }
            None => tracing::debug!(server = %self.config.name, "Dropping unparseable line: {line:?}"),
        }
    }

    /// A timer armed through [`Output::Schedule`] has expired.
    pub fn fire(&mut self, timer: TimerKind) {
        match timer {
            TimerKind::MotdFallback => {
                if self.auto_join_pending && !self.motd_complete {
                    tracing::warn!(server = %self.config.name, "MOTD not complete after {MOTD_FALLBACK:?}, auto-joining anyway");
                    self.run_auto_join();
                }
            }
            TimerKind::AutoJoin(channel) => {
                if self.is_connected() {
                    self.join(&channel);
                }
            }
        }
    }

    /// Schedule the auto-join channels, at most once per registration.
    pub(crate) fn run_auto_join(&mut self) {
        if !self.auto_join_pending {
            return;
        }
        self.auto_join_pending = false;
        for (i, channel) in self.config.auto_join().into_iter().enumerate() {
            let delay = AUTO_JOIN_BASE_DELAY + AUTO_JOIN_STAGGER * i as u32;
            tracing::debug!(server = %self.config.name, %channel, ?delay, "Scheduling auto-join");
            self.schedule(delay, TimerKind::AutoJoin(channel));
        }
    }

    // ── Outbound operations ────────────────────────────────────────────

    pub fn join(&mut self, channel: &str) {
        let channel = normalize_channel(channel);
        self.send(Message::new("JOIN", vec![channel.as_str()]));
    }

    pub fn part(&mut self, channel: &str, reason: Option<&str>) {
        let channel = normalize_channel(channel);
        match reason.filter(|r| !r.is_empty()) {
            Some(reason) => self.send(Message::new("PART", vec![channel.as_str(), reason])),
            None => self.send(Message::new("PART", vec![channel.as_str()])),
        }
    }

    /// Request a nick change.
    ///
    /// Before registration the server never echoes `NICK`, so the new nick
    /// is adopted immediately; afterwards it is adopted when the echo
    /// arrives, so a rejected change leaves the current nick intact.
    pub fn change_nick(&mut self, new_nick: &str) {
        if !self.is_connected() {
            tracing::warn!(server = %self.config.name, "Cannot change nick to {new_nick}: not connected");
            return;
        }
        if !self.registered {
            self.nick = new_nick.to_string();
        }
        self.send(Message::new("NICK", vec![new_nick]));
    }

    /// Send a PRIVMSG, encrypted when the conversation has a key.
    ///
    /// The message is echoed back as [`Event::Privmsg`] so the UI can show
    /// it in the conversation.
    pub fn privmsg(&mut self, target: &str, text: &str) {
        if !self.is_connected() {
            tracing::warn!(server = %self.config.name, "Cannot send PRIVMSG to {target}: not connected");
            return;
        }
        let own_nick = self.nick.clone();
        let conversation = Conversation::for_target(target, &own_nick);
        let private = matches!(conversation, Conversation::Private { .. });
        let sealed = match self.keyring.seal(&self.config, &conversation, text) {
            Ok(sealed) => sealed,
            Err(e) => {
                tracing::error!(server = %self.config.name, %target, "Encryption failed: {e}");
                self.emit(Event::Error {
                    server: self.config.name.clone(),
                    text: format!("Message to {target} not sent: {e}"),
                });
                return;
            }
        };
        self.send(Message::new("PRIVMSG", vec![target, sealed.body.as_str()]));
        self.emit(Event::Privmsg {
            server: self.config.name.clone(),
            from: own_nick.clone(),
            target: target.to_string(),
            text: text.to_string(),
            security: if sealed.encrypted {
                Security::Decrypted
            } else {
                Security::Plaintext
            },
            private,
        });
    }

    /// CTCP ACTION (`/me`). Encrypted like any other PRIVMSG body.
    pub fn action(&mut self, target: &str, text: &str) {
        self.privmsg(target, &format!("\x01ACTION {text}\x01"));
    }

    /// Send a line typed by the user as-is.
    pub fn raw(&mut self, line: &str) {
        match Message::parse(line) {
            Some(msg) => self.send(msg),
            None => tracing::warn!(server = %self.config.name, "Ignoring empty or malformed raw line: {line:?}"),
        }
    }

    /// Serve the channel list from cache when fresh, else send `LIST`.
    pub fn request_channel_list(&mut self, force: bool, now: u64) {
        if force {
            self.channel_list.invalidate();
        } else if let Some(channels) = self.channel_list.fresh(now) {
            tracing::debug!(server = %self.config.name, count = channels.len(), "Serving cached channel list");
            let channels = channels.to_vec();
            self.emit(Event::ChannelList {
                server: self.config.name.clone(),
                channels,
                cached: true,
            });
            return;
        }
        if !self.is_connected() {
            tracing::warn!(server = %self.config.name, "Cannot send LIST: not connected");
            return;
        }
        self.channel_list.begin();
        self.send(Message::new("LIST", vec![]));
    }

    // ── Output queue ───────────────────────────────────────────────────

    /// Queue a line, dropping it when the transport isn't up.
    pub(crate) fn send(&mut self, msg: Message) {
        if !self.is_connected() {
            tracing::warn!(server = %self.config.name, state = ?self.state, "Cannot send {}: not connected", msg.command);
            return;
        }
        self.outputs.push(Output::Send(msg));
    }

    pub(crate) fn emit(&mut self, event: Event) {
        self.outputs.push(Output::Emit(event));
    }

    fn schedule(&mut self, delay: Duration, timer: TimerKind) {
        self.outputs.push(Output::Schedule(delay, timer));
    }
}
