//! Inbound message routing.
//!
//! Every command the client understands has a [`Route`]; anything else is
//! forwarded untouched as [`Event::Message`] so the UI can still show it.
//! Routes that only matter for display do the same after their side
//! effects, if any.

use crate::channel_list::{unix_now, ChannelListing};
use crate::config::is_channel;
use crate::event::Event;
use crate::irc::Message;
use crate::keyring::Conversation;
use crate::session::{ConnectionState, Session};

/// Commands and numerics with dedicated handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Ping,
    /// `001` RPL_WELCOME
    Welcome,
    /// `322` RPL_LIST
    ListEntry,
    /// `323` RPL_LISTEND
    ListEnd,
    /// `353` RPL_NAMREPLY
    Names,
    /// `366` RPL_ENDOFNAMES
    EndOfNames,
    /// `372` RPL_MOTD
    MotdLine,
    /// `375` RPL_MOTDSTART
    MotdStart,
    /// `376` RPL_ENDOFMOTD
    MotdEnd,
    /// `422` ERR_NOMOTD
    NoMotd,
    /// `433` ERR_NICKNAMEINUSE
    NickInUse,
    Join,
    Part,
    Quit,
    Privmsg,
    Notice,
    Nick,
    Mode,
    Topic,
    Kick,
}

impl Route {
    /// Look up the route for a command, ignoring case.
    pub fn from_command(command: &str) -> Option<Self> {
        let route = match command.to_ascii_uppercase().as_str() {
            "PING" => Route::Ping,
            "001" => Route::Welcome,
            "322" => Route::ListEntry,
            "323" => Route::ListEnd,
            "353" => Route::Names,
            "366" => Route::EndOfNames,
            "372" => Route::MotdLine,
            "375" => Route::MotdStart,
            "376" => Route::MotdEnd,
            "422" => Route::NoMotd,
            "433" => Route::NickInUse,
            "JOIN" => Route::Join,
            "PART" => Route::Part,
            "QUIT" => Route::Quit,
            "PRIVMSG" => Route::Privmsg,
            "NOTICE" => Route::Notice,
            "NICK" => Route::Nick,
            "MODE" => Route::Mode,
            "TOPIC" => Route::Topic,
            "KICK" => Route::Kick,
            _ => return None,
        };
        Some(route)
    }
}

/// Route one parsed message into the session.
pub fn dispatch(session: &mut Session, msg: Message) {
    let Some(route) = Route::from_command(&msg.command) else {
        forward(session, msg);
        return;
    };
    match route {
        Route::Ping => handle_ping(session, &msg),
        Route::Welcome => handle_welcome(session, msg),
        Route::ListEntry => handle_list_entry(session, &msg),
        Route::ListEnd => handle_list_end(session),
        Route::MotdStart => {
            session.motd_lines.clear();
            forward(session, msg);
        }
        Route::MotdLine => {
            if let Some(line) = msg.text() {
                session.motd_lines.push(line.to_string());
            }
        }
        Route::MotdEnd | Route::NoMotd => handle_motd_end(session, msg),
        Route::NickInUse => handle_nick_in_use(session, msg),
        Route::Join => handle_join(session, msg),
        Route::Part => handle_part(session, msg),
        Route::Kick => handle_kick(session, msg),
        Route::Nick => handle_nick(session, msg),
        Route::Privmsg => handle_privmsg(session, msg),
        Route::Names | Route::EndOfNames | Route::Quit | Route::Notice | Route::Mode | Route::Topic => {
            forward(session, msg)
        }
    }
}

fn forward(session: &mut Session, message: Message) {
    let server = session.config.name.clone();
    session.emit(Event::Message { server, message });
}

fn is_self(session: &Session, nick: &str) -> bool {
    nick.eq_ignore_ascii_case(&session.nick)
}

fn handle_ping(session: &mut Session, msg: &Message) {
    let token = msg.params.first().map(String::as_str).unwrap_or("");
    session.send(Message::new("PONG", vec![token]));
}

fn handle_welcome(session: &mut Session, msg: Message) {
    if let Some(nick) = msg.target() {
        session.nick = nick.to_string();
    }
    session.registered = true;
    tracing::info!(server = %session.config.name, nick = %session.nick, "Registered");
    let event = Event::Registered {
        server: session.config.name.clone(),
        nick: session.nick.clone(),
    };
    session.emit(event);
    forward(session, msg);
}

fn handle_motd_end(session: &mut Session, msg: Message) {
    session.motd_complete = true;
    if session.state == ConnectionState::AwaitingMotd {
        session.state = ConnectionState::Ready;
    }
    let lines = std::mem::take(&mut session.motd_lines);
    tracing::debug!(server = %session.config.name, lines = lines.len(), "MOTD complete");
    let event = Event::Motd {
        server: session.config.name.clone(),
        lines,
    };
    session.emit(event);
    if msg.command == "422" {
        forward(session, msg);
    }
    session.run_auto_join();
}

fn handle_nick_in_use(session: &mut Session, msg: Message) {
    if session.registered {
        forward(session, msg);
        return;
    }
    let alt = session.config.alt_nick();
    if !session.tried_alt_nick && session.nick.eq_ignore_ascii_case(&session.config.nickname) {
        tracing::info!(server = %session.config.name, "Nick {} in use, trying {alt}", session.nick);
        session.tried_alt_nick = true;
        session.nick = alt.clone();
        session.send(Message::new("NICK", vec![alt.as_str()]));
        forward(session, msg);
        return;
    }
    let reason = format!(
        "Nicknames {} and {alt} are both in use",
        session.config.nickname
    );
    tracing::warn!(server = %session.config.name, "{reason}");
    let event = Event::RegistrationFailed {
        server: session.config.name.clone(),
        reason,
    };
    session.emit(event);
}

fn handle_join(session: &mut Session, msg: Message) {
    let Some(channel) = msg.target().map(str::to_string) else {
        return forward(session, msg);
    };
    let nick = msg.nick().unwrap_or_default().to_string();
    if is_self(session, &nick) {
        tracing::info!(server = %session.config.name, %channel, "Joined");
        session.joined.insert(channel.clone());
        session.send(Message::new("NAMES", vec![channel.as_str()]));
    }
    let server = session.config.name.clone();
    session.emit(Event::Joined { server, channel, nick });
}

fn handle_part(session: &mut Session, msg: Message) {
    let Some(channel) = msg.target().map(str::to_string) else {
        return forward(session, msg);
    };
    let nick = msg.nick().unwrap_or_default().to_string();
    if is_self(session, &nick) {
        tracing::info!(server = %session.config.name, %channel, "Parted");
        session.joined.remove(&channel);
    }
    let server = session.config.name.clone();
    session.emit(Event::Parted { server, channel, nick });
}

fn handle_kick(session: &mut Session, msg: Message) {
    let (Some(channel), Some(victim)) = (msg.params.first(), msg.params.get(1)) else {
        return forward(session, msg);
    };
    let (channel, nick) = (channel.clone(), victim.clone());
    let by = msg.nick().unwrap_or_default().to_string();
    let reason = msg.params.get(2).cloned().unwrap_or_default();
    if is_self(session, &nick) {
        tracing::info!(server = %session.config.name, %channel, %by, "Kicked");
        session.joined.remove(&channel);
    }
    let server = session.config.name.clone();
    session.emit(Event::Kicked {
        server,
        channel,
        nick,
        by,
        reason,
    });
}

fn handle_nick(session: &mut Session, msg: Message) {
    let (Some(old), Some(new)) = (msg.nick(), msg.target()) else {
        return forward(session, msg);
    };
    let (old, new) = (old.to_string(), new.to_string());
    let ours = is_self(session, &old);
    if ours {
        tracing::info!(server = %session.config.name, "Nick changed from {old} to {new}");
        session.nick = new.clone();
    }
    let server = session.config.name.clone();
    session.emit(Event::NickChanged { server, old, new, ours });
}

fn handle_privmsg(session: &mut Session, msg: Message) {
    let body = if msg.params.len() >= 2 { msg.text() } else { None };
    let (Some(target), Some(body), Some(from)) = (msg.target(), body, msg.nick()) else {
        return forward(session, msg);
    };

    // Addressed to us unless it went to a channel. The other party of a
    // private conversation is whoever isn't us.
    let to_us = !is_channel(target) || target.eq_ignore_ascii_case(&session.nick);
    let other = if to_us && target.eq_ignore_ascii_case(&session.nick) {
        from
    } else {
        target
    };
    let conversation = if to_us {
        Conversation::Private {
            own_nick: &session.nick,
            other_nick: other,
        }
    } else {
        Conversation::Channel(target)
    };
    let (text, security) = session.keyring.open(&session.config, &conversation, body);

    let event = Event::Privmsg {
        server: session.config.name.clone(),
        from: from.to_string(),
        target: target.to_string(),
        text,
        security,
        private: to_us,
    };
    session.emit(event);
}

fn handle_list_entry(session: &mut Session, msg: &Message) {
    if let Some(entry) = ChannelListing::from_params(&msg.params) {
        session.channel_list.add(entry);
    }
}

fn handle_list_end(session: &mut Session) {
    let now = unix_now();
    let channels = session.channel_list.commit(now).to_vec();
    tracing::info!(server = %session.config.name, count = channels.len(), "Channel list received");
    if let Some(store) = &session.store {
        if let Err(e) = store
            .lock()
            .unwrap()
            .save_channel_list(&session.config.name, &channels, now)
        {
            tracing::warn!(server = %session.config.name, "Failed to persist channel list: {e}");
        }
    }
    let server = session.config.name.clone();
    session.emit(Event::ChannelList {
        server,
        channels,
        cached: false,
    });
}
