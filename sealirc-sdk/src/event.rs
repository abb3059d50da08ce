//! Events emitted by a connection for the UI layer to consume.

use crate::channel_list::ChannelListing;
use crate::irc::Message;

/// How a received PRIVMSG body relates to the conversation's key.
///
/// The wire format carries no "this is encrypted" flag, so the first two
/// states come from trying the configured key and the last two from a
/// heuristic when no key is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Security {
    /// A key is configured and the body decrypted under it.
    Decrypted,
    /// A key is configured but the body did not decrypt (plaintext sender,
    /// different passphrase, or tampering).
    Undecryptable,
    /// No key is configured and the body looks like ciphertext.
    EncryptedNoKey,
    /// No key is configured and the body looks like ordinary text.
    Plaintext,
}

/// Events that a connection emits to the consumer (CLI, GUI, bot, etc.).
#[derive(Debug, Clone)]
pub enum Event {
    /// Transport is up (after the TLS handshake when TLS is used).
    Connected { server: String },

    /// `001` received. `nick` is our confirmed nick.
    Registered { server: String, nick: String },

    /// MOTD finished (`376`) or the server has none (`422`).
    Motd { server: String, lines: Vec<String> },

    /// Someone (possibly us) joined a channel.
    Joined { server: String, channel: String, nick: String },

    /// Someone (possibly us) left a channel.
    Parted { server: String, channel: String, nick: String },

    /// Someone (possibly us) was kicked from a channel.
    Kicked {
        server: String,
        channel: String,
        nick: String,
        by: String,
        reason: String,
    },

    /// A nick change. `ours` is true when it was our own nick.
    NickChanged {
        server: String,
        old: String,
        new: String,
        ours: bool,
    },

    /// A channel or private message.
    ///
    /// `text` is the decrypted body when `security` is
    /// [`Security::Decrypted`], otherwise the body as received.
    Privmsg {
        server: String,
        from: String,
        target: String,
        text: String,
        security: Security,
        private: bool,
    },

    /// Result of a `LIST` request, or a fresh cached copy of one.
    ChannelList {
        server: String,
        channels: Vec<ChannelListing>,
        cached: bool,
    },

    /// A message with no dedicated event, forwarded for the status display.
    Message { server: String, message: Message },

    /// Transport or protocol failure described for humans.
    Error { server: String, text: String },

    /// Both the configured and alternate nicknames were rejected.
    RegistrationFailed { server: String, reason: String },

    /// Connection closed and per-connection state cleared.
    Disconnected { server: String, reason: String },
}

impl Event {
    /// Server display name the event belongs to.
    pub fn server(&self) -> &str {
        match self {
            Event::Connected { server }
            | Event::Registered { server, .. }
            | Event::Motd { server, .. }
            | Event::Joined { server, .. }
            | Event::Parted { server, .. }
            | Event::Kicked { server, .. }
            | Event::NickChanged { server, .. }
            | Event::Privmsg { server, .. }
            | Event::ChannelList { server, .. }
            | Event::Message { server, .. }
            | Event::Error { server, .. }
            | Event::RegistrationFailed { server, .. }
            | Event::Disconnected { server, .. } => server,
        }
    }
}
