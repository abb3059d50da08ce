//! Plain-text rendering of connection events.

use sealirc_sdk::event::{Event, Security};

/// Marker shown before a message body for its security state.
fn marker(security: Security) -> &'static str {
    match security {
        Security::Decrypted => "[e2e] ",
        Security::Undecryptable => "[undecryptable] ",
        Security::EncryptedNoKey => "[encrypted, no key] ",
        Security::Plaintext => "",
    }
}

/// One line (or a few) describing an event, or `None` for events not worth
/// printing.
pub fn render(event: &Event) -> Option<String> {
    let line = match event {
        Event::Connected { server } => format!("*** Connected to {server}"),
        Event::Registered { server, nick } => format!("*** Registered on {server} as {nick}"),
        Event::Motd { lines, .. } => lines.join("\n"),
        Event::Joined { channel, nick, .. } => format!("*** {nick} joined {channel}"),
        Event::Parted { channel, nick, .. } => format!("*** {nick} left {channel}"),
        Event::Kicked {
            channel,
            nick,
            by,
            reason,
            ..
        } => format!("*** {nick} was kicked from {channel} by {by} ({reason})"),
        Event::NickChanged { old, new, .. } => format!("*** {old} is now known as {new}"),
        Event::Privmsg {
            from,
            target,
            text,
            security,
            private,
            ..
        } => {
            let place = if *private { String::new() } else { format!("{target} ") };
            // Ciphertext is never run through CTCP parsing.
            let action = match security {
                Security::Decrypted | Security::Plaintext => text
                    .strip_prefix("\x01ACTION ")
                    .map(|rest| rest.trim_end_matches('\x01')),
                _ => None,
            };
            match action {
                Some(action) => format!("{place}{}* {from} {action}", marker(*security)),
                None => format!("{place}{}<{from}> {text}", marker(*security)),
            }
        }
        Event::ChannelList { channels, cached, .. } => {
            let mut out = format!(
                "*** {} channels{}",
                channels.len(),
                if *cached { " (cached)" } else { "" }
            );
            for channel in channels {
                out.push_str(&format!("\n{:<20} {:>5}  {}", channel.name, channel.users, channel.topic));
            }
            out
        }
        Event::Message { message, .. } => {
            if message.params.is_empty() {
                return None;
            }
            let from = message.nick().unwrap_or("server");
            let text = if message.is_numeric() {
                message.params[1..].join(" ")
            } else {
                message.params.join(" ")
            };
            format!("-{from}- {} {text}", message.command)
        }
        Event::Error { text, .. } => format!("!!! {text}"),
        Event::RegistrationFailed { reason, .. } => format!("!!! Registration failed: {reason}"),
        Event::Disconnected { server, reason } => format!("*** Disconnected from {server}: {reason}"),
    };
    Some(line)
}
