//! IRC message types.
//! This is a minimal parser/formatter for IRC protocol lines.
//!
//! Grammar: `[':' prefix SP] command [SP middle-params] [SP ':' trailing]`

use std::fmt;

/// A parsed IRC message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub prefix: Option<String>,
    pub command: String,
    pub params: Vec<String>,
    /// The line this message was parsed from (empty for built messages).
    pub raw: String,
}

impl Message {
    /// Parse a raw IRC line.
    ///
    /// Returns `None` for empty input and for lines that don't contain a
    /// command token. Never panics on malformed input.
    pub fn parse(line: &str) -> Option<Self> {
        // Trailing spaces may belong to the trailing param, so only the
        // line terminator is stripped from the end.
        let line = line.trim_start().trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return None;
        }

        let mut rest = line;

        // Parse prefix: :server or :nick!user@host
        let prefix = if let Some(stripped) = rest.strip_prefix(':') {
            let Some(end) = stripped.find(' ') else {
                tracing::debug!("Dropping line with unterminated prefix: {line}");
                return None;
            };
            let pfx = stripped[..end].to_string();
            rest = stripped[end..].trim_start();
            Some(pfx)
        } else {
            None
        };

        let command_end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        let command = rest[..command_end].to_string();
        if command.is_empty() {
            tracing::debug!("Dropping line without command: {line}");
            return None;
        }
        // Keep the separating space so a trailing-only param (`QUIT :bye`)
        // is found by the same " :" scan as any other.
        let rest = &rest[command_end..];

        let mut params = Vec::new();
        match rest.find(" :") {
            Some(idx) => {
                params.extend(rest[..idx].split_whitespace().map(str::to_string));
                params.push(rest[idx + 2..].to_string());
            }
            None => params.extend(rest.split_whitespace().map(str::to_string)),
        }

        Some(Message {
            prefix,
            command,
            params,
            raw: line.to_string(),
        })
    }

    pub fn new(command: &str, params: Vec<&str>) -> Self {
        Self {
            prefix: None,
            command: command.to_string(),
            params: params.into_iter().map(|s| s.to_string()).collect(),
            raw: String::new(),
        }
    }

    /// Create a message with an origin prefix (used for local echoes).
    pub fn with_prefix(prefix: &str, command: &str, params: Vec<&str>) -> Self {
        Self {
            prefix: Some(prefix.to_string()),
            ..Self::new(command, params)
        }
    }

    /// Nickname part of a `nick!user@host` prefix (or the server name).
    pub fn nick(&self) -> Option<&str> {
        let prefix = self.prefix.as_deref()?;
        prefix.split('!').next().filter(|n| !n.is_empty())
    }

    /// Username part of a `nick!user@host` prefix.
    pub fn user(&self) -> Option<&str> {
        let (_, rest) = self.prefix.as_deref()?.split_once('!')?;
        let user = rest.split('@').next()?;
        (!user.is_empty()).then_some(user)
    }

    /// Host part of a `nick!user@host` prefix.
    pub fn host(&self) -> Option<&str> {
        let (_, rest) = self.prefix.as_deref()?.split_once('!')?;
        let (_, host) = rest.split_once('@')?;
        (!host.is_empty()).then_some(host)
    }

    /// First parameter: the channel or nick a command is addressed to.
    pub fn target(&self) -> Option<&str> {
        self.params.first().map(String::as_str)
    }

    /// Last parameter: the human-readable text of most commands and numerics.
    pub fn text(&self) -> Option<&str> {
        self.params.last().map(String::as_str)
    }

    /// Whether the command is a three-digit numeric reply.
    pub fn is_numeric(&self) -> bool {
        self.command.len() == 3 && self.command.bytes().all(|b| b.is_ascii_digit())
    }
}

/// Build a protocol line from a command and its parameters.
///
/// No line terminator is appended; the transport does that.
pub fn build(command: &str, params: &[&str]) -> String {
    Message::new(command, params.to_vec()).to_string()
}

/// Whether a parameter must be sent in trailing (`:`-prefixed) form to
/// survive a parse.
fn needs_trailing(param: &str) -> bool {
    param.is_empty() || param.starts_with(':') || param.contains(char::is_whitespace)
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref prefix) = self.prefix {
            write!(f, ":{prefix} ")?;
        }
        write!(f, "{}", self.command)?;
        for (i, param) in self.params.iter().enumerate() {
            if i == self.params.len() - 1 && needs_trailing(param) {
                write!(f, " :{param}")?;
            } else {
                write!(f, " {param}")?;
            }
        }
        Ok(())
    }
}
