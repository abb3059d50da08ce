//! Interpretation of a line typed by the user.
//!
//! Runs after alias expansion. Slash commands the client knows become an
//! [`Input`]; unknown ones are sent to the server verbatim (minus the `/`)
//! and anything else is a message to the current conversation.

use crate::config::{is_channel, normalize_channel};

/// What a line of user input asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Join(String),
    Part { channel: String, reason: Option<String> },
    Nick(String),
    Msg { target: String, text: String },
    /// Switch the current conversation, optionally sending a first message.
    Query { target: String, text: Option<String> },
    Action { target: String, text: String },
    Quit(Option<String>),
    List { force: bool },
    SetKey { target: String, passphrase: String },
    RemoveKey { target: String },
    ListAliases,
    AddAlias { name: String, expansion: String },
    RemoveAlias(String),
    Raw(String),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InputError {
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("no current conversation; use /join or /query first")]
    NoTarget,
}

/// Interpret one line of input. `current` is the conversation the line was
/// typed into, if any. Blank lines yield `Ok(None)`.
pub fn parse_input(line: &str, current: Option<&str>) -> Result<Option<Input>, InputError> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Ok(None);
    }

    // "//text" sends "/text" as a message.
    let command = match line.strip_prefix('/') {
        Some(rest) if !rest.starts_with('/') => rest,
        Some(rest) => return message(rest, current).map(Some),
        None => return message(line, current).map(Some),
    };

    let (name, args) = match command.split_once(' ') {
        Some((name, args)) => (name, args.trim()),
        None => (command, ""),
    };
    let (first, rest) = match args.split_once(' ') {
        Some((first, rest)) => (first, non_empty(rest.trim())),
        None => (args, None),
    };

    let input = match name.to_ascii_lowercase().as_str() {
        "join" | "j" => {
            if first.is_empty() {
                return Err(InputError::Usage("/join <channel>"));
            }
            Input::Join(normalize_channel(first))
        }
        "part" | "leave" => {
            // With no channel argument, or a first word that isn't one, part
            // the current channel and treat everything as the reason.
            if is_channel(first) {
                Input::Part {
                    channel: first.to_string(),
                    reason: rest.map(str::to_string),
                }
            } else {
                match current.filter(|c| is_channel(c)) {
                    Some(channel) => Input::Part {
                        channel: channel.to_string(),
                        reason: non_empty(args).map(str::to_string),
                    },
                    None if !first.is_empty() => Input::Part {
                        channel: normalize_channel(first),
                        reason: rest.map(str::to_string),
                    },
                    None => return Err(InputError::Usage("/part [channel] [reason]")),
                }
            }
        }
        "nick" => {
            if first.is_empty() || rest.is_some() {
                return Err(InputError::Usage("/nick <nickname>"));
            }
            Input::Nick(first.to_string())
        }
        "msg" | "privmsg" => match (non_empty(first), rest) {
            (Some(target), Some(text)) => Input::Msg {
                target: target.to_string(),
                text: text.to_string(),
            },
            _ => return Err(InputError::Usage("/msg <target> <text>")),
        },
        "query" => match non_empty(first) {
            Some(target) => Input::Query {
                target: target.to_string(),
                text: rest.map(str::to_string),
            },
            None => return Err(InputError::Usage("/query <nick> [text]")),
        },
        "me" => {
            let target = current.ok_or(InputError::NoTarget)?;
            if args.is_empty() {
                return Err(InputError::Usage("/me <action>"));
            }
            Input::Action {
                target: target.to_string(),
                text: args.to_string(),
            }
        }
        "quit" | "exit" => Input::Quit(non_empty(args).map(str::to_string)),
        "list" => match args {
            "" => Input::List { force: false },
            "-force" | "-f" => Input::List { force: true },
            _ => Input::Raw(command.to_string()),
        },
        "key" => match (non_empty(first), rest) {
            (Some(target), Some(passphrase)) => Input::SetKey {
                target: target.to_string(),
                passphrase: passphrase.to_string(),
            },
            _ => return Err(InputError::Usage("/key <channel|nick> <passphrase>")),
        },
        "unkey" => match non_empty(first) {
            Some(target) => Input::RemoveKey {
                target: target.to_string(),
            },
            None => return Err(InputError::Usage("/unkey <channel|nick>")),
        },
        "alias" => match (non_empty(first), rest) {
            (None, _) => Input::ListAliases,
            (Some(name), Some(expansion)) => Input::AddAlias {
                name: name.trim_start_matches('/').to_string(),
                expansion: expansion.to_string(),
            },
            (Some(_), None) => return Err(InputError::Usage("/alias <name> <expansion>")),
        },
        "unalias" => match non_empty(first) {
            Some(name) => Input::RemoveAlias(name.trim_start_matches('/').to_string()),
            None => return Err(InputError::Usage("/unalias <name>")),
        },
        "raw" | "quote" => match non_empty(args) {
            Some(raw) => Input::Raw(raw.to_string()),
            None => return Err(InputError::Usage("/raw <line>")),
        },
        _ => Input::Raw(command.to_string()),
    };
    Ok(Some(input))
}

fn message(text: &str, current: Option<&str>) -> Result<Input, InputError> {
    let target = current.ok_or(InputError::NoTarget)?;
    Ok(Input::Msg {
        target: target.to_string(),
        text: text.to_string(),
    })
}

fn non_empty(s: &str) -> Option<&str> {
    (!s.is_empty()).then_some(s)
}
