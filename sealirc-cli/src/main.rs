mod config;
mod render;

use std::sync::{Arc, Mutex};

use anyhow::Result;
use clap::Parser;
use sealirc_sdk::alias::AliasManager;
use sealirc_sdk::client::{self, ClientHandle};
use sealirc_sdk::command::{parse_input, Input};
use sealirc_sdk::config::ServerConfig;
use sealirc_sdk::event::Event;
use sealirc_sdk::keyring::{Conversation, KeyRing};
use sealirc_sdk::store::Db;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use crate::config::Cli;

/// What the terminal is pointed at.
struct View {
    config: ServerConfig,
    nick: String,
    current: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Chat goes to stdout, diagnostics to stderr.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive("sealirc_sdk=warn".parse()?))
        .init();

    let cli = Cli::parse();
    let db = Db::open(&cli.db_path)?;

    if cli.list_servers {
        for server in db.servers()? {
            println!(
                "{:<20} {}:{}{}  nick={}",
                server.name,
                server.hostname,
                server.port,
                if server.tls { " (tls)" } else { "" },
                server.nickname
            );
        }
        return Ok(());
    }

    let config = cli.server_config(&db)?;
    if cli.save {
        let id = db.add_server(&config)?;
        tracing::info!(id, name = %config.name, "Saved server record");
    }

    let db = Arc::new(Mutex::new(db));
    let keyring = Arc::new(KeyRing::new(db.clone())?);
    let aliases = AliasManager::new(db.clone());

    let (handle, mut events) = client::connect(config.clone(), keyring.clone(), Some(db))?;
    let mut view = View {
        nick: config.nickname.clone(),
        config,
        current: None,
    };

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            line = stdin.next_line(), if stdin_open => {
                match line? {
                    Some(line) => {
                        if let Err(e) = handle_line(&line, &mut view, &handle, &keyring, &aliases).await {
                            println!("!!! {e}");
                        }
                    }
                    None => {
                        stdin_open = false;
                        handle.quit(None).await?;
                    }
                }
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                track(&mut view, &event);
                if let Some(text) = render::render(&event) {
                    println!("{text}");
                }
                if matches!(event, Event::Disconnected { .. }) {
                    break;
                }
            }
        }
    }
    Ok(())
}

/// Keep our nick and the current conversation in step with the server.
fn track(view: &mut View, event: &Event) {
    match event {
        Event::Registered { nick, .. } => view.nick = nick.clone(),
        Event::NickChanged { new, ours: true, .. } => view.nick = new.clone(),
        Event::Joined { channel, nick, .. } if nick.eq_ignore_ascii_case(&view.nick) => {
            view.current = Some(channel.clone());
        }
        Event::Parted { channel, nick, .. } | Event::Kicked { channel, nick, .. }
            if nick.eq_ignore_ascii_case(&view.nick) && view.current.as_deref() == Some(channel.as_str()) =>
        {
            view.current = None;
        }
        _ => {}
    }
}

async fn handle_line(
    line: &str,
    view: &mut View,
    handle: &ClientHandle,
    keyring: &KeyRing,
    aliases: &AliasManager,
) -> Result<()> {
    let line = aliases.expand(line)?;
    let Some(input) = parse_input(&line, view.current.as_deref())? else {
        return Ok(());
    };

    match input {
        Input::Join(channel) => handle.join(&channel).await?,
        Input::Part { channel, reason } => handle.part(&channel, reason.as_deref()).await?,
        Input::Nick(nick) => handle.nick(&nick).await?,
        Input::Msg { target, text } => handle.privmsg(&target, &text).await?,
        Input::Query { target, text } => {
            println!("*** Talking to {target}");
            if let Some(text) = text {
                handle.privmsg(&target, &text).await?;
            }
            view.current = Some(target);
        }
        Input::Action { target, text } => handle.action(&target, &text).await?,
        Input::Quit(reason) => handle.quit(reason.as_deref()).await?,
        Input::List { force } => handle.list_channels(force).await?,
        Input::SetKey { target, passphrase } => {
            let conversation = Conversation::for_target(&target, &view.nick);
            keyring.set_room_key_from_passphrase(&view.config, &conversation, &passphrase)?;
            println!("*** Key set for {target}; messages to it are now encrypted");
        }
        Input::RemoveKey { target } => {
            let conversation = Conversation::for_target(&target, &view.nick);
            if keyring.remove_room_key(&view.config, &conversation)? {
                println!("*** Key removed for {target}");
            } else {
                println!("*** No key was set for {target}");
            }
        }
        Input::ListAliases => {
            for alias in aliases.list()? {
                println!("/{} -> {}", alias.name, alias.expansion);
            }
        }
        Input::AddAlias { name, expansion } => {
            aliases.add(&name, &expansion)?;
            println!("*** /{name} -> {expansion}");
        }
        Input::RemoveAlias(name) => {
            if !aliases.delete(&name)? {
                println!("*** No alias /{name}");
            }
        }
        Input::Raw(raw) => handle.raw(&raw).await?,
    }
    Ok(())
}
