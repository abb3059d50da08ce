//! Integration tests: SDK clients against an in-process IRC server.
//!
//! The fake server speaks just enough of the protocol (registration, MOTD,
//! JOIN, NAMES, PRIVMSG relay, LIST) to drive real connections end to end.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sealirc_sdk::client;
use sealirc_sdk::config::{ConfigError, ServerConfig};
use sealirc_sdk::event::{Event, Security};
use sealirc_sdk::irc::Message;
use sealirc_sdk::keyring::{Conversation, KeyRing};
use sealirc_sdk::session::DEFAULT_QUIT_MESSAGE;
use sealirc_sdk::store::Db;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

#[derive(Default)]
struct Network {
    clients: HashMap<String, mpsc::UnboundedSender<String>>,
    channels: HashMap<String, Vec<String>>,
}

/// Helper: start a fake server on a random port. `taken` nicks are
/// reported as in use.
async fn start_fake_server(taken: &[&str]) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let net = Arc::new(Mutex::new(Network::default()));
    for nick in taken {
        let (tx, _) = mpsc::unbounded_channel();
        net.lock().unwrap().clients.insert(nick.to_string(), tx);
    }
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve_client(stream, net.clone()));
        }
    });
    addr
}

async fn serve_client(stream: TcpStream, net: Arc<Mutex<Network>>) {
    let (reader, mut writer) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            if writer.write_all(format!("{line}\r\n").as_bytes()).await.is_err() {
                break;
            }
        }
    });

    let mut lines = BufReader::new(reader).lines();
    let mut nick: Option<String> = None;
    let mut user_seen = false;
    let mut registered = false;

    while let Ok(Some(line)) = lines.next_line().await {
        let Some(msg) = Message::parse(&line) else { continue };
        let mut net = net.lock().unwrap();
        let me = nick.clone().unwrap_or_else(|| "*".to_string());
        let prefix = format!("{me}!{me}@fake.host");
        match msg.command.as_str() {
            "NICK" => {
                let wanted = msg.params[0].clone();
                if net.clients.contains_key(&wanted) {
                    let _ = tx.send(format!(":fake.server 433 {me} {wanted} :Nickname is already in use"));
                } else {
                    nick = Some(wanted);
                }
            }
            "USER" => user_seen = true,
            "JOIN" => {
                let channel = msg.params[0].clone();
                let members = net.channels.entry(channel.clone()).or_default();
                members.push(me.clone());
                for member in members.clone() {
                    if let Some(client) = net.clients.get(&member) {
                        let _ = client.send(format!(":{prefix} JOIN {channel}"));
                    }
                }
            }
            "NAMES" => {
                let channel = &msg.params[0];
                let members = net.channels.get(channel).cloned().unwrap_or_default();
                let _ = tx.send(format!(":fake.server 353 {me} = {channel} :{}", members.join(" ")));
                let _ = tx.send(format!(":fake.server 366 {me} {channel} :End of /NAMES list"));
            }
            "PRIVMSG" => {
                let (target, text) = (&msg.params[0], &msg.params[1]);
                let relay = format!(":{prefix} PRIVMSG {target} :{text}");
                let recipients: Vec<String> = if target.starts_with('#') {
                    net.channels.get(target).cloned().unwrap_or_default()
                } else {
                    vec![target.clone()]
                };
                for recipient in recipients.iter().filter(|r| **r != me) {
                    if let Some(client) = net.clients.get(recipient) {
                        let _ = client.send(relay.clone());
                    }
                }
            }
            "LIST" => {
                for (channel, members) in &net.channels {
                    let _ = tx.send(format!(":fake.server 322 {me} {channel} {} :Test channel", members.len()));
                }
                let _ = tx.send(format!(":fake.server 323 {me} :End of /LIST"));
            }
            "QUIT" => break,
            _ => {}
        }

        if !registered && user_seen {
            if let Some(n) = &nick {
                registered = true;
                net.clients.insert(n.clone(), tx.clone());
                for line in [
                    format!(":fake.server 001 {n} :Welcome to the fake network {n}"),
                    format!(":fake.server 375 {n} :- fake.server Message of the day -"),
                    format!(":fake.server 372 {n} :- Be excellent to each other"),
                    format!(":fake.server 376 {n} :End of /MOTD command."),
                ] {
                    let _ = tx.send(line);
                }
            }
        }
    }

    if let Some(n) = nick {
        let mut net = net.lock().unwrap();
        net.clients.remove(&n);
        for members in net.channels.values_mut() {
            members.retain(|m| *m != n);
        }
    }
}

/// Helper: wait for a specific event, with timeout.
async fn expect_event(
    events: &mut mpsc::Receiver<Event>,
    timeout_ms: u64,
    predicate: impl Fn(&Event) -> bool,
    description: &str,
) -> Event {
    let deadline = Duration::from_millis(timeout_ms);
    let start = tokio::time::Instant::now();
    loop {
        match timeout(deadline.saturating_sub(start.elapsed()), events.recv()).await {
            Ok(Some(event)) => {
                if predicate(&event) {
                    return event;
                }
            }
            Ok(None) => panic!("Channel closed while waiting for: {description}"),
            Err(_) => panic!("Timeout waiting for: {description}"),
        }
    }
}

fn server_config(addr: SocketAddr, nick: &str, auto_join: &str) -> ServerConfig {
    ServerConfig {
        name: "fakenet".to_string(),
        hostname: addr.ip().to_string(),
        port: addr.port(),
        nickname: nick.to_string(),
        alt_nickname: Some(format!("{nick}_")),
        username: nick.to_string(),
        realname: "Test User".to_string(),
        auto_join_channels: auto_join.to_string(),
        ..Default::default()
    }
}

fn keyring() -> Arc<KeyRing> {
    Arc::new(KeyRing::new(Arc::new(Mutex::new(Db::open_memory().unwrap()))).unwrap())
}

fn is_own_join(nick: &'static str, channel: &'static str) -> impl Fn(&Event) -> bool {
    move |e| matches!(e, Event::Joined { nick: n, channel: c, .. } if n == nick && c == channel)
}

// ── Registration ────────────────────────────────────────────────────

#[tokio::test]
async fn registration_and_motd() {
    let addr = start_fake_server(&[]).await;
    let (handle, mut events) = client::connect(server_config(addr, "alice", ""), keyring(), None).unwrap();

    expect_event(&mut events, 2000, |e| matches!(e, Event::Connected { .. }), "Connected").await;
    let reg = expect_event(&mut events, 2000, |e| matches!(e, Event::Registered { .. }), "Registered").await;
    if let Event::Registered { server, nick } = reg {
        assert_eq!(server, "fakenet");
        assert_eq!(nick, "alice");
    }
    let motd = expect_event(&mut events, 2000, |e| matches!(e, Event::Motd { .. }), "Motd").await;
    if let Event::Motd { lines, .. } = motd {
        assert_eq!(lines, vec!["- Be excellent to each other"]);
    }

    handle.quit(Some("done here")).await.unwrap();
    let gone = expect_event(&mut events, 2000, |e| matches!(e, Event::Disconnected { .. }), "Disconnected").await;
    if let Event::Disconnected { reason, .. } = gone {
        assert_eq!(reason, "done here");
    }
}

#[tokio::test]
async fn dropping_the_handle_quits_with_default_reason() {
    let addr = start_fake_server(&[]).await;
    let (handle, mut events) = client::connect(server_config(addr, "dora", ""), keyring(), None).unwrap();

    expect_event(&mut events, 2000, |e| matches!(e, Event::Registered { .. }), "Registered").await;
    drop(handle);
    let gone = expect_event(&mut events, 2000, |e| matches!(e, Event::Disconnected { .. }), "Disconnected").await;
    if let Event::Disconnected { reason, .. } = gone {
        assert_eq!(reason, DEFAULT_QUIT_MESSAGE);
    }
}

#[tokio::test]
async fn nick_collision_falls_back_to_alt_nick() {
    let addr = start_fake_server(&["alice"]).await;
    let (handle, mut events) = client::connect(server_config(addr, "alice", ""), keyring(), None).unwrap();

    let reg = expect_event(&mut events, 2000, |e| matches!(e, Event::Registered { .. }), "Registered").await;
    if let Event::Registered { nick, .. } = reg {
        assert_eq!(nick, "alice_");
    }
    handle.quit(None).await.unwrap();
}

#[tokio::test]
async fn exhausted_nicks_fail_registration() {
    let addr = start_fake_server(&["alice", "alice_"]).await;
    let (handle, mut events) = client::connect(server_config(addr, "alice", ""), keyring(), None).unwrap();

    expect_event(
        &mut events,
        2000,
        |e| matches!(e, Event::RegistrationFailed { .. }),
        "RegistrationFailed",
    )
    .await;
    handle.quit(None).await.unwrap();
}

#[test]
fn invalid_config_never_connects() {
    let config = ServerConfig {
        nickname: String::new(),
        ..Default::default()
    };
    let result = client::connect(config, keyring(), None);
    assert!(matches!(result, Err(ConfigError::MissingField("nickname"))));
}

// ── Transport failures ──────────────────────────────────────────────

#[tokio::test]
async fn refused_connection_reports_error_then_disconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (_handle, mut events) = client::connect(server_config(addr, "alice", ""), keyring(), None).unwrap();
    let err = expect_event(&mut events, 2000, |e| matches!(e, Event::Error { .. }), "Error").await;
    if let Event::Error { text, .. } = err {
        assert!(text.contains("TCP connect"), "unexpected error text: {text}");
    }
    expect_event(&mut events, 2000, |e| matches!(e, Event::Disconnected { .. }), "Disconnected").await;
}

#[tokio::test]
async fn oversized_line_forces_disconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let junk = vec![b'x'; 70 * 1024];
        let _ = stream.write_all(&junk).await;
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    let (_handle, mut events) = client::connect(server_config(addr, "alice", ""), keyring(), None).unwrap();
    expect_event(&mut events, 3000, |e| matches!(e, Event::Error { .. }), "Error").await;
    expect_event(&mut events, 3000, |e| matches!(e, Event::Disconnected { .. }), "Disconnected").await;
}

// ── Channels ────────────────────────────────────────────────────────

#[tokio::test]
async fn auto_join_after_motd() {
    let addr = start_fake_server(&[]).await;
    let (handle, mut events) = client::connect(server_config(addr, "alice", "rust, tokio"), keyring(), None).unwrap();

    expect_event(&mut events, 3000, is_own_join("alice", "#rust"), "Joined #rust").await;
    expect_event(&mut events, 3000, is_own_join("alice", "#tokio"), "Joined #tokio").await;
    handle.quit(None).await.unwrap();
}

#[tokio::test]
async fn channel_list_is_served_from_cache() {
    let addr = start_fake_server(&[]).await;
    let db = Arc::new(Mutex::new(Db::open_memory().unwrap()));
    let (handle, mut events) =
        client::connect(server_config(addr, "alice", "rust"), keyring(), Some(db.clone())).unwrap();
    expect_event(&mut events, 3000, is_own_join("alice", "#rust"), "Joined #rust").await;

    handle.list_channels(false).await.unwrap();
    let list = expect_event(&mut events, 2000, |e| matches!(e, Event::ChannelList { .. }), "ChannelList").await;
    if let Event::ChannelList { channels, cached, .. } = list {
        assert!(!cached);
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].name, "#rust");
        assert_eq!(channels[0].users, 1);
    }

    handle.list_channels(false).await.unwrap();
    let list = expect_event(&mut events, 2000, |e| matches!(e, Event::ChannelList { .. }), "cached ChannelList").await;
    assert!(matches!(list, Event::ChannelList { cached: true, .. }));
    assert!(db.lock().unwrap().channel_list("fakenet").unwrap().is_some());

    handle.quit(None).await.unwrap();
}

// ── Encryption end to end ───────────────────────────────────────────

#[tokio::test]
async fn encrypted_channel_between_clients() {
    let addr = start_fake_server(&[]).await;

    let alice_cfg = server_config(addr, "alice", "secret");
    let alice_keys = keyring();
    alice_keys
        .set_room_key_from_passphrase(&alice_cfg, &Conversation::Channel("#secret"), "hunter2")
        .unwrap();
    // Same network under a different display name: keys still agree.
    let bob_cfg = ServerConfig {
        name: "my fakenet".to_string(),
        ..server_config(addr, "bob", "secret")
    };
    let bob_keys = keyring();
    bob_keys
        .set_room_key_from_passphrase(&bob_cfg, &Conversation::Channel("#secret"), "hunter2")
        .unwrap();
    let carol_cfg = server_config(addr, "carol", "secret");

    let (alice, mut alice_events) = client::connect(alice_cfg, alice_keys, None).unwrap();
    expect_event(&mut alice_events, 3000, is_own_join("alice", "#secret"), "alice joined").await;
    let (bob, mut bob_events) = client::connect(bob_cfg, bob_keys, None).unwrap();
    expect_event(&mut bob_events, 3000, is_own_join("bob", "#secret"), "bob joined").await;
    let (carol, mut carol_events) = client::connect(carol_cfg, keyring(), None).unwrap();
    expect_event(&mut carol_events, 3000, is_own_join("carol", "#secret"), "carol joined").await;

    alice.privmsg("#secret", "meet at dawn").await.unwrap();

    let got = expect_event(&mut bob_events, 2000, |e| matches!(e, Event::Privmsg { .. }), "bob Privmsg").await;
    if let Event::Privmsg { from, target, text, security, private, .. } = got {
        assert_eq!(from, "alice");
        assert_eq!(target, "#secret");
        assert_eq!(text, "meet at dawn");
        assert_eq!(security, Security::Decrypted);
        assert!(!private);
    }

    let got = expect_event(&mut carol_events, 2000, |e| matches!(e, Event::Privmsg { .. }), "carol Privmsg").await;
    if let Event::Privmsg { text, security, .. } = got {
        assert_eq!(security, Security::EncryptedNoKey);
        assert_ne!(text, "meet at dawn");
    }

    for handle in [alice, bob, carol] {
        handle.quit(None).await.unwrap();
    }
}

#[tokio::test]
async fn encrypted_private_message() {
    let addr = start_fake_server(&[]).await;

    let alice_cfg = server_config(addr, "alice", "");
    let alice_keys = keyring();
    alice_keys
        .set_room_key_from_passphrase(
            &alice_cfg,
            &Conversation::Private { own_nick: "alice", other_nick: "bob" },
            "just us",
        )
        .unwrap();
    let bob_cfg = server_config(addr, "bob", "");
    let bob_keys = keyring();
    bob_keys
        .set_room_key_from_passphrase(
            &bob_cfg,
            &Conversation::Private { own_nick: "bob", other_nick: "alice" },
            "just us",
        )
        .unwrap();

    let (alice, mut alice_events) = client::connect(alice_cfg, alice_keys, None).unwrap();
    expect_event(&mut alice_events, 2000, |e| matches!(e, Event::Motd { .. }), "alice Motd").await;
    let (bob, mut bob_events) = client::connect(bob_cfg, bob_keys, None).unwrap();
    expect_event(&mut bob_events, 2000, |e| matches!(e, Event::Motd { .. }), "bob Motd").await;

    alice.privmsg("bob", "psst").await.unwrap();
    let got = expect_event(&mut bob_events, 2000, |e| matches!(e, Event::Privmsg { .. }), "bob Privmsg").await;
    if let Event::Privmsg { from, text, security, private, .. } = got {
        assert_eq!(from, "alice");
        assert_eq!(text, "psst");
        assert_eq!(security, Security::Decrypted);
        assert!(private);
    }

    alice.quit(None).await.unwrap();
    bob.quit(None).await.unwrap();
}
