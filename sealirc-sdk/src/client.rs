//! Connection driver.
//!
//! This is the main entry point for SDK consumers. [`connect`] validates a
//! server record, spawns one task that owns the transport and the
//! [`Session`], and hands back a [`ClientHandle`] for commands plus a
//! receiver for [`Event`]s. Supports both plaintext and TLS connections.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_rustls::rustls;
use tokio_rustls::TlsConnector;

use crate::channel_list::unix_now;
use crate::config::{ConfigError, ServerConfig, QUIT_GRACE, REGISTRATION_SETTLE};
use crate::event::Event;
use crate::framing::LineBuffer;
use crate::keyring::KeyRing;
use crate::session::{Output, Session, TimerKind, DEFAULT_QUIT_MESSAGE};
use crate::store::Db;

/// Commands the consumer can send to a connection.
#[derive(Debug)]
pub enum Command {
    Join(String),
    Part { channel: String, reason: Option<String> },
    Nick(String),
    Privmsg { target: String, text: String },
    Action { target: String, text: String },
    ListChannels { force: bool },
    Raw(String),
    Quit(Option<String>),
}

/// A handle to a running connection.
#[derive(Clone)]
pub struct ClientHandle {
    server: String,
    cmd_tx: mpsc::Sender<Command>,
}

impl ClientHandle {
    /// Display name of the server this handle talks to.
    pub fn server(&self) -> &str {
        &self.server
    }

    pub async fn join(&self, channel: &str) -> Result<()> {
        self.cmd_tx.send(Command::Join(channel.to_string())).await?;
        Ok(())
    }

    pub async fn part(&self, channel: &str, reason: Option<&str>) -> Result<()> {
        self.cmd_tx
            .send(Command::Part {
                channel: channel.to_string(),
                reason: reason.map(|s| s.to_string()),
            })
            .await?;
        Ok(())
    }

    pub async fn nick(&self, nick: &str) -> Result<()> {
        self.cmd_tx.send(Command::Nick(nick.to_string())).await?;
        Ok(())
    }

    /// Send a message; it is encrypted if the conversation has a key.
    pub async fn privmsg(&self, target: &str, text: &str) -> Result<()> {
        self.cmd_tx
            .send(Command::Privmsg {
                target: target.to_string(),
                text: text.to_string(),
            })
            .await?;
        Ok(())
    }

    pub async fn action(&self, target: &str, text: &str) -> Result<()> {
        self.cmd_tx
            .send(Command::Action {
                target: target.to_string(),
                text: text.to_string(),
            })
            .await?;
        Ok(())
    }

    /// Request the channel list. Served from cache unless stale or `force`.
    pub async fn list_channels(&self, force: bool) -> Result<()> {
        self.cmd_tx.send(Command::ListChannels { force }).await?;
        Ok(())
    }

    pub async fn raw(&self, line: &str) -> Result<()> {
        self.cmd_tx.send(Command::Raw(line.to_string())).await?;
        Ok(())
    }

    pub async fn quit(&self, message: Option<&str>) -> Result<()> {
        self.cmd_tx
            .send(Command::Quit(message.map(|s| s.to_string())))
            .await?;
        Ok(())
    }
}

/// Connect to a server and run the connection in a spawned task.
///
/// The record is validated first; an invalid record never starts a task.
/// Transport failures arrive as [`Event::Error`] followed by
/// [`Event::Disconnected`].
pub fn connect(
    config: ServerConfig,
    keyring: Arc<KeyRing>,
    store: Option<Arc<Mutex<Db>>>,
) -> Result<(ClientHandle, mpsc::Receiver<Event>), ConfigError> {
    config.validate()?;

    let (event_tx, event_rx) = mpsc::channel(256);
    let (cmd_tx, cmd_rx) = mpsc::channel(64);

    let handle = ClientHandle {
        server: config.name.clone(),
        cmd_tx,
    };

    let mut session = Session::new(config, keyring);
    if let Some(store) = store {
        session = session.with_store(store);
    }

    tokio::spawn(async move {
        let reason = match run_client(&mut session, &event_tx, cmd_rx).await {
            Ok(reason) => reason,
            Err(e) => {
                tracing::warn!(server = %session.server_name(), "Connection failed: {e:#}");
                let server = session.server_name().to_string();
                session.emit(Event::Error {
                    server,
                    text: format!("{e:#}"),
                });
                e.to_string()
            }
        };
        session.on_disconnected(&reason);
        for output in session.take_outputs() {
            if let Output::Emit(event) = output {
                let _ = event_tx.send(event).await;
            }
        }
    });

    Ok((handle, event_rx))
}

/// A transport that has completed TCP (and optionally TLS).
enum EstablishedConnection {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

async fn establish_connection(session: &mut Session) -> Result<EstablishedConnection> {
    session.begin_connect();
    let config = session.config().clone();
    let addr = config.address();

    let tcp = TcpStream::connect(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("TCP connect to {addr} failed: {e}"))?;
    session.tcp_connected();
    tracing::debug!(server = %config.name, %addr, "TCP connected");

    if !config.tls {
        return Ok(EstablishedConnection::Plain(tcp));
    }

    session.tls_handshaking();
    let connector = TlsConnector::from(Arc::new(rustls_insecure_config()));
    let dns_name = rustls::pki_types::ServerName::try_from(config.hostname.clone())?;
    let tls = connector
        .connect(dns_name, tcp)
        .await
        .map_err(|e| anyhow::anyhow!("TLS handshake with {addr} failed: {e}"))?;
    tracing::debug!(server = %config.name, "TLS handshake complete");
    Ok(EstablishedConnection::Tls(Box::new(tls)))
}

/// Runs one connection to completion. Returns the disconnect reason.
async fn run_client(
    session: &mut Session,
    event_tx: &mpsc::Sender<Event>,
    cmd_rx: mpsc::Receiver<Command>,
) -> Result<String> {
    let conn = establish_connection(session).await?;
    session.transport_ready();
    match conn {
        EstablishedConnection::Plain(tcp) => {
            let (reader, writer) = tokio::io::split(tcp);
            run_irc(reader, writer, session, event_tx, cmd_rx).await
        }
        EstablishedConnection::Tls(tls) => {
            let (reader, writer) = tokio::io::split(*tls);
            run_irc(reader, writer, session, event_tx, cmd_rx).await
        }
    }
}

/// TLS config that accepts any server certificate.
fn rustls_insecure_config() -> rustls::ClientConfig {
    let _ = rustls::crypto::ring::default_provider().install_default();
    rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(InsecureVerifier))
        .with_no_client_auth()
}

#[derive(Debug)]
struct InsecureVerifier;

impl rustls::client::danger::ServerCertVerifier for InsecureVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

async fn run_irc<R, W>(
    mut reader: R,
    mut writer: W,
    session: &mut Session,
    event_tx: &mpsc::Sender<Event>,
    mut cmd_rx: mpsc::Receiver<Command>,
) -> Result<String>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut timers: Vec<(Instant, TimerKind)> = Vec::new();

    // Connected goes out before registration; the settle delay gives the
    // server a moment before the first line.
    flush(session, &mut writer, event_tx, &mut timers).await?;
    tokio::time::sleep(REGISTRATION_SETTLE).await;
    session.register();

    let mut lines = LineBuffer::new();
    let mut buf = vec![0u8; 4096];

    loop {
        flush(session, &mut writer, event_tx, &mut timers).await?;

        let next_timer = timers.iter().map(|(at, _)| *at).min();
        let far_future = Instant::now() + std::time::Duration::from_secs(86_400);

        tokio::select! {
            result = reader.read(&mut buf) => {
                let n = result?;
                if n == 0 {
                    return Ok("Connection closed by server".to_string());
                }
                for line in lines.push(&buf[..n])? {
                    session.handle_line(&line);
                }
            }
            cmd = cmd_rx.recv() => {
                // Every handle was dropped.
                let cmd = cmd.unwrap_or(Command::Quit(None));
                if let Some(reason) = execute_command(session, cmd) {
                    if session.quit(Some(&reason)) {
                        flush(session, &mut writer, event_tx, &mut timers).await?;
                        tokio::time::sleep(QUIT_GRACE).await;
                    }
                    let _ = writer.shutdown().await;
                    return Ok(reason);
                }
            }
            _ = tokio::time::sleep_until(next_timer.unwrap_or(far_future)), if next_timer.is_some() => {
                let now = Instant::now();
                let (due, pending): (Vec<_>, Vec<_>) = timers.drain(..).partition(|(at, _)| *at <= now);
                timers = pending;
                for (_, timer) in due {
                    session.fire(timer);
                }
            }
        }
    }
}

/// Apply a consumer command to the session. Returns the quit reason when
/// the command ends the connection.
fn execute_command(session: &mut Session, cmd: Command) -> Option<String> {
    match cmd {
        Command::Join(channel) => session.join(&channel),
        Command::Part { channel, reason } => session.part(&channel, reason.as_deref()),
        Command::Nick(nick) => session.change_nick(&nick),
        Command::Privmsg { target, text } => session.privmsg(&target, &text),
        Command::Action { target, text } => session.action(&target, &text),
        Command::ListChannels { force } => session.request_channel_list(force, unix_now()),
        Command::Raw(line) => session.raw(&line),
        Command::Quit(reason) => return Some(reason.unwrap_or_else(|| DEFAULT_QUIT_MESSAGE.to_string())),
    }
    None
}

/// Write queued lines, deliver queued events and arm queued timers, in
/// the order the session produced them.
async fn flush<W: AsyncWrite + Unpin>(
    session: &mut Session,
    writer: &mut W,
    event_tx: &mpsc::Sender<Event>,
    timers: &mut Vec<(Instant, TimerKind)>,
) -> Result<()> {
    let outputs = session.take_outputs();
    if outputs.is_empty() {
        return Ok(());
    }
    for output in outputs {
        match output {
            Output::Send(msg) => {
                tracing::trace!(server = %session.server_name(), ">> {msg}");
                writer.write_all(format!("{msg}\r\n").as_bytes()).await?;
            }
            Output::Emit(event) => {
                let _ = event_tx.send(event).await;
            }
            Output::Schedule(delay, timer) => timers.push((Instant::now() + delay, timer)),
        }
    }
    writer.flush().await?;
    Ok(())
}
