//! SealIRC SDK
//!
//! IRC client core with optional per-conversation encryption. Channels and
//! private conversations can be given a passphrase; everyone who enters the
//! same passphrase derives the same AES-256-GCM key and can read the
//! channel, while the server only ever sees base64 ciphertext.
//!
//! # Modules
//!
//! - [`client`]: Async connection driver (TCP/TLS, timers, command handle)
//! - [`session`]: Per-server connection state machine, without IO
//! - [`router`]: Dispatch of inbound messages to handlers
//! - [`framing`]: Byte stream to protocol lines
//! - [`irc`]: IRC message parsing/formatting
//! - [`crypto`]: Key derivation and authenticated encryption
//! - [`keyring`]: Room/PM key storage and lookup
//! - [`event`]: Events emitted by a connection
//! - [`config`]: Server records and their validation
//! - [`store`]: SQLite record store
//! - [`alias`]: User-defined command aliases
//! - [`channel_list`]: Cached `LIST` results
//! - [`command`]: Interpretation of typed input

pub mod alias;
pub mod channel_list;
pub mod client;
pub mod command;
pub mod config;
pub mod crypto;
pub mod event;
pub mod framing;
pub mod irc;
pub mod keyring;
pub mod router;
pub mod session;
pub mod store;
