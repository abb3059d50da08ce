//! Room and PM keys: derivation from passphrases, storage, lookup.
//!
//! Keys are stored under the server's canonical id (its hostname) so two
//! users who named the same network differently still agree on the salt.
//! Lookups fall back to the display name for keys saved by older builds.
//!
//! Every connection consults the key ring on each PRIVMSG, so reads are
//! served from an in-memory mirror behind an `RwLock`; writes go to the
//! store first and then update the mirror.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use anyhow::Result;

use crate::config::{is_channel, ServerConfig};
use crate::crypto::{self, EncryptError, KEY_LEN, PBKDF2_ITERATIONS};
use crate::event::Security;
use crate::store::{Db, RoomKeyRow};

/// A conversation a key can belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversation<'a> {
    Channel(&'a str),
    Private { own_nick: &'a str, other_nick: &'a str },
}

impl<'a> Conversation<'a> {
    /// Classify a target from our point of view: anything that isn't a
    /// channel name is a private conversation with that nick.
    pub fn for_target(target: &'a str, own_nick: &'a str) -> Self {
        if is_channel(target) {
            Conversation::Channel(target)
        } else {
            Conversation::Private {
                own_nick,
                other_nick: target,
            }
        }
    }

    /// Identifier used for salt derivation and storage.
    pub fn id(&self) -> String {
        match self {
            Conversation::Channel(name) => name.to_string(),
            Conversation::Private { own_nick, other_nick } => crypto::pm_identity(own_nick, other_nick),
        }
    }
}

/// An outgoing message body ready for the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub body: String,
    pub encrypted: bool,
}

type KeyId = (String, String);

/// Key store shared by all connections.
pub struct KeyRing {
    db: Arc<Mutex<Db>>,
    cache: RwLock<HashMap<KeyId, [u8; KEY_LEN]>>,
}

impl KeyRing {
    /// Build a key ring over the store, loading every saved key.
    pub fn new(db: Arc<Mutex<Db>>) -> Result<Self> {
        let rows = db.lock().unwrap().room_keys()?;
        let mut cache = HashMap::with_capacity(rows.len());
        for row in rows {
            match <[u8; KEY_LEN]>::try_from(row.derived_key.as_slice()) {
                Ok(key) => {
                    cache.insert((row.server, row.conversation), key);
                }
                Err(_) => tracing::warn!(
                    server = %row.server,
                    conversation = %row.conversation,
                    "Ignoring stored key of {} bytes",
                    row.derived_key.len()
                ),
            }
        }
        Ok(Self {
            db,
            cache: RwLock::new(cache),
        })
    }

    /// Derive a key from a passphrase and store it for the conversation.
    ///
    /// The salt is deterministic (see [`crypto::derive_room_salt`]) so
    /// everyone entering the same passphrase gets the same key. The
    /// passphrase itself is not kept.
    pub fn set_room_key_from_passphrase(
        &self,
        server: &ServerConfig,
        conversation: &Conversation<'_>,
        passphrase: &str,
    ) -> Result<[u8; KEY_LEN]> {
        let canonical = server.canonical_id().to_string();
        let conversation_id = conversation.id();
        let salt = crypto::derive_room_salt(&canonical, &conversation_id);
        let (key, salt) = crypto::derive_key(passphrase, Some(salt));

        self.db.lock().unwrap().set_room_key(&RoomKeyRow {
            server: canonical.clone(),
            conversation: conversation_id.clone(),
            salt: salt.to_vec(),
            derived_key: key.to_vec(),
            iterations: PBKDF2_ITERATIONS,
        })?;
        tracing::info!(server = %canonical, conversation = %conversation_id, display = %server.name, "Room key stored");
        self.cache.write().unwrap().insert((canonical, conversation_id), key);
        Ok(key)
    }

    /// Key for a conversation, if one is configured.
    pub fn room_key(&self, server: &ServerConfig, conversation: &Conversation<'_>) -> Option<[u8; KEY_LEN]> {
        let conversation_id = conversation.id();
        let cache = self.cache.read().unwrap();
        cache
            .get(&(server.canonical_id().to_string(), conversation_id.clone()))
            .or_else(|| cache.get(&(server.name.clone(), conversation_id)))
            .copied()
    }

    pub fn has_room_key(&self, server: &ServerConfig, conversation: &Conversation<'_>) -> bool {
        self.room_key(server, conversation).is_some()
    }

    /// Remove the key under both the canonical id and the display name.
    /// Returns true if anything was removed.
    pub fn remove_room_key(&self, server: &ServerConfig, conversation: &Conversation<'_>) -> Result<bool> {
        let conversation_id = conversation.id();
        let mut removed = false;
        let db = self.db.lock().unwrap();
        let mut cache = self.cache.write().unwrap();
        for server_id in [server.canonical_id(), server.name.as_str()] {
            removed |= db.remove_room_key(server_id, &conversation_id)?;
            cache.remove(&(server_id.to_string(), conversation_id.clone()));
        }
        Ok(removed)
    }

    /// Encrypt an outgoing body when the conversation has a key.
    pub fn seal(
        &self,
        server: &ServerConfig,
        conversation: &Conversation<'_>,
        text: &str,
    ) -> Result<Sealed, EncryptError> {
        match self.room_key(server, conversation) {
            Some(key) => Ok(Sealed {
                body: crypto::encrypt(&key, text)?,
                encrypted: true,
            }),
            None => {
                tracing::warn!(server = %server.name, conversation = %conversation.id(), "No key configured, sending plaintext");
                Ok(Sealed {
                    body: text.to_string(),
                    encrypted: false,
                })
            }
        }
    }

    /// Decide how an incoming body should be presented.
    ///
    /// With a key: decrypted text, or the body as received when it doesn't
    /// decrypt. Without a key: the body as received, classified by
    /// [`crypto::looks_encrypted`].
    pub fn open(&self, server: &ServerConfig, conversation: &Conversation<'_>, body: &str) -> (String, Security) {
        match self.room_key(server, conversation) {
            Some(key) => match crypto::decrypt(&key, body) {
                Ok(plaintext) => (plaintext, Security::Decrypted),
                Err(e) => {
                    tracing::debug!(server = %server.name, conversation = %conversation.id(), "Could not decrypt: {e}");
                    (body.to_string(), Security::Undecryptable)
                }
            },
            None if crypto::looks_encrypted(body) => (body.to_string(), Security::EncryptedNoKey),
            None => (body.to_string(), Security::Plaintext),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(name: &str, hostname: &str) -> ServerConfig {
        ServerConfig {
            name: name.into(),
            hostname: hostname.into(),
            ..Default::default()
        }
    }

    fn keyring() -> KeyRing {
        KeyRing::new(Arc::new(Mutex::new(Db::open_memory().unwrap()))).unwrap()
    }

    #[test]
    fn display_name_does_not_affect_key() {
        let ring = keyring();
        let a = server("Libera", "irc.libera.chat");
        let b = server("My Libera", "irc.libera.chat");
        let chan = Conversation::Channel("#test");
        let key_a = ring.set_room_key_from_passphrase(&a, &chan, "pw").unwrap();
        assert_eq!(ring.room_key(&b, &chan), Some(key_a));

        let other_ring = keyring();
        let key_b = other_ring.set_room_key_from_passphrase(&b, &chan, "pw").unwrap();
        assert_eq!(key_a, key_b);
    }

    #[test]
    fn pm_keys_are_symmetric() {
        let alice_ring = keyring();
        let bob_ring = keyring();
        let srv = server("net", "irc.example.net");
        let alice_view = Conversation::Private { own_nick: "Alice", other_nick: "bob" };
        let bob_view = Conversation::Private { own_nick: "Bob", other_nick: "alice" };
        let ka = alice_ring.set_room_key_from_passphrase(&srv, &alice_view, "shared").unwrap();
        let kb = bob_ring.set_room_key_from_passphrase(&srv, &bob_view, "shared").unwrap();
        assert_eq!(ka, kb);
        assert_eq!(alice_view.id(), "alice:bob");
    }

    #[test]
    fn keys_survive_reload_and_never_store_passphrase() {
        let db = Arc::new(Mutex::new(Db::open_memory().unwrap()));
        let srv = server("net", "irc.example.net");
        let chan = Conversation::Channel("#secret");
        let key = KeyRing::new(db.clone())
            .unwrap()
            .set_room_key_from_passphrase(&srv, &chan, "correct horse")
            .unwrap();

        let row = db.lock().unwrap().room_key("irc.example.net", "#secret").unwrap().unwrap();
        assert_eq!(row.derived_key, key.to_vec());
        assert_eq!(row.salt, crypto::derive_room_salt("irc.example.net", "#secret").to_vec());
        assert_eq!(row.iterations, PBKDF2_ITERATIONS);
        assert!(!row.derived_key.windows(5).any(|w| w == b"horse"));

        let reloaded = KeyRing::new(db).unwrap();
        assert_eq!(reloaded.room_key(&srv, &chan), Some(key));
    }

    #[test]
    fn legacy_display_name_keys_are_found_and_removed() {
        let db = Arc::new(Mutex::new(Db::open_memory().unwrap()));
        db.lock()
            .unwrap()
            .set_room_key(&RoomKeyRow {
                server: "Libera".into(),
                conversation: "#old".into(),
                salt: vec![0; 16],
                derived_key: vec![7; 32],
                iterations: PBKDF2_ITERATIONS,
            })
            .unwrap();
        let ring = KeyRing::new(db).unwrap();
        let srv = server("Libera", "irc.libera.chat");
        let chan = Conversation::Channel("#old");
        assert_eq!(ring.room_key(&srv, &chan), Some([7; 32]));
        assert!(ring.remove_room_key(&srv, &chan).unwrap());
        assert!(!ring.has_room_key(&srv, &chan));
    }

    #[test]
    fn open_distinguishes_four_states() {
        let ring = keyring();
        let srv = server("net", "irc.example.net");
        let keyed = Conversation::Channel("#keyed");
        let unkeyed = Conversation::Channel("#open");
        let key = ring.set_room_key_from_passphrase(&srv, &keyed, "pw").unwrap();
        let ciphertext = crypto::encrypt(&key, "hi there").unwrap();

        assert_eq!(ring.open(&srv, &keyed, &ciphertext), ("hi there".to_string(), Security::Decrypted));
        assert_eq!(ring.open(&srv, &keyed, "hello").1, Security::Undecryptable);
        assert_eq!(ring.open(&srv, &unkeyed, &ciphertext).1, Security::EncryptedNoKey);
        assert_eq!(ring.open(&srv, &unkeyed, "hello").1, Security::Plaintext);
    }

    #[test]
    fn seal_encrypts_only_with_key() {
        let ring = keyring();
        let srv = server("net", "irc.example.net");
        let chan = Conversation::for_target("#room", "me");
        let plain = ring.seal(&srv, &chan, "hello").unwrap();
        assert_eq!(plain, Sealed { body: "hello".into(), encrypted: false });

        let key = ring.set_room_key_from_passphrase(&srv, &chan, "pw").unwrap();
        let sealed = ring.seal(&srv, &chan, "hello").unwrap();
        assert!(sealed.encrypted);
        assert_eq!(crypto::decrypt(&key, &sealed.body).unwrap(), "hello");
    }
}
