//! Per-conversation encryption for IRC channels and private messages.
//!
//! Uses AES-256-GCM with keys derived from a shared passphrase via
//! PBKDF2-HMAC-SHA256. The server never sees plaintext, it just relays
//! ciphertext like any other PRIVMSG.
//!
//! # Wire format
//!
//! Encrypted messages are sent as normal PRIVMSG with the body:
//!
//! ```text
//! base64(nonce || ciphertext || tag)
//! ```
//!
//! - `nonce`: 12 random bytes, fresh for every message
//! - `ciphertext`: AES-256-GCM output, same length as the plaintext
//! - `tag`: 16-byte authentication tag
//!
//! There is no marker: ciphertext looks like noise. Older builds prefixed
//! `+++ENCV1:`; that prefix is still accepted on input.
//!
//! # Key derivation
//!
//! ```text
//! salt = SHA-256(canonical_server_id ":" conversation_id)[..16]
//! key  = PBKDF2-HMAC-SHA256(passphrase, salt, 100_000 iterations, 32 bytes)
//! ```
//!
//! The salt is deterministic so two clients given the same passphrase
//! arrive at the same key without exchanging anything but the passphrase.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Legacy envelope prefix. Stripped on input, never emitted.
pub const LEGACY_PREFIX: &str = "+++ENCV1:";

/// PBKDF2 iteration count for passphrase-derived keys.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

pub const KEY_LEN: usize = 32;
pub const SALT_LEN: usize = 16;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// Smallest decoded blob that can hold a message: nonce + tag.
pub const MIN_BLOB_LEN: usize = NONCE_LEN + TAG_LEN;

/// Derive an AES-256 key from a passphrase.
///
/// A random salt is generated when none is given; the salt actually used is
/// returned alongside the key.
pub fn derive_key(passphrase: &str, salt: Option<[u8; SALT_LEN]>) -> ([u8; KEY_LEN], [u8; SALT_LEN]) {
    let salt = salt.unwrap_or_else(|| {
        let mut fresh = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut fresh);
        fresh
    });
    let mut key = [0u8; KEY_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), &salt, PBKDF2_ITERATIONS, &mut key);
    (key, salt)
}

/// Deterministic salt for one conversation on one network.
pub fn derive_room_salt(canonical_server_id: &str, conversation_id: &str) -> [u8; SALT_LEN] {
    let digest = Sha256::digest(format!("{canonical_server_id}:{conversation_id}").as_bytes());
    let mut salt = [0u8; SALT_LEN];
    salt.copy_from_slice(&digest[..SALT_LEN]);
    salt
}

/// Server identity used for key derivation: the hostname when one is
/// configured, so renaming a server entry never changes its keys.
pub fn canonical_server_id<'a>(display_name: &'a str, hostname: Option<&'a str>) -> &'a str {
    match hostname {
        Some(host) if !host.trim().is_empty() => host,
        _ => display_name,
    }
}

/// Conversation identity for a private message: both nicks lower-cased,
/// sorted, joined by `:`. Identical on both ends of the conversation.
pub fn pm_identity(nick_a: &str, nick_b: &str) -> String {
    let mut nicks = [nick_a.to_lowercase(), nick_b.to_lowercase()];
    nicks.sort();
    format!("{}:{}", nicks[0], nicks[1])
}

/// Encrypt a plaintext message.
///
/// Returns the wire-format string: `base64(nonce || ciphertext || tag)`.
pub fn encrypt(key: &[u8], plaintext: &str) -> Result<String, EncryptError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| EncryptError::BadKey)?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|_| EncryptError::EncryptFailed)?;

    let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ciphertext);
    Ok(B64.encode(blob))
}

/// Decrypt a wire-format encrypted message.
///
/// Returns the plaintext, or an error if the body isn't ciphertext, the key
/// is wrong, or the ciphertext was tampered with. None of these are faults:
/// a sender without a key simply sends plaintext.
pub fn decrypt(key: &[u8], wire: &str) -> Result<String, DecryptError> {
    if key.len() != KEY_LEN {
        return Err(DecryptError::BadKey);
    }
    let body = strip_legacy_prefix(wire);
    let blob = B64.decode(body).map_err(|_| DecryptError::NotBase64)?;
    if blob.len() < MIN_BLOB_LEN {
        return Err(DecryptError::TooShort(blob.len()));
    }

    let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| DecryptError::BadKey)?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| DecryptError::DecryptFailed)?;

    String::from_utf8(plaintext).map_err(|_| DecryptError::InvalidUtf8)
}

/// Check if a message body looks like ciphertext.
///
/// Only a display hint for conversations without a key: valid base64 that
/// decodes to at least [`MIN_BLOB_LEN`] bytes.
pub fn looks_encrypted(text: &str) -> bool {
    let body = strip_legacy_prefix(text);
    if body.is_empty() {
        return false;
    }
    B64.decode(body)
        .map(|blob| blob.len() >= MIN_BLOB_LEN)
        .unwrap_or(false)
}

/// Surrounding whitespace and the legacy prefix are ignored.
fn strip_legacy_prefix(text: &str) -> &str {
    let text = text.trim();
    text.strip_prefix(LEGACY_PREFIX).unwrap_or(text).trim()
}

#[derive(Debug, thiserror::Error)]
pub enum EncryptError {
    #[error("invalid key")]
    BadKey,
    #[error("encryption failed")]
    EncryptFailed,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecryptError {
    #[error("not valid base64")]
    NotBase64,
    #[error("decoded payload too short ({0} bytes)")]
    TooShort(usize),
    #[error("invalid key")]
    BadKey,
    #[error("decryption failed (wrong key or tampered)")]
    DecryptFailed,
    #[error("decrypted data is not valid UTF-8")]
    InvalidUtf8,
}
