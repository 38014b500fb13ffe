//! At-rest encryption of WebDAV connection secrets.
//!
//! Secrets are sealed with AES-256-GCM. The stored blob is the 12-byte nonce
//! followed by the ciphertext and tag, so every blob is self-contained.

use crate::error::{AppError, Result};
use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use std::fmt;

/// Nonce length used by AES-GCM.
pub const NONCE_SIZE: usize = 12;

/// Required key length in bytes.
pub const KEY_SIZE: usize = 32;

/// A 256-bit symmetric key for sealing connection secrets.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey([u8; KEY_SIZE]);

impl SecretKey {
    /// Build a key from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let key: [u8; KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| AppError::InvalidKeyLength(bytes.len()))?;
        Ok(Self(key))
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0))
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey([REDACTED])")
    }
}

/// Parse a key given as 64 hex characters or as base64 of 32 bytes.
pub fn parse_key(raw: &str) -> Result<SecretKey> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(AppError::InvalidKey("key is empty".to_string()));
    }

    // A base64 encoding of 32 bytes always carries padding, so an all-hex
    // string can only be meant as hex.
    let decoded = if raw.chars().all(|c| c.is_ascii_hexdigit()) && raw.len() % 2 == 0 {
        hex::decode(raw).map_err(|e| AppError::InvalidKey(e.to_string()))?
    } else {
        STANDARD
            .decode(raw)
            .map_err(|e| AppError::InvalidKey(e.to_string()))?
    };

    SecretKey::from_bytes(&decoded)
}

/// Generate a fresh random key, hex encoded.
pub fn generate_key() -> String {
    let key = Aes256Gcm::generate_key(&mut OsRng);
    hex::encode(key)
}

/// Encrypt a secret. Returns `nonce || ciphertext`.
pub fn encrypt_secret(key: &SecretKey, plaintext: &str) -> Result<Vec<u8>> {
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let sealed = key
        .cipher()
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|e| AppError::Internal(format!("Encryption failed: {}", e)))?;

    let mut out = Vec::with_capacity(NONCE_SIZE + sealed.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Decrypt a blob produced by [`encrypt_secret`].
pub fn decrypt_secret(key: &SecretKey, blob: &[u8]) -> Result<String> {
    if blob.len() < NONCE_SIZE {
        return Err(AppError::PayloadTooShort);
    }

    let (nonce, sealed) = blob.split_at(NONCE_SIZE);
    let plaintext = key
        .cipher()
        .decrypt(Nonce::from_slice(nonce), sealed)
        .map_err(|_| AppError::AuthenticationFailed)?;

    String::from_utf8(plaintext).map_err(|_| AppError::AuthenticationFailed)
}
