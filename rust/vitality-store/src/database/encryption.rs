//! At-rest encryption for locally stored payloads using AES-256-GCM.
//!
//! Every local payload is wrapped in an [`Envelope`]:
//!
//! - `{"encrypted":true,"data":"<base64(nonce ‖ ciphertext ‖ tag)>"}`
//! - `{"unencrypted":true,"data":<json>}` when no owner id is known
//!
//! Keys are derived per owner with PBKDF2-HMAC-SHA256 and are never cached:
//! each call derives the key afresh. The nonce, key and iteration constants
//! are part of the stored format and must not change.

use aes_gcm::aead::{rand_core::RngCore, Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{engine::general_purpose, Engine as _};
use pbkdf2::pbkdf2_hmac;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use sha2::Sha256;

use crate::database::local::LocalStore;
use crate::error::CryptoError;

/// Application-wide salt mixed into every key derivation.
pub const APP_SALT: &str = "vitality-local-store-v1";

/// Encryption key size (32 bytes for AES-256).
pub const KEY_SIZE: usize = 32;

/// Nonce size (12 bytes, the AES-GCM standard).
pub const NONCE_SIZE: usize = 12;

/// PBKDF2 iteration count.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// A derived per-owner key.
pub struct DerivedKey([u8; KEY_SIZE]);

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("DerivedKey").field(&"<redacted>").finish()
    }
}

impl DerivedKey {
    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(&self.0.into())
    }

    #[cfg(test)]
    pub(crate) fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

/// Derive the owner's AES-256 key.
///
/// The PBKDF2 password is `owner_id ‖ APP_SALT` and the salt is `APP_SALT`.
///
/// # Errors
///
/// Returns [`CryptoError::KeyDerivation`] when the owner id is missing or empty.
pub fn derive_key(owner_id: Option<&str>) -> Result<DerivedKey, CryptoError> {
    let owner_id = owner_id
        .filter(|id| !id.is_empty())
        .ok_or(CryptoError::KeyDerivation)?;

    let password = format!("{owner_id}{APP_SALT}");
    let mut key = [0u8; KEY_SIZE];
    pbkdf2_hmac::<Sha256>(
        password.as_bytes(),
        APP_SALT.as_bytes(),
        PBKDF2_ITERATIONS,
        &mut key,
    );
    Ok(DerivedKey(key))
}

/// Wire form of a locally stored payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// Base64 of `nonce ‖ ciphertext ‖ tag`.
    Encrypted(String),
    /// Explicit plaintext written when no owner id was available.
    Unencrypted(Value),
    /// Bare JSON written before envelopes existed.
    Legacy(Value),
}

impl Envelope {
    /// Parse a stored string. Returns `None` for anything that is not JSON or
    /// claims to be encrypted without a string payload.
    #[must_use]
    pub fn parse(wire: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(wire).ok()?;

        if value.get("encrypted") == Some(&Value::Bool(true)) {
            return match value.get("data") {
                Some(Value::String(data)) => Some(Self::Encrypted(data.clone())),
                _ => None,
            };
        }

        if value.get("unencrypted") == Some(&Value::Bool(true)) {
            let data = value.get("data").cloned().unwrap_or(Value::Null);
            return Some(Self::Unencrypted(data));
        }

        Some(Self::Legacy(value))
    }

    /// Serialize back to the stored string form.
    #[must_use]
    pub fn to_wire(&self) -> String {
        match self {
            Self::Encrypted(data) => json!({ "encrypted": true, "data": data }).to_string(),
            Self::Unencrypted(data) => json!({ "unencrypted": true, "data": data }).to_string(),
            Self::Legacy(data) => data.to_string(),
        }
    }

    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        matches!(self, Self::Encrypted(_))
    }
}

/// Encrypt a payload for `owner_id` and return the envelope string.
///
/// Without an owner id the payload is wrapped in an explicit
/// `{"unencrypted":true}` envelope instead.
///
/// # Errors
///
/// Returns an error if the payload cannot be serialized or the cipher fails.
pub fn encrypt<T: Serialize + ?Sized>(
    payload: &T,
    owner_id: Option<&str>,
) -> Result<String, CryptoError> {
    let value = serde_json::to_value(payload)?;

    let key = match derive_key(owner_id) {
        Ok(key) => key,
        Err(CryptoError::KeyDerivation) => {
            tracing::warn!("No owner id available, storing payload in an unencrypted envelope");
            return Ok(Envelope::Unencrypted(value).to_wire());
        }
        Err(e) => return Err(e),
    };

    let plaintext = serde_json::to_vec(&value)?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = key
        .cipher()
        .encrypt(nonce, plaintext.as_ref())
        .map_err(|e| {
            tracing::error!(error = %e, "AES-GCM encryption failed");
            CryptoError::Cipher
        })?;

    let mut combined = nonce_bytes.to_vec();
    combined.extend_from_slice(&ciphertext);

    Ok(Envelope::Encrypted(general_purpose::STANDARD.encode(combined)).to_wire())
}

/// Decrypt an envelope string.
///
/// Returns `None` when the payload is unreadable, tampered with, or was
/// encrypted for a different owner. Plaintext envelopes are returned as-is
/// with a migration warning.
#[must_use]
pub fn decrypt(wire: &str, owner_id: Option<&str>) -> Option<Value> {
    let Some(envelope) = Envelope::parse(wire) else {
        tracing::warn!("Stored payload is not a readable envelope");
        return None;
    };

    let data = match envelope {
        Envelope::Unencrypted(value) | Envelope::Legacy(value) => {
            tracing::warn!("Read unencrypted local payload, it should be migrated");
            return Some(value);
        }
        Envelope::Encrypted(data) => data,
    };

    let Ok(key) = derive_key(owner_id) else {
        tracing::warn!("Encrypted payload requested without an owner id");
        return None;
    };

    let combined = match general_purpose::STANDARD.decode(data) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(error = %e, "Encrypted payload is not valid base64");
            return None;
        }
    };

    if combined.len() <= NONCE_SIZE {
        tracing::warn!(len = combined.len(), "Encrypted payload too short");
        return None;
    }

    let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
    let plaintext = match key.cipher().decrypt(Nonce::from_slice(nonce_bytes), ciphertext) {
        Ok(plaintext) => plaintext,
        Err(_) => {
            tracing::warn!("Decryption failed: wrong owner or tampered payload");
            return None;
        }
    };

    match serde_json::from_slice(&plaintext) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(error = %e, "Decrypted payload is not valid JSON");
            None
        }
    }
}

/// Decrypt and deserialize into `T`, treating a shape mismatch like any other
/// decryption failure.
#[must_use]
pub fn decrypt_as<T: DeserializeOwned>(wire: &str, owner_id: Option<&str>) -> Option<T> {
    let value = decrypt(wire, owner_id)?;
    match serde_json::from_value(value) {
        Ok(typed) => Some(typed),
        Err(e) => {
            tracing::warn!(error = %e, "Decrypted payload has an unexpected shape");
            None
        }
    }
}

/// Re-write a plaintext entry at `storage_key` in encrypted form.
///
/// Returns `true` only when a rewrite happened. Entries that are already
/// encrypted, missing, or unreadable are left untouched and yield `false`.
pub fn migrate_to_encrypted(
    store: &dyn LocalStore,
    storage_key: &str,
    owner_id: Option<&str>,
) -> bool {
    if owner_id.filter(|id| !id.is_empty()).is_none() {
        tracing::warn!(key = storage_key, "Cannot migrate without an owner id");
        return false;
    }

    let raw = match store.get(storage_key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return false,
        Err(e) => {
            tracing::warn!(key = storage_key, error = %e, "Failed to read entry for migration");
            return false;
        }
    };

    let value = match Envelope::parse(&raw) {
        Some(Envelope::Encrypted(_)) => return false,
        Some(Envelope::Unencrypted(value) | Envelope::Legacy(value)) => value,
        None => {
            tracing::warn!(key = storage_key, "Entry is unreadable, skipping migration");
            return false;
        }
    };

    let wire = match encrypt(&value, owner_id) {
        Ok(wire) => wire,
        Err(e) => {
            tracing::warn!(key = storage_key, error = %e, "Failed to encrypt entry for migration");
            return false;
        }
    };

    match store.set(storage_key, &wire) {
        Ok(()) => {
            tracing::info!(key = storage_key, "Migrated local entry to encrypted storage");
            true
        }
        Err(e) => {
            tracing::warn!(key = storage_key, error = %e, "Failed to write migrated entry");
            false
        }
    }
}
