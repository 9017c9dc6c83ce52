//! Secure-transport key provisioning.
//!
//! The decrypting stage asks for key material by identifier, once per secure
//! session and again on rotation. Answers are synchronous and come from local
//! configuration only; there is no network key exchange. Material for a given
//! identifier is byte-identical for the life of the provider and is destroyed
//! when the provider is dropped.
//!
//! Key material is never logged and never persisted.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use zeroize::Zeroize;

pub const CIPHER_AES_128_ICM: &str = "aes-128-icm";
pub const SRTP_MASTER_KEY_LEN: usize = 16;
pub const SRTP_MASTER_SALT_LEN: usize = 14;
/// 80-bit authentication tag (hmac-sha1-80).
pub const DEFAULT_AUTH_TAG_LEN: u8 = 10;

/// Master key and salt plus the cipher profile the transport should use.
///
/// The byte fields are private and reachable only through accessors so that
/// every read of key material is visible at a call site. `Debug` is redacted.
pub struct KeyMaterial {
    key: Vec<u8>,
    salt: Vec<u8>,
    pub cipher: String,
    pub auth_tag_len: u8,
}

impl KeyMaterial {
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn salt(&self) -> &[u8] {
        &self.salt
    }

    /// Key followed by salt, the layout the transport layer expects.
    pub fn concatenated(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.key.len() + self.salt.len());
        out.extend_from_slice(&self.key);
        out.extend_from_slice(&self.salt);
        out
    }
}

impl Drop for KeyMaterial {
    fn drop(&mut self) {
        self.key.zeroize();
        self.salt.zeroize();
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("key", &format_args!("<{} bytes>", self.key.len()))
            .field("salt", &format_args!("<{} bytes>", self.salt.len()))
            .field("cipher", &self.cipher)
            .field("auth_tag_len", &self.auth_tag_len)
            .finish()
    }
}

/// No key for the requested identifier. The decrypting stage treats this as
/// fatal for its decode path; the runtime escalates it on the event channel.
#[derive(Clone, Debug)]
pub struct KeyUnavailable {
    pub key_id: String,
}

impl std::fmt::Display for KeyUnavailable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "no key material for identifier {:?}", self.key_id)
    }
}
impl std::error::Error for KeyUnavailable {}

/// How one key entry is provisioned in configuration.
#[derive(Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum KeySpec {
    /// Raw hex material: 16-byte master key, 14-byte salt.
    Hex { key: String, salt: String },
    /// Derived locally from a passphrase (development and closed deployments).
    Seed { passphrase: String },
}

impl std::fmt::Debug for KeySpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeySpec::Hex { .. } => write!(f, "KeySpec::Hex {{ <redacted> }}"),
            KeySpec::Seed { .. } => write!(f, "KeySpec::Seed {{ <redacted> }}"),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct KeyEntry {
    pub id: String,
    #[serde(flatten)]
    pub spec: KeySpec,
}

/// Answers key requests from pre-provisioned material.
pub struct KeyProvider {
    entries: HashMap<String, KeyMaterial>,
}

impl KeyProvider {
    pub fn from_entries(entries: &[KeyEntry]) -> Result<Self> {
        let mut map = HashMap::with_capacity(entries.len());
        for entry in entries {
            if entry.id.trim().is_empty() {
                return Err(anyhow!("key entry has an empty identifier"));
            }
            let material = materialize(&entry.spec)?;
            if map.insert(entry.id.clone(), material).is_some() {
                return Err(anyhow!("duplicate key identifier {:?}", entry.id));
            }
        }
        Ok(Self { entries: map })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up material for a key identifier. Must not block; this runs
    /// inside a data-plane callback.
    pub fn material(&self, key_id: &str) -> std::result::Result<&KeyMaterial, KeyUnavailable> {
        self.entries.get(key_id).ok_or_else(|| KeyUnavailable {
            key_id: key_id.to_string(),
        })
    }
}

fn materialize(spec: &KeySpec) -> Result<KeyMaterial> {
    let (key, salt) = match spec {
        KeySpec::Hex { key, salt } => {
            let key = hex::decode(key.trim()).map_err(|_| anyhow!("key is not valid hex"))?;
            let salt = hex::decode(salt.trim()).map_err(|_| anyhow!("salt is not valid hex"))?;
            if key.len() != SRTP_MASTER_KEY_LEN {
                return Err(anyhow!(
                    "master key must be {} bytes, got {}",
                    SRTP_MASTER_KEY_LEN,
                    key.len()
                ));
            }
            if salt.len() != SRTP_MASTER_SALT_LEN {
                return Err(anyhow!(
                    "master salt must be {} bytes, got {}",
                    SRTP_MASTER_SALT_LEN,
                    salt.len()
                ));
            }
            (key, salt)
        }
        KeySpec::Seed { passphrase } => {
            let trimmed = passphrase.trim();
            if trimmed.is_empty() {
                return Err(anyhow!("key seed passphrase is required"));
            }
            let key_digest: [u8; 32] = Sha256::digest(trimmed.as_bytes()).into();
            let mut salt_input = trimmed.as_bytes().to_vec();
            salt_input.extend_from_slice(b":salt");
            let salt_digest: [u8; 32] = Sha256::digest(&salt_input).into();
            salt_input.zeroize();
            (
                key_digest[..SRTP_MASTER_KEY_LEN].to_vec(),
                salt_digest[..SRTP_MASTER_SALT_LEN].to_vec(),
            )
        }
    };
    Ok(KeyMaterial {
        key,
        salt,
        cipher: CIPHER_AES_128_ICM.to_string(),
        auth_tag_len: DEFAULT_AUTH_TAG_LEN,
    })
}
