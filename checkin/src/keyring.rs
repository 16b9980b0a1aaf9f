//! Versioned shared-secret storage for the token codec.
//!
//! Tokens are encrypted under whichever key the ring currently marks active;
//! the envelope carries the key version, so older keys keep decrypting
//! outstanding tokens after a rotation instead of cutting every live session
//! off at once.

use rand::RngCore;
use rand::rngs::OsRng;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

pub const KEY_LEN: usize = 32;

pub type KeyVersion = u8;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyRingError {
    #[error("key material is not valid hex")]
    BadHex,
    #[error("key must be exactly {KEY_LEN} bytes")]
    BadLength,
    #[error("malformed key entry '{0}', expected 'version:hex'")]
    BadEntry(String),
    #[error("duplicate key version {0}")]
    DuplicateVersion(KeyVersion),
    #[error("key version {0} is not in the ring")]
    UnknownVersion(KeyVersion),
}

/// A 256-bit symmetric key. Debug output never prints the material.
#[derive(Clone, PartialEq, Eq)]
pub struct SharedKey([u8; KEY_LEN]);

impl SharedKey {
    pub fn generate() -> Self {
        let mut buf = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut buf);
        SharedKey(buf)
    }

    pub fn from_hex(s: &str) -> Result<Self, KeyRingError> {
        let bytes = hex::decode(s.trim()).map_err(|_| KeyRingError::BadHex)?;
        let arr: [u8; KEY_LEN] = bytes.try_into().map_err(|_| KeyRingError::BadLength)?;
        Ok(SharedKey(arr))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub(crate) fn bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedKey(..)")
    }
}

#[derive(Debug, Clone)]
pub struct KeyRing {
    keys: HashMap<KeyVersion, SharedKey>,
    active: KeyVersion,
}

impl KeyRing {
    /// Single-key ring; the given version becomes active.
    pub fn new(version: KeyVersion, key: SharedKey) -> Self {
        let mut keys = HashMap::new();
        keys.insert(version, key);
        KeyRing {
            keys,
            active: version,
        }
    }

    /// Parses `"1:<hex>,2:<hex>"` as produced by the `CHECKIN_KEYS` setting.
    pub fn parse(spec: &str, active: KeyVersion) -> Result<Self, KeyRingError> {
        let mut keys = HashMap::new();
        for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (ver, hex_key) = entry
                .split_once(':')
                .ok_or_else(|| KeyRingError::BadEntry(entry.to_string()))?;
            let version: KeyVersion = ver
                .trim()
                .parse()
                .map_err(|_| KeyRingError::BadEntry(entry.to_string()))?;
            if keys.insert(version, SharedKey::from_hex(hex_key)?).is_some() {
                return Err(KeyRingError::DuplicateVersion(version));
            }
        }
        if !keys.contains_key(&active) {
            return Err(KeyRingError::UnknownVersion(active));
        }
        Ok(KeyRing { keys, active })
    }

    /// Builds a ring from the process-wide configuration.
    pub fn from_config() -> Result<Self, KeyRingError> {
        let cfg = common::Config::get();
        Self::parse(&cfg.checkin_keys, cfg.checkin_active_key)
    }

    /// Adds a key; the active version is untouched.
    pub fn insert(&mut self, version: KeyVersion, key: SharedKey) {
        self.keys.insert(version, key);
    }

    /// Points new encodings at `version`. Old versions keep decrypting.
    pub fn rotate_to(&mut self, version: KeyVersion) -> Result<(), KeyRingError> {
        if !self.keys.contains_key(&version) {
            return Err(KeyRingError::UnknownVersion(version));
        }
        log::info!("check-in key ring rotated to version {version}");
        self.active = version;
        Ok(())
    }

    pub fn active_version(&self) -> KeyVersion {
        self.active
    }

    pub(crate) fn active_key(&self) -> &SharedKey {
        // active is validated on every mutation
        &self.keys[&self.active]
    }

    pub(crate) fn key(&self, version: KeyVersion) -> Option<&SharedKey> {
        self.keys.get(&version)
    }
}
