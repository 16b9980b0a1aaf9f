//! Authenticated encryption of identity tokens.
//!
//! Wire form: `base64url_no_pad( key_version(1) || nonce(12) || ciphertext+tag )`.
//! AES-256-GCM fails closed: a flipped bit anywhere in the envelope fails the
//! authentication tag and the decode returns an opaque error. Which stage
//! rejected the envelope is only ever logged at debug level, never surfaced.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use thiserror::Error;

use crate::keyring::KeyRing;
use crate::token::IdentityToken;

pub const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const HEADER_LEN: usize = 1 + NONCE_LEN;

/// Opaque decode failure. The cause is logged, not exposed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Envelope could not be decoded")]
pub struct DecodeError {
    kind: DecodeErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DecodeErrorKind {
    Encoding,
    Layout,
    UnknownKeyVersion,
    Authentication,
    Payload,
    Schema,
}

impl DecodeError {
    fn reject(kind: DecodeErrorKind) -> Self {
        log::debug!("envelope rejected: {kind:?}");
        DecodeError { kind }
    }

    #[cfg(test)]
    pub(crate) fn kind(&self) -> DecodeErrorKind {
        self.kind
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Token could not be sealed")]
pub struct EncodeError;

/// Stateless encrypt/decrypt of [`IdentityToken`]s under a [`KeyRing`].
#[derive(Debug, Clone)]
pub struct TokenCodec {
    ring: KeyRing,
}

impl TokenCodec {
    pub fn new(ring: KeyRing) -> Self {
        TokenCodec { ring }
    }

    /// Codec backed by the process-wide configuration.
    pub fn from_config() -> Result<Self, crate::keyring::KeyRingError> {
        Ok(TokenCodec::new(KeyRing::from_config()?))
    }

    pub fn ring(&self) -> &KeyRing {
        &self.ring
    }

    /// Serializes and seals a token under the ring's active key.
    ///
    /// A fresh random nonce is drawn per call, so two encodings of the same
    /// token never produce the same envelope.
    pub fn encode(&self, token: &IdentityToken) -> Result<String, EncodeError> {
        let plaintext = serde_json::to_vec(token).map_err(|_| EncodeError)?;

        let version = self.ring.active_version();
        let cipher =
            Aes256Gcm::new_from_slice(self.ring.active_key().bytes()).map_err(|_| EncodeError)?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_slice())
            .map_err(|_| EncodeError)?;

        let mut raw = Vec::with_capacity(HEADER_LEN + ciphertext.len());
        raw.push(version);
        raw.extend_from_slice(nonce.as_slice());
        raw.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(raw))
    }

    /// Authenticated decrypt plus schema check. Fails closed on every branch.
    pub fn decode(&self, envelope: &str) -> Result<IdentityToken, DecodeError> {
        let raw = URL_SAFE_NO_PAD
            .decode(envelope.trim())
            .map_err(|_| DecodeError::reject(DecodeErrorKind::Encoding))?;
        if raw.len() < HEADER_LEN + TAG_LEN {
            return Err(DecodeError::reject(DecodeErrorKind::Layout));
        }

        let version = raw[0];
        let key = self
            .ring
            .key(version)
            .ok_or_else(|| DecodeError::reject(DecodeErrorKind::UnknownKeyVersion))?;

        let (nonce, ciphertext) = raw[1..].split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new_from_slice(key.bytes())
            .map_err(|_| DecodeError::reject(DecodeErrorKind::Authentication))?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| DecodeError::reject(DecodeErrorKind::Authentication))?;

        let token: IdentityToken = serde_json::from_slice(&plaintext)
            .map_err(|_| DecodeError::reject(DecodeErrorKind::Payload))?;
        if !token.schema_ok() {
            return Err(DecodeError::reject(DecodeErrorKind::Schema));
        }
        Ok(token)
    }
}
