//! # Secret Engine
//!
//! Authenticated encryption of short secrets, keyed hashing for lookup,
//! display masking and credential generation.
//!
//! ## Ciphertext format
//!
//! `v1:` followed by unpadded URL-safe base64 of
//! `key_id (8 bytes) ‖ nonce (12 bytes) ‖ AES-256-GCM ciphertext+tag`.
//! `key_id` is derived from the master key, so a ciphertext sealed under a
//! different key is reported as [`SecretError::BadKey`] rather than as
//! corruption.
//!
//! ## Keyed hash
//!
//! HMAC-SHA256 under the signing key, lowercase hex (64 characters). The
//! signing key is distinct from the master key, so rotating one does not
//! invalidate the other.
//!
//! # Examples
//!
//! ```
//! use trade_accounts::infrastructure::crypto::SecretEngine;
//!
//! let engine = SecretEngine::new(b"master key material", b"signing key material").unwrap();
//! let sealed = engine.encrypt("api-key").unwrap();
//! assert_eq!(engine.decrypt(&sealed).unwrap(), "api-key");
//! assert_eq!(engine.hash("api-key"), engine.hash("api-key"));
//! assert_eq!(SecretEngine::mask("abcdefgh", 4), "abcd...efgh");
//! ```

use crate::domain::entities::SealedCredentials;
use crate::infrastructure::crypto::error::{SecretError, SecretResult};
use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

/// Version prefix of the ciphertext format.
pub const CIPHERTEXT_PREFIX: &str = "v1:";

const KEY_ID_LEN: usize = 8;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// Plaintext API credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct PlainCredentials {
    /// API key.
    pub api_key: String,
    /// API secret.
    pub api_secret: String,
}

impl fmt::Debug for PlainCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlainCredentials").finish_non_exhaustive()
    }
}

/// Process-wide encryption and hashing facility.
///
/// Cheap to share behind an `Arc`; every operation takes `&self` and is
/// CPU-only.
#[derive(Clone)]
pub struct SecretEngine {
    cipher: Aes256Gcm,
    key_id: [u8; KEY_ID_LEN],
    mac: HmacSha256,
}

impl fmt::Debug for SecretEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretEngine")
            .field("key_id", &hex::encode(self.key_id))
            .finish_non_exhaustive()
    }
}

impl SecretEngine {
    /// Builds an engine from raw key material.
    ///
    /// The AES key is `SHA-256(master_key)`, so any non-empty input yields
    /// a full-strength key.
    ///
    /// # Errors
    ///
    /// Returns `SecretError::Config` when either key is empty or both keys
    /// are identical.
    pub fn new(master_key: &[u8], signing_key: &[u8]) -> SecretResult<Self> {
        if master_key.is_empty() {
            return Err(SecretError::Config("master key is empty"));
        }
        if signing_key.is_empty() {
            return Err(SecretError::Config("signing key is empty"));
        }
        if master_key == signing_key {
            return Err(SecretError::Config(
                "signing key must differ from the master key",
            ));
        }

        let derived = Sha256::digest(master_key);
        let cipher = Aes256Gcm::new_from_slice(&derived)
            .map_err(|_| SecretError::Config("derived key has the wrong length"))?;

        let fingerprint = Sha256::digest(derived);
        let mut key_id = [0u8; KEY_ID_LEN];
        key_id.copy_from_slice(fingerprint.get(..KEY_ID_LEN).unwrap_or_default());

        let mac = <HmacSha256 as Mac>::new_from_slice(signing_key)
            .map_err(|_| SecretError::Config("signing key rejected"))?;

        Ok(Self {
            cipher,
            key_id,
            mac,
        })
    }

    /// Returns the hex fingerprint of the master key.
    #[must_use]
    pub fn key_id(&self) -> String {
        hex::encode(self.key_id)
    }

    /// Encrypts `plaintext` under a fresh random nonce.
    ///
    /// # Errors
    ///
    /// Returns `SecretError::Encryption` if the AEAD backend fails.
    pub fn encrypt(&self, plaintext: &str) -> SecretResult<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| SecretError::Encryption)?;

        let mut payload = Vec::with_capacity(KEY_ID_LEN + NONCE_LEN + sealed.len());
        payload.extend_from_slice(&self.key_id);
        payload.extend_from_slice(nonce.as_slice());
        payload.extend_from_slice(&sealed);

        Ok(format!("{CIPHERTEXT_PREFIX}{}", URL_SAFE_NO_PAD.encode(payload)))
    }

    /// Decrypts a ciphertext produced by [`SecretEngine::encrypt`].
    ///
    /// # Errors
    ///
    /// - `SecretError::BadKey` if it was sealed under another master key
    /// - `SecretError::CorruptCiphertext` if it is malformed, truncated or
    ///   tampered with
    pub fn decrypt(&self, ciphertext: &str) -> SecretResult<String> {
        let encoded = ciphertext
            .strip_prefix(CIPHERTEXT_PREFIX)
            .ok_or(SecretError::CorruptCiphertext("unknown format version"))?;
        let payload = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| SecretError::CorruptCiphertext("invalid encoding"))?;

        if payload.len() < KEY_ID_LEN + NONCE_LEN + TAG_LEN {
            return Err(SecretError::CorruptCiphertext("truncated"));
        }
        let (key_id, rest) = payload
            .split_first_chunk::<KEY_ID_LEN>()
            .ok_or(SecretError::CorruptCiphertext("truncated"))?;
        if *key_id != self.key_id {
            return Err(SecretError::BadKey);
        }
        let (nonce, sealed) = rest
            .split_first_chunk::<NONCE_LEN>()
            .ok_or(SecretError::CorruptCiphertext("truncated"))?;

        let plain = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| SecretError::CorruptCiphertext("authentication failed"))?;
        String::from_utf8(plain).map_err(|_| SecretError::CorruptCiphertext("not UTF-8"))
    }

    /// Keyed hash of `value`, as 64 lowercase hex characters.
    #[must_use]
    pub fn hash(&self, value: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(value.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Masks a secret for display.
    ///
    /// Empty input yields `""`, input shorter than `2n` characters yields
    /// `"***"`, anything else yields the first `n` characters, `"..."` and
    /// the last `n` characters.
    #[must_use]
    pub fn mask(plaintext: &str, n: usize) -> String {
        if plaintext.is_empty() {
            return String::new();
        }
        let chars: Vec<char> = plaintext.chars().collect();
        if chars.len() < n.saturating_mul(2) {
            return "***".to_string();
        }
        let head: String = chars.iter().take(n).collect();
        let tail: String = chars.iter().skip(chars.len() - n).collect();
        format!("{head}...{tail}")
    }

    /// Generates `"{prefix}_{random}"` with `length` URL-safe random
    /// characters.
    #[must_use]
    pub fn generate(prefix: &str, length: usize) -> String {
        let mut bytes = vec![0u8; length];
        OsRng.fill_bytes(&mut bytes);
        // 256 is a multiple of 64, so masking keeps the draw uniform.
        let random: String = bytes
            .iter()
            .filter_map(|b| ALPHABET.get(usize::from(b & 0x3f)))
            .map(|&c| char::from(c))
            .collect();
        if prefix.is_empty() {
            random
        } else {
            format!("{prefix}_{random}")
        }
    }

    /// Encrypts a key/secret pair and hashes the key.
    ///
    /// # Errors
    ///
    /// Returns `SecretError::Encryption` if the AEAD backend fails.
    pub fn seal(&self, api_key: &str, api_secret: &str) -> SecretResult<SealedCredentials> {
        Ok(SealedCredentials {
            encrypted_api_key: self.encrypt(api_key)?,
            encrypted_api_secret: self.encrypt(api_secret)?,
            api_key_hash: self.hash(api_key),
        })
    }

    /// Decrypts sealed credentials.
    ///
    /// # Errors
    ///
    /// Returns `BadKey` or `CorruptCiphertext` as [`SecretEngine::decrypt`].
    pub fn open(&self, sealed: &SealedCredentials) -> SecretResult<PlainCredentials> {
        Ok(PlainCredentials {
            api_key: self.decrypt(&sealed.encrypted_api_key)?,
            api_secret: self.decrypt(&sealed.encrypted_api_secret)?,
        })
    }
}
