//! # Secret Engine Errors

use crate::domain::errors::ErrorKind;
use thiserror::Error;

/// Error type for Secret Engine operations.
///
/// Messages never contain key material, plaintexts or ciphertexts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SecretError {
    /// Ciphertext is malformed, truncated or fails authentication.
    #[error("corrupt ciphertext: {0}")]
    CorruptCiphertext(&'static str),

    /// Ciphertext was sealed under a different master key.
    #[error("ciphertext was sealed with a different key")]
    BadKey,

    /// Engine cannot be constructed from the given keys.
    #[error("secret engine configuration error: {0}")]
    Config(&'static str),

    /// The AEAD backend refused to encrypt.
    #[error("encryption failed")]
    Encryption,
}

impl SecretError {
    /// Returns the taxonomy tag for this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::CorruptCiphertext(_) => ErrorKind::CorruptCiphertext,
            Self::BadKey => ErrorKind::BadKey,
            Self::Config(_) => ErrorKind::ConfigError,
            Self::Encryption => ErrorKind::Internal,
        }
    }
}

/// Result type for Secret Engine operations.
pub type SecretResult<T> = Result<T, SecretError>;
