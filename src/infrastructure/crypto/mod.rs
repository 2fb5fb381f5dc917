//! # Crypto
//!
//! The Secret Engine used to seal exchange credentials and OAuth tokens.
//! Keys are loaded once at startup and held only in process memory.

pub mod error;
pub mod secret_engine;

pub use error::{SecretError, SecretResult};
pub use secret_engine::{CIPHERTEXT_PREFIX, PlainCredentials, SecretEngine};
