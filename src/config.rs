//! # Configuration
//!
//! Startup configuration, read once.
//!
//! Sources, later ones winning:
//!
//! 1. built-in defaults
//! 2. `config/accounts.toml` (optional)
//! 3. environment variables prefixed `ACCOUNTS`, sections separated by
//!    `__`, e.g. `ACCOUNTS__DATABASE__URL`
//!
//! A `.env` file in the working directory is loaded into the environment
//! first.
//!
//! # Examples
//!
//! ```
//! use trade_accounts::config::AppConfig;
//!
//! let mut config = AppConfig::default();
//! config.database.url = "postgres://localhost/accounts".into();
//! config.secrets.master_key = "master".into();
//! config.secrets.signing_key = "signing".into();
//! assert!(config.validate().is_ok());
//! ```

use crate::domain::entities::{DEFAULT_EXCHANGES, SupportedExchanges};
use crate::infrastructure::crypto::{SecretEngine, SecretError};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "config/accounts";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "ACCOUNTS";

/// Configuration loading or validation failure.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A source could not be read or deserialized.
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// A value is missing or out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// The secret engine rejected the keys.
    #[error(transparent)]
    Secret(#[from] SecretError),
}

/// Database pool settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Connection URL.
    pub url: String,
    /// Pool capacity.
    pub max_connections: u32,
    /// Idle connections kept open.
    pub min_connections: u32,
    /// Seconds to wait for a free connection.
    pub acquire_timeout_secs: u64,
    /// Apply embedded migrations on connect.
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
            min_connections: 1,
            acquire_timeout_secs: 30,
            run_migrations: true,
        }
    }
}

/// Secret Engine keys.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretsConfig {
    /// Master encryption key, base64 or raw.
    pub master_key: String,
    /// Keyed-hash signing key, base64 or raw.
    pub signing_key: String,
}

impl std::fmt::Debug for SecretsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretsConfig").finish_non_exhaustive()
    }
}

/// Base64 when it decodes to something non-empty, raw bytes otherwise.
fn key_bytes(value: &str) -> Vec<u8> {
    match STANDARD.decode(value.trim()) {
        Ok(bytes) if !bytes.is_empty() => bytes,
        _ => value.as_bytes().to_vec(),
    }
}

impl SecretsConfig {
    /// Builds the engine from the configured keys.
    ///
    /// # Errors
    ///
    /// Returns `SecretError::Config` for empty or identical keys.
    pub fn engine(&self) -> Result<SecretEngine, SecretError> {
        SecretEngine::new(&key_bytes(&self.master_key), &key_bytes(&self.signing_key))
    }
}

/// Event bus and ledger settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Bus endpoints.
    pub servers: Vec<String>,
    /// First subject segment.
    pub subject_prefix: String,
    /// Attempts before a failed event is left alone.
    pub max_retries: u32,
    /// Hours processed records are kept.
    pub retention_hours: u64,
    /// Failed records fetched per retry pass.
    pub retry_batch_size: u32,
    /// Seconds between retry passes.
    pub retry_interval_secs: u64,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            servers: vec!["nats://127.0.0.1:4222".to_string()],
            subject_prefix: "trading".to_string(),
            max_retries: 5,
            retention_hours: 168,
            retry_batch_size: 100,
            retry_interval_secs: 30,
        }
    }
}

impl EventsConfig {
    /// Retention window for processed records.
    #[must_use]
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_hours.saturating_mul(3600))
    }

    /// Pause between retry passes.
    #[must_use]
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }
}

/// Exchange binding settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BindingsConfig {
    /// Failures within the window that disable a binding.
    pub max_failures: u32,
    /// Failure window in seconds.
    pub failure_window_secs: u64,
    /// Accepted exchange types.
    pub supported_exchanges: Vec<String>,
}

impl Default for BindingsConfig {
    fn default() -> Self {
        Self {
            max_failures: 10,
            failure_window_secs: 60,
            supported_exchanges: DEFAULT_EXCHANGES.iter().map(|s| (*s).to_string()).collect(),
        }
    }
}

impl BindingsConfig {
    /// Failure window.
    #[must_use]
    pub fn failure_window(&self) -> Duration {
        Duration::from_secs(self.failure_window_secs)
    }

    /// The configured exchange set.
    #[must_use]
    pub fn supported(&self) -> SupportedExchanges {
        SupportedExchanges::new(self.supported_exchanges.iter())
    }
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of the compact format.
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Database pool.
    pub database: DatabaseConfig,
    /// Secret Engine keys.
    pub secrets: SecretsConfig,
    /// Event bus and ledger.
    pub events: EventsConfig,
    /// Exchange bindings.
    pub bindings: BindingsConfig,
    /// Logging.
    pub logging: LogConfig,
}

impl AppConfig {
    /// Loads `.env`, the default file and the environment, then validates.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Load` if a source is unreadable and
    /// `ConfigError::Invalid` if validation fails.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Loads from `file` (extension optional, file optional) and the
    /// environment.
    ///
    /// # Errors
    ///
    /// See [`AppConfig::load`].
    pub fn load_from(file: &str) -> Result<Self, ConfigError> {
        let config: Self = config::Config::builder()
            .add_source(config::File::with_name(file).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("events.servers")
                    .with_list_parse_key("bindings.supported_exchanges")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field rules.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` naming the first violated rule.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.database.url.trim().is_empty() {
            return invalid("database.url is required");
        }
        if self.database.max_connections == 0 {
            return invalid("database.max_connections must be positive");
        }
        if self.database.min_connections > self.database.max_connections {
            return invalid("database.min_connections exceeds max_connections");
        }
        if self.secrets.master_key.is_empty() || self.secrets.signing_key.is_empty() {
            return invalid("secrets.master_key and secrets.signing_key are required");
        }
        if self.secrets.master_key == self.secrets.signing_key {
            return invalid("secrets.signing_key must differ from secrets.master_key");
        }
        if self.events.max_retries == 0 {
            return invalid("events.max_retries must be positive");
        }
        if self.events.retry_batch_size == 0 {
            return invalid("events.retry_batch_size must be positive");
        }
        if self.bindings.max_failures == 0 {
            return invalid("bindings.max_failures must be positive");
        }
        if self.bindings.supported_exchanges.is_empty() {
            return invalid("bindings.supported_exchanges is empty");
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn valid() -> AppConfig {
        let mut config = AppConfig::default();
        config.database.url = "postgres://localhost/accounts".into();
        config.secrets.master_key = "bWFzdGVyLWtleQ==".into();
        config.secrets.signing_key = "signing".into();
        config
    }

    #[test]
    fn defaults() {
        let config = AppConfig::default();
        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.events.max_retries, 5);
        assert_eq!(config.events.retention(), Duration::from_secs(168 * 3600));
        assert_eq!(config.bindings.failure_window(), Duration::from_secs(60));
        assert!(config.bindings.supported().contains("binance"));
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn validation_rules() {
        assert!(valid().validate().is_ok());

        let mut c = valid();
        c.database.url.clear();
        assert!(matches!(c.validate(), Err(ConfigError::Invalid(_))));

        let mut c = valid();
        c.secrets.signing_key = c.secrets.master_key.clone();
        assert!(c.validate().is_err());

        let mut c = valid();
        c.events.max_retries = 0;
        assert!(c.validate().is_err());

        let mut c = valid();
        c.bindings.max_failures = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn keys_build_an_engine() {
        let engine = valid().secrets.engine().unwrap();
        let sealed = engine.encrypt("k").unwrap();
        assert_eq!(engine.decrypt(&sealed).unwrap(), "k");
    }

    #[test]
    fn secrets_are_not_printed() {
        let rendered = format!("{:?}", valid());
        assert!(!rendered.contains("signing"));
    }

    #[test]
    fn key_material_decoding() {
        assert_eq!(key_bytes("bWFzdGVyLWtleQ=="), b"master-key".to_vec());
        assert_eq!(key_bytes("not base64!"), b"not base64!".to_vec());
    }
}
