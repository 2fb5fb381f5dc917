//! # Exchange Binding Entity
//!
//! A named reference to an account at an external exchange.
//!
//! Private bindings belong to one user and carry that user's API
//! credentials, sealed by the Secret Engine. Public bindings are shared,
//! ownerless and carry no credentials. Any number of tradings may point at
//! one binding.
//!
//! # Examples
//!
//! ```
//! use trade_accounts::domain::entities::{ExchangeBinding, SupportedExchanges};
//!
//! let supported = SupportedExchanges::default();
//! let public = ExchangeBinding::public("Binance spot", "binance");
//! assert!(public.validate(&supported).is_ok());
//!
//! let unknown = ExchangeBinding::public("Mystery", "mtgox");
//! assert!(unknown.validate(&supported).is_err());
//! ```

use crate::domain::errors::{DomainError, DomainResult, require_max_len, require_non_blank};
use crate::domain::value_objects::patch::{Patchable, fields};
use crate::domain::value_objects::{
    AttributeMap, BindingStatus, ExchangeBindingId, Timestamp, UserId, Visibility,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

/// Maximum binding name length.
pub const MAX_BINDING_NAME_LEN: usize = 100;

/// Exchange types accepted when none are configured.
pub const DEFAULT_EXCHANGES: &[&str] = &[
    "binance", "kraken", "gate", "coinbase", "okx", "bybit", "bitget", "kucoin", "virtual",
];

/// The configured set of exchange types a binding may name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SupportedExchanges(BTreeSet<String>);

impl SupportedExchanges {
    /// Builds the set, lowercasing every entry.
    #[must_use]
    pub fn new<I, S>(exchanges: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            exchanges
                .into_iter()
                .map(|s| s.as_ref().trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        )
    }

    /// Returns true if `exchange_type` is in the set.
    #[must_use]
    pub fn contains(&self, exchange_type: &str) -> bool {
        self.0.contains(exchange_type)
    }

    /// Iterates over the configured types in order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Returns true if nothing is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for SupportedExchanges {
    fn default() -> Self {
        Self::new(DEFAULT_EXCHANGES.iter().copied())
    }
}

/// The three credential columns of a private binding.
///
/// `encrypted_api_key` and `encrypted_api_secret` are Secret Engine
/// ciphertexts; `api_key_hash` is the keyed hash of the plaintext key and
/// is what lookups and equality checks use.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedCredentials {
    /// Ciphertext of the API key.
    pub encrypted_api_key: String,
    /// Ciphertext of the API secret.
    pub encrypted_api_secret: String,
    /// Keyed hash of the plaintext API key (lowercase hex).
    pub api_key_hash: String,
}

impl SealedCredentials {
    /// Returns true if every column is non-empty.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.encrypted_api_key.is_empty()
            && !self.encrypted_api_secret.is_empty()
            && !self.api_key_hash.is_empty()
    }
}

impl fmt::Debug for SealedCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SealedCredentials")
            .field("api_key_hash", &self.api_key_hash)
            .finish_non_exhaustive()
    }
}

/// Known keys of a binding's `security_settings` map.
///
/// Unknown keys are tolerated on parse and preserved on merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySettings {
    /// Source addresses allowed to use the key (address or CIDR).
    pub ip_whitelist: Vec<String>,
    /// Whether the key may withdraw funds.
    pub withdrawals_enabled: bool,
    /// Whether the key may trade.
    pub trading_enabled: bool,
    /// Upper bound on a single order's notional.
    pub max_order_notional: Option<Decimal>,
    /// Whether sensitive operations need a second factor.
    #[serde(rename = "require_2fa")]
    pub require_2fa: bool,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            ip_whitelist: Vec::new(),
            withdrawals_enabled: false,
            trading_enabled: true,
            max_order_notional: None,
            require_2fa: false,
        }
    }
}

impl SecuritySettings {
    /// Parses the known keys out of an attribute map.
    ///
    /// # Errors
    ///
    /// Returns `InvalidField` when a known key has the wrong type or an
    /// address does not parse.
    pub fn from_attributes(map: &AttributeMap) -> DomainResult<Self> {
        let settings: Self = serde_json::from_value(map.to_json())
            .map_err(|e| DomainError::invalid("security_settings", e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Writes the known keys into `map`, leaving other keys untouched.
    pub fn merge_into(&self, map: &mut AttributeMap) {
        if let Ok(Value::Object(obj)) = serde_json::to_value(self) {
            map.merge(&AttributeMap::from(obj));
        }
    }

    /// Checks the typed values.
    ///
    /// # Errors
    ///
    /// Returns `InvalidField` for unparseable whitelist entries or a
    /// non-positive notional cap.
    pub fn validate(&self) -> DomainResult<()> {
        for entry in &self.ip_whitelist {
            if !is_ip_or_cidr(entry) {
                return Err(DomainError::invalid(
                    "security_settings.ip_whitelist",
                    format!("'{entry}' is not an IP address or CIDR block"),
                ));
            }
        }
        if self.max_order_notional.is_some_and(|cap| cap <= Decimal::ZERO) {
            return Err(DomainError::invalid(
                "security_settings.max_order_notional",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

fn is_ip_or_cidr(entry: &str) -> bool {
    let (addr, prefix) = match entry.split_once('/') {
        Some((a, p)) => (a, Some(p)),
        None => (entry, None),
    };
    let Ok(ip) = addr.parse::<IpAddr>() else {
        return false;
    };
    match prefix {
        None => true,
        Some(p) => {
            let max = if ip.is_ipv4() { 32 } else { 128 };
            p.parse::<u8>().is_ok_and(|bits| bits <= max)
        }
    }
}

/// Binding fields that a trading response renders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingSummary {
    /// Binding id.
    pub id: ExchangeBindingId,
    /// Binding name.
    pub name: String,
    /// Exchange type.
    pub exchange_type: String,
    /// Visibility.
    pub visibility: Visibility,
    /// Status.
    pub status: BindingStatus,
}

/// A private or public exchange binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeBinding {
    /// Identifier.
    pub id: ExchangeBindingId,
    /// Owner; `None` for public bindings.
    pub user_id: Option<UserId>,
    /// Display name, unique per owner (public bindings share one bucket).
    pub name: String,
    /// Exchange type, one of [`SupportedExchanges`].
    pub exchange_type: String,
    /// Private or public.
    pub visibility: Visibility,
    /// Sealed credentials; present iff private.
    pub credentials: Option<SealedCredentials>,
    /// Operational status.
    pub status: BindingStatus,
    /// Last successful use.
    pub last_used_at: Option<Timestamp>,
    /// Consecutive failures since the last reset.
    pub failure_count: u32,
    /// Time of the most recent failure.
    pub last_failure_at: Option<Timestamp>,
    /// Security settings (see [`SecuritySettings`]).
    pub security_settings: AttributeMap,
    /// Free-form attributes.
    pub info: AttributeMap,
    /// Creation time.
    pub created_at: Timestamp,
    /// Last modification time.
    pub updated_at: Timestamp,
    /// Soft-deletion marker.
    pub deleted_at: Option<Timestamp>,
}

impl ExchangeBinding {
    fn base(name: String, exchange_type: &str, visibility: Visibility) -> Self {
        let now = Timestamp::now();
        Self {
            id: ExchangeBindingId::new_v4(),
            user_id: None,
            name,
            exchange_type: exchange_type.trim().to_lowercase(),
            visibility,
            credentials: None,
            status: BindingStatus::Active,
            last_used_at: None,
            failure_count: 0,
            last_failure_at: None,
            security_settings: AttributeMap::new(),
            info: AttributeMap::new(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Creates a private binding owned by `owner`.
    #[must_use]
    pub fn private(
        owner: UserId,
        name: impl Into<String>,
        exchange_type: impl Into<String>,
        credentials: SealedCredentials,
    ) -> Self {
        let mut binding = Self::base(name.into(), &exchange_type.into(), Visibility::Private);
        binding.user_id = Some(owner);
        binding.credentials = Some(credentials);
        binding
    }

    /// Creates an ownerless public binding.
    #[must_use]
    pub fn public(name: impl Into<String>, exchange_type: impl Into<String>) -> Self {
        Self::base(name.into(), &exchange_type.into(), Visibility::Public)
    }

    /// Replaces the security settings map.
    #[must_use]
    pub fn with_security_settings(mut self, settings: AttributeMap) -> Self {
        self.security_settings = settings;
        self
    }

    /// Returns the keyed hash of the API key, if any.
    #[must_use]
    pub fn api_key_hash(&self) -> Option<&str> {
        self.credentials.as_ref().map(|c| c.api_key_hash.as_str())
    }

    /// Returns true once soft-deleted.
    #[inline]
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Returns true if a user other than the owner may reference it.
    #[inline]
    #[must_use]
    pub fn is_public(&self) -> bool {
        self.visibility.is_public()
    }

    /// Returns true if `user` may bind a trading to this binding.
    #[must_use]
    pub fn is_usable_by(&self, user: UserId) -> bool {
        self.is_public() || self.user_id == Some(user)
    }

    /// Parses the typed view of `security_settings`.
    ///
    /// # Errors
    ///
    /// See [`SecuritySettings::from_attributes`].
    pub fn typed_security_settings(&self) -> DomainResult<SecuritySettings> {
        SecuritySettings::from_attributes(&self.security_settings)
    }

    /// Returns the fields a trading response renders.
    #[must_use]
    pub fn summary(&self) -> BindingSummary {
        BindingSummary {
            id: self.id,
            name: self.name.clone(),
            exchange_type: self.exchange_type.clone(),
            visibility: self.visibility,
            status: self.status,
        }
    }

    /// Returns true iff the binding has failed at least `max_failures`
    /// times and the last failure happened less than `window` before
    /// `now`.
    #[must_use]
    pub fn should_disable(&self, max_failures: u32, window: Duration, now: Timestamp) -> bool {
        if self.failure_count < max_failures {
            return false;
        }
        match self.last_failure_at {
            Some(last) => last.elapsed_at(&now) < window,
            None => false,
        }
    }

    /// Checks the visibility/ownership/credential invariants.
    ///
    /// # Errors
    ///
    /// Returns the first violated rule, in this order: name, exchange type,
    /// visibility rules, security settings.
    pub fn validate(&self, supported: &SupportedExchanges) -> DomainResult<()> {
        require_non_blank("name", &self.name)?;
        require_max_len("name", &self.name, MAX_BINDING_NAME_LEN)?;
        if !supported.contains(&self.exchange_type) {
            return Err(DomainError::InvalidExchange(self.exchange_type.clone()));
        }

        match self.visibility {
            Visibility::Private => {
                if self.user_id.is_none() {
                    return Err(DomainError::PrivateRequiresOwner);
                }
                if !self.credentials.as_ref().is_some_and(SealedCredentials::is_complete) {
                    return Err(DomainError::PrivateRequiresCredentials);
                }
            }
            Visibility::Public => {
                if self.credentials.is_some() {
                    return Err(DomainError::PublicMustNotCarryCredentials);
                }
                if self.user_id.is_some() {
                    return Err(DomainError::PublicMustNotHaveOwner);
                }
            }
        }

        self.typed_security_settings()?;
        Ok(())
    }
}

impl Patchable for ExchangeBinding {
    const ENTITY: &'static str = "ExchangeBinding";
    // Credential columns rotate through the dedicated rotation path; the
    // failure counters move through record/reset.
    const IMMUTABLE_FIELDS: &'static [&'static str] = &[
        "id",
        "user_id",
        "visibility",
        "credentials",
        "encrypted_api_key",
        "encrypted_api_secret",
        "api_key_hash",
        "failure_count",
        "last_failure_at",
        "last_used_at",
        "created_at",
        "updated_at",
        "deleted_at",
    ];

    fn apply_field(&mut self, field: &str, value: &Value) -> DomainResult<bool> {
        match field {
            "name" => self.name = fields::string("name", value)?,
            "exchange_type" => {
                self.exchange_type = fields::string("exchange_type", value)?.trim().to_lowercase();
            }
            "status" => self.status = fields::enumeration("status", value)?,
            "security_settings" => {
                self.security_settings = fields::attributes("security_settings", value)?;
            }
            "info" => self.info = fields::attributes("info", value)?,
            _ => return Ok(false),
        }
        Ok(true)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::domain::value_objects::Patch;
    use serde_json::json;

    fn creds() -> SealedCredentials {
        SealedCredentials {
            encrypted_api_key: "v1:key".into(),
            encrypted_api_secret: "v1:secret".into(),
            api_key_hash: "ab".repeat(32),
        }
    }

    mod validation {
        use super::*;

        #[test]
        fn private_ok() {
            let b = ExchangeBinding::private(UserId::new_v4(), "main", "binance", creds());
            assert!(b.validate(&SupportedExchanges::default()).is_ok());
        }

        #[test]
        fn exchange_type_is_lowercased() {
            let b = ExchangeBinding::private(UserId::new_v4(), "main", " Binance ", creds());
            assert_eq!(b.exchange_type, "binance");
            assert!(b.validate(&SupportedExchanges::default()).is_ok());

            let p = ExchangeBinding::public("paper", "VIRTUAL");
            assert_eq!(p.exchange_type, "virtual");
            assert!(p.validate(&SupportedExchanges::default()).is_ok());
        }

        #[test]
        fn private_without_owner() {
            let mut b = ExchangeBinding::private(UserId::new_v4(), "main", "binance", creds());
            b.user_id = None;
            assert_eq!(
                b.validate(&SupportedExchanges::default()),
                Err(DomainError::PrivateRequiresOwner)
            );
        }

        #[test]
        fn private_without_credentials() {
            let mut b = ExchangeBinding::private(UserId::new_v4(), "main", "binance", creds());
            b.credentials = None;
            assert_eq!(
                b.validate(&SupportedExchanges::default()),
                Err(DomainError::PrivateRequiresCredentials)
            );
        }

        #[test]
        fn private_with_empty_hash() {
            let mut c = creds();
            c.api_key_hash.clear();
            let b = ExchangeBinding::private(UserId::new_v4(), "main", "binance", c);
            assert_eq!(
                b.validate(&SupportedExchanges::default()),
                Err(DomainError::PrivateRequiresCredentials)
            );
        }

        #[test]
        fn public_with_credentials() {
            let mut b = ExchangeBinding::public("shared", "kraken");
            b.credentials = Some(creds());
            assert_eq!(
                b.validate(&SupportedExchanges::default()),
                Err(DomainError::PublicMustNotCarryCredentials)
            );
        }

        #[test]
        fn public_with_owner() {
            let mut b = ExchangeBinding::public("shared", "kraken");
            b.user_id = Some(UserId::new_v4());
            assert_eq!(
                b.validate(&SupportedExchanges::default()),
                Err(DomainError::PublicMustNotHaveOwner)
            );
        }

        #[test]
        fn unsupported_exchange() {
            let b = ExchangeBinding::public("shared", "ftx");
            assert_eq!(
                b.validate(&SupportedExchanges::default()),
                Err(DomainError::InvalidExchange("ftx".into()))
            );
        }

        #[test]
        fn configured_set_is_respected() {
            let only_virtual = SupportedExchanges::new(["Virtual"]);
            assert!(ExchangeBinding::public("paper", "virtual").validate(&only_virtual).is_ok());
            assert!(ExchangeBinding::public("b", "binance").validate(&only_virtual).is_err());
        }
    }

    mod failure_policy {
        use super::*;

        fn failing(count: u32, secs_ago: i64, now: Timestamp) -> ExchangeBinding {
            let mut b = ExchangeBinding::private(UserId::new_v4(), "main", "binance", creds());
            b.failure_count = count;
            b.last_failure_at = Some(now.sub_secs(secs_ago));
            b
        }

        #[test]
        fn disables_inside_window() {
            let now = Timestamp::now();
            let b = failing(10, 30, now);
            assert!(b.should_disable(10, Duration::from_secs(60), now));
        }

        #[test]
        fn not_after_window() {
            let now = Timestamp::now();
            let b = failing(10, 30, now);
            assert!(!b.should_disable(10, Duration::from_secs(60), now.add_secs(3600)));
        }

        #[test]
        fn not_below_threshold() {
            let now = Timestamp::now();
            let b = failing(9, 1, now);
            assert!(!b.should_disable(10, Duration::from_secs(60), now));
        }

        #[test]
        fn not_without_timestamp() {
            let now = Timestamp::now();
            let mut b = failing(10, 1, now);
            b.last_failure_at = None;
            assert!(!b.should_disable(10, Duration::from_secs(60), now));
        }
    }

    mod security_settings {
        use super::*;

        #[test]
        fn parses_known_and_ignores_unknown() {
            let map = AttributeMap::from_json(json!({
                "ip_whitelist": ["10.0.0.1", "192.168.0.0/16"],
                "withdrawals_enabled": true,
                "max_order_notional": "2500.5",
                "custom": {"x": 1}
            }))
            .unwrap();
            let s = SecuritySettings::from_attributes(&map).unwrap();
            assert_eq!(s.ip_whitelist.len(), 2);
            assert!(s.withdrawals_enabled);
            assert!(s.trading_enabled);
            assert_eq!(s.max_order_notional, Some("2500.5".parse().unwrap()));
        }

        #[test]
        fn bad_address_rejected() {
            let map = AttributeMap::from_json(json!({"ip_whitelist": ["not-an-ip"]})).unwrap();
            assert!(SecuritySettings::from_attributes(&map).is_err());
            let map = AttributeMap::from_json(json!({"ip_whitelist": ["10.0.0.0/33"]})).unwrap();
            assert!(SecuritySettings::from_attributes(&map).is_err());
        }

        #[test]
        fn wrong_type_rejected() {
            let map = AttributeMap::from_json(json!({"trading_enabled": "yes"})).unwrap();
            assert!(SecuritySettings::from_attributes(&map).is_err());
        }

        #[test]
        fn merge_keeps_unknown_keys() {
            let mut map = AttributeMap::from_json(json!({"custom": 1})).unwrap();
            let s = SecuritySettings {
                require_2fa: true,
                ..SecuritySettings::default()
            };
            s.merge_into(&mut map);
            assert_eq!(map.get("custom"), Some(&json!(1)));
            assert_eq!(map.get_bool("require_2fa"), Some(true));
        }
    }

    mod patching {
        use super::*;

        #[test]
        fn credential_columns_are_immutable() {
            let mut b = ExchangeBinding::private(UserId::new_v4(), "main", "binance", creds());
            for field in ["encrypted_api_key", "encrypted_api_secret", "api_key_hash"] {
                let err = b.apply_patch(&Patch::new().set(field, json!("x"))).unwrap_err();
                assert!(matches!(err, DomainError::ImmutableField { .. }), "{field}");
            }
        }

        #[test]
        fn rename_and_status() {
            let mut b = ExchangeBinding::public("a", "kraken");
            b.apply_patch(&Patch::new().set("name", json!("b")).set("status", json!("inactive")))
                .unwrap();
            assert_eq!(b.name, "b");
            assert_eq!(b.status, BindingStatus::Inactive);
        }
    }

    #[test]
    fn debug_hides_ciphertexts() {
        let dbg = format!("{:?}", creds());
        assert!(!dbg.contains("v1:key"));
        assert!(!dbg.contains("v1:secret"));
    }

    #[test]
    fn usable_by() {
        let owner = UserId::new_v4();
        let b = ExchangeBinding::private(owner, "main", "binance", creds());
        assert!(b.is_usable_by(owner));
        assert!(!b.is_usable_by(UserId::new_v4()));
        assert!(ExchangeBinding::public("p", "binance").is_usable_by(UserId::new_v4()));
    }
}
