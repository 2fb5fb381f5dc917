//! # Domain Enums
//!
//! Enumeration types for domain concepts.
//!
//! - [`Visibility`] - Private (owned) or public (shared) exchange binding
//! - [`BindingStatus`] - Operational status of an exchange binding
//! - [`TradingType`] - Real, virtual or backtest trading configuration
//! - [`TradingStatus`] - Lifecycle status of a trading configuration
//! - [`TransactionDirection`] - Debit or credit on a sub-account
//! - [`LogSource`] - Who produced a trading activity log entry
//! - [`EventStatus`] - Outcome recorded for a bus event
//!
//! All enums serialize and display as lowercase strings, which is also how
//! they are stored in the database. Parsing is case-insensitive.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Visibility of an exchange binding.
///
/// # Examples
///
/// ```
/// use trade_accounts::domain::value_objects::enums::Visibility;
///
/// assert_eq!(Visibility::Private.to_string(), "private");
/// assert_eq!("PUBLIC".parse::<Visibility>().unwrap(), Visibility::Public);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Owned by a single user, carries encrypted credentials.
    #[default]
    Private,
    /// Shared, ownerless, no credentials.
    Public,
}

impl Visibility {
    /// Returns the wire form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Public => "public",
        }
    }

    /// Returns true for [`Visibility::Public`].
    #[inline]
    #[must_use]
    pub const fn is_public(self) -> bool {
        matches!(self, Self::Public)
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Visibility {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "private" => Ok(Self::Private),
            "public" => Ok(Self::Public),
            _ => Err(ParseEnumError::InvalidValue("Visibility", s.to_string())),
        }
    }
}

/// Operational status of an exchange binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindingStatus {
    /// Usable.
    #[default]
    Active,
    /// Disabled by the user.
    Inactive,
    /// Disabled after repeated failures.
    Error,
}

impl BindingStatus {
    /// Returns the wire form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for BindingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BindingStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            "error" => Ok(Self::Error),
            _ => Err(ParseEnumError::InvalidValue("BindingStatus", s.to_string())),
        }
    }
}

/// Kind of trading configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingType {
    /// Live trading against an exchange.
    Real,
    /// Paper trading.
    #[default]
    Virtual,
    /// Historical replay.
    Backtest,
}

impl TradingType {
    /// Returns the wire form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Real => "real",
            Self::Virtual => "virtual",
            Self::Backtest => "backtest",
        }
    }
}

impl fmt::Display for TradingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TradingType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "real" => Ok(Self::Real),
            "virtual" => Ok(Self::Virtual),
            "backtest" => Ok(Self::Backtest),
            _ => Err(ParseEnumError::InvalidValue("TradingType", s.to_string())),
        }
    }
}

/// Lifecycle status of a trading configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingStatus {
    /// Running.
    #[default]
    Active,
    /// Stopped.
    Inactive,
    /// Temporarily halted.
    Paused,
}

impl TradingStatus {
    /// Returns the wire form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Paused => "paused",
        }
    }
}

impl fmt::Display for TradingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TradingStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            "paused" => Ok(Self::Paused),
            _ => Err(ParseEnumError::InvalidValue("TradingStatus", s.to_string())),
        }
    }
}

/// Direction of a balance transition.
///
/// # Examples
///
/// ```
/// use trade_accounts::domain::value_objects::enums::TransactionDirection;
///
/// assert_eq!(TransactionDirection::Credit.to_string(), "credit");
/// assert_eq!(TransactionDirection::Debit.opposite(), TransactionDirection::Credit);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionDirection {
    /// Funds leave the sub-account.
    Debit,
    /// Funds enter the sub-account.
    Credit,
}

impl TransactionDirection {
    /// Returns the wire form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Debit => "debit",
            Self::Credit => "credit",
        }
    }

    /// Returns the opposite direction.
    #[inline]
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Debit => Self::Credit,
            Self::Credit => Self::Debit,
        }
    }
}

impl fmt::Display for TransactionDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionDirection {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "debit" => Ok(Self::Debit),
            "credit" => Ok(Self::Credit),
            _ => Err(ParseEnumError::InvalidValue(
                "TransactionDirection",
                s.to_string(),
            )),
        }
    }
}

/// Origin of a trading activity log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSource {
    /// Entered by a user.
    Manual,
    /// Produced by a bot or by event ingest.
    #[default]
    Bot,
}

impl LogSource {
    /// Returns the wire form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Bot => "bot",
        }
    }
}

impl fmt::Display for LogSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogSource {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "manual" => Ok(Self::Manual),
            "bot" => Ok(Self::Bot),
            _ => Err(ParseEnumError::InvalidValue("LogSource", s.to_string())),
        }
    }
}

/// Outcome recorded for a bus event in the ingest ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    /// Side effects committed. Terminal.
    Processed,
    /// Last attempt failed.
    Failed,
    /// A retry attempt is in flight.
    Retrying,
}

impl EventStatus {
    /// Returns the wire form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::Failed => "failed",
            Self::Retrying => "retrying",
        }
    }

    /// Returns true for the terminal [`EventStatus::Processed`].
    #[inline]
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Processed)
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "processed" => Ok(Self::Processed),
            "failed" => Ok(Self::Failed),
            "retrying" => Ok(Self::Retrying),
            _ => Err(ParseEnumError::InvalidValue("EventStatus", s.to_string())),
        }
    }
}

/// Error type for parsing enum values from strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseEnumError {
    /// The provided string value is not valid for the enum.
    InvalidValue(&'static str, String),
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidValue(enum_name, value) => {
                write!(f, "invalid {} value: '{}'", enum_name, value)
            }
        }
    }
}

impl std::error::Error for ParseEnumError {}
