//! # Request DTOs
//!
//! Request payloads accepted from the HTTP collaborator. Each carries a
//! synchronous `validate()` that runs before anything touches a
//! repository; entity-level rules are checked again by the repositories.

use crate::application::error::{ApplicationError, ApplicationResult};
use crate::domain::entities::exchange_binding::MAX_BINDING_NAME_LEN;
use crate::domain::entities::sub_account::MAX_SYMBOL_LEN;
use crate::domain::entities::trading::MAX_TRADING_NAME_LEN;
use crate::domain::entities::user::{MAX_EMAIL_LEN, MAX_USERNAME_LEN};
use crate::domain::value_objects::balance::{BALANCE_SCALE, fits_scale};
use crate::domain::value_objects::{
    AttributeMap, ExchangeBindingId, LogSource, PageRequest, Timestamp, TradingId, TradingType,
    TransactionDirection, Visibility,
};
use crate::infrastructure::persistence::filters::{LogFilter, TransactionFilter};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

fn required(field: &str, value: &str) -> ApplicationResult<()> {
    if value.trim().is_empty() {
        return Err(ApplicationError::validation(format!("{field} is required")));
    }
    Ok(())
}

fn bounded(field: &str, value: &str, max: usize) -> ApplicationResult<()> {
    required(field, value)?;
    if value.chars().count() > max {
        return Err(ApplicationError::validation(format!(
            "{field} must be at most {max} characters"
        )));
    }
    Ok(())
}

fn ordered(from: Option<Timestamp>, to: Option<Timestamp>) -> ApplicationResult<()> {
    if let (Some(from), Some(to)) = (from, to)
        && !from.is_before(&to)
    {
        return Err(ApplicationError::validation("from must be before to"));
    }
    Ok(())
}

/// Page and limit query parameters.
///
/// Out-of-range values are normalised, not rejected: page `0` becomes `1`,
/// limit `0` the default and limits above 100 are clamped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationParams {
    /// 1-based page.
    pub page: u32,
    /// Items per page.
    pub limit: u32,
}

impl PaginationParams {
    /// Returns the normalised page request.
    #[must_use]
    pub fn page_request(&self) -> PageRequest {
        PageRequest::new(self.page, self.limit)
    }
}

/// Body of `POST /users`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateUserRequest {
    /// Unique username.
    pub username: String,
    /// Unique email.
    pub email: String,
    /// Avatar URL.
    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl CreateUserRequest {
    /// Checks required fields.
    ///
    /// # Errors
    ///
    /// Returns `ApplicationError::Validation` naming the first bad field.
    pub fn validate(&self) -> ApplicationResult<()> {
        bounded("username", &self.username, MAX_USERNAME_LEN)?;
        bounded("email", &self.email, MAX_EMAIL_LEN)?;
        if !self.email.contains('@') {
            return Err(ApplicationError::validation("email must contain '@'"));
        }
        Ok(())
    }
}

/// Body of `POST /exchanges`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateBindingRequest {
    /// Display name.
    pub name: String,
    /// Exchange type, e.g. `binance`.
    pub exchange_type: String,
    /// Private or public.
    #[serde(default)]
    pub visibility: Visibility,
    /// Plaintext API key; private bindings only.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Plaintext API secret; private bindings only.
    #[serde(default)]
    pub api_secret: Option<String>,
    /// Security settings.
    #[serde(default)]
    pub security_settings: AttributeMap,
}

impl std::fmt::Debug for CreateBindingRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreateBindingRequest")
            .field("name", &self.name)
            .field("exchange_type", &self.exchange_type)
            .field("visibility", &self.visibility)
            .finish_non_exhaustive()
    }
}

impl CreateBindingRequest {
    /// Checks the name and that credentials come with private bindings
    /// only.
    ///
    /// # Errors
    ///
    /// Returns `ApplicationError::Validation` naming the first bad field.
    pub fn validate(&self) -> ApplicationResult<()> {
        bounded("name", &self.name, MAX_BINDING_NAME_LEN)?;
        required("exchange_type", &self.exchange_type)?;
        let has_key = self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty());
        let has_secret = self
            .api_secret
            .as_deref()
            .is_some_and(|s| !s.trim().is_empty());
        match self.visibility {
            Visibility::Private if !(has_key && has_secret) => Err(ApplicationError::validation(
                "api_key and api_secret are required for private bindings",
            )),
            Visibility::Public if self.api_key.is_some() || self.api_secret.is_some() => Err(
                ApplicationError::validation("public bindings must not carry credentials"),
            ),
            _ => Ok(()),
        }
    }
}

/// Body of `PUT /exchanges/{id}/credentials`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotateCredentialsRequest {
    /// New plaintext API key.
    pub api_key: String,
    /// New plaintext API secret.
    pub api_secret: String,
}

impl std::fmt::Debug for RotateCredentialsRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotateCredentialsRequest").finish_non_exhaustive()
    }
}

impl RotateCredentialsRequest {
    /// Checks both values are present.
    ///
    /// # Errors
    ///
    /// Returns `ApplicationError::Validation` for a blank value.
    pub fn validate(&self) -> ApplicationResult<()> {
        required("api_key", &self.api_key)?;
        required("api_secret", &self.api_secret)
    }
}

/// Body of `POST /tradings`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateTradingRequest {
    /// Binding to trade through.
    pub exchange_binding_id: ExchangeBindingId,
    /// Display name.
    pub name: String,
    /// Real, virtual or backtest.
    pub trading_type: TradingType,
    /// Strategy parameters.
    #[serde(default)]
    pub settings: AttributeMap,
}

impl CreateTradingRequest {
    /// Checks the name.
    ///
    /// # Errors
    ///
    /// Returns `ApplicationError::Validation` for a bad name.
    pub fn validate(&self) -> ApplicationResult<()> {
        bounded("name", &self.name, MAX_TRADING_NAME_LEN)
    }
}

/// Body of `POST /sub-accounts`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSubAccountRequest {
    /// Parent trading.
    pub trading_id: TradingId,
    /// Display name.
    pub name: String,
    /// Asset symbol.
    pub symbol: String,
}

impl CreateSubAccountRequest {
    /// Checks name and symbol.
    ///
    /// # Errors
    ///
    /// Returns `ApplicationError::Validation` naming the first bad field.
    pub fn validate(&self) -> ApplicationResult<()> {
        required("name", &self.name)?;
        bounded("symbol", self.symbol.trim(), MAX_SYMBOL_LEN)
    }
}

/// Body of `POST /sub-accounts/{id}/balance`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceChangeRequest {
    /// Claimed closing balance.
    pub new_balance: Decimal,
    /// Strictly positive amount.
    pub amount: Decimal,
    /// Debit or credit.
    pub direction: TransactionDirection,
    /// Reason tag.
    pub reason: String,
    /// Extra attributes.
    #[serde(default)]
    pub info: AttributeMap,
}

impl BalanceChangeRequest {
    /// Checks amount and reason. The arithmetic is verified by the
    /// mutator.
    ///
    /// # Errors
    ///
    /// Returns `ApplicationError::Validation` naming the first bad field.
    pub fn validate(&self) -> ApplicationResult<()> {
        if self.amount <= Decimal::ZERO {
            return Err(ApplicationError::validation("amount must be greater than zero"));
        }
        if !fits_scale(self.amount) {
            return Err(ApplicationError::validation(format!(
                "amount must have at most {BALANCE_SCALE} fractional digits"
            )));
        }
        required("reason", &self.reason)
    }
}

/// Query of `GET /transactions`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionQuery {
    /// Direction.
    pub direction: Option<TransactionDirection>,
    /// Reason tag.
    pub reason: Option<String>,
    /// Inclusive lower amount bound.
    pub min_amount: Option<Decimal>,
    /// Inclusive upper amount bound.
    pub max_amount: Option<Decimal>,
    /// Inclusive start.
    pub from: Option<Timestamp>,
    /// Exclusive end.
    pub to: Option<Timestamp>,
    /// Paging.
    #[serde(flatten)]
    pub pagination: PaginationParams,
}

impl TransactionQuery {
    /// Checks that ranges are ordered.
    ///
    /// # Errors
    ///
    /// Returns `ApplicationError::Validation` for an inverted range.
    pub fn validate(&self) -> ApplicationResult<()> {
        if let (Some(min), Some(max)) = (self.min_amount, self.max_amount)
            && min > max
        {
            return Err(ApplicationError::validation(
                "min_amount must not exceed max_amount",
            ));
        }
        ordered(self.from, self.to)
    }

    /// Converts into a repository filter.
    #[must_use]
    pub fn filter(&self) -> TransactionFilter {
        TransactionFilter {
            direction: self.direction,
            reason: self.reason.clone(),
            min_amount: self.min_amount,
            max_amount: self.max_amount,
            from: self.from,
            to: self.to,
        }
    }
}

/// Query of `GET /trading-logs`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogQuery {
    /// Type tag.
    #[serde(rename = "type")]
    pub log_type: Option<String>,
    /// Manual or bot.
    pub source: Option<LogSource>,
    /// Inclusive start.
    pub from: Option<Timestamp>,
    /// Exclusive end.
    pub to: Option<Timestamp>,
    /// Paging.
    #[serde(flatten)]
    pub pagination: PaginationParams,
}

impl LogQuery {
    /// Checks that the time range is ordered.
    ///
    /// # Errors
    ///
    /// Returns `ApplicationError::Validation` for an inverted range.
    pub fn validate(&self) -> ApplicationResult<()> {
        ordered(self.from, self.to)
    }

    /// Converts into a repository filter.
    #[must_use]
    pub fn filter(&self) -> LogFilter {
        LogFilter {
            log_type: self.log_type.clone(),
            source: self.source,
            from: self.from,
            to: self.to,
        }
    }
}
