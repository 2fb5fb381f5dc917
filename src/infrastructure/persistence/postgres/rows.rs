//! # Row Types
//!
//! `sqlx::FromRow` structs for every table, with conversion into domain
//! entities. Text enums and JSON maps are checked on the way out; a row
//! that does not convert surfaces as `RepositoryError::Serialization`.

use crate::domain::entities::{
    BindingSummary, EventProcessingRecord, ExchangeBinding, OAuthIdentity, SealedCredentials,
    SubAccount, Trading, TradingActivityLog, Transaction, User,
};
use crate::domain::value_objects::{AttributeMap, PageRequest, Timestamp};
use crate::infrastructure::persistence::traits::{RepositoryError, RepositoryResult};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub(crate) const USER_COLUMNS: &str =
    "id, username, email, avatar_url, settings, info, created_at, updated_at, deleted_at";

pub(crate) const IDENTITY_COLUMNS: &str = "id, user_id, provider, provider_user_id, \
     access_token, refresh_token, expires_at, info, created_at, updated_at, deleted_at";

pub(crate) const BINDING_COLUMNS: &str = "id, user_id, name, exchange_type, visibility, \
     encrypted_api_key, encrypted_api_secret, api_key_hash, status, last_used_at, \
     failure_count, last_failure_at, security_settings, info, created_at, updated_at, deleted_at";

/// Trading columns plus the joined binding summary; expects `tradings t`
/// LEFT JOIN `exchanges e`.
pub(crate) const TRADING_SELECT: &str = "SELECT t.id, t.user_id, t.exchange_id, t.name, \
     t.trading_type, t.status, t.settings, t.info, t.created_at, t.updated_at, t.deleted_at, \
     e.name AS binding_name, e.exchange_type AS binding_exchange_type, \
     e.visibility AS binding_visibility, e.status AS binding_status \
     FROM tradings t LEFT JOIN exchanges e ON e.id = t.exchange_id";

pub(crate) const SUB_ACCOUNT_COLUMNS: &str =
    "id, user_id, trading_id, name, symbol, balance, info, created_at, updated_at, deleted_at";

pub(crate) const TRANSACTION_COLUMNS: &str = "id, user_id, trading_id, sub_account_id, \
     \"timestamp\", direction, reason, amount, closing_balance, price, quote_symbol, info, \
     created_at";

pub(crate) const LOG_COLUMNS: &str = "id, user_id, trading_id, sub_account_id, transaction_id, \
     \"timestamp\", type, source, message, info, created_at";

pub(crate) const EVENT_COLUMNS: &str = "id, event_id, event_type, subject, user_id, \
     sub_account_id, status, retry_count, error_message, payload, processed_at, created_at, \
     updated_at";

fn attrs(column: &'static str, value: Value) -> RepositoryResult<AttributeMap> {
    AttributeMap::from_json(value)
        .ok_or_else(|| RepositoryError::serialization(format!("{column} is not a JSON object")))
}

fn parse<T>(column: &'static str, raw: &str) -> RepositoryResult<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    raw.parse()
        .map_err(|e| RepositoryError::serialization(format!("{column}: {e}")))
}

fn counter(column: &'static str, raw: i32) -> RepositoryResult<u32> {
    u32::try_from(raw)
        .map_err(|_| RepositoryError::serialization(format!("{column} is negative: {raw}")))
}

fn ts(value: DateTime<Utc>) -> Timestamp {
    Timestamp::from(value)
}

fn opt_ts(value: Option<DateTime<Utc>>) -> Option<Timestamp> {
    value.map(Timestamp::from)
}

/// Converts a domain counter into the INTEGER column type.
pub(crate) fn to_i32(column: &'static str, value: u32) -> RepositoryResult<i32> {
    i32::try_from(value)
        .map_err(|_| RepositoryError::serialization(format!("{column} out of range: {value}")))
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct UserRow {
    id: Uuid,
    username: String,
    email: String,
    avatar_url: Option<String>,
    settings: Value,
    info: Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl UserRow {
    pub(crate) fn try_into_user(self) -> RepositoryResult<User> {
        Ok(User {
            id: self.id.into(),
            username: self.username,
            email: self.email,
            avatar_url: self.avatar_url,
            settings: attrs("settings", self.settings)?,
            info: attrs("info", self.info)?,
            created_at: ts(self.created_at),
            updated_at: ts(self.updated_at),
            deleted_at: opt_ts(self.deleted_at),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct IdentityRow {
    id: Uuid,
    user_id: Uuid,
    provider: String,
    provider_user_id: String,
    access_token: String,
    refresh_token: Option<String>,
    expires_at: Option<DateTime<Utc>>,
    info: Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl IdentityRow {
    pub(crate) fn try_into_identity(self) -> RepositoryResult<OAuthIdentity> {
        Ok(OAuthIdentity {
            id: self.id.into(),
            user_id: self.user_id.into(),
            provider: self.provider,
            provider_user_id: self.provider_user_id,
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: opt_ts(self.expires_at),
            info: attrs("info", self.info)?,
            created_at: ts(self.created_at),
            updated_at: ts(self.updated_at),
            deleted_at: opt_ts(self.deleted_at),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct BindingRow {
    id: Uuid,
    user_id: Option<Uuid>,
    name: String,
    exchange_type: String,
    visibility: String,
    encrypted_api_key: Option<String>,
    encrypted_api_secret: Option<String>,
    api_key_hash: Option<String>,
    status: String,
    last_used_at: Option<DateTime<Utc>>,
    failure_count: i32,
    last_failure_at: Option<DateTime<Utc>>,
    security_settings: Value,
    info: Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl BindingRow {
    pub(crate) fn try_into_binding(self) -> RepositoryResult<ExchangeBinding> {
        let credentials = match (
            self.encrypted_api_key,
            self.encrypted_api_secret,
            self.api_key_hash,
        ) {
            (Some(encrypted_api_key), Some(encrypted_api_secret), Some(api_key_hash)) => {
                Some(SealedCredentials {
                    encrypted_api_key,
                    encrypted_api_secret,
                    api_key_hash,
                })
            }
            (None, None, None) => None,
            _ => {
                return Err(RepositoryError::serialization(format!(
                    "exchange binding {} has partial credentials",
                    self.id
                )));
            }
        };
        Ok(ExchangeBinding {
            id: self.id.into(),
            user_id: self.user_id.map(Into::into),
            name: self.name,
            exchange_type: self.exchange_type,
            visibility: parse("visibility", &self.visibility)?,
            credentials,
            status: parse("status", &self.status)?,
            last_used_at: opt_ts(self.last_used_at),
            failure_count: counter("failure_count", self.failure_count)?,
            last_failure_at: opt_ts(self.last_failure_at),
            security_settings: attrs("security_settings", self.security_settings)?,
            info: attrs("info", self.info)?,
            created_at: ts(self.created_at),
            updated_at: ts(self.updated_at),
            deleted_at: opt_ts(self.deleted_at),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct TradingRow {
    id: Uuid,
    user_id: Uuid,
    exchange_id: Uuid,
    name: String,
    trading_type: String,
    status: String,
    settings: Value,
    info: Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
    binding_name: Option<String>,
    binding_exchange_type: Option<String>,
    binding_visibility: Option<String>,
    binding_status: Option<String>,
}

impl TradingRow {
    pub(crate) fn try_into_trading(self) -> RepositoryResult<Trading> {
        let binding = match (
            self.binding_name,
            self.binding_exchange_type,
            self.binding_visibility,
            self.binding_status,
        ) {
            (Some(name), Some(exchange_type), Some(visibility), Some(status)) => {
                Some(BindingSummary {
                    id: self.exchange_id.into(),
                    name,
                    exchange_type,
                    visibility: parse("visibility", &visibility)?,
                    status: parse("status", &status)?,
                })
            }
            _ => None,
        };
        Ok(Trading {
            id: self.id.into(),
            user_id: self.user_id.into(),
            exchange_binding_id: self.exchange_id.into(),
            name: self.name,
            trading_type: parse("trading_type", &self.trading_type)?,
            status: parse("status", &self.status)?,
            settings: attrs("settings", self.settings)?,
            info: attrs("info", self.info)?,
            created_at: ts(self.created_at),
            updated_at: ts(self.updated_at),
            deleted_at: opt_ts(self.deleted_at),
            binding,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct SubAccountRow {
    id: Uuid,
    user_id: Uuid,
    trading_id: Uuid,
    name: String,
    symbol: String,
    balance: Decimal,
    info: Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl SubAccountRow {
    pub(crate) fn try_into_sub_account(self) -> RepositoryResult<SubAccount> {
        Ok(SubAccount {
            id: self.id.into(),
            user_id: self.user_id.into(),
            trading_id: self.trading_id.into(),
            name: self.name,
            symbol: self.symbol,
            balance: self.balance,
            info: attrs("info", self.info)?,
            created_at: ts(self.created_at),
            updated_at: ts(self.updated_at),
            deleted_at: opt_ts(self.deleted_at),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct TransactionRow {
    id: Uuid,
    user_id: Uuid,
    trading_id: Uuid,
    sub_account_id: Uuid,
    timestamp: DateTime<Utc>,
    direction: String,
    reason: String,
    amount: Decimal,
    closing_balance: Decimal,
    price: Option<Decimal>,
    quote_symbol: Option<String>,
    info: Value,
    created_at: DateTime<Utc>,
}

impl TransactionRow {
    pub(crate) fn try_into_transaction(self) -> RepositoryResult<Transaction> {
        Ok(Transaction {
            id: self.id.into(),
            user_id: self.user_id.into(),
            trading_id: self.trading_id.into(),
            sub_account_id: self.sub_account_id.into(),
            timestamp: ts(self.timestamp),
            direction: parse("direction", &self.direction)?,
            reason: self.reason,
            amount: self.amount,
            closing_balance: self.closing_balance,
            price: self.price,
            quote_symbol: self.quote_symbol,
            info: attrs("info", self.info)?,
            created_at: ts(self.created_at),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct LogRow {
    id: Uuid,
    user_id: Uuid,
    trading_id: Uuid,
    sub_account_id: Option<Uuid>,
    transaction_id: Option<Uuid>,
    timestamp: DateTime<Utc>,
    #[sqlx(rename = "type")]
    log_type: String,
    source: String,
    message: String,
    info: Value,
    created_at: DateTime<Utc>,
}

impl LogRow {
    pub(crate) fn try_into_log(self) -> RepositoryResult<TradingActivityLog> {
        Ok(TradingActivityLog {
            id: self.id.into(),
            user_id: self.user_id.into(),
            trading_id: self.trading_id.into(),
            sub_account_id: self.sub_account_id.map(Into::into),
            transaction_id: self.transaction_id.map(Into::into),
            timestamp: ts(self.timestamp),
            log_type: self.log_type,
            source: parse("source", &self.source)?,
            message: self.message,
            info: attrs("info", self.info)?,
            created_at: ts(self.created_at),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct EventRow {
    id: Uuid,
    event_id: String,
    event_type: String,
    subject: Option<String>,
    user_id: Option<Uuid>,
    sub_account_id: Option<Uuid>,
    status: String,
    retry_count: i32,
    error_message: Option<String>,
    payload: Option<Value>,
    processed_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl EventRow {
    pub(crate) fn try_into_record(self) -> RepositoryResult<EventProcessingRecord> {
        Ok(EventProcessingRecord {
            id: self.id.into(),
            event_id: self.event_id,
            event_type: self.event_type,
            subject: self.subject,
            user_id: self.user_id.map(Into::into),
            sub_account_id: self.sub_account_id.map(Into::into),
            status: parse("status", &self.status)?,
            retry_count: counter("retry_count", self.retry_count)?,
            error_message: self.error_message,
            payload: self.payload,
            processed_at: ts(self.processed_at),
            created_at: ts(self.created_at),
            updated_at: ts(self.updated_at),
        })
    }
}

/// `LIMIT` and `OFFSET` parameters of a page request.
pub(crate) fn page_bounds(page: PageRequest) -> (i64, i64) {
    let offset = i64::try_from(page.offset()).unwrap_or(i64::MAX);
    (i64::from(page.limit()), offset)
}

/// Converts a `COUNT(*)` result.
pub(crate) fn row_count(count: i64) -> u64 {
    u64::try_from(count).unwrap_or_default()
}

/// Binds a domain timestamp.
pub(crate) fn at(value: Timestamp) -> DateTime<Utc> {
    value.into()
}

/// Converts every row with `f`, stopping at the first failure.
pub(crate) fn convert_all<R, T>(
    rows: Vec<R>,
    f: impl FnMut(R) -> RepositoryResult<T>,
) -> RepositoryResult<Vec<T>> {
    rows.into_iter().map(f).collect()
}
