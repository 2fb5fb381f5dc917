//! # Value Objects
//!
//! Immutable types with validation and domain semantics.
//!
//! ## Identity Types
//!
//! - [`UserId`], [`ExchangeBindingId`], [`TradingId`], [`SubAccountId`], ...:
//!   UUID-based identifiers, one type per entity kind
//!
//! ## Numeric Types
//!
//! - [`balance`]: fixed-point (8 fractional digits) balance transitions
//! - [`arithmetic`]: checked arithmetic over `Decimal` and integers
//!
//! ## Semi-structured Data
//!
//! - [`AttributeMap`]: string → JSON attribute map stored in JSON columns
//! - [`Patch`]: partial update payload for the generic update path
//!
//! ## Paging
//!
//! - [`PageRequest`] / [`Page`]: normalised pagination with totals

pub mod arithmetic;
pub mod attributes;
pub mod balance;
pub mod enums;
pub mod ids;
pub mod pagination;
pub mod patch;
pub mod timestamp;

pub use arithmetic::{ArithmeticError, ArithmeticResult, CheckedArithmetic};
pub use attributes::AttributeMap;
pub use balance::{BALANCE_SCALE, BalanceTransition};
pub use enums::{
    BindingStatus, EventStatus, LogSource, ParseEnumError, TradingStatus, TradingType,
    TransactionDirection, Visibility,
};
pub use ids::{
    EventRecordId, ExchangeBindingId, OAuthIdentityId, SubAccountId, TradingId, TradingLogId,
    TransactionId, UserId,
};
pub use pagination::{DEFAULT_LIMIT, MAX_LIMIT, Page, PageRequest};
pub use patch::{Patch, Patchable};
pub use timestamp::Timestamp;
