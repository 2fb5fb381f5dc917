//! # Sub-Account Entity
//!
//! A symbol-scoped balance sheet under one trading.
//!
//! The balance is never written through the generic update path. Every
//! change is a [`BalanceChange`] that the Balance Mutator verifies with
//! [`SubAccount::plan_balance_change`] and journals as a
//! [`Transaction`].
//!
//! # Examples
//!
//! ```
//! use rust_decimal::Decimal;
//! use trade_accounts::domain::entities::{BalanceChange, SubAccount};
//! use trade_accounts::domain::value_objects::{Timestamp, TradingId, TransactionDirection, UserId};
//!
//! let mut sub = SubAccount::new(UserId::new_v4(), TradingId::new_v4(), "spot", "btc");
//! assert_eq!(sub.symbol, "BTC");
//! sub.balance = Decimal::ONE;
//!
//! let change = BalanceChange::new(
//!     sub.id,
//!     Decimal::new(5, 1),
//!     Decimal::new(5, 1),
//!     TransactionDirection::Debit,
//!     "withdraw",
//! );
//! let tx = sub.plan_balance_change(&change, Timestamp::now()).unwrap();
//! assert_eq!(tx.closing_balance, Decimal::new(5, 1));
//! ```

use crate::domain::entities::transaction::Transaction;
use crate::domain::errors::{DomainError, DomainResult, require_max_len, require_non_blank};
use crate::domain::value_objects::balance::normalize;
use crate::domain::value_objects::patch::{Patchable, fields};
use crate::domain::value_objects::{
    AttributeMap, BalanceTransition, SubAccountId, Timestamp, TradingId, TransactionDirection,
    TransactionId, UserId,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Info-map key a caller sets to permit a negative closing balance.
pub const ALLOW_OVERDRAFT_KEY: &str = "allow_overdraft";

/// Info-map key under which the journal records the prior balance.
pub const PREVIOUS_BALANCE_KEY: &str = "previous_balance";

/// Maximum symbol length.
pub const MAX_SYMBOL_LEN: usize = 20;

/// A per-symbol balance sheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubAccount {
    /// Identifier.
    pub id: SubAccountId,
    /// Owner.
    pub user_id: UserId,
    /// Parent trading.
    pub trading_id: TradingId,
    /// Display name.
    pub name: String,
    /// Asset symbol, stored uppercase.
    pub symbol: String,
    /// Current balance, 8 fractional digits.
    pub balance: Decimal,
    /// Free-form attributes.
    pub info: AttributeMap,
    /// Creation time.
    pub created_at: Timestamp,
    /// Last modification time.
    pub updated_at: Timestamp,
    /// Soft-deletion marker.
    pub deleted_at: Option<Timestamp>,
}

impl SubAccount {
    /// Creates a sub-account with a zero balance.
    #[must_use]
    pub fn new(
        user_id: UserId,
        trading_id: TradingId,
        name: impl Into<String>,
        symbol: impl AsRef<str>,
    ) -> Self {
        let now = Timestamp::now();
        Self {
            id: SubAccountId::new_v4(),
            user_id,
            trading_id,
            name: name.into(),
            symbol: symbol.as_ref().trim().to_uppercase(),
            balance: normalize(Decimal::ZERO),
            info: AttributeMap::new(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Returns true once soft-deleted.
    #[inline]
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Fails with `HasBalance` unless the balance is exactly zero.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::HasBalance` for a non-zero balance.
    pub fn ensure_empty(&self) -> DomainResult<()> {
        if self.balance.is_zero() {
            Ok(())
        } else {
            Err(DomainError::HasBalance(self.balance))
        }
    }

    /// Checks structural invariants.
    ///
    /// # Errors
    ///
    /// Returns the first violated rule.
    pub fn validate(&self) -> DomainResult<()> {
        require_non_blank("name", &self.name)?;
        require_max_len("name", &self.name, 100)?;
        require_non_blank("symbol", &self.symbol)?;
        require_max_len("symbol", &self.symbol, MAX_SYMBOL_LEN)?;
        if !self.symbol.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(DomainError::invalid("symbol", "must be alphanumeric"));
        }
        Ok(())
    }

    /// Verifies `change` against the current balance and builds the
    /// journal entry it produces.
    ///
    /// The caller is expected to hold the sub-account's row lock, write
    /// `tx.closing_balance` back as the new balance, and insert `tx`, all
    /// in one transaction.
    ///
    /// # Errors
    ///
    /// - `DomainError::BalanceArithmeticMismatch` if
    ///   `balance ± amount != new_balance`
    /// - `DomainError::NegativeBalance` if the result is negative and the
    ///   change does not allow overdraft
    /// - `DomainError::InvalidField` for a non-positive amount or one with
    ///   more than eight fractional digits
    /// - `DomainError::MissingField` for a blank reason
    pub fn plan_balance_change(
        &self,
        change: &BalanceChange,
        now: Timestamp,
    ) -> DomainResult<Transaction> {
        require_non_blank("reason", &change.reason)?;
        let closing = BalanceTransition {
            previous: self.balance,
            amount: change.amount,
            direction: change.direction,
            claimed: change.new_balance,
        }
        .verify(change.allows_overdraft())?;

        let mut info = change.info.clone();
        info.insert(PREVIOUS_BALANCE_KEY, json!(normalize(self.balance).to_string()));

        Ok(Transaction {
            id: TransactionId::new_v4(),
            user_id: self.user_id,
            trading_id: self.trading_id,
            sub_account_id: self.id,
            timestamp: now,
            direction: change.direction,
            reason: change.reason.clone(),
            amount: normalize(change.amount),
            closing_balance: closing,
            price: change.price,
            quote_symbol: change.quote_symbol.clone(),
            info,
            created_at: now,
        })
    }
}

impl Patchable for SubAccount {
    const ENTITY: &'static str = "SubAccount";
    const IMMUTABLE_FIELDS: &'static [&'static str] = &[
        "id",
        "user_id",
        "trading_id",
        "symbol",
        "balance",
        "created_at",
        "updated_at",
        "deleted_at",
    ];

    fn apply_field(&mut self, field: &str, value: &Value) -> DomainResult<bool> {
        match field {
            "name" => self.name = fields::string("name", value)?,
            "info" => self.info = fields::attributes("info", value)?,
            _ => return Ok(false),
        }
        Ok(true)
    }
}

/// A request to move a sub-account's balance.
///
/// The caller states the balance it expects to result; the mutator
/// recomputes it server side and rejects disagreement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceChange {
    /// Target sub-account.
    pub sub_account_id: SubAccountId,
    /// Claimed closing balance.
    pub new_balance: Decimal,
    /// Strictly positive amount.
    pub amount: Decimal,
    /// Debit or credit.
    pub direction: TransactionDirection,
    /// Free-form reason tag.
    pub reason: String,
    /// Execution price, if the change came from a fill.
    #[serde(default)]
    pub price: Option<Decimal>,
    /// Quote asset of `price`.
    #[serde(default)]
    pub quote_symbol: Option<String>,
    /// Extra attributes merged into the transaction's info.
    #[serde(default)]
    pub info: AttributeMap,
}

impl BalanceChange {
    /// Creates a change with an empty info map.
    #[must_use]
    pub fn new(
        sub_account_id: SubAccountId,
        new_balance: Decimal,
        amount: Decimal,
        direction: TransactionDirection,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            sub_account_id,
            new_balance,
            amount,
            direction,
            reason: reason.into(),
            price: None,
            quote_symbol: None,
            info: AttributeMap::new(),
        }
    }

    /// Replaces the info map.
    #[must_use]
    pub fn with_info(mut self, info: AttributeMap) -> Self {
        self.info = info;
        self
    }

    /// Sets price and quote symbol.
    #[must_use]
    pub fn with_price(mut self, price: Decimal, quote_symbol: impl Into<String>) -> Self {
        self.price = Some(price);
        self.quote_symbol = Some(quote_symbol.into());
        self
    }

    /// Permits a negative closing balance.
    #[must_use]
    pub fn allow_overdraft(mut self) -> Self {
        self.info.insert(ALLOW_OVERDRAFT_KEY, Value::Bool(true));
        self
    }

    /// Returns true if the info map declares overdraft allowed.
    #[must_use]
    pub fn allows_overdraft(&self) -> bool {
        self.info.get_bool(ALLOW_OVERDRAFT_KEY).unwrap_or(false)
    }
}
