//! # Transaction Entity
//!
//! An immutable journal entry describing one balance transition. Rows are
//! only ever appended; they are never updated and never soft-deleted.

use crate::domain::errors::{DomainError, DomainResult, require_max_len, require_non_blank};
use crate::domain::value_objects::{
    AttributeMap, SubAccountId, Timestamp, TradingId, TransactionDirection, TransactionId, UserId,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Maximum reason tag length.
pub const MAX_REASON_LEN: usize = 64;

/// One balance transition on a sub-account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Identifier.
    pub id: TransactionId,
    /// Owner (always the sub-account's owner).
    pub user_id: UserId,
    /// Trading of the sub-account.
    pub trading_id: TradingId,
    /// Sub-account whose balance moved.
    pub sub_account_id: SubAccountId,
    /// When the transition was applied.
    pub timestamp: Timestamp,
    /// Debit or credit.
    pub direction: TransactionDirection,
    /// Free-form reason tag, e.g. `withdraw` or `order_filled`.
    pub reason: String,
    /// Strictly positive amount.
    pub amount: Decimal,
    /// Sub-account balance right after the transition.
    pub closing_balance: Decimal,
    /// Execution price.
    pub price: Option<Decimal>,
    /// Quote asset of `price`.
    pub quote_symbol: Option<String>,
    /// Free-form attributes.
    pub info: AttributeMap,
    /// Insertion time.
    pub created_at: Timestamp,
}

impl Transaction {
    /// Returns `amount` signed by direction (credit positive).
    #[must_use]
    pub fn signed_amount(&self) -> Decimal {
        match self.direction {
            TransactionDirection::Credit => self.amount,
            TransactionDirection::Debit => -self.amount,
        }
    }

    /// Checks structural invariants.
    ///
    /// # Errors
    ///
    /// Returns the first violated rule.
    pub fn validate(&self) -> DomainResult<()> {
        if self.amount <= Decimal::ZERO {
            return Err(DomainError::invalid("amount", "must be greater than zero"));
        }
        require_non_blank("reason", &self.reason)?;
        require_max_len("reason", &self.reason, MAX_REASON_LEN)?;
        if self.price.is_some_and(|p| p < Decimal::ZERO) {
            return Err(DomainError::invalid("price", "must not be negative"));
        }
        Ok(())
    }
}
