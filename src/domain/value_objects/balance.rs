//! # Balance Transitions
//!
//! Pure verification of a sub-account balance transition.
//!
//! A transition is described by the balance the caller observed, the
//! amount, the direction and the balance the caller claims results from
//! it. [`BalanceTransition::verify`] recomputes the closing balance on the
//! server side and rejects any disagreement, so a transaction row can never
//! carry a closing balance that does not follow from the one before it.
//!
//! # Examples
//!
//! ```
//! use rust_decimal::Decimal;
//! use trade_accounts::domain::value_objects::balance::BalanceTransition;
//! use trade_accounts::domain::value_objects::enums::TransactionDirection;
//!
//! let t = BalanceTransition {
//!     previous: Decimal::new(10, 1),
//!     amount: Decimal::new(5, 1),
//!     direction: TransactionDirection::Debit,
//!     claimed: Decimal::new(5, 1),
//! };
//! assert_eq!(t.verify(false).unwrap(), Decimal::new(5, 1));
//! ```

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::value_objects::arithmetic::CheckedArithmetic;
use crate::domain::value_objects::enums::TransactionDirection;
use rust_decimal::{Decimal, RoundingStrategy};

/// Number of fractional digits carried by balances and amounts.
pub const BALANCE_SCALE: u32 = 8;

/// Rounds a value to [`BALANCE_SCALE`] fractional digits.
///
/// Values with more precision than the column stores would otherwise
/// compare unequal after a round trip through the database.
#[must_use]
pub fn normalize(value: Decimal) -> Decimal {
    let mut v =
        value.round_dp_with_strategy(BALANCE_SCALE, RoundingStrategy::MidpointNearestEven);
    v.rescale(BALANCE_SCALE);
    v
}

/// A proposed balance transition on one sub-account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceTransition {
    /// Balance before the transition.
    pub previous: Decimal,
    /// Strictly positive amount.
    pub amount: Decimal,
    /// Sign of the transition.
    pub direction: TransactionDirection,
    /// Balance the caller claims results.
    pub claimed: Decimal,
}

impl BalanceTransition {
    /// Computes `previous ± amount` according to the direction.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Arithmetic` on overflow.
    pub fn expected(&self) -> DomainResult<Decimal> {
        let next = match self.direction {
            TransactionDirection::Credit => self.previous.safe_add(self.amount)?,
            TransactionDirection::Debit => self.previous.safe_sub(self.amount)?,
        };
        Ok(normalize(next))
    }

    /// Verifies the transition and returns the normalized closing balance.
    ///
    /// Checks, in order: the amount is strictly positive and fits
    /// [`BALANCE_SCALE`], the claimed closing balance equals
    /// `previous ± amount` exactly, and the result is not negative unless
    /// `allow_overdraft` is set.
    ///
    /// # Errors
    ///
    /// - `DomainError::InvalidField` if the amount is not positive or has
    ///   more than [`BALANCE_SCALE`] fractional digits
    /// - `DomainError::BalanceArithmeticMismatch` on disagreement
    /// - `DomainError::NegativeBalance` if the result is below zero
    pub fn verify(&self, allow_overdraft: bool) -> DomainResult<Decimal> {
        if self.amount <= Decimal::ZERO {
            return Err(DomainError::invalid("amount", "must be greater than zero"));
        }
        if !fits_scale(self.amount) {
            return Err(DomainError::invalid(
                "amount",
                format!("must have at most {BALANCE_SCALE} fractional digits"),
            ));
        }

        // Both operands fit the scale, so `expected` is exact and is the
        // value the journal stores.
        let expected = self.expected()?;
        if expected != self.claimed {
            return Err(DomainError::BalanceArithmeticMismatch {
                previous: self.previous,
                amount: self.amount,
                direction: self.direction,
                expected,
                claimed: self.claimed,
            });
        }

        if expected < Decimal::ZERO && !allow_overdraft {
            return Err(DomainError::NegativeBalance(expected));
        }

        Ok(expected)
    }
}

/// True if `value` has no significant digits beyond [`BALANCE_SCALE`].
#[must_use]
pub fn fits_scale(value: Decimal) -> bool {
    value.normalize().scale() <= BALANCE_SCALE
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn transition(
        prev: &str,
        amount: &str,
        dir: TransactionDirection,
        claimed: &str,
    ) -> BalanceTransition {
        BalanceTransition {
            previous: dec(prev),
            amount: dec(amount),
            direction: dir,
            claimed: dec(claimed),
        }
    }

    #[test]
    fn debit_within_balance() {
        let t = transition("1.0", "0.5", TransactionDirection::Debit, "0.5");
        assert_eq!(t.verify(false).unwrap(), dec("0.5"));
    }

    #[test]
    fn credit_adds() {
        let t = transition("0.5", "0.25", TransactionDirection::Credit, "0.75");
        assert_eq!(t.verify(false).unwrap(), dec("0.75"));
    }

    #[test]
    fn mismatch_is_rejected() {
        let t = transition("1.0", "0.5", TransactionDirection::Debit, "0.6");
        assert!(matches!(
            t.verify(false),
            Err(DomainError::BalanceArithmeticMismatch { .. })
        ));
    }

    #[test]
    fn mismatch_checked_before_sign() {
        let t = transition("0.5", "0.6", TransactionDirection::Debit, "-0.2");
        assert!(matches!(
            t.verify(false),
            Err(DomainError::BalanceArithmeticMismatch { .. })
        ));
    }

    #[test]
    fn negative_without_overdraft() {
        let t = transition("0.5", "0.6", TransactionDirection::Debit, "-0.1");
        assert_eq!(
            t.verify(false),
            Err(DomainError::NegativeBalance(normalize(dec("-0.1"))))
        );
    }

    #[test]
    fn negative_with_overdraft() {
        let t = transition("0.5", "0.6", TransactionDirection::Debit, "-0.1");
        assert_eq!(t.verify(true).unwrap(), dec("-0.1"));
    }

    #[test]
    fn zero_amount_is_invalid() {
        let t = transition("1", "0", TransactionDirection::Credit, "1");
        assert!(matches!(t.verify(false), Err(DomainError::InvalidField { .. })));
    }

    #[test]
    fn sub_precision_amount_is_invalid() {
        let t = transition(
            "0.00000001",
            "0.000000015",
            TransactionDirection::Credit,
            "0.00000002",
        );
        assert!(matches!(
            t.verify(false),
            Err(DomainError::InvalidField { field: "amount", .. })
        ));
    }

    #[test]
    fn dust_amount_is_invalid() {
        let t = transition("1", "0.000000004", TransactionDirection::Credit, "1");
        assert!(matches!(
            t.verify(false),
            Err(DomainError::InvalidField { field: "amount", .. })
        ));
    }

    #[test]
    fn trailing_zeros_fit_scale() {
        let t = transition("1", "0.50000000000", TransactionDirection::Debit, "0.5");
        assert_eq!(t.verify(false).unwrap(), dec("0.5"));
    }

    #[test]
    fn claim_beyond_scale_is_mismatch() {
        let t = transition("1", "0.5", TransactionDirection::Credit, "1.500000001");
        assert!(matches!(
            t.verify(false),
            Err(DomainError::BalanceArithmeticMismatch { .. })
        ));
    }

    #[test]
    fn normalize_rounds_to_scale() {
        assert_eq!(normalize(dec("0.123456789")), dec("0.12345679"));
        assert_eq!(normalize(dec("1")).scale(), BALANCE_SCALE);
    }

    proptest! {
        #[test]
        fn credit_then_debit_restores(prev in 0i64..1_000_000_000, amt in 1i64..1_000_000_000) {
            let prev = Decimal::new(prev, 8);
            let amt = Decimal::new(amt, 8);
            let up = BalanceTransition {
                previous: prev,
                amount: amt,
                direction: TransactionDirection::Credit,
                claimed: prev + amt,
            }.verify(false).unwrap();
            let down = BalanceTransition {
                previous: up,
                amount: amt,
                direction: TransactionDirection::Debit,
                claimed: prev,
            }.verify(false).unwrap();
            prop_assert_eq!(down, prev);
        }

        #[test]
        fn accepted_amounts_journal_exactly(
            prev in 0i64..1_000_000_000,
            mantissa in 1i64..1_000_000_000_000,
            scale in 0u32..=12,
        ) {
            let previous = Decimal::new(prev, 8);
            let amount = Decimal::new(mantissa, scale);
            let result = BalanceTransition {
                previous,
                amount,
                direction: TransactionDirection::Credit,
                claimed: normalize(previous + amount),
            }.verify(false);
            match result {
                Ok(closing) => {
                    prop_assert!(fits_scale(amount));
                    prop_assert!(normalize(amount) > Decimal::ZERO);
                    prop_assert_eq!(closing, previous + normalize(amount));
                }
                Err(DomainError::InvalidField { field, .. }) => {
                    prop_assert_eq!(field, "amount");
                    prop_assert!(!fits_scale(amount));
                }
                Err(other) => prop_assert!(false, "unexpected error: {other}"),
            }
        }
    }
}
