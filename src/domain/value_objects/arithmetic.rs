//! # Checked Arithmetic
//!
//! Balance transitions never use the raw `+`/`-` operators on
//! [`Decimal`]: an overflow there panics, and a panic inside a database
//! transaction leaves the connection in an unknown state.
//!
//! ```
//! use trade_accounts::domain::value_objects::arithmetic::{ArithmeticError, CheckedArithmetic};
//! use rust_decimal::Decimal;
//!
//! let balance = Decimal::new(100, 0);
//! assert_eq!(balance.safe_sub(Decimal::new(30, 0)), Ok(Decimal::new(70, 0)));
//! assert_eq!(Decimal::MAX.safe_add(Decimal::ONE), Err(ArithmeticError::Overflow));
//! ```

use rust_decimal::Decimal;
use thiserror::Error;

/// A balance or counter left the representable range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ArithmeticError {
    /// Result above the type's maximum.
    #[error("arithmetic overflow")]
    Overflow,

    /// Result below the type's minimum.
    #[error("arithmetic underflow")]
    Underflow,
}

/// Result of a checked operation.
pub type ArithmeticResult<T> = Result<T, ArithmeticError>;

/// Addition and subtraction that report range errors instead of
/// panicking.
pub trait CheckedArithmetic: Sized {
    /// Adds `rhs`.
    ///
    /// # Errors
    ///
    /// Returns `ArithmeticError::Overflow` out of range.
    fn safe_add(self, rhs: Self) -> ArithmeticResult<Self>;

    /// Subtracts `rhs`.
    ///
    /// # Errors
    ///
    /// Returns `ArithmeticError::Underflow` out of range.
    fn safe_sub(self, rhs: Self) -> ArithmeticResult<Self>;
}

macro_rules! checked_impl {
    ($($ty:ty),*) => {$(
        impl CheckedArithmetic for $ty {
            #[inline]
            fn safe_add(self, rhs: Self) -> ArithmeticResult<Self> {
                self.checked_add(rhs).ok_or(ArithmeticError::Overflow)
            }

            #[inline]
            fn safe_sub(self, rhs: Self) -> ArithmeticResult<Self> {
                self.checked_sub(rhs).ok_or(ArithmeticError::Underflow)
            }
        }
    )*};
}

checked_impl!(Decimal, u32, u64);
