//! # Domain Errors
//!
//! Validation and invariant failures raised by entities, plus the
//! [`ErrorKind`] taxonomy shared by every layer.
//!
//! # Examples
//!
//! ```
//! use trade_accounts::domain::errors::{DomainError, ErrorKind};
//!
//! let err = DomainError::PrivateRequiresOwner;
//! assert_eq!(err.kind(), ErrorKind::Validation);
//! assert_eq!(err.kind().as_str(), "VALIDATION");
//! ```

use crate::domain::value_objects::arithmetic::ArithmeticError;
use crate::domain::value_objects::enums::{ParseEnumError, TransactionDirection};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Machine-readable error tag.
///
/// Every error surfaced by the crate maps onto exactly one kind. The HTTP
/// collaborator uses [`ErrorKind::as_str`] as the error code in responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Entity does not exist (update/delete/get-or-fail paths).
    NotFound,
    /// Unique-key violation.
    AlreadyExists,
    /// A referenced entity does not exist.
    ReferenceNotFound,
    /// Entity is still referenced by dependents.
    InUse,
    /// Cross-owner access attempt.
    AccessDenied,
    /// Structural or semantic validation failure.
    Validation,
    /// Attempt to write a field that cannot be changed on this path.
    ImmutableField,
    /// `old ± amount != new` on a balance transition.
    BalanceArithmeticMismatch,
    /// Balance would drop below zero without overdraft.
    NegativeBalance,
    /// Sub-account cannot be removed while it holds funds.
    HasBalance,
    /// Ciphertext failed authentication or is malformed.
    CorruptCiphertext,
    /// Ciphertext was sealed with a different master key.
    BadKey,
    /// Invalid or missing configuration.
    ConfigError,
    /// Event was already processed; nothing happened.
    DuplicateIgnored,
    /// Call was cancelled or its deadline elapsed.
    Cancelled,
    /// Retryable infrastructure failure.
    Transient,
    /// Anything else.
    Internal,
}

impl ErrorKind {
    /// Returns the wire tag for this kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::ReferenceNotFound => "REFERENCE_NOT_FOUND",
            Self::InUse => "IN_USE",
            Self::AccessDenied => "ACCESS_DENIED",
            Self::Validation => "VALIDATION",
            Self::ImmutableField => "IMMUTABLE_FIELD",
            Self::BalanceArithmeticMismatch => "BALANCE_ARITHMETIC_MISMATCH",
            Self::NegativeBalance => "NEGATIVE_BALANCE",
            Self::HasBalance => "HAS_BALANCE",
            Self::CorruptCiphertext => "CORRUPT_CIPHERTEXT",
            Self::BadKey => "BAD_KEY",
            Self::ConfigError => "CONFIG_ERROR",
            Self::DuplicateIgnored => "DUPLICATE_IGNORED",
            Self::Cancelled => "CANCELLED",
            Self::Transient => "TRANSIENT",
            Self::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Domain-level error.
///
/// Produced by `validate()` on entities and request payloads, by patch
/// application and by balance-transition planning.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    /// A required field is missing or empty.
    #[error("{0} is required")]
    MissingField(&'static str),

    /// A field has an invalid value.
    #[error("invalid {field}: {reason}")]
    InvalidField {
        /// Field name.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// Exchange type is not in the configured set.
    #[error("unsupported exchange type: {0}")]
    InvalidExchange(String),

    /// Private binding without an owner.
    #[error("private exchange binding requires an owner")]
    PrivateRequiresOwner,

    /// Private binding without credentials.
    #[error("private exchange binding requires credentials")]
    PrivateRequiresCredentials,

    /// Public binding carrying credentials.
    #[error("public exchange binding must not carry credentials")]
    PublicMustNotCarryCredentials,

    /// Public binding with an owner.
    #[error("public exchange binding must not have an owner")]
    PublicMustNotHaveOwner,

    /// Patch touches a field that cannot be written on the generic path.
    #[error("field '{field}' of {entity} is immutable")]
    ImmutableField {
        /// Entity name.
        entity: &'static str,
        /// Field name.
        field: String,
    },

    /// Patch names a field the entity does not have.
    #[error("unknown field '{field}' for {entity}")]
    UnknownField {
        /// Entity name.
        entity: &'static str,
        /// Field name.
        field: String,
    },

    /// Claimed closing balance does not match `previous ± amount`.
    #[error(
        "balance arithmetic mismatch: {previous} {direction} {amount} = {expected}, claimed {claimed}"
    )]
    BalanceArithmeticMismatch {
        /// Balance before the transition.
        previous: Decimal,
        /// Transition amount.
        amount: Decimal,
        /// Transition direction.
        direction: TransactionDirection,
        /// Balance the arithmetic yields.
        expected: Decimal,
        /// Balance the caller claimed.
        claimed: Decimal,
    },

    /// Transition would leave a negative balance.
    #[error("balance would become negative: {0}")]
    NegativeBalance(Decimal),

    /// Sub-account still holds funds.
    #[error("sub-account still holds a balance of {0}")]
    HasBalance(Decimal),

    /// Checked arithmetic failed.
    #[error("arithmetic error: {0}")]
    Arithmetic(#[from] ArithmeticError),

    /// Enumerated value out of range.
    #[error(transparent)]
    InvalidEnum(#[from] ParseEnumError),
}

impl DomainError {
    /// Creates an invalid field error.
    #[must_use]
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }

    /// Creates an immutable field error.
    #[must_use]
    pub fn immutable(entity: &'static str, field: impl Into<String>) -> Self {
        Self::ImmutableField {
            entity,
            field: field.into(),
        }
    }

    /// Creates an unknown field error.
    #[must_use]
    pub fn unknown_field(entity: &'static str, field: impl Into<String>) -> Self {
        Self::UnknownField {
            entity,
            field: field.into(),
        }
    }

    /// Returns the taxonomy tag for this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ImmutableField { .. } => ErrorKind::ImmutableField,
            Self::BalanceArithmeticMismatch { .. } => ErrorKind::BalanceArithmeticMismatch,
            Self::NegativeBalance(_) => ErrorKind::NegativeBalance,
            Self::HasBalance(_) => ErrorKind::HasBalance,
            _ => ErrorKind::Validation,
        }
    }
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;

/// Returns `Err(MissingField)` when `value` is blank.
///
/// # Errors
///
/// Returns `DomainError::MissingField` for empty or whitespace-only input.
pub fn require_non_blank(field: &'static str, value: &str) -> DomainResult<()> {
    if value.trim().is_empty() {
        return Err(DomainError::MissingField(field));
    }
    Ok(())
}

/// Returns `Err(InvalidField)` when `value` exceeds `max` characters.
///
/// # Errors
///
/// Returns `DomainError::InvalidField` when the value is too long.
pub fn require_max_len(field: &'static str, value: &str, max: usize) -> DomainResult<()> {
    if value.chars().count() > max {
        return Err(DomainError::invalid(
            field,
            format!("must be at most {max} characters"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tags_are_screaming_snake() {
        assert_eq!(ErrorKind::NotFound.as_str(), "NOT_FOUND");
        assert_eq!(
            ErrorKind::BalanceArithmeticMismatch.to_string(),
            "BALANCE_ARITHMETIC_MISMATCH"
        );
        assert_eq!(ErrorKind::DuplicateIgnored.as_str(), "DUPLICATE_IGNORED");
    }

    #[test]
    fn domain_error_kinds() {
        assert_eq!(
            DomainError::immutable("ExchangeBinding", "api_key_hash").kind(),
            ErrorKind::ImmutableField
        );
        assert_eq!(
            DomainError::NegativeBalance(Decimal::new(-1, 1)).kind(),
            ErrorKind::NegativeBalance
        );
        assert_eq!(
            DomainError::HasBalance(Decimal::ONE).kind(),
            ErrorKind::HasBalance
        );
        assert_eq!(
            DomainError::MissingField("username").kind(),
            ErrorKind::Validation
        );
    }

    #[test]
    fn require_non_blank_rejects_whitespace() {
        assert!(require_non_blank("name", "  ").is_err());
        assert!(require_non_blank("name", "main").is_ok());
    }

    #[test]
    fn require_max_len_counts_chars() {
        assert!(require_max_len("name", "ééé", 3).is_ok());
        assert!(require_max_len("name", "éééé", 3).is_err());
    }
}
