//! # Application Errors
//!
//! Error type for the application layer.
//!
//! Wraps the layer errors below it and maps every failure onto one
//! [`ErrorKind`] tag and one HTTP status for the HTTP collaborator.
//!
//! # Error Hierarchy
//!
//! ```text
//! ApplicationError
//! ├── Domain(DomainError)           - validation and invariant failures
//! ├── Repository(RepositoryError)   - persistence failures
//! ├── Secret(SecretError)           - Secret Engine failures
//! ├── Validation(String)            - request DTO failures
//! ├── NotFound { .. }               - get-or-fail misses
//! └── Internal(String)
//! ```
//!
//! # Status mapping
//!
//! Validation and access failures are 4xx with the kind tag as code;
//! balance and state conflicts are 409; everything else is 5xx with a
//! generic message.
//!
//! # Examples
//!
//! ```
//! use trade_accounts::application::error::ApplicationError;
//! use trade_accounts::domain::errors::{DomainError, ErrorKind};
//! use rust_decimal::Decimal;
//!
//! let err: ApplicationError = DomainError::HasBalance(Decimal::ONE).into();
//! assert_eq!(err.kind(), ErrorKind::HasBalance);
//! assert_eq!(err.http_status(), 409);
//!
//! let err = ApplicationError::internal("pool exhausted");
//! assert_eq!(err.public_message(), "internal server error");
//! ```

use crate::domain::errors::{DomainError, ErrorKind};
use crate::infrastructure::crypto::SecretError;
use crate::infrastructure::persistence::RepositoryError;
use thiserror::Error;

/// Message returned to clients for every 5xx.
pub const GENERIC_ERROR_MESSAGE: &str = "internal server error";

/// Application layer error.
#[derive(Debug, Error)]
pub enum ApplicationError {
    /// Domain error from validation or invariants.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Persistence error.
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// Secret Engine error.
    #[error(transparent)]
    Secret(#[from] SecretError),

    /// Request validation failed.
    #[error("validation error: {0}")]
    Validation(String),

    /// Resource not found.
    #[error("not found: {resource_type} with id {id}")]
    NotFound {
        /// Type of resource.
        resource_type: &'static str,
        /// Resource identifier.
        id: String,
    },

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApplicationError {
    /// Creates a validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Creates a not found error.
    #[must_use]
    pub fn not_found(resource_type: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            resource_type,
            id: id.to_string(),
        }
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns the taxonomy tag.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Domain(e) => e.kind(),
            Self::Repository(e) => e.kind(),
            Self::Secret(e) => e.kind(),
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        status_of(self.kind())
    }

    /// Returns true if retrying the call may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient | ErrorKind::Cancelled)
    }

    /// Returns true if this is a not found error.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Message safe to show a client. Server errors never expose their
    /// cause.
    #[must_use]
    pub fn public_message(&self) -> String {
        if self.http_status() >= 500 {
            GENERIC_ERROR_MESSAGE.to_string()
        } else {
            self.to_string()
        }
    }
}

/// Maps a taxonomy tag to an HTTP status code.
#[must_use]
pub const fn status_of(kind: ErrorKind) -> u16 {
    match kind {
        ErrorKind::Validation | ErrorKind::ImmutableField => 400,
        ErrorKind::AccessDenied => 403,
        ErrorKind::NotFound => 404,
        ErrorKind::ReferenceNotFound => 422,
        ErrorKind::AlreadyExists
        | ErrorKind::InUse
        | ErrorKind::BalanceArithmeticMismatch
        | ErrorKind::NegativeBalance
        | ErrorKind::HasBalance
        | ErrorKind::DuplicateIgnored => 409,
        ErrorKind::Transient => 503,
        ErrorKind::Cancelled => 504,
        ErrorKind::CorruptCiphertext
        | ErrorKind::BadKey
        | ErrorKind::ConfigError
        | ErrorKind::Internal => 500,
    }
}

/// Result type for application operations.
pub type ApplicationResult<T> = Result<T, ApplicationError>;
