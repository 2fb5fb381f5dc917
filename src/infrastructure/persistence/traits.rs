//! # Repository Traits
//!
//! Port definitions for persistence abstraction.
//!
//! This module defines the repository traits (ports) that abstract
//! persistence operations. Two implementations exist: PostgreSQL via sqlx
//! and an in-memory tier with identical semantics for tests.
//!
//! # Conventions
//!
//! - Getters return `Ok(None)` on a miss; a miss is not an error.
//! - `update` and `delete` by id return `RepositoryError::NotFound` when
//!   no live row matched.
//! - Every create and update runs the entity's `validate()` first.
//! - Listings are ordered newest first unless stated otherwise.
//!
//! # Available Repositories
//!
//! - [`UserRepository`]
//! - [`OAuthIdentityRepository`]
//! - [`ExchangeBindingRepository`]
//! - [`TradingRepository`]
//! - [`SubAccountRepository`]
//! - [`TransactionRepository`]
//! - [`TradingActivityLogRepository`]
//! - [`EventProcessingRepository`]
//! - [`BalanceMutator`]
//!
//! # Examples
//!
//! ```
//! use trade_accounts::infrastructure::persistence::traits::UserRepository;
//!
//! async fn username_taken(repo: &dyn UserRepository, name: &str) -> bool {
//!     matches!(repo.get_by_username(name).await, Ok(Some(_)))
//! }
//! ```

use crate::domain::entities::{
    BalanceChange, EventProcessingRecord, ExchangeBinding, OAuthIdentity, SealedCredentials,
    SubAccount, Trading, TradingActivityLog, Transaction, User,
};
use crate::domain::errors::{DomainError, ErrorKind};
use crate::domain::value_objects::{
    BindingStatus, EventStatus, ExchangeBindingId, OAuthIdentityId, Page, PageRequest, Patch,
    SubAccountId, Timestamp, TradingId, TradingLogId, TransactionId, UserId,
};
use crate::infrastructure::persistence::filters::{LogFilter, TradingFilter, TransactionFilter};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Error type for repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Entity not found.
    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound {
        /// Type of entity.
        entity_type: &'static str,
        /// Entity identifier.
        id: String,
    },

    /// Unique-key violation.
    #[error("{entity_type} already exists: {key}")]
    AlreadyExists {
        /// Type of entity.
        entity_type: &'static str,
        /// The violated key.
        key: String,
    },

    /// A referenced entity does not exist.
    #[error("Referenced {entity_type} {id} does not exist")]
    ReferenceNotFound {
        /// Type of the missing entity.
        entity_type: &'static str,
        /// Its identifier.
        id: String,
    },

    /// Entity is still referenced by dependents.
    #[error("{entity_type} {id} is still in use")]
    InUse {
        /// Type of entity.
        entity_type: &'static str,
        /// Entity identifier.
        id: String,
    },

    /// Cross-owner access attempt.
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Validation or invariant failure.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Deadline elapsed or call cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// Retryable failure (serialization conflict, deadlock, pool timeout).
    #[error("Transient error: {0}")]
    Transient(String),

    /// Connection error.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Query error.
    #[error("Query error: {0}")]
    Query(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RepositoryError {
    /// Creates a not found error.
    #[must_use]
    pub fn not_found(entity_type: &'static str, id: impl fmt::Display) -> Self {
        Self::NotFound {
            entity_type,
            id: id.to_string(),
        }
    }

    /// Creates an already-exists error.
    #[must_use]
    pub fn already_exists(entity_type: &'static str, key: impl Into<String>) -> Self {
        Self::AlreadyExists {
            entity_type,
            key: key.into(),
        }
    }

    /// Creates a missing-reference error.
    #[must_use]
    pub fn reference_not_found(entity_type: &'static str, id: impl fmt::Display) -> Self {
        Self::ReferenceNotFound {
            entity_type,
            id: id.to_string(),
        }
    }

    /// Creates an in-use error.
    #[must_use]
    pub fn in_use(entity_type: &'static str, id: impl fmt::Display) -> Self {
        Self::InUse {
            entity_type,
            id: id.to_string(),
        }
    }

    /// Creates an access denied error.
    #[must_use]
    pub fn access_denied(msg: impl Into<String>) -> Self {
        Self::AccessDenied(msg.into())
    }

    /// Creates a transient error.
    #[must_use]
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    /// Creates a connection error.
    #[must_use]
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Creates a query error.
    #[must_use]
    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    /// Creates a serialization error.
    #[must_use]
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns true if this is a not found error.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true if this is a unique-key violation.
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    /// Returns true if retrying the call may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Connection(_))
    }

    /// Returns the taxonomy tag for this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::ReferenceNotFound { .. } => ErrorKind::ReferenceNotFound,
            Self::InUse { .. } => ErrorKind::InUse,
            Self::AccessDenied(_) => ErrorKind::AccessDenied,
            Self::Domain(e) => e.kind(),
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Transient(_) | Self::Connection(_) => ErrorKind::Transient,
            Self::Query(_) | Self::Serialization(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Result type for repository operations.
pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Repository for [`User`] entities.
#[async_trait]
pub trait UserRepository: Send + Sync + fmt::Debug {
    /// Inserts a new user.
    ///
    /// # Errors
    ///
    /// - `RepositoryError::Domain` if validation fails
    /// - `RepositoryError::AlreadyExists` if the username or email is taken
    async fn create(&self, user: &User) -> RepositoryResult<()>;

    /// Gets a live user by id.
    ///
    /// # Errors
    ///
    /// Returns an error only on infrastructure failure.
    async fn get_by_id(&self, id: UserId) -> RepositoryResult<Option<User>>;

    /// Gets a live user by exact, case-sensitive email.
    ///
    /// # Errors
    ///
    /// Returns an error only on infrastructure failure.
    async fn get_by_email(&self, email: &str) -> RepositoryResult<Option<User>>;

    /// Gets a live user by exact, case-sensitive username.
    ///
    /// # Errors
    ///
    /// Returns an error only on infrastructure failure.
    async fn get_by_username(&self, username: &str) -> RepositoryResult<Option<User>>;

    /// Lists live users, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error only on infrastructure failure.
    async fn list(&self, page: PageRequest) -> RepositoryResult<Page<User>>;

    /// Applies a partial update.
    ///
    /// # Errors
    ///
    /// - `RepositoryError::NotFound` if no live user matched
    /// - `RepositoryError::Domain` for immutable/unknown fields or
    ///   validation failures
    /// - `RepositoryError::AlreadyExists` if the new username or email is
    ///   taken
    async fn update(&self, id: UserId, patch: &Patch) -> RepositoryResult<User>;

    /// Soft-deletes a user. Dependents are not touched.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if no live user matched.
    async fn delete(&self, id: UserId) -> RepositoryResult<()>;
}

/// Repository for [`OAuthIdentity`] entities.
///
/// No `(user, provider)` uniqueness is enforced; upserting callers do a
/// get-then-create/update.
#[async_trait]
pub trait OAuthIdentityRepository: Send + Sync + fmt::Debug {
    /// Inserts an identity.
    ///
    /// # Errors
    ///
    /// - `RepositoryError::Domain` if validation fails
    /// - `RepositoryError::ReferenceNotFound` if the user does not exist
    async fn create(&self, identity: &OAuthIdentity) -> RepositoryResult<()>;

    /// Gets a live identity by id.
    ///
    /// # Errors
    ///
    /// Returns an error only on infrastructure failure.
    async fn get_by_id(&self, id: OAuthIdentityId) -> RepositoryResult<Option<OAuthIdentity>>;

    /// Lists a user's live identities.
    ///
    /// # Errors
    ///
    /// Returns an error only on infrastructure failure.
    async fn get_by_user(&self, user_id: UserId) -> RepositoryResult<Vec<OAuthIdentity>>;

    /// Gets the most recent live identity of `user_id` for `provider`.
    ///
    /// # Errors
    ///
    /// Returns an error only on infrastructure failure.
    async fn get_by_user_and_provider(
        &self,
        user_id: UserId,
        provider: &str,
    ) -> RepositoryResult<Option<OAuthIdentity>>;

    /// Gets the most recent live identity by provider-side user id.
    ///
    /// # Errors
    ///
    /// Returns an error only on infrastructure failure.
    async fn get_by_provider_user_id(
        &self,
        provider: &str,
        provider_user_id: &str,
    ) -> RepositoryResult<Option<OAuthIdentity>>;

    /// Applies a partial update.
    ///
    /// # Errors
    ///
    /// - `RepositoryError::NotFound` if no live identity matched
    /// - `RepositoryError::Domain` for immutable/unknown fields
    async fn update(&self, id: OAuthIdentityId, patch: &Patch)
    -> RepositoryResult<OAuthIdentity>;

    /// Replaces the tokens after a provider refresh.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if no live identity matched.
    async fn update_tokens(
        &self,
        id: OAuthIdentityId,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: Option<Timestamp>,
    ) -> RepositoryResult<()>;

    /// Soft-deletes an identity.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if no live identity matched.
    async fn delete(&self, id: OAuthIdentityId) -> RepositoryResult<()>;

    /// Removes every identity of a user. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns an error only on infrastructure failure.
    async fn delete_by_user(&self, user_id: UserId) -> RepositoryResult<u64>;
}

/// Repository for [`ExchangeBinding`] entities.
///
/// Authoritative for binding validation against the configured exchange
/// set. The generic `update` refuses credential columns; rotation goes
/// through [`ExchangeBindingRepository::rotate_credentials`].
#[async_trait]
pub trait ExchangeBindingRepository: Send + Sync + fmt::Debug {
    /// Inserts a binding after validating it.
    ///
    /// # Errors
    ///
    /// - `RepositoryError::Domain` if validation fails
    /// - `RepositoryError::AlreadyExists` if the owner already has a
    ///   binding with that name (or, for public bindings, another public
    ///   binding has it)
    /// - `RepositoryError::ReferenceNotFound` if the owner does not exist
    async fn create(&self, binding: &ExchangeBinding) -> RepositoryResult<()>;

    /// Gets a live binding by id.
    ///
    /// # Errors
    ///
    /// Returns an error only on infrastructure failure.
    async fn get_by_id(&self, id: ExchangeBindingId) -> RepositoryResult<Option<ExchangeBinding>>;

    /// Pages through a user's private bindings, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error only on infrastructure failure.
    async fn get_by_user(
        &self,
        user_id: UserId,
        page: PageRequest,
    ) -> RepositoryResult<Page<ExchangeBinding>>;

    /// Lists public active bindings ordered by name, optionally filtered by
    /// exchange type.
    ///
    /// # Errors
    ///
    /// Returns an error only on infrastructure failure.
    async fn get_public(&self, exchange_type: Option<&str>)
    -> RepositoryResult<Vec<ExchangeBinding>>;

    /// Resolves the uniqueness key. `owner = None` searches the public
    /// bucket.
    ///
    /// # Errors
    ///
    /// Returns an error only on infrastructure failure.
    async fn get_by_name_and_owner(
        &self,
        name: &str,
        owner: Option<UserId>,
    ) -> RepositoryResult<Option<ExchangeBinding>>;

    /// Finds a live binding by the keyed hash of its API key.
    ///
    /// # Errors
    ///
    /// Returns an error only on infrastructure failure.
    async fn get_by_api_key_hash(&self, hash: &str) -> RepositoryResult<Option<ExchangeBinding>>;

    /// Applies a partial update.
    ///
    /// # Errors
    ///
    /// - `RepositoryError::NotFound` if no live binding matched
    /// - `RepositoryError::Domain` with `ImmutableField` for credential or
    ///   counter columns
    /// - `RepositoryError::AlreadyExists` on rename collisions
    async fn update(&self, id: ExchangeBindingId, patch: &Patch)
    -> RepositoryResult<ExchangeBinding>;

    /// Atomically replaces both ciphertexts and the key hash, and resets the
    /// failure counter.
    ///
    /// # Errors
    ///
    /// - `RepositoryError::NotFound` if no live binding matched
    /// - `RepositoryError::Domain` if the binding is public or the sealed
    ///   credentials are incomplete
    async fn rotate_credentials(
        &self,
        id: ExchangeBindingId,
        credentials: &SealedCredentials,
    ) -> RepositoryResult<ExchangeBinding>;

    /// Sets the status.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if no live binding matched.
    async fn update_status(&self, id: ExchangeBindingId, status: BindingStatus)
    -> RepositoryResult<()>;

    /// Stamps `last_used_at = now`.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if no live binding matched.
    async fn touch_last_used(&self, id: ExchangeBindingId) -> RepositoryResult<()>;

    /// Atomically increments the failure counter and stamps the failure
    /// time. Returns the updated binding.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if no live binding matched.
    async fn record_failure(&self, id: ExchangeBindingId) -> RepositoryResult<ExchangeBinding>;

    /// Zeroes the failure counter and clears the failure time.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if no live binding matched.
    async fn reset_failures(&self, id: ExchangeBindingId) -> RepositoryResult<()>;

    /// Soft-deletes a binding.
    ///
    /// # Errors
    ///
    /// - `RepositoryError::NotFound` if no live binding matched
    /// - `RepositoryError::InUse` if a live trading references it
    async fn delete(&self, id: ExchangeBindingId) -> RepositoryResult<()>;
}

/// Repository for [`Trading`] entities.
///
/// Retrieval pre-loads [`Trading::binding`].
#[async_trait]
pub trait TradingRepository: Send + Sync + fmt::Debug {
    /// Inserts a trading after resolving its binding.
    ///
    /// # Errors
    ///
    /// - `RepositoryError::Domain` if validation fails
    /// - `RepositoryError::ReferenceNotFound` if the binding is missing
    /// - `RepositoryError::AccessDenied` if the binding is private and
    ///   owned by someone else
    async fn create(&self, trading: &Trading) -> RepositoryResult<Trading>;

    /// Gets a live trading by id.
    ///
    /// # Errors
    ///
    /// Returns an error only on infrastructure failure.
    async fn get_by_id(&self, id: TradingId) -> RepositoryResult<Option<Trading>>;

    /// Pages through a user's tradings, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error only on infrastructure failure.
    async fn get_by_user(
        &self,
        user_id: UserId,
        filter: &TradingFilter,
        page: PageRequest,
    ) -> RepositoryResult<Page<Trading>>;

    /// Applies a partial update, re-checking the binding rule when
    /// `exchange_binding_id` changes.
    ///
    /// # Errors
    ///
    /// - `RepositoryError::NotFound` if no live trading matched
    /// - `RepositoryError::ReferenceNotFound` / `AccessDenied` as in
    ///   [`TradingRepository::create`]
    async fn update(&self, id: TradingId, patch: &Patch) -> RepositoryResult<Trading>;

    /// Soft-deletes a trading.
    ///
    /// # Errors
    ///
    /// - `RepositoryError::NotFound` if no live trading matched
    /// - `RepositoryError::InUse` if a live sub-account references it
    async fn delete(&self, id: TradingId) -> RepositoryResult<()>;
}

/// Repository for [`SubAccount`] entities.
///
/// Balances move only through the [`BalanceMutator`].
#[async_trait]
pub trait SubAccountRepository: Send + Sync + fmt::Debug {
    /// Inserts a sub-account.
    ///
    /// # Errors
    ///
    /// - `RepositoryError::Domain` if validation fails or the balance is
    ///   not zero
    /// - `RepositoryError::ReferenceNotFound` if the trading is missing
    /// - `RepositoryError::AccessDenied` if the trading has another owner
    async fn create(&self, sub_account: &SubAccount) -> RepositoryResult<()>;

    /// Gets a live sub-account by id.
    ///
    /// # Errors
    ///
    /// Returns an error only on infrastructure failure.
    async fn get_by_id(&self, id: SubAccountId) -> RepositoryResult<Option<SubAccount>>;

    /// Lists a user's live sub-accounts, optionally restricted to one
    /// trading.
    ///
    /// # Errors
    ///
    /// Returns an error only on infrastructure failure.
    async fn get_by_user(
        &self,
        user_id: UserId,
        trading_id: Option<TradingId>,
    ) -> RepositoryResult<Vec<SubAccount>>;

    /// Lists a user's live sub-accounts holding `symbol` across tradings.
    ///
    /// # Errors
    ///
    /// Returns an error only on infrastructure failure.
    async fn get_by_symbol(&self, user_id: UserId, symbol: &str)
    -> RepositoryResult<Vec<SubAccount>>;

    /// Applies a partial update. `balance` is immutable here.
    ///
    /// # Errors
    ///
    /// - `RepositoryError::NotFound` if no live sub-account matched
    /// - `RepositoryError::Domain` for immutable/unknown fields
    async fn update(&self, id: SubAccountId, patch: &Patch) -> RepositoryResult<SubAccount>;

    /// Soft-deletes a sub-account.
    ///
    /// # Errors
    ///
    /// - `RepositoryError::NotFound` if no live sub-account matched
    /// - `RepositoryError::Domain` with `HasBalance` if the balance is not
    ///   zero
    async fn delete(&self, id: SubAccountId) -> RepositoryResult<()>;
}

/// Debit and credit totals over a range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectionTotals {
    /// Sum of debit amounts.
    pub debits: Decimal,
    /// Sum of credit amounts.
    pub credits: Decimal,
    /// Number of transactions summed.
    pub count: u64,
}

impl DirectionTotals {
    /// Returns `credits - debits`.
    #[must_use]
    pub fn net(&self) -> Decimal {
        self.credits - self.debits
    }
}

/// Append-only repository for [`Transaction`] entities.
///
/// Listings are ordered by timestamp, newest first.
#[async_trait]
pub trait TransactionRepository: Send + Sync + fmt::Debug {
    /// Appends a journal entry.
    ///
    /// The entry must continue the sub-account's current balance; the
    /// [`BalanceMutator`] is the normal way to produce one.
    ///
    /// # Errors
    ///
    /// - `RepositoryError::Domain` if validation fails or the closing
    ///   balance differs from the sub-account's balance
    /// - `RepositoryError::ReferenceNotFound` if the sub-account is missing
    /// - `RepositoryError::AccessDenied` on an ownership mismatch
    async fn create(&self, transaction: &Transaction) -> RepositoryResult<()>;

    /// Gets a transaction by id.
    ///
    /// # Errors
    ///
    /// Returns an error only on infrastructure failure.
    async fn get_by_id(&self, id: TransactionId) -> RepositoryResult<Option<Transaction>>;

    /// Pages through a user's transactions.
    ///
    /// # Errors
    ///
    /// Returns an error only on infrastructure failure.
    async fn get_by_user(
        &self,
        user_id: UserId,
        filter: &TransactionFilter,
        page: PageRequest,
    ) -> RepositoryResult<Page<Transaction>>;

    /// Pages through a sub-account's transactions.
    ///
    /// # Errors
    ///
    /// Returns an error only on infrastructure failure.
    async fn get_by_sub_account(
        &self,
        sub_account_id: SubAccountId,
        filter: &TransactionFilter,
        page: PageRequest,
    ) -> RepositoryResult<Page<Transaction>>;

    /// Pages through a trading's transactions.
    ///
    /// # Errors
    ///
    /// Returns an error only on infrastructure failure.
    async fn get_by_trading(
        &self,
        trading_id: TradingId,
        filter: &TransactionFilter,
        page: PageRequest,
    ) -> RepositoryResult<Page<Transaction>>;

    /// Pages through a user's transactions in `[from, to)`.
    ///
    /// # Errors
    ///
    /// Returns an error only on infrastructure failure.
    async fn get_by_time_range(
        &self,
        user_id: UserId,
        from: Timestamp,
        to: Timestamp,
        filter: &TransactionFilter,
        page: PageRequest,
    ) -> RepositoryResult<Page<Transaction>> {
        let ranged = filter.clone().between(from, to);
        self.get_by_user(user_id, &ranged, page).await
    }

    /// Sums debits and credits of a sub-account, optionally within
    /// `[from, to)`.
    ///
    /// # Errors
    ///
    /// Returns an error only on infrastructure failure.
    async fn sum_by_direction(
        &self,
        sub_account_id: SubAccountId,
        from: Option<Timestamp>,
        to: Option<Timestamp>,
    ) -> RepositoryResult<DirectionTotals>;

    /// Returns the newest transaction of a sub-account.
    ///
    /// # Errors
    ///
    /// Returns an error only on infrastructure failure.
    async fn latest_for_sub_account(
        &self,
        sub_account_id: SubAccountId,
    ) -> RepositoryResult<Option<Transaction>>;
}

/// Append-only repository for [`TradingActivityLog`] entries, with
/// hard-delete for housekeeping.
#[async_trait]
pub trait TradingActivityLogRepository: Send + Sync + fmt::Debug {
    /// Appends a log entry.
    ///
    /// # Errors
    ///
    /// - `RepositoryError::Domain` if validation fails
    /// - `RepositoryError::ReferenceNotFound` if a referenced row is missing
    /// - `RepositoryError::AccessDenied` on an ownership mismatch
    async fn create(&self, log: &TradingActivityLog) -> RepositoryResult<()>;

    /// Gets an entry by id.
    ///
    /// # Errors
    ///
    /// Returns an error only on infrastructure failure.
    async fn get_by_id(&self, id: TradingLogId) -> RepositoryResult<Option<TradingActivityLog>>;

    /// Pages through a user's entries, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error only on infrastructure failure.
    async fn get_by_user(
        &self,
        user_id: UserId,
        filter: &LogFilter,
        page: PageRequest,
    ) -> RepositoryResult<Page<TradingActivityLog>>;

    /// Pages through a trading's entries, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error only on infrastructure failure.
    async fn get_by_trading(
        &self,
        trading_id: TradingId,
        filter: &LogFilter,
        page: PageRequest,
    ) -> RepositoryResult<Page<TradingActivityLog>>;

    /// Pages through a sub-account's entries, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error only on infrastructure failure.
    async fn get_by_sub_account(
        &self,
        sub_account_id: SubAccountId,
        filter: &LogFilter,
        page: PageRequest,
    ) -> RepositoryResult<Page<TradingActivityLog>>;

    /// Hard-deletes an entry.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if no entry matched.
    async fn delete(&self, id: TradingLogId) -> RepositoryResult<()>;

    /// Hard-deletes entries older than `cutoff`. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns an error only on infrastructure failure.
    async fn delete_older_than(&self, cutoff: Timestamp) -> RepositoryResult<u64>;
}

/// Applies a verified balance change and journals it atomically.
#[async_trait]
pub trait BalanceMutator: Send + Sync + fmt::Debug {
    /// Locks the sub-account, verifies `change`, writes the new balance and
    /// inserts the transaction, all in one unit. Returns the transaction id.
    ///
    /// # Errors
    ///
    /// - `RepositoryError::NotFound` if the sub-account is missing or
    ///   soft-deleted
    /// - `RepositoryError::Domain` with `BalanceArithmeticMismatch` or
    ///   `NegativeBalance`; the balance is unchanged
    async fn apply_balance_change(&self, change: &BalanceChange) -> RepositoryResult<TransactionId>;
}

/// Effects an event may cause, executed inside the ledger's transaction.
#[async_trait]
pub trait EventEffects: Send {
    /// Reads a live sub-account.
    ///
    /// # Errors
    ///
    /// Returns an error only on infrastructure failure.
    async fn sub_account(&mut self, id: SubAccountId) -> RepositoryResult<Option<SubAccount>>;

    /// Applies a balance change as the [`BalanceMutator`] does.
    ///
    /// # Errors
    ///
    /// See [`BalanceMutator::apply_balance_change`].
    async fn apply_balance_change(
        &mut self,
        change: &BalanceChange,
    ) -> RepositoryResult<Transaction>;

    /// Appends an activity log entry.
    ///
    /// # Errors
    ///
    /// See [`TradingActivityLogRepository::create`].
    async fn append_log(&mut self, log: &TradingActivityLog) -> RepositoryResult<()>;
}

/// The work an ingested event performs.
#[async_trait]
pub trait IngestWork: Send + Sync {
    /// Performs the event's effects. An error aborts every effect.
    ///
    /// # Errors
    ///
    /// Any error; the ledger records it as the failure reason.
    async fn apply(&self, effects: &mut dyn EventEffects) -> RepositoryResult<()>;
}

/// Work that performs no effects.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEffects;

#[async_trait]
impl IngestWork for NoEffects {
    async fn apply(&self, _effects: &mut dyn EventEffects) -> RepositoryResult<()> {
        Ok(())
    }
}

/// Ledger keys of one delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct EventClaim {
    /// Globally unique event id.
    pub event_id: String,
    /// Event type tag.
    pub event_type: String,
    /// Subject the event arrived on.
    pub subject: Option<String>,
    /// Owner hint.
    pub user_id: Option<UserId>,
    /// Sub-account hint.
    pub sub_account_id: Option<SubAccountId>,
    /// Raw payload, kept for re-dispatch.
    pub payload: Option<Value>,
}

impl EventClaim {
    /// Creates a claim with no hints.
    #[must_use]
    pub fn new(event_id: impl Into<String>, event_type: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
            event_type: event_type.into(),
            subject: None,
            user_id: None,
            sub_account_id: None,
            payload: None,
        }
    }

    /// Sets the subject.
    #[must_use]
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Sets the owner hints.
    #[must_use]
    pub fn with_owner(
        mut self,
        user_id: Option<UserId>,
        sub_account_id: Option<SubAccountId>,
    ) -> Self {
        self.user_id = user_id;
        self.sub_account_id = sub_account_id;
        self
    }

    /// Sets the raw payload.
    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Builds the record a first sighting inserts.
    #[must_use]
    pub fn to_record(&self, status: EventStatus) -> EventProcessingRecord {
        let mut record = EventProcessingRecord::new(&self.event_id, &self.event_type, status);
        record.subject = self.subject.clone();
        record.user_id = self.user_id;
        record.sub_account_id = self.sub_account_id;
        record.payload = self.payload.clone();
        record
    }
}

/// Result of one ingest attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The work ran and committed.
    Processed,
    /// The event id was already processed; nothing ran.
    DuplicateIgnored,
    /// The work failed; its effects were rolled back and the failure was
    /// recorded.
    Failed {
        /// Taxonomy tag of the failure.
        kind: ErrorKind,
        /// Failure message as stored.
        error: String,
        /// Retry counter after this attempt.
        retry_count: u32,
    },
}

impl IngestOutcome {
    /// Returns true for [`IngestOutcome::Processed`].
    #[must_use]
    pub fn is_processed(&self) -> bool {
        matches!(self, Self::Processed)
    }

    /// Returns true for [`IngestOutcome::DuplicateIgnored`].
    #[must_use]
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::DuplicateIgnored)
    }
}

/// Record counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerStats {
    /// `processed` rows.
    pub processed: u64,
    /// `failed` rows.
    pub failed: u64,
    /// `retrying` rows.
    pub retrying: u64,
}

impl LedgerStats {
    /// Total rows.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.processed + self.failed + self.retrying
    }
}

/// Idempotency ledger for bus events.
#[async_trait]
pub trait EventProcessingRepository: Send + Sync + fmt::Debug {
    /// Gets the record of an event id.
    ///
    /// # Errors
    ///
    /// Returns an error only on infrastructure failure.
    async fn get_by_event_id(
        &self,
        event_id: &str,
    ) -> RepositoryResult<Option<EventProcessingRecord>>;

    /// Runs `work` at most once to a successful commit per event id.
    ///
    /// A processed id returns `DuplicateIgnored` without running `work`.
    /// Otherwise the record is claimed as `retrying`, `work` runs in the
    /// same transaction and the record becomes `processed`. If `work`
    /// fails its effects are rolled back and the record is stored as
    /// `failed` with the error and an incremented retry counter.
    ///
    /// # Errors
    ///
    /// Returns an error only when the ledger itself cannot be written;
    /// failures of `work` are reported as [`IngestOutcome::Failed`].
    async fn ingest(
        &self,
        claim: &EventClaim,
        work: &dyn IngestWork,
    ) -> RepositoryResult<IngestOutcome>;

    /// Records a delivery that could not be turned into work (unknown
    /// subject, malformed or invalid payload) as `failed`. A processed
    /// record is left untouched.
    ///
    /// # Errors
    ///
    /// Returns an error only on infrastructure failure.
    async fn record_failure(&self, claim: &EventClaim, error: &str)
    -> RepositoryResult<EventProcessingRecord>;

    /// Returns failed records with `retry_count < max_retries`, oldest
    /// first, at most `limit`.
    ///
    /// # Errors
    ///
    /// Returns an error only on infrastructure failure.
    async fn get_failed(&self, max_retries: u32, limit: u32)
    -> RepositoryResult<Vec<EventProcessingRecord>>;

    /// Deletes processed records with `processed_at < cutoff`. Returns the
    /// number removed.
    ///
    /// # Errors
    ///
    /// Returns an error only on infrastructure failure.
    async fn delete_older_than(&self, cutoff: Timestamp) -> RepositoryResult<u64>;

    /// Deletes every record attributed to a user.
    ///
    /// # Errors
    ///
    /// Returns an error only on infrastructure failure.
    async fn delete_by_user(&self, user_id: UserId) -> RepositoryResult<u64>;

    /// Counts records per status.
    ///
    /// # Errors
    ///
    /// Returns an error only on infrastructure failure.
    async fn stats(&self) -> RepositoryResult<LedgerStats>;
}
