//! # Persistence Layer
//!
//! Repository ports and their implementations.
//!
//! ## Repository Traits (Ports)
//!
//! - [`UserRepository`], [`OAuthIdentityRepository`]
//! - [`ExchangeBindingRepository`], [`TradingRepository`]
//! - [`SubAccountRepository`], [`BalanceMutator`]
//! - [`TransactionRepository`], [`TradingActivityLogRepository`]
//! - [`EventProcessingRepository`]: event ingest ledger
//!
//! ## Implementations
//!
//! - `in_memory`: one shared table set, for tests and local runs
//! - `postgres`: sqlx over PostgreSQL
//!
//! [`Repositories`] bundles one implementation of every port behind
//! `Arc<dyn …>` so services can be wired against either tier.

pub mod deadline;
pub mod filters;
pub mod in_memory;
pub mod postgres;
pub mod traits;

pub use deadline::with_deadline;
pub use filters::{LogFilter, TradingFilter, TransactionFilter};
pub use traits::{
    BalanceMutator, DirectionTotals, EventClaim, EventEffects, EventProcessingRepository,
    ExchangeBindingRepository, IngestOutcome, IngestWork, LedgerStats, NoEffects,
    OAuthIdentityRepository, RepositoryError, RepositoryResult, SubAccountRepository,
    TradingActivityLogRepository, TradingRepository, TransactionRepository, UserRepository,
};

use crate::domain::entities::SupportedExchanges;
use sqlx::PgPool;
use std::sync::Arc;

/// One implementation of every repository port.
#[derive(Debug, Clone)]
pub struct Repositories {
    /// Users.
    pub users: Arc<dyn UserRepository>,
    /// OAuth identities.
    pub identities: Arc<dyn OAuthIdentityRepository>,
    /// Exchange bindings.
    pub bindings: Arc<dyn ExchangeBindingRepository>,
    /// Tradings.
    pub tradings: Arc<dyn TradingRepository>,
    /// Sub-accounts.
    pub sub_accounts: Arc<dyn SubAccountRepository>,
    /// Transaction journal.
    pub transactions: Arc<dyn TransactionRepository>,
    /// Trading activity logs.
    pub logs: Arc<dyn TradingActivityLogRepository>,
    /// Event ingest ledger.
    pub events: Arc<dyn EventProcessingRepository>,
    /// Balance mutator.
    pub mutator: Arc<dyn BalanceMutator>,
}

impl Repositories {
    /// Builds the in-memory tier over one fresh store.
    #[must_use]
    pub fn in_memory(supported: SupportedExchanges) -> Self {
        Self::over_store(&in_memory::InMemoryStore::new(supported))
    }

    /// Builds the in-memory tier over an existing store.
    #[must_use]
    pub fn over_store(store: &in_memory::InMemoryStore) -> Self {
        use in_memory::*;
        Self {
            users: Arc::new(InMemoryUserRepository::new(store.clone())),
            identities: Arc::new(InMemoryOAuthIdentityRepository::new(store.clone())),
            bindings: Arc::new(InMemoryExchangeBindingRepository::new(store.clone())),
            tradings: Arc::new(InMemoryTradingRepository::new(store.clone())),
            sub_accounts: Arc::new(InMemorySubAccountRepository::new(store.clone())),
            transactions: Arc::new(InMemoryTransactionRepository::new(store.clone())),
            logs: Arc::new(InMemoryTradingLogRepository::new(store.clone())),
            events: Arc::new(InMemoryEventProcessingRepository::new(store.clone())),
            mutator: Arc::new(InMemoryBalanceMutator::new(store.clone())),
        }
    }

    /// Builds the Postgres tier over `pool`.
    #[must_use]
    pub fn postgres(pool: PgPool, supported: SupportedExchanges) -> Self {
        use postgres::*;
        Self {
            users: Arc::new(PostgresUserRepository::new(pool.clone())),
            identities: Arc::new(PostgresOAuthIdentityRepository::new(pool.clone())),
            bindings: Arc::new(PostgresExchangeBindingRepository::new(
                pool.clone(),
                supported,
            )),
            tradings: Arc::new(PostgresTradingRepository::new(pool.clone())),
            sub_accounts: Arc::new(PostgresSubAccountRepository::new(pool.clone())),
            transactions: Arc::new(PostgresTransactionRepository::new(pool.clone())),
            logs: Arc::new(PostgresTradingLogRepository::new(pool.clone())),
            events: Arc::new(PostgresEventProcessingRepository::new(pool.clone())),
            mutator: Arc::new(PostgresBalanceMutator::new(pool)),
        }
    }
}
