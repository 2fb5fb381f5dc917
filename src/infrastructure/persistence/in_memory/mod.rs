//! # In-Memory Repositories
//!
//! In-memory implementations for testing without database dependencies.
//!
//! ## Available Repositories
//!
//! - [`InMemoryUserRepository`]: users
//! - [`InMemoryOAuthIdentityRepository`]: provider identities
//! - [`InMemoryExchangeBindingRepository`]: exchange bindings
//! - [`InMemoryTradingRepository`]: tradings
//! - [`InMemorySubAccountRepository`]: sub-accounts
//! - [`InMemoryTransactionRepository`]: transaction journal
//! - [`InMemoryTradingLogRepository`]: activity logs
//! - [`InMemoryBalanceMutator`]: balance changes
//! - [`InMemoryEventProcessingRepository`]: event ingest ledger
//!
//! ## Thread Safety
//!
//! Every repository built over the same [`InMemoryStore`] shares one
//! `Arc<RwLock<Tables>>`, so cross-entity checks see a consistent
//! snapshot and multi-table writes are atomic.

pub mod balance_mutator;
pub mod event_processing_repository;
pub mod exchange_binding_repository;
pub mod oauth_identity_repository;
pub mod store;
pub mod sub_account_repository;
pub mod trading_log_repository;
pub mod trading_repository;
pub mod transaction_repository;
pub mod user_repository;

pub use balance_mutator::InMemoryBalanceMutator;
pub use event_processing_repository::InMemoryEventProcessingRepository;
pub use exchange_binding_repository::InMemoryExchangeBindingRepository;
pub use oauth_identity_repository::InMemoryOAuthIdentityRepository;
pub use store::InMemoryStore;
pub use sub_account_repository::InMemorySubAccountRepository;
pub use trading_log_repository::InMemoryTradingLogRepository;
pub use trading_repository::InMemoryTradingRepository;
pub use transaction_repository::InMemoryTransactionRepository;
pub use user_repository::InMemoryUserRepository;
