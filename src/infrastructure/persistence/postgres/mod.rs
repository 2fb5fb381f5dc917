//! # PostgreSQL Persistence
//!
//! sqlx implementations of every repository port.
//!
//! Multi-step writes run in one database transaction and take row locks
//! with `SELECT … FOR UPDATE`; driver errors are mapped in one place
//! (`errors`). The schema lives in `migrations/` and is embedded as
//! [`MIGRATOR`].

pub(crate) mod errors;
mod rows;

pub mod balance_mutator;
pub mod event_processing_repository;
pub mod exchange_binding_repository;
pub mod oauth_identity_repository;
pub mod pool;
pub mod sub_account_repository;
pub mod trading_log_repository;
pub mod trading_repository;
pub mod transaction_repository;
pub mod user_repository;

pub use balance_mutator::PostgresBalanceMutator;
pub use event_processing_repository::PostgresEventProcessingRepository;
pub use exchange_binding_repository::PostgresExchangeBindingRepository;
pub use oauth_identity_repository::PostgresOAuthIdentityRepository;
pub use pool::{DatabasePool, MIGRATOR};
pub use sub_account_repository::PostgresSubAccountRepository;
pub use trading_log_repository::PostgresTradingLogRepository;
pub use trading_repository::PostgresTradingRepository;
pub use transaction_repository::PostgresTransactionRepository;
pub use user_repository::PostgresUserRepository;
