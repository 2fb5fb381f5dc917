//! # Domain Entities
//!
//! Records of the trading-account model and the invariants that bind them.
//!
//! ## Tenant graph
//!
//! - [`User`]: tenant root
//! - [`OAuthIdentity`]: external provider identity of a user
//! - [`ExchangeBinding`]: private (owned, with sealed credentials) or public
//!   exchange account reference
//! - [`Trading`]: configuration bound to one binding
//! - [`SubAccount`]: per-symbol balance under one trading
//!
//! ## Time series
//!
//! - [`Transaction`]: immutable balance journal
//! - [`TradingActivityLog`]: append-only activity log
//!
//! ## Bookkeeping
//!
//! - [`EventProcessingRecord`]: event-ingest ledger row
//!
//! Every entity has a synchronous `validate()` that performs no I/O.
//! Repositories call it before every create and update.

pub mod event_record;
pub mod exchange_binding;
pub mod oauth_identity;
pub mod sub_account;
pub mod trading;
pub mod trading_log;
pub mod transaction;
pub mod user;

pub use event_record::{EventProcessingRecord, UNKNOWN_EVENT_TYPE};
pub use exchange_binding::{
    BindingSummary, DEFAULT_EXCHANGES, ExchangeBinding, SealedCredentials, SecuritySettings,
    SupportedExchanges,
};
pub use oauth_identity::OAuthIdentity;
pub use sub_account::{ALLOW_OVERDRAFT_KEY, BalanceChange, SubAccount};
pub use trading::Trading;
pub use trading_log::{TradingActivityLog, log_types};
pub use transaction::Transaction;
pub use user::User;
