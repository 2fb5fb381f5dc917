//! # Application Services
//!
//! Services that orchestrate domain logic and infrastructure.
//!
//! - [`ExchangeBindingService`]: credential sealing, rotation, masking and
//!   failure-driven auto-disable
//! - [`OAuthIdentityService`]: provider identities with encrypted tokens
//! - [`EventIngestLedger`]: exactly-once event processing and housekeeping
//! - [`EventDispatcher`]: subject routing from the bus into the ledger
//! - [`RetryWorker`]: periodic re-dispatch of failed events
//! - [`AccountService`] / [`BalanceAuditor`]: export, purge and journal
//!   audits

pub mod account_service;
pub mod binding_service;
pub mod event_dispatcher;
pub mod event_ingest;
pub mod identity_service;
pub mod retry_worker;

pub use account_service::{AccountExport, AccountService, AuditReport, BalanceAuditor, PurgeReport};
pub use binding_service::{BindingView, ExchangeBindingService, MASK_VISIBLE_CHARS};
pub use event_dispatcher::{DispatchOutcome, EventDispatcher, SubjectCounters, UNROUTED_SUBJECT};
pub use event_ingest::EventIngestLedger;
pub use identity_service::{IdentityView, OAuthIdentityService, ProviderTokens};
pub use retry_worker::{RetryReport, RetryWorker};
