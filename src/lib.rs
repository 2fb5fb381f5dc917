//! # trade-accounts
//!
//! Persistence and integrity layer for a multi-tenant trading-account
//! service.
//!
//! The crate keeps durable records of users, their exchange API
//! credentials, trading configurations, per-symbol sub-accounts with
//! balances, an immutable transaction journal, trading activity logs and
//! the event-ingest ledger, and exposes them through repository ports
//! consumed by HTTP and event handlers.
//!
//! ## Layers
//!
//! - [`domain`]: entities, value objects, validation and bus event payloads
//! - [`application`]: services (binding credentials, event ingest,
//!   dispatching, retries, account lifecycle) and the error taxonomy
//! - [`infrastructure`]: secret engine, Postgres and in-memory repositories,
//!   optional NATS consumer
//! - [`api`]: HTTP error envelope for the HTTP collaborator
//! - [`config`] / [`telemetry`]: startup configuration and tracing setup
//!
//! # Examples
//!
//! ```
//! use trade_accounts::domain::entities::User;
//! use trade_accounts::infrastructure::persistence::Repositories;
//!
//! # tokio_test::block_on(async {
//! let repos = Repositories::in_memory(Default::default());
//! let alice = User::new("alice", "a@x");
//! repos.users.create(&alice).await.unwrap();
//!
//! let found = repos.users.get_by_username("alice").await.unwrap();
//! assert_eq!(found.map(|u| u.id), Some(alice.id));
//! # });
//! ```

pub mod api;
pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod telemetry;
