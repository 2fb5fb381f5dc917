//! # Infrastructure Layer
//!
//! Adapters to the outside world.
//!
//! - [`crypto`]: Secret Engine for binding credentials and OAuth tokens
//! - [`persistence`]: repository ports, Postgres and in-memory tiers
//! - [`messaging`]: bus consumer feeding the event dispatcher

pub mod crypto;
pub mod messaging;
pub mod persistence;
