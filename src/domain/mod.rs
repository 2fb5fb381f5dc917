//! # Domain Layer
//!
//! Entities, value objects and validation rules for trading accounts.
//!
//! Nothing in this layer performs I/O: every `validate()` is synchronous
//! and reports the first violated invariant.

pub mod entities;
pub mod errors;
pub mod events;
pub mod value_objects;

pub use errors::{DomainError, DomainResult, ErrorKind};
