//! # Application Layer
//!
//! Use cases on top of the domain and the repository ports.
//!
//! - [`services`]: binding credentials, identities, event ingest,
//!   dispatching, retries and whole-account operations
//! - [`dto`]: validated request shapes for the HTTP collaborator
//! - [`error`]: the error taxonomy surfaced to callers

pub mod dto;
pub mod error;
pub mod services;

pub use error::{ApplicationError, ApplicationResult};
