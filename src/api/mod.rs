//! # API Layer
//!
//! Surfaces consumed by the HTTP collaborator. Routing lives outside this
//! crate; it only supplies the error envelope handlers return.

pub mod rest;
