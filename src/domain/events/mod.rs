//! # Bus Events
//!
//! Events delivered by the message bus and what they look like once
//! decoded.
//!
//! - [`EventKind`]: the routed subjects
//! - [`EventEnvelope`]: fields common to every payload
//! - [`OrderEvent`], [`BalanceEvent`], [`ErrorEvent`], [`SignalEvent`],
//!   [`HeartbeatEvent`]: typed bodies
//! - [`DecodedEvent`]: subject-driven decode plus validation

pub mod decoded;
pub mod envelope;
pub mod payloads;
pub mod subjects;

pub use decoded::{DecodedEvent, EnvelopeHint, EventDecodeError};
pub use envelope::EventEnvelope;
pub use payloads::{
    BalanceEvent, ErrorEvent, HealthStatus, HeartbeatEvent, OrderEvent, OrderSide, Severity,
    SignalEvent, SignalType,
};
pub use subjects::{EventKind, PayloadShape};
