//! # Decoding
//!
//! Subject-driven decoding of raw bus payloads into typed events.

use crate::domain::errors::DomainError;
use crate::domain::events::envelope::EventEnvelope;
use crate::domain::events::payloads::{
    BalanceEvent, ErrorEvent, HeartbeatEvent, OrderEvent, SignalEvent,
};
use crate::domain::events::subjects::{EventKind, PayloadShape};
use crate::domain::value_objects::{SubAccountId, UserId};
use serde_json::Value;
use thiserror::Error;

/// Failure to turn raw bytes into a valid typed event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventDecodeError {
    /// The subject is not routed.
    #[error("unknown event type: {0}")]
    UnknownSubject(String),

    /// The bytes are not the JSON shape the subject requires.
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// The payload decoded but fails validation.
    #[error("invalid payload: {0}")]
    Invalid(#[from] DomainError),
}

/// A decoded, validated bus event.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedEvent {
    /// Order lifecycle.
    Order(EventKind, OrderEvent),
    /// Balance lifecycle.
    Balance(EventKind, BalanceEvent),
    /// Component error.
    Error(ErrorEvent),
    /// Strategy signal.
    Signal(SignalEvent),
    /// Health heartbeat.
    Heartbeat(HeartbeatEvent),
}

impl DecodedEvent {
    /// Decodes `bytes` with the shape `kind` requires and validates it.
    ///
    /// # Errors
    ///
    /// - `EventDecodeError::Malformed` when JSON decoding fails (missing
    ///   required field, wrong type, enum value out of range)
    /// - `EventDecodeError::Invalid` when validation fails
    pub fn decode(kind: EventKind, bytes: &[u8]) -> Result<Self, EventDecodeError> {
        let event = match kind.shape() {
            PayloadShape::Order => Self::Order(kind, parse(bytes)?),
            PayloadShape::Balance => Self::Balance(kind, parse(bytes)?),
            PayloadShape::Error => Self::Error(parse(bytes)?),
            PayloadShape::Signal => Self::Signal(parse(bytes)?),
            PayloadShape::Heartbeat => Self::Heartbeat(parse(bytes)?),
        };
        event.validate()?;
        Ok(event)
    }

    /// Runs payload-level validation.
    ///
    /// # Errors
    ///
    /// Returns the first violated rule.
    pub fn validate(&self) -> Result<(), DomainError> {
        match self {
            Self::Order(_, e) => e.validate(),
            Self::Balance(_, e) => e.validate(),
            Self::Error(e) => e.validate(),
            Self::Signal(e) => e.validate(),
            Self::Heartbeat(e) => e.validate(),
        }
    }

    /// Returns the routed subject.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Order(k, _) | Self::Balance(k, _) => *k,
            Self::Error(_) => EventKind::SystemError,
            Self::Signal(_) => EventKind::SignalGenerated,
            Self::Heartbeat(_) => EventKind::BotHeartbeat,
        }
    }

    /// Returns the envelope.
    #[must_use]
    pub fn envelope(&self) -> &EventEnvelope {
        match self {
            Self::Order(_, e) => &e.envelope,
            Self::Balance(_, e) => &e.envelope,
            Self::Error(e) => &e.envelope,
            Self::Signal(e) => &e.envelope,
            Self::Heartbeat(e) => &e.envelope,
        }
    }

    /// Returns the event type, falling back to the subject's default tag.
    #[must_use]
    pub fn event_type(&self) -> String {
        let declared = self.envelope().event_type.trim();
        if declared.is_empty() {
            self.kind().default_event_type().to_string()
        } else {
            declared.to_string()
        }
    }

    /// Returns the user named in the envelope.
    #[must_use]
    pub fn user_id(&self) -> Option<UserId> {
        self.envelope().user_id
    }

    /// Returns the sub-account the event concerns, if any.
    #[must_use]
    pub fn sub_account_id(&self) -> Option<SubAccountId> {
        match self {
            Self::Order(_, e) => Some(e.sub_account_id),
            Self::Balance(_, e) => Some(e.sub_account_id),
            Self::Error(e) => e.sub_account_id,
            Self::Signal(e) => e.sub_account_id,
            Self::Heartbeat(_) => None,
        }
    }
}

fn parse<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, EventDecodeError> {
    serde_json::from_slice(bytes).map_err(|e| EventDecodeError::Malformed(e.to_string()))
}

/// Ledger keys salvaged from a payload that cannot be fully decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeHint {
    /// Event id.
    pub event_id: String,
    /// Event type, if present.
    pub event_type: Option<String>,
    /// User id, if present and well-formed.
    pub user_id: Option<UserId>,
}

impl EnvelopeHint {
    /// Extracts the envelope keys from any JSON object that has a
    /// non-blank string `event_id`.
    #[must_use]
    pub fn extract(bytes: &[u8]) -> Option<Self> {
        let value: Value = serde_json::from_slice(bytes).ok()?;
        let obj = value.as_object()?;
        let event_id = obj.get("event_id")?.as_str()?.trim();
        if event_id.is_empty() {
            return None;
        }
        Some(Self {
            event_id: event_id.to_string(),
            event_type: obj
                .get("event_type")
                .and_then(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .map(str::to_string),
            user_id: obj
                .get("user_id")
                .and_then(Value::as_str)
                .and_then(|s| s.parse().ok()),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn balance_bytes(event_id: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "event_id": event_id,
            "event_type": "balance.updated",
            "sub_account_id": SubAccountId::new_v4().to_string(),
            "symbol": "BTC",
            "previous_balance": "0",
            "new_balance": "1",
            "amount": "1",
            "direction": "credit",
            "reason": "deposit"
        }))
        .unwrap()
    }

    #[test]
    fn decodes_by_subject() {
        let ev = DecodedEvent::decode(EventKind::BalanceUpdated, &balance_bytes("E1")).unwrap();
        assert_eq!(ev.kind(), EventKind::BalanceUpdated);
        assert_eq!(ev.envelope().event_id, "E1");
        assert!(ev.sub_account_id().is_some());
    }

    #[test]
    fn wrong_shape_is_malformed() {
        let err = DecodedEvent::decode(EventKind::OrderCreated, &balance_bytes("E1")).unwrap_err();
        assert!(matches!(err, EventDecodeError::Malformed(_)));
    }

    #[test]
    fn blank_event_id_is_invalid() {
        let err = DecodedEvent::decode(EventKind::BalanceUpdated, &balance_bytes("")).unwrap_err();
        assert!(matches!(err, EventDecodeError::Invalid(_)));
    }

    #[test]
    fn event_type_falls_back_to_subject() {
        let bytes = serde_json::to_vec(&json!({
            "event_id": "H1",
            "status": "healthy",
            "component": "bot"
        }))
        .unwrap();
        let ev = DecodedEvent::decode(EventKind::BotHeartbeat, &bytes).unwrap();
        assert_eq!(ev.event_type(), "bot.heartbeat");
    }

    #[test]
    fn hint_extraction() {
        let hint = EnvelopeHint::extract(br#"{"event_id":"Z9","event_type":"mystery"}"#).unwrap();
        assert_eq!(hint.event_id, "Z9");
        assert_eq!(hint.event_type.as_deref(), Some("mystery"));
        assert!(EnvelopeHint::extract(b"not json").is_none());
        assert!(EnvelopeHint::extract(br#"{"event_id":""}"#).is_none());
    }
}
