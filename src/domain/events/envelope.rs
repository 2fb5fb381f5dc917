//! # Event Envelope
//!
//! Fields common to every bus payload. The envelope is flattened into each
//! typed payload, so on the wire it is simply part of the top-level JSON
//! object.

use crate::domain::errors::{DomainResult, require_max_len, require_non_blank};
use crate::domain::entities::event_record::MAX_EVENT_ID_LEN;
use crate::domain::value_objects::{Timestamp, UserId};
use serde::{Deserialize, Deserializer, Serialize};

/// Common envelope of a bus event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Globally unique event id; the ledger key.
    pub event_id: String,
    /// Event type tag.
    #[serde(default)]
    pub event_type: String,
    /// When the producer emitted the event.
    #[serde(default)]
    pub timestamp: Timestamp,
    /// User the event concerns.
    #[serde(default, deserialize_with = "empty_string_as_none")]
    pub user_id: Option<UserId>,
    /// Exchange the event originated from.
    #[serde(default)]
    pub exchange_id: Option<String>,
    /// Producing component.
    #[serde(default)]
    pub source: String,
    /// Payload schema version.
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_version() -> String {
    "1.0".to_string()
}

// Producers send `""` for "no user"; treat it like an absent field.
fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<UserId>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => s.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

impl EventEnvelope {
    /// Creates an envelope with a fresh id.
    #[must_use]
    pub fn new(event_type: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            timestamp: Timestamp::now(),
            user_id: None,
            exchange_id: None,
            source: source.into(),
            version: default_version(),
        }
    }

    /// Sets the event id.
    #[must_use]
    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = event_id.into();
        self
    }

    /// Sets the user.
    #[must_use]
    pub fn with_user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Checks that the ledger key is usable.
    ///
    /// # Errors
    ///
    /// Returns `MissingField("event_id")` or `InvalidField` when too long.
    pub fn validate(&self) -> DomainResult<()> {
        require_non_blank("event_id", &self.event_id)?;
        require_max_len("event_id", &self.event_id, MAX_EVENT_ID_LEN)
    }
}
