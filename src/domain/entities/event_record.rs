//! # Event Processing Record
//!
//! One row per bus event id in the ingest ledger. The row is created on the
//! first sighting of an id, moves between `retrying` and `failed` while
//! attempts fail, and ends in the terminal `processed` state. Processed rows
//! older than the retention window are garbage-collected.

use crate::domain::errors::{DomainResult, require_max_len, require_non_blank};
use crate::domain::value_objects::{EventRecordId, EventStatus, SubAccountId, Timestamp, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum event id length.
pub const MAX_EVENT_ID_LEN: usize = 255;

/// Error message recorded for subjects the dispatcher does not route.
pub const UNKNOWN_EVENT_TYPE: &str = "unknown event type";

/// Ledger row for one event id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventProcessingRecord {
    /// Row identifier.
    pub id: EventRecordId,
    /// Globally unique event id from the envelope.
    pub event_id: String,
    /// Event type from the envelope.
    pub event_type: String,
    /// Bus subject the event arrived on.
    pub subject: Option<String>,
    /// User the event concerns.
    pub user_id: Option<UserId>,
    /// Sub-account the event concerns.
    pub sub_account_id: Option<SubAccountId>,
    /// Current status.
    pub status: EventStatus,
    /// Number of failed attempts.
    pub retry_count: u32,
    /// Message of the last failure.
    pub error_message: Option<String>,
    /// Raw payload, kept so failed events can be re-dispatched.
    pub payload: Option<Value>,
    /// Time of the last status change.
    pub processed_at: Timestamp,
    /// First sighting.
    pub created_at: Timestamp,
    /// Last modification time.
    pub updated_at: Timestamp,
}

impl EventProcessingRecord {
    /// Creates a record in the given status.
    #[must_use]
    pub fn new(
        event_id: impl Into<String>,
        event_type: impl Into<String>,
        status: EventStatus,
    ) -> Self {
        let now = Timestamp::now();
        Self {
            id: EventRecordId::new_v4(),
            event_id: event_id.into(),
            event_type: event_type.into(),
            subject: None,
            user_id: None,
            sub_account_id: None,
            status,
            retry_count: 0,
            error_message: None,
            payload: None,
            processed_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns true for the terminal state.
    #[inline]
    #[must_use]
    pub fn is_processed(&self) -> bool {
        self.status.is_terminal()
    }

    /// Returns true if the retry worker should pick this row up.
    #[must_use]
    pub fn is_retryable(&self, max_retries: u32) -> bool {
        self.status == EventStatus::Failed && self.retry_count < max_retries
    }

    /// Checks structural invariants.
    ///
    /// # Errors
    ///
    /// Returns the first violated rule.
    pub fn validate(&self) -> DomainResult<()> {
        require_non_blank("event_id", &self.event_id)?;
        require_max_len("event_id", &self.event_id, MAX_EVENT_ID_LEN)?;
        require_non_blank("event_type", &self.event_type)
    }
}
