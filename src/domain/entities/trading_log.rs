//! # Trading Activity Log Entity
//!
//! Append-only record of what happened on a trading: orders, balance
//! movements, signals, errors. Only admin housekeeping removes rows, and it
//! hard-deletes them.

use crate::domain::errors::{DomainResult, require_max_len, require_non_blank};
use crate::domain::value_objects::{
    AttributeMap, LogSource, SubAccountId, Timestamp, TradingId, TradingLogId, TransactionId,
    UserId,
};
use serde::{Deserialize, Serialize};

/// Log type tags written by event ingest.
pub mod log_types {
    /// Order lifecycle events.
    pub const ORDER: &str = "order";
    /// Balance movements.
    pub const BALANCE: &str = "balance";
    /// Strategy signals.
    pub const SIGNAL: &str = "signal";
    /// Component errors.
    pub const ERROR: &str = "error";
}

/// One activity log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingActivityLog {
    /// Identifier.
    pub id: TradingLogId,
    /// Owner.
    pub user_id: UserId,
    /// Trading the entry belongs to.
    pub trading_id: TradingId,
    /// Sub-account, when the entry concerns one.
    pub sub_account_id: Option<SubAccountId>,
    /// Journal entry, when the entry records a balance transition.
    pub transaction_id: Option<TransactionId>,
    /// When it happened.
    pub timestamp: Timestamp,
    /// Type tag (see [`log_types`]).
    pub log_type: String,
    /// Manual or bot.
    pub source: LogSource,
    /// Human-readable message.
    pub message: String,
    /// Free-form attributes.
    pub info: AttributeMap,
    /// Insertion time.
    pub created_at: Timestamp,
}

impl TradingActivityLog {
    /// Creates an entry timestamped now.
    #[must_use]
    pub fn new(
        user_id: UserId,
        trading_id: TradingId,
        log_type: impl Into<String>,
        source: LogSource,
        message: impl Into<String>,
    ) -> Self {
        let now = Timestamp::now();
        Self {
            id: TradingLogId::new_v4(),
            user_id,
            trading_id,
            sub_account_id: None,
            transaction_id: None,
            timestamp: now,
            log_type: log_type.into(),
            source,
            message: message.into(),
            info: AttributeMap::new(),
            created_at: now,
        }
    }

    /// Links a sub-account.
    #[must_use]
    pub fn with_sub_account(mut self, id: SubAccountId) -> Self {
        self.sub_account_id = Some(id);
        self
    }

    /// Links a journal entry.
    #[must_use]
    pub fn with_transaction(mut self, id: TransactionId) -> Self {
        self.transaction_id = Some(id);
        self
    }

    /// Overrides the event time.
    #[must_use]
    pub fn with_timestamp(mut self, ts: Timestamp) -> Self {
        self.timestamp = ts;
        self
    }

    /// Replaces the info map.
    #[must_use]
    pub fn with_info(mut self, info: AttributeMap) -> Self {
        self.info = info;
        self
    }

    /// Checks structural invariants.
    ///
    /// # Errors
    ///
    /// Returns the first violated rule.
    pub fn validate(&self) -> DomainResult<()> {
        require_non_blank("log_type", &self.log_type)?;
        require_max_len("log_type", &self.log_type, 32)?;
        require_non_blank("message", &self.message)
    }
}
