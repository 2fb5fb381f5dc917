//! # Bus Subjects
//!
//! The ten wire-level subjects the dispatcher routes. Subject strings are
//! matched exactly.
//!
//! # Examples
//!
//! ```
//! use trade_accounts::domain::events::{EventKind, PayloadShape};
//!
//! let kind = EventKind::from_subject("trading.balance.updated").unwrap();
//! assert_eq!(kind, EventKind::BalanceUpdated);
//! assert_eq!(kind.shape(), PayloadShape::Balance);
//! assert!(EventKind::from_subject("trading.balance.Updated").is_none());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// A routed bus subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// `trading.orders.created`
    OrderCreated,
    /// `trading.orders.filled`
    OrderFilled,
    /// `trading.orders.cancelled`
    OrderCancelled,
    /// `trading.orders.failed`
    OrderFailed,
    /// `trading.balance.updated`
    BalanceUpdated,
    /// `trading.balance.locked`
    BalanceLocked,
    /// `trading.balance.unlocked`
    BalanceUnlocked,
    /// `trading.errors`
    SystemError,
    /// `trading.signals`
    SignalGenerated,
    /// `system.heartbeat`
    BotHeartbeat,
}

/// Payload body shape carried by a subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadShape {
    /// Order lifecycle body.
    Order,
    /// Balance lifecycle body.
    Balance,
    /// Component error body.
    Error,
    /// Strategy signal body.
    Signal,
    /// Health heartbeat body.
    Heartbeat,
}

impl EventKind {
    /// Every routed subject.
    pub const ALL: [EventKind; 10] = [
        Self::OrderCreated,
        Self::OrderFilled,
        Self::OrderCancelled,
        Self::OrderFailed,
        Self::BalanceUpdated,
        Self::BalanceLocked,
        Self::BalanceUnlocked,
        Self::SystemError,
        Self::SignalGenerated,
        Self::BotHeartbeat,
    ];

    /// Returns the wire subject.
    #[must_use]
    pub const fn subject(self) -> &'static str {
        match self {
            Self::OrderCreated => "trading.orders.created",
            Self::OrderFilled => "trading.orders.filled",
            Self::OrderCancelled => "trading.orders.cancelled",
            Self::OrderFailed => "trading.orders.failed",
            Self::BalanceUpdated => "trading.balance.updated",
            Self::BalanceLocked => "trading.balance.locked",
            Self::BalanceUnlocked => "trading.balance.unlocked",
            Self::SystemError => "trading.errors",
            Self::SignalGenerated => "trading.signals",
            Self::BotHeartbeat => "system.heartbeat",
        }
    }

    /// Resolves an exact wire subject.
    #[must_use]
    pub fn from_subject(subject: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.subject() == subject)
    }

    /// Returns the payload shape for this subject.
    #[must_use]
    pub const fn shape(self) -> PayloadShape {
        match self {
            Self::OrderCreated | Self::OrderFilled | Self::OrderCancelled | Self::OrderFailed => {
                PayloadShape::Order
            }
            Self::BalanceUpdated | Self::BalanceLocked | Self::BalanceUnlocked => {
                PayloadShape::Balance
            }
            Self::SystemError => PayloadShape::Error,
            Self::SignalGenerated => PayloadShape::Signal,
            Self::BotHeartbeat => PayloadShape::Heartbeat,
        }
    }

    /// Event type tag recorded in the ledger when the envelope has none.
    #[must_use]
    pub const fn default_event_type(self) -> &'static str {
        match self {
            Self::OrderCreated => "order.created",
            Self::OrderFilled => "order.filled",
            Self::OrderCancelled => "order.cancelled",
            Self::OrderFailed => "order.failed",
            Self::BalanceUpdated => "balance.updated",
            Self::BalanceLocked => "balance.locked",
            Self::BalanceUnlocked => "balance.unlocked",
            Self::SystemError => "system.error",
            Self::SignalGenerated => "signal.generated",
            Self::BotHeartbeat => "bot.heartbeat",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.subject())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_subject_roundtrips() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::from_subject(kind.subject()), Some(kind));
        }
    }

    #[test]
    fn subjects_are_bit_exact() {
        assert_eq!(EventKind::SystemError.subject(), "trading.errors");
        assert_eq!(EventKind::BotHeartbeat.subject(), "system.heartbeat");
        assert!(EventKind::from_subject("trading.orders.created ").is_none());
        assert!(EventKind::from_subject("trading.orders").is_none());
    }

    #[test]
    fn shapes() {
        assert_eq!(EventKind::OrderFailed.shape(), PayloadShape::Order);
        assert_eq!(EventKind::BalanceLocked.shape(), PayloadShape::Balance);
        assert_eq!(EventKind::SignalGenerated.shape(), PayloadShape::Signal);
    }
}
