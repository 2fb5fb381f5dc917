//! # Query Filters
//!
//! Optional predicates shared by the listing operations. Every field is a
//! conjunct; `None` means "don't filter". Time ranges are half-open,
//! `[from, to)`.

use crate::domain::entities::{Trading, TradingActivityLog, Transaction};
use crate::domain::value_objects::{
    ExchangeBindingId, LogSource, Timestamp, TradingStatus, TradingType, TransactionDirection,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

fn in_range(ts: Timestamp, from: Option<Timestamp>, to: Option<Timestamp>) -> bool {
    from.is_none_or(|f| ts >= f) && to.is_none_or(|t| ts < t)
}

/// Filter over transactions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionFilter {
    /// Direction.
    pub direction: Option<TransactionDirection>,
    /// Exact reason tag.
    pub reason: Option<String>,
    /// Inclusive lower bound on amount.
    pub min_amount: Option<Decimal>,
    /// Inclusive upper bound on amount.
    pub max_amount: Option<Decimal>,
    /// Inclusive lower bound on timestamp.
    pub from: Option<Timestamp>,
    /// Exclusive upper bound on timestamp.
    pub to: Option<Timestamp>,
}

impl TransactionFilter {
    /// Creates an empty filter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts to one direction.
    #[must_use]
    pub fn direction(mut self, direction: TransactionDirection) -> Self {
        self.direction = Some(direction);
        self
    }

    /// Restricts to one reason tag.
    #[must_use]
    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Restricts the amount to `[min, max]`.
    #[must_use]
    pub fn amount_between(mut self, min: Option<Decimal>, max: Option<Decimal>) -> Self {
        self.min_amount = min;
        self.max_amount = max;
        self
    }

    /// Restricts the timestamp to `[from, to)`.
    #[must_use]
    pub fn between(mut self, from: Timestamp, to: Timestamp) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    /// Evaluates the filter in memory.
    #[must_use]
    pub fn matches(&self, tx: &Transaction) -> bool {
        self.direction.is_none_or(|d| tx.direction == d)
            && self.reason.as_ref().is_none_or(|r| &tx.reason == r)
            && self.min_amount.is_none_or(|m| tx.amount >= m)
            && self.max_amount.is_none_or(|m| tx.amount <= m)
            && in_range(tx.timestamp, self.from, self.to)
    }
}

/// Filter over activity log entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogFilter {
    /// Exact type tag.
    pub log_type: Option<String>,
    /// Source.
    pub source: Option<LogSource>,
    /// Inclusive lower bound on timestamp.
    pub from: Option<Timestamp>,
    /// Exclusive upper bound on timestamp.
    pub to: Option<Timestamp>,
}

impl LogFilter {
    /// Creates an empty filter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts to one type tag.
    #[must_use]
    pub fn log_type(mut self, log_type: impl Into<String>) -> Self {
        self.log_type = Some(log_type.into());
        self
    }

    /// Restricts to one source.
    #[must_use]
    pub fn source(mut self, source: LogSource) -> Self {
        self.source = Some(source);
        self
    }

    /// Restricts the timestamp to `[from, to)`.
    #[must_use]
    pub fn between(mut self, from: Timestamp, to: Timestamp) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    /// Evaluates the filter in memory.
    #[must_use]
    pub fn matches(&self, log: &TradingActivityLog) -> bool {
        self.log_type.as_ref().is_none_or(|t| &log.log_type == t)
            && self.source.is_none_or(|s| log.source == s)
            && in_range(log.timestamp, self.from, self.to)
    }
}

/// Filter over tradings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradingFilter {
    /// Status.
    pub status: Option<TradingStatus>,
    /// Type.
    pub trading_type: Option<TradingType>,
    /// Bound binding.
    pub exchange_binding_id: Option<ExchangeBindingId>,
}

impl TradingFilter {
    /// Evaluates the filter in memory.
    #[must_use]
    pub fn matches(&self, trading: &Trading) -> bool {
        self.status.is_none_or(|s| trading.status == s)
            && self.trading_type.is_none_or(|t| trading.trading_type == t)
            && self
                .exchange_binding_id
                .is_none_or(|b| trading.exchange_binding_id == b)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::domain::entities::BalanceChange;
    use crate::domain::entities::SubAccount;
    use crate::domain::value_objects::{TradingId, UserId};

    fn credit(amount: Decimal) -> Transaction {
        let sub = SubAccount::new(UserId::new_v4(), TradingId::new_v4(), "main", "BTC");
        let change = BalanceChange::new(
            sub.id,
            amount,
            amount,
            TransactionDirection::Credit,
            "deposit",
        );
        sub.plan_balance_change(&change, Timestamp::now()).unwrap()
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert!(TransactionFilter::new().matches(&credit(Decimal::ONE)));
        assert!(LogFilter::new().matches(&TradingActivityLog::new(
            UserId::new_v4(),
            TradingId::new_v4(),
            "order",
            LogSource::Bot,
            "filled"
        )));
    }

    #[test]
    fn amount_and_direction() {
        let tx = credit(Decimal::new(5, 1));
        assert!(
            TransactionFilter::new()
                .direction(TransactionDirection::Credit)
                .amount_between(Some(Decimal::new(1, 1)), Some(Decimal::ONE))
                .matches(&tx)
        );
        assert!(
            !TransactionFilter::new()
                .direction(TransactionDirection::Debit)
                .matches(&tx)
        );
        assert!(
            !TransactionFilter::new()
                .amount_between(Some(Decimal::ONE), None)
                .matches(&tx)
        );
    }

    #[test]
    fn time_range_is_half_open() {
        let tx = credit(Decimal::ONE);
        let at = tx.timestamp;
        assert!(TransactionFilter::new().between(at, at.add_secs(1)).matches(&tx));
        assert!(!TransactionFilter::new().between(at.sub_secs(1), at).matches(&tx));
    }
}
