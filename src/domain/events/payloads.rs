//! # Event Payloads
//!
//! Typed bodies for each [`PayloadShape`](super::PayloadShape). Enumerated
//! fields are closed sets: an out-of-range value fails decoding, which the
//! dispatcher records as a failed event.

use crate::domain::errors::{DomainError, DomainResult, require_non_blank};
use crate::domain::events::envelope::EventEnvelope;
use crate::domain::value_objects::{AttributeMap, SubAccountId, TransactionDirection};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    /// Buy.
    Buy,
    /// Sell.
    Sell,
}

/// Severity of a component error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational.
    Low,
    /// Needs attention.
    Medium,
    /// Degrades service.
    High,
    /// Service down.
    Critical,
}

/// Direction suggested by a strategy signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalType {
    /// Enter long.
    Buy,
    /// Exit or enter short.
    Sell,
    /// Do nothing.
    Hold,
}

/// Health reported by a heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Fully operational.
    Healthy,
    /// Operational with issues.
    Degraded,
    /// Not operational.
    Unhealthy,
}

/// `trading.orders.*` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderEvent {
    /// Envelope.
    #[serde(flatten)]
    pub envelope: EventEnvelope,
    /// Sub-account the order trades from.
    pub sub_account_id: SubAccountId,
    /// Exchange order id.
    pub order_id: String,
    /// Traded symbol.
    pub symbol: String,
    /// Buy or sell.
    pub side: OrderSide,
    /// Order type, e.g. `limit`.
    #[serde(rename = "type")]
    pub order_type: String,
    /// Order quantity.
    pub amount: Decimal,
    /// Exchange-reported status.
    pub status: String,
    /// Human-readable message.
    pub message: String,
    /// Limit or fill price.
    #[serde(default)]
    pub price: Option<Decimal>,
    /// Extra data.
    #[serde(default)]
    pub metadata: AttributeMap,
}

impl OrderEvent {
    /// Checks required fields.
    ///
    /// # Errors
    ///
    /// Returns the first missing or invalid field.
    pub fn validate(&self) -> DomainResult<()> {
        self.envelope.validate()?;
        require_non_blank("order_id", &self.order_id)?;
        require_non_blank("symbol", &self.symbol)?;
        require_non_blank("type", &self.order_type)?;
        require_non_blank("status", &self.status)?;
        if self.amount <= Decimal::ZERO {
            return Err(DomainError::invalid("amount", "must be greater than zero"));
        }
        Ok(())
    }
}

/// `trading.balance.*` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceEvent {
    /// Envelope.
    #[serde(flatten)]
    pub envelope: EventEnvelope,
    /// Sub-account whose balance moved.
    pub sub_account_id: SubAccountId,
    /// Asset symbol.
    pub symbol: String,
    /// Balance the producer observed before.
    pub previous_balance: Decimal,
    /// Balance the producer claims after.
    pub new_balance: Decimal,
    /// Strictly positive amount.
    pub amount: Decimal,
    /// Debit or credit.
    pub direction: TransactionDirection,
    /// Reason tag.
    pub reason: String,
    /// Order that caused the movement.
    #[serde(default)]
    pub related_order_id: Option<String>,
    /// Extra data.
    #[serde(default)]
    pub metadata: AttributeMap,
}

impl BalanceEvent {
    /// Checks required fields.
    ///
    /// # Errors
    ///
    /// Returns the first missing or invalid field.
    pub fn validate(&self) -> DomainResult<()> {
        self.envelope.validate()?;
        require_non_blank("symbol", &self.symbol)?;
        require_non_blank("reason", &self.reason)?;
        if self.amount <= Decimal::ZERO {
            return Err(DomainError::invalid("amount", "must be greater than zero"));
        }
        Ok(())
    }
}

/// `trading.errors` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    /// Envelope.
    #[serde(flatten)]
    pub envelope: EventEnvelope,
    /// Machine-readable code.
    pub error_code: String,
    /// Human-readable message.
    pub error_message: String,
    /// Severity.
    pub severity: Severity,
    /// Failing component.
    pub component: String,
    /// Affected sub-account.
    #[serde(default)]
    pub sub_account_id: Option<SubAccountId>,
    /// Stack trace.
    #[serde(default)]
    pub stack_trace: Option<String>,
    /// Extra data.
    #[serde(default)]
    pub metadata: AttributeMap,
}

impl ErrorEvent {
    /// Checks required fields.
    ///
    /// # Errors
    ///
    /// Returns the first missing field.
    pub fn validate(&self) -> DomainResult<()> {
        self.envelope.validate()?;
        require_non_blank("error_code", &self.error_code)?;
        require_non_blank("error_message", &self.error_message)?;
        require_non_blank("component", &self.component)
    }
}

/// `trading.signals` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalEvent {
    /// Envelope.
    #[serde(flatten)]
    pub envelope: EventEnvelope,
    /// Suggested direction.
    pub signal_type: SignalType,
    /// Symbol the signal is for.
    pub symbol: String,
    /// Confidence in `[0, 1]`.
    pub confidence: Decimal,
    /// Strategy name.
    pub strategy: String,
    /// Explanation.
    pub reasoning: String,
    /// Sub-account the signal targets.
    #[serde(default)]
    pub sub_account_id: Option<SubAccountId>,
    /// Reference price.
    #[serde(default)]
    pub price: Option<Decimal>,
}

impl SignalEvent {
    /// Checks required fields and the confidence range.
    ///
    /// # Errors
    ///
    /// Returns the first missing or invalid field.
    pub fn validate(&self) -> DomainResult<()> {
        self.envelope.validate()?;
        require_non_blank("symbol", &self.symbol)?;
        require_non_blank("strategy", &self.strategy)?;
        if self.confidence < Decimal::ZERO || self.confidence > Decimal::ONE {
            return Err(DomainError::invalid("confidence", "must be within [0, 1]"));
        }
        Ok(())
    }
}

/// `system.heartbeat` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatEvent {
    /// Envelope.
    #[serde(flatten)]
    pub envelope: EventEnvelope,
    /// Reported health.
    pub status: HealthStatus,
    /// Reporting component.
    pub component: String,
    /// Free-form metrics.
    #[serde(default)]
    pub metrics: Option<Value>,
}

impl HeartbeatEvent {
    /// Checks required fields.
    ///
    /// # Errors
    ///
    /// Returns the first missing field.
    pub fn validate(&self) -> DomainResult<()> {
        self.envelope.validate()?;
        require_non_blank("component", &self.component)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn order_event_decodes_flattened_envelope() {
        let sub = SubAccountId::new_v4();
        let ev: OrderEvent = serde_json::from_value(json!({
            "event_id": "E1",
            "event_type": "order.created",
            "timestamp": "2024-01-01T00:00:00Z",
            "source": "bot-1",
            "sub_account_id": sub.to_string(),
            "order_id": "O-1",
            "symbol": "BTCUSDT",
            "side": "buy",
            "type": "limit",
            "amount": "0.5",
            "status": "new",
            "message": "placed",
            "price": 42000.5
        }))
        .unwrap();
        assert_eq!(ev.envelope.event_id, "E1");
        assert_eq!(ev.sub_account_id, sub);
        assert_eq!(ev.side, OrderSide::Buy);
        assert_eq!(ev.price, Some("42000.5".parse().unwrap()));
        assert!(ev.validate().is_ok());
    }

    #[test]
    fn unknown_side_fails_decode() {
        let res: Result<OrderEvent, _> = serde_json::from_value(json!({
            "event_id": "E1",
            "sub_account_id": SubAccountId::new_v4().to_string(),
            "order_id": "O-1",
            "symbol": "BTC",
            "side": "long",
            "type": "market",
            "amount": "1",
            "status": "new",
            "message": ""
        }));
        assert!(res.is_err());
    }

    #[test]
    fn signal_confidence_range() {
        let mut ev: SignalEvent = serde_json::from_value(json!({
            "event_id": "S1",
            "signal_type": "hold",
            "symbol": "ETH",
            "confidence": 0.7,
            "strategy": "momentum",
            "reasoning": "flat"
        }))
        .unwrap();
        assert!(ev.validate().is_ok());
        ev.confidence = "1.5".parse().unwrap();
        assert!(ev.validate().is_err());
    }

    #[test]
    fn heartbeat_severity_sets() {
        let ev: HeartbeatEvent = serde_json::from_value(json!({
            "event_id": "H1",
            "status": "degraded",
            "component": "executor",
            "metrics": {"lag_ms": 12}
        }))
        .unwrap();
        assert_eq!(ev.status, HealthStatus::Degraded);
        assert!(ev.validate().is_ok());
    }

    #[test]
    fn error_event_requires_code() {
        let ev: ErrorEvent = serde_json::from_value(json!({
            "event_id": "X1",
            "error_code": "",
            "error_message": "boom",
            "severity": "critical",
            "component": "feed"
        }))
        .unwrap();
        assert_eq!(ev.validate(), Err(DomainError::MissingField("error_code")));
    }
}
