//! # Event Dispatcher
//!
//! Turns a raw bus message (subject plus bytes) into ledger-guarded work.
//!
//! The subject selects the payload shape; the payload is decoded and
//! validated, then handed to the [`EventIngestLedger`] together with the
//! effects it causes. The dispatcher holds no connection state and does
//! not retry: retries belong to the ledger and the retry worker.
//!
//! Effects per event family:
//!
//! | Subject                   | Effect                                          |
//! |---------------------------|-------------------------------------------------|
//! | `trading.balance.updated` | balance change through the mutator, plus a log  |
//! | `trading.balance.locked`  | activity log                                    |
//! | `trading.balance.unlocked`| activity log                                    |
//! | `trading.orders.*`        | activity log                                    |
//! | `trading.errors`          | activity log when a sub-account is named        |
//! | `trading.signals`         | activity log when a sub-account is named        |
//! | `system.heartbeat`        | ledger entry only                               |
//!
//! Deliveries that cannot be decoded are recorded as failed under their
//! `event_id` when one can be salvaged, and rejected otherwise.

use crate::application::error::{ApplicationError, ApplicationResult};
use crate::application::services::event_ingest::EventIngestLedger;
use crate::domain::entities::{
    BalanceChange, EventProcessingRecord, SubAccount, TradingActivityLog, UNKNOWN_EVENT_TYPE,
    log_types,
};
use crate::domain::errors::{DomainError, ErrorKind};
use crate::domain::events::{
    BalanceEvent, DecodedEvent, EnvelopeHint, ErrorEvent, EventKind, OrderEvent, SignalEvent,
};
use crate::domain::value_objects::{AttributeMap, LogSource, SubAccountId, UserId};
use crate::infrastructure::persistence::{
    EventClaim, EventEffects, IngestOutcome, IngestWork, RepositoryError, RepositoryResult,
};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Counter key for subjects that are not routed.
pub const UNROUTED_SUBJECT: &str = "<unrouted>";

/// Result of dispatching one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The event's effects were committed.
    Processed,
    /// The event id was already processed.
    DuplicateIgnored,
    /// The event was recorded as failed.
    Failed {
        /// Taxonomy tag of the failure.
        kind: ErrorKind,
        /// Failure message as stored.
        error: String,
        /// Retry counter after this attempt.
        retry_count: u32,
    },
    /// The message carried no usable event id and was dropped.
    Rejected {
        /// Why.
        reason: String,
    },
}

impl From<IngestOutcome> for DispatchOutcome {
    fn from(outcome: IngestOutcome) -> Self {
        match outcome {
            IngestOutcome::Processed => Self::Processed,
            IngestOutcome::DuplicateIgnored => Self::DuplicateIgnored,
            IngestOutcome::Failed {
                kind,
                error,
                retry_count,
            } => Self::Failed {
                kind,
                error,
                retry_count,
            },
        }
    }
}

/// Per-subject delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectCounters {
    /// Messages seen.
    pub received: u64,
    /// Committed.
    pub processed: u64,
    /// Already processed.
    pub duplicates: u64,
    /// Recorded as failed.
    pub failed: u64,
    /// Dropped without a ledger entry.
    pub rejected: u64,
}

/// Routes bus messages into the ingest ledger.
#[derive(Debug)]
pub struct EventDispatcher {
    ledger: EventIngestLedger,
    counters: DashMap<String, SubjectCounters>,
}

impl EventDispatcher {
    /// Creates a dispatcher over `ledger`.
    #[must_use]
    pub fn new(ledger: EventIngestLedger) -> Self {
        Self {
            ledger,
            counters: DashMap::new(),
        }
    }

    /// The ledger this dispatcher writes to.
    #[must_use]
    pub fn ledger(&self) -> &EventIngestLedger {
        &self.ledger
    }

    /// Dispatches one message.
    ///
    /// # Errors
    ///
    /// Returns an error only if the ledger cannot be written; every event
    /// failure is reported as an outcome.
    pub async fn dispatch(
        &self,
        subject: &str,
        payload: &[u8],
    ) -> ApplicationResult<DispatchOutcome> {
        let kind = EventKind::from_subject(subject);
        let outcome = match kind {
            Some(kind) => match DecodedEvent::decode(kind, payload) {
                Ok(event) => self.ingest(subject, payload, event).await?,
                Err(e) => self.record_undecodable(subject, payload, &e.to_string()).await?,
            },
            None => self.record_undecodable(subject, payload, UNKNOWN_EVENT_TYPE).await?,
        };

        let key = kind.map_or(UNROUTED_SUBJECT, EventKind::subject);
        self.count(key, &outcome);
        match &outcome {
            DispatchOutcome::Processed | DispatchOutcome::DuplicateIgnored => {
                debug!(subject, ?outcome, "event dispatched");
            }
            DispatchOutcome::Failed { error, retry_count, .. } => {
                warn!(subject, error = %error, retry_count, "event failed");
            }
            DispatchOutcome::Rejected { reason } => {
                warn!(subject, reason = %reason, "event rejected");
            }
        }
        Ok(outcome)
    }

    /// Re-dispatches a failed record from its stored subject and payload.
    ///
    /// # Errors
    ///
    /// As [`EventDispatcher::dispatch`].
    pub async fn redispatch(
        &self,
        record: &EventProcessingRecord,
    ) -> ApplicationResult<DispatchOutcome> {
        let (Some(subject), Some(payload)) = (&record.subject, &record.payload) else {
            let claim = EventClaim::new(&record.event_id, &record.event_type)
                .with_owner(record.user_id, record.sub_account_id);
            let stored = self
                .ledger
                .record_failure(&claim, "no stored payload to replay")
                .await?;
            return Ok(DispatchOutcome::Failed {
                kind: ErrorKind::Internal,
                error: stored.error_message.unwrap_or_default(),
                retry_count: stored.retry_count,
            });
        };
        let bytes =
            serde_json::to_vec(payload).map_err(|e| ApplicationError::internal(e.to_string()))?;
        self.dispatch(subject, &bytes).await
    }

    /// Snapshot of the per-subject counters.
    #[must_use]
    pub fn counters(&self) -> BTreeMap<String, SubjectCounters> {
        self.counters
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    fn count(&self, subject: &str, outcome: &DispatchOutcome) {
        let mut entry = self.counters.entry(subject.to_string()).or_default();
        entry.received += 1;
        match outcome {
            DispatchOutcome::Processed => entry.processed += 1,
            DispatchOutcome::DuplicateIgnored => entry.duplicates += 1,
            DispatchOutcome::Failed { .. } => entry.failed += 1,
            DispatchOutcome::Rejected { .. } => entry.rejected += 1,
        }
    }

    async fn ingest(
        &self,
        subject: &str,
        payload: &[u8],
        event: DecodedEvent,
    ) -> ApplicationResult<DispatchOutcome> {
        let mut claim = EventClaim::new(&event.envelope().event_id, event.event_type())
            .with_subject(subject)
            .with_owner(event.user_id(), event.sub_account_id());
        if let Ok(value) = serde_json::from_slice::<Value>(payload) {
            claim = claim.with_payload(value);
        }
        let work = EventWork { event };
        Ok(self.ledger.ingest(&claim, &work).await?.into())
    }

    async fn record_undecodable(
        &self,
        subject: &str,
        payload: &[u8],
        error: &str,
    ) -> ApplicationResult<DispatchOutcome> {
        let Some(hint) = EnvelopeHint::extract(payload) else {
            return Ok(DispatchOutcome::Rejected {
                reason: format!("{error}; no event_id to record it under"),
            });
        };
        let event_type = hint
            .event_type
            .unwrap_or_else(|| UNKNOWN_EVENT_TYPE.to_string());
        let mut claim = EventClaim::new(hint.event_id, event_type)
            .with_subject(subject)
            .with_owner(hint.user_id, None);
        if let Ok(value) = serde_json::from_slice::<Value>(payload) {
            claim = claim.with_payload(value);
        }
        let stored = self.ledger.record_failure(&claim, error).await?;
        if stored.is_processed() {
            return Ok(DispatchOutcome::DuplicateIgnored);
        }
        Ok(DispatchOutcome::Failed {
            kind: ErrorKind::Validation,
            error: error.to_string(),
            retry_count: stored.retry_count,
        })
    }
}

/// Effects of one decoded event.
struct EventWork {
    event: DecodedEvent,
}

#[async_trait]
impl IngestWork for EventWork {
    async fn apply(&self, effects: &mut dyn EventEffects) -> RepositoryResult<()> {
        match &self.event {
            DecodedEvent::Balance(kind, e) => apply_balance(effects, *kind, e).await,
            DecodedEvent::Order(_, e) => apply_order(effects, e).await,
            DecodedEvent::Error(e) => apply_error(effects, e).await,
            DecodedEvent::Signal(e) => apply_signal(effects, e).await,
            DecodedEvent::Heartbeat(_) => Ok(()),
        }
    }
}

/// Wire form of a serde enum, e.g. `"buy"`.
fn tag<T: Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(Value::String(s)) => s,
        Ok(other) => other.to_string(),
        Err(_) => String::new(),
    }
}

async fn owned_sub_account(
    effects: &mut dyn EventEffects,
    id: SubAccountId,
    claimed_owner: Option<UserId>,
) -> RepositoryResult<SubAccount> {
    let sub = effects
        .sub_account(id)
        .await?
        .ok_or_else(|| RepositoryError::reference_not_found("SubAccount", id))?;
    if let Some(user) = claimed_owner
        && user != sub.user_id
    {
        return Err(RepositoryError::access_denied(format!(
            "sub-account {id} is not owned by user {user}"
        )));
    }
    Ok(sub)
}

fn log_for(
    sub: &SubAccount,
    log_type: &str,
    message: String,
    info: AttributeMap,
) -> TradingActivityLog {
    TradingActivityLog::new(sub.user_id, sub.trading_id, log_type, LogSource::Bot, message)
        .with_sub_account(sub.id)
        .with_info(info)
}

async fn apply_balance(
    effects: &mut dyn EventEffects,
    kind: EventKind,
    e: &BalanceEvent,
) -> RepositoryResult<()> {
    let sub = owned_sub_account(effects, e.sub_account_id, e.envelope.user_id).await?;
    if !e.symbol.trim().eq_ignore_ascii_case(&sub.symbol) {
        return Err(DomainError::invalid(
            "symbol",
            format!("event symbol {} does not match sub-account symbol {}", e.symbol, sub.symbol),
        )
        .into());
    }

    let mut info = e.metadata.clone();
    info.insert("event_id", json!(e.envelope.event_id));
    info.insert("reported_previous_balance", json!(e.previous_balance.to_string()));
    if let Some(order) = &e.related_order_id {
        info.insert("related_order_id", json!(order));
    }

    let message = format!(
        "{} {} {} {} ({})",
        kind.default_event_type(),
        e.direction,
        e.amount,
        sub.symbol,
        e.reason
    );
    let mut log = log_for(&sub, log_types::BALANCE, message, info.clone())
        .with_timestamp(e.envelope.timestamp);

    // Locks and unlocks reserve funds on the exchange; only updates move
    // the journal.
    if kind == EventKind::BalanceUpdated {
        let change = BalanceChange::new(sub.id, e.new_balance, e.amount, e.direction, &e.reason)
            .with_info(info);
        let tx = effects.apply_balance_change(&change).await?;
        log = log.with_transaction(tx.id);
    }
    effects.append_log(&log).await
}

async fn apply_order(effects: &mut dyn EventEffects, e: &OrderEvent) -> RepositoryResult<()> {
    let sub = owned_sub_account(effects, e.sub_account_id, e.envelope.user_id).await?;
    let mut info = e.metadata.clone();
    info.insert("event_id", json!(e.envelope.event_id));
    info.insert("order_id", json!(e.order_id));
    info.insert("symbol", json!(e.symbol));
    info.insert("side", json!(e.side));
    info.insert("type", json!(e.order_type));
    info.insert("amount", json!(e.amount.to_string()));
    info.insert("status", json!(e.status));
    if let Some(price) = e.price {
        info.insert("price", json!(price.to_string()));
    }

    let message = format!(
        "order {} {} {} {}: {}",
        e.order_id,
        tag(&e.side),
        e.symbol,
        e.status,
        e.message
    );
    let log = log_for(&sub, log_types::ORDER, message, info).with_timestamp(e.envelope.timestamp);
    effects.append_log(&log).await
}

async fn apply_error(effects: &mut dyn EventEffects, e: &ErrorEvent) -> RepositoryResult<()> {
    let Some(sub_id) = e.sub_account_id else {
        warn!(
            component = %e.component,
            error_code = %e.error_code,
            severity = %tag(&e.severity),
            "component error without sub-account"
        );
        return Ok(());
    };
    let sub = owned_sub_account(effects, sub_id, e.envelope.user_id).await?;
    let mut info = e.metadata.clone();
    info.insert("event_id", json!(e.envelope.event_id));
    info.insert("error_code", json!(e.error_code));
    info.insert("severity", json!(e.severity));
    info.insert("component", json!(e.component));
    if let Some(trace) = &e.stack_trace {
        info.insert("stack_trace", json!(trace));
    }

    let message = format!(
        "[{}] {}: {}",
        tag(&e.severity),
        e.component,
        e.error_message
    );
    let log = log_for(&sub, log_types::ERROR, message, info).with_timestamp(e.envelope.timestamp);
    effects.append_log(&log).await
}

async fn apply_signal(effects: &mut dyn EventEffects, e: &SignalEvent) -> RepositoryResult<()> {
    let Some(sub_id) = e.sub_account_id else {
        return Ok(());
    };
    let sub = owned_sub_account(effects, sub_id, e.envelope.user_id).await?;
    let mut info = AttributeMap::new();
    info.insert("event_id", json!(e.envelope.event_id));
    info.insert("signal_type", json!(e.signal_type));
    info.insert("symbol", json!(e.symbol));
    info.insert("confidence", json!(e.confidence.to_string()));
    info.insert("strategy", json!(e.strategy));
    info.insert("reasoning", json!(e.reasoning));
    if let Some(price) = e.price {
        info.insert("price", json!(price.to_string()));
    }

    let message = format!(
        "{} {} ({}, confidence {})",
        tag(&e.signal_type),
        e.symbol,
        e.strategy,
        e.confidence
    );
    let log = log_for(&sub, log_types::SIGNAL, message, info).with_timestamp(e.envelope.timestamp);
    effects.append_log(&log).await
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::EventsConfig;
    use crate::domain::entities::{ExchangeBinding, SupportedExchanges, Trading, User};
    use crate::domain::value_objects::{EventStatus, PageRequest, TradingType};
    use crate::infrastructure::persistence::{
        LogFilter, Repositories, TransactionFilter,
    };
    use rust_decimal::Decimal;

    struct Fixture {
        repos: Repositories,
        dispatcher: EventDispatcher,
        user: UserId,
        sub: SubAccount,
    }

    async fn fixture() -> Fixture {
        let repos = Repositories::in_memory(SupportedExchanges::default());
        let user = User::new("alice", "a@x");
        repos.users.create(&user).await.unwrap();
        let binding = ExchangeBinding::public("shared", "binance");
        repos.bindings.create(&binding).await.unwrap();
        let trading = Trading::new(user.id, binding.id, "bot", TradingType::Virtual);
        repos.tradings.create(&trading).await.unwrap();
        let sub = SubAccount::new(user.id, trading.id, "btc", "BTC");
        repos.sub_accounts.create(&sub).await.unwrap();

        let ledger = EventIngestLedger::new(repos.events.clone(), &EventsConfig::default());
        Fixture {
            dispatcher: EventDispatcher::new(ledger),
            repos,
            user: user.id,
            sub,
        }
    }

    fn credit(event_id: &str, f: &Fixture, new_balance: &str, amount: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "event_id": event_id,
            "event_type": "balance.updated",
            "user_id": f.user.to_string(),
            "source": "bot-1",
            "sub_account_id": f.sub.id.to_string(),
            "symbol": "BTC",
            "previous_balance": "0",
            "new_balance": new_balance,
            "amount": amount,
            "direction": "credit",
            "reason": "deposit"
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn balance_credit_applies_once() {
        let f = fixture().await;
        let bytes = credit("E1", &f, "1.5", "1.5");

        let first = f.dispatcher.dispatch("trading.balance.updated", &bytes).await.unwrap();
        assert_eq!(first, DispatchOutcome::Processed);
        let second = f.dispatcher.dispatch("trading.balance.updated", &bytes).await.unwrap();
        assert_eq!(second, DispatchOutcome::DuplicateIgnored);

        let sub = f.repos.sub_accounts.get_by_id(f.sub.id).await.unwrap().unwrap();
        assert_eq!(sub.balance, Decimal::new(15, 1));

        let txs = f
            .repos
            .transactions
            .get_by_sub_account(f.sub.id, &TransactionFilter::new(), PageRequest::default())
            .await
            .unwrap();
        assert_eq!(txs.total, 1);

        let logs = f
            .repos
            .logs
            .get_by_sub_account(f.sub.id, &LogFilter::new(), PageRequest::default())
            .await
            .unwrap();
        assert_eq!(logs.total, 1);
        assert_eq!(logs.items[0].transaction_id, Some(txs.items[0].id));

        let counters = f.dispatcher.counters();
        let c = counters["trading.balance.updated"];
        assert_eq!((c.received, c.processed, c.duplicates), (2, 1, 1));
    }

    #[tokio::test]
    async fn arithmetic_mismatch_fails_and_rolls_back() {
        let f = fixture().await;
        let bytes = credit("E2", &f, "2", "1");
        let outcome = f.dispatcher.dispatch("trading.balance.updated", &bytes).await.unwrap();
        assert!(matches!(
            outcome,
            DispatchOutcome::Failed {
                kind: ErrorKind::BalanceArithmeticMismatch,
                retry_count: 1,
                ..
            }
        ));

        let sub = f.repos.sub_accounts.get_by_id(f.sub.id).await.unwrap().unwrap();
        assert!(sub.balance.is_zero());
        let logs = f
            .repos
            .logs
            .get_by_user(f.user, &LogFilter::new(), PageRequest::default())
            .await
            .unwrap();
        assert_eq!(logs.total, 0);

        let record = f.repos.events.get_by_event_id("E2").await.unwrap().unwrap();
        assert_eq!(record.status, EventStatus::Failed);
        assert!(record.payload.is_some());
    }

    #[tokio::test]
    async fn unknown_subject_is_recorded() {
        let f = fixture().await;
        let outcome = f
            .dispatcher
            .dispatch("trading.mystery", br#"{"event_id":"E3","event_type":"mystery"}"#)
            .await
            .unwrap();
        assert!(matches!(outcome, DispatchOutcome::Failed { retry_count: 1, .. }));

        let record = f.repos.events.get_by_event_id("E3").await.unwrap().unwrap();
        assert_eq!(record.error_message.as_deref(), Some(UNKNOWN_EVENT_TYPE));
        assert_eq!(record.subject.as_deref(), Some("trading.mystery"));
        assert_eq!(f.dispatcher.counters()[UNROUTED_SUBJECT].failed, 1);
    }

    #[tokio::test]
    async fn garbage_without_event_id_is_rejected() {
        let f = fixture().await;
        let outcome = f.dispatcher.dispatch("trading.orders.created", b"not json").await.unwrap();
        assert!(matches!(outcome, DispatchOutcome::Rejected { .. }));
        assert_eq!(f.repos.events.stats().await.unwrap().total(), 0);
    }

    #[tokio::test]
    async fn order_event_for_foreign_user_is_denied() {
        let f = fixture().await;
        let bytes = serde_json::to_vec(&json!({
            "event_id": "E4",
            "user_id": UserId::new_v4().to_string(),
            "sub_account_id": f.sub.id.to_string(),
            "order_id": "O-1",
            "symbol": "BTCUSDT",
            "side": "buy",
            "type": "limit",
            "amount": "0.1",
            "status": "new",
            "message": "placed"
        }))
        .unwrap();
        let outcome = f.dispatcher.dispatch("trading.orders.created", &bytes).await.unwrap();
        assert!(matches!(
            outcome,
            DispatchOutcome::Failed {
                kind: ErrorKind::AccessDenied,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn order_event_appends_log() {
        let f = fixture().await;
        let bytes = serde_json::to_vec(&json!({
            "event_id": "E5",
            "sub_account_id": f.sub.id.to_string(),
            "order_id": "O-2",
            "symbol": "BTCUSDT",
            "side": "sell",
            "type": "market",
            "amount": "0.1",
            "status": "filled",
            "message": "done"
        }))
        .unwrap();
        let outcome = f.dispatcher.dispatch("trading.orders.filled", &bytes).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Processed);

        let logs = f
            .repos
            .logs
            .get_by_user(
                f.user,
                &LogFilter::new().log_type(log_types::ORDER),
                PageRequest::default(),
            )
            .await
            .unwrap();
        assert_eq!(logs.total, 1);
        assert!(logs.items[0].message.contains("O-2 sell"));
    }

    #[tokio::test]
    async fn redispatch_replays_stored_payload() {
        let f = fixture().await;
        // Fails: the sub-account holds no BTC yet.
        let debit = serde_json::to_vec(&json!({
            "event_id": "E6",
            "sub_account_id": f.sub.id.to_string(),
            "symbol": "BTC",
            "previous_balance": "1",
            "new_balance": "0",
            "amount": "1",
            "direction": "debit",
            "reason": "withdraw"
        }))
        .unwrap();
        let outcome = f.dispatcher.dispatch("trading.balance.updated", &debit).await.unwrap();
        assert!(matches!(outcome, DispatchOutcome::Failed { .. }));

        f.dispatcher
            .dispatch("trading.balance.updated", &credit("E7", &f, "1", "1"))
            .await
            .unwrap();

        let record = f.repos.events.get_by_event_id("E6").await.unwrap().unwrap();
        let replay = f.dispatcher.redispatch(&record).await.unwrap();
        assert_eq!(replay, DispatchOutcome::Processed);
        let sub = f.repos.sub_accounts.get_by_id(f.sub.id).await.unwrap().unwrap();
        assert!(sub.balance.is_zero());
    }

    #[tokio::test]
    async fn heartbeat_only_touches_ledger() {
        let f = fixture().await;
        let outcome = f
            .dispatcher
            .dispatch(
                "system.heartbeat",
                br#"{"event_id":"H1","status":"healthy","component":"bot-1"}"#,
            )
            .await
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::Processed);
        let record = f.repos.events.get_by_event_id("H1").await.unwrap().unwrap();
        assert_eq!(record.event_type, "bot.heartbeat");
    }
}
