//! # Messaging
//!
//! Transport-neutral consumer loop that feeds bus messages to the
//! [`EventDispatcher`]. The NATS transport lives behind the `nats`
//! feature; anything that yields [`BusMessage`]s can drive the loop.

#[cfg(feature = "nats")]
pub mod nats;

use crate::application::services::{DispatchOutcome, EventDispatcher};
use crate::domain::events::EventKind;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info};

/// Subject carrying bot heartbeats; lives outside the trading prefix.
pub const HEARTBEAT_SUBJECT: &str = "system.heartbeat";

/// One delivery from the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    /// Subject the message arrived on.
    pub subject: String,
    /// Raw payload.
    pub payload: Bytes,
}

impl BusMessage {
    /// Creates a message.
    #[must_use]
    pub fn new(subject: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            subject: subject.into(),
            payload: payload.into(),
        }
    }
}

/// Transport failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessagingError {
    /// Could not reach the bus.
    #[error("connect failed: {0}")]
    Connect(String),

    /// Could not subscribe.
    #[error("subscribe to {subject} failed: {message}")]
    Subscribe {
        /// Subject.
        subject: String,
        /// Transport message.
        message: String,
    },
}

/// Tally of one consumer run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumeReport {
    /// Messages taken off the stream.
    pub received: u64,
    /// Committed.
    pub processed: u64,
    /// Already processed.
    pub duplicates: u64,
    /// Recorded as failed or rejected.
    pub failed: u64,
    /// Ledger writes that errored.
    pub errors: u64,
}

/// Subjects to subscribe to under `prefix`.
///
/// The wildcard also catches subjects without a route, which the
/// dispatcher records as unknown event types.
#[must_use]
pub fn subscription_subjects(prefix: &str) -> Vec<String> {
    let prefix = prefix.trim().trim_end_matches('.');
    let mut subjects = vec![format!("{prefix}.>")];
    let covered = |s: &str| s.starts_with(&format!("{prefix}."));
    subjects.extend(
        EventKind::ALL
            .iter()
            .map(|k| k.subject())
            .filter(|s| !covered(s))
            .map(str::to_string),
    );
    subjects.dedup();
    subjects
}

/// Dispatches messages from `stream` until it ends or `shutdown` turns
/// true.
pub async fn consume<S>(
    mut stream: S,
    dispatcher: &EventDispatcher,
    mut shutdown: watch::Receiver<bool>,
) -> ConsumeReport
where
    S: Stream<Item = BusMessage> + Unpin,
{
    let mut report = ConsumeReport::default();
    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            next = stream.next() => {
                let Some(message) = next else {
                    info!("bus stream ended");
                    break;
                };
                report.received += 1;
                match dispatcher.dispatch(&message.subject, &message.payload).await {
                    Ok(DispatchOutcome::Processed) => report.processed += 1,
                    Ok(DispatchOutcome::DuplicateIgnored) => report.duplicates += 1,
                    Ok(DispatchOutcome::Failed { .. } | DispatchOutcome::Rejected { .. }) => {
                        report.failed += 1;
                    }
                    Err(e) => {
                        report.errors += 1;
                        error!(subject = %message.subject, error = %e, "dispatch failed");
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    info!(
        received = report.received,
        processed = report.processed,
        failed = report.failed,
        "consumer stopped"
    );
    report
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::application::services::EventIngestLedger;
    use crate::config::EventsConfig;
    use crate::domain::entities::SupportedExchanges;
    use crate::infrastructure::persistence::Repositories;

    #[test]
    fn default_prefix_subjects() {
        let subjects = subscription_subjects("trading");
        assert_eq!(subjects, vec!["trading.>".to_string(), HEARTBEAT_SUBJECT.to_string()]);
    }

    #[tokio::test]
    async fn consumes_until_stream_ends() {
        let repos = Repositories::in_memory(SupportedExchanges::default());
        let ledger = EventIngestLedger::new(repos.events.clone(), &EventsConfig::default());
        let dispatcher = EventDispatcher::new(ledger);
        let heartbeat = br#"{"event_id":"H1","status":"healthy","component":"bot"}"#;
        let messages = vec![
            BusMessage::new(HEARTBEAT_SUBJECT, &heartbeat[..]),
            BusMessage::new(HEARTBEAT_SUBJECT, &heartbeat[..]),
            BusMessage::new("trading.nope", &b"junk"[..]),
        ];
        let (_tx, rx) = watch::channel(false);

        let report = consume(futures::stream::iter(messages), &dispatcher, rx).await;
        assert_eq!(report.received, 3);
        assert_eq!(report.processed, 1);
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.failed, 1);
    }
}
