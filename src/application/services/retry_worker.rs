//! # Retry Worker
//!
//! Periodically re-dispatches failed ledger records from their stored
//! subject and payload until they succeed or exhaust `max_retries`.

use crate::application::error::ApplicationResult;
use crate::application::services::event_dispatcher::{DispatchOutcome, EventDispatcher};
use crate::config::EventsConfig;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// Counts from one retry pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryReport {
    /// Records picked up.
    pub attempted: usize,
    /// Records that now succeeded.
    pub processed: usize,
    /// Records that failed again.
    pub failed: usize,
    /// Records another delivery processed in the meantime.
    pub duplicates: usize,
}

/// Background re-dispatcher for failed events.
#[derive(Debug, Clone)]
pub struct RetryWorker {
    dispatcher: Arc<EventDispatcher>,
    batch_size: u32,
    interval: Duration,
}

impl RetryWorker {
    /// Creates a worker with the batch size and pause from `config`.
    #[must_use]
    pub fn new(dispatcher: Arc<EventDispatcher>, config: &EventsConfig) -> Self {
        Self {
            dispatcher,
            batch_size: config.retry_batch_size.max(1),
            interval: config.retry_interval(),
        }
    }

    /// Runs one pass over the oldest failed records.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot be read or written.
    pub async fn run_once(&self) -> ApplicationResult<RetryReport> {
        let pending = self
            .dispatcher
            .ledger()
            .pending_retries(self.batch_size)
            .await?;
        let mut report = RetryReport {
            attempted: pending.len(),
            ..RetryReport::default()
        };

        for record in &pending {
            match self.dispatcher.redispatch(record).await? {
                DispatchOutcome::Processed => report.processed += 1,
                DispatchOutcome::DuplicateIgnored => report.duplicates += 1,
                DispatchOutcome::Failed { .. } | DispatchOutcome::Rejected { .. } => {
                    report.failed += 1;
                }
            }
        }

        if report.attempted > 0 {
            info!(
                attempted = report.attempted,
                processed = report.processed,
                failed = report.failed,
                "retry pass complete"
            );
        }
        Ok(report)
    }

    /// Runs passes every interval until `shutdown` turns true or its
    /// sender is dropped.
    pub async fn run_until(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = self.interval.as_secs(), "retry worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        error!(error = %e, "retry pass failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        debug!("shutdown sender dropped");
                        break;
                    }
                }
            }
        }
        info!("retry worker stopped");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::application::services::event_ingest::EventIngestLedger;
    use crate::domain::entities::SupportedExchanges;
    use crate::domain::value_objects::EventStatus;
    use crate::infrastructure::persistence::{EventClaim, Repositories};

    fn worker(repos: &Repositories, max_retries: u32) -> RetryWorker {
        let config = EventsConfig {
            max_retries,
            retry_interval_secs: 1,
            ..EventsConfig::default()
        };
        let ledger = EventIngestLedger::new(repos.events.clone(), &config);
        RetryWorker::new(Arc::new(EventDispatcher::new(ledger)), &config)
    }

    #[tokio::test]
    async fn heartbeat_recovers_on_retry() {
        let repos = Repositories::in_memory(SupportedExchanges::default());
        let claim = EventClaim::new("H1", "bot.heartbeat")
            .with_subject("system.heartbeat")
            .with_payload(serde_json::json!({
                "event_id": "H1",
                "status": "healthy",
                "component": "bot-1"
            }));
        repos.events.record_failure(&claim, "bus hiccup").await.unwrap();

        let report = worker(&repos, 3).run_once().await.unwrap();
        assert_eq!((report.attempted, report.processed), (1, 1));

        let record = repos.events.get_by_event_id("H1").await.unwrap().unwrap();
        assert_eq!(record.status, EventStatus::Processed);
    }

    #[tokio::test]
    async fn unknown_subject_exhausts_retries() {
        let repos = Repositories::in_memory(SupportedExchanges::default());
        let claim = EventClaim::new("E1", "mystery")
            .with_subject("trading.mystery")
            .with_payload(serde_json::json!({ "event_id": "E1" }));
        repos.events.record_failure(&claim, "unknown event type").await.unwrap();

        let worker = worker(&repos, 2);
        let first = worker.run_once().await.unwrap();
        assert_eq!((first.attempted, first.failed), (1, 1));

        let second = worker.run_once().await.unwrap();
        assert_eq!(second.attempted, 0);
        let record = repos.events.get_by_event_id("E1").await.unwrap().unwrap();
        assert_eq!(record.retry_count, 2);
    }

    #[tokio::test]
    async fn run_until_stops_on_signal() {
        let repos = Repositories::in_memory(SupportedExchanges::default());
        let worker = worker(&repos, 3);
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { worker.run_until(rx).await });
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
