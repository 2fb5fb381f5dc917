//! # Event Ingest
//!
//! Application-side face of the event ingest ledger: runs event work
//! exactly once per event id, records deliveries that cannot be routed,
//! and handles housekeeping.

use crate::application::error::ApplicationResult;
use crate::config::EventsConfig;
use crate::domain::entities::EventProcessingRecord;
use crate::domain::value_objects::Timestamp;
use crate::infrastructure::persistence::{
    EventClaim, EventProcessingRepository, IngestOutcome, IngestWork, LedgerStats,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Ledger access with the configured retry and retention policy.
#[derive(Debug, Clone)]
pub struct EventIngestLedger {
    repository: Arc<dyn EventProcessingRepository>,
    max_retries: u32,
    retention: Duration,
}

impl EventIngestLedger {
    /// Creates a ledger over `repository`.
    #[must_use]
    pub fn new(repository: Arc<dyn EventProcessingRepository>, config: &EventsConfig) -> Self {
        Self {
            repository,
            max_retries: config.max_retries,
            retention: config.retention(),
        }
    }

    /// Attempts before a failed event is left for an operator.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Runs `work` under the claim. See
    /// [`EventProcessingRepository::ingest`].
    ///
    /// # Errors
    ///
    /// Returns an error only if the ledger itself cannot be written.
    pub async fn ingest(
        &self,
        claim: &EventClaim,
        work: &dyn IngestWork,
    ) -> ApplicationResult<IngestOutcome> {
        let outcome = self.repository.ingest(claim, work).await?;
        if let IngestOutcome::Failed { retry_count, .. } = &outcome
            && *retry_count >= self.max_retries
        {
            warn!(
                event_id = %claim.event_id,
                retry_count,
                "event exhausted its retries and needs operator attention"
            );
        }
        Ok(outcome)
    }

    /// Records a delivery that could not be turned into work.
    ///
    /// # Errors
    ///
    /// Returns an error only on infrastructure failure.
    pub async fn record_failure(
        &self,
        claim: &EventClaim,
        error: &str,
    ) -> ApplicationResult<EventProcessingRecord> {
        Ok(self.repository.record_failure(claim, error).await?)
    }

    /// Failed records still eligible for a retry, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error only on infrastructure failure.
    pub async fn pending_retries(
        &self,
        limit: u32,
    ) -> ApplicationResult<Vec<EventProcessingRecord>> {
        Ok(self.repository.get_failed(self.max_retries, limit).await?)
    }

    /// Deletes processed records older than the retention window. Returns
    /// the number removed.
    ///
    /// # Errors
    ///
    /// Returns an error only on infrastructure failure.
    pub async fn purge_processed(&self) -> ApplicationResult<u64> {
        self.purge_processed_before(Timestamp::now().sub_secs(secs(self.retention)))
            .await
    }

    /// Deletes processed records whose `processed_at` is before `cutoff`.
    ///
    /// # Errors
    ///
    /// Returns an error only on infrastructure failure.
    pub async fn purge_processed_before(&self, cutoff: Timestamp) -> ApplicationResult<u64> {
        let removed = self.repository.delete_older_than(cutoff).await?;
        info!(removed, cutoff = %cutoff.to_rfc3339(), "processed events purged");
        Ok(removed)
    }

    /// Counts records per status.
    ///
    /// # Errors
    ///
    /// Returns an error only on infrastructure failure.
    pub async fn stats(&self) -> ApplicationResult<LedgerStats> {
        Ok(self.repository.stats().await?)
    }
}

fn secs(d: Duration) -> i64 {
    i64::try_from(d.as_secs()).unwrap_or(i64::MAX)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::domain::entities::SupportedExchanges;
    use crate::domain::value_objects::EventStatus;
    use crate::infrastructure::persistence::{NoEffects, Repositories};

    fn ledger(max_retries: u32) -> EventIngestLedger {
        let repos = Repositories::in_memory(SupportedExchanges::default());
        let config = EventsConfig {
            max_retries,
            ..EventsConfig::default()
        };
        EventIngestLedger::new(repos.events, &config)
    }

    #[tokio::test]
    async fn second_ingest_is_duplicate() {
        let ledger = ledger(5);
        let claim = EventClaim::new("E1", "heartbeat");
        assert!(ledger.ingest(&claim, &NoEffects).await.unwrap().is_processed());
        assert!(ledger.ingest(&claim, &NoEffects).await.unwrap().is_duplicate());

        let stats = ledger.stats().await.unwrap();
        assert_eq!((stats.processed, stats.total()), (1, 1));
    }

    #[tokio::test]
    async fn failures_surface_until_exhausted() {
        let ledger = ledger(2);
        let claim = EventClaim::new("E2", "mystery");
        let record = ledger.record_failure(&claim, "unknown event type").await.unwrap();
        assert_eq!(record.status, EventStatus::Failed);
        assert_eq!(record.retry_count, 1);
        assert_eq!(ledger.pending_retries(10).await.unwrap().len(), 1);

        ledger.record_failure(&claim, "unknown event type").await.unwrap();
        assert!(ledger.pending_retries(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn purge_keeps_recent_records() {
        let ledger = ledger(5);
        ledger
            .ingest(&EventClaim::new("E3", "heartbeat"), &NoEffects)
            .await
            .unwrap();
        assert_eq!(ledger.purge_processed().await.unwrap(), 0);
        let future = Timestamp::now().add_secs(60);
        assert_eq!(ledger.purge_processed_before(future).await.unwrap(), 1);
    }
}
