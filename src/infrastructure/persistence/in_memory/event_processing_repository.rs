//! # In-Memory Event Processing Repository
//!
//! In-memory implementation of [`EventProcessingRepository`] for testing.
//!
//! `ingest` runs the work against a scratch copy of every table while
//! holding the store's write lock and swaps the copy in only on success,
//! which gives the same all-or-nothing outcome as the Postgres
//! transaction.

use crate::domain::entities::{
    BalanceChange, EventProcessingRecord, SubAccount, TradingActivityLog, Transaction,
};
use crate::domain::value_objects::{EventStatus, SubAccountId, Timestamp, UserId};
use crate::infrastructure::persistence::in_memory::store::{InMemoryStore, Tables};
use crate::infrastructure::persistence::traits::{
    EventClaim, EventEffects, EventProcessingRepository, IngestOutcome, IngestWork, LedgerStats,
    RepositoryResult,
};
use async_trait::async_trait;

/// Effects applied to a table set the caller has locked.
struct TablesEffects<'a> {
    tables: &'a mut Tables,
}

#[async_trait]
impl EventEffects for TablesEffects<'_> {
    async fn sub_account(&mut self, id: SubAccountId) -> RepositoryResult<Option<SubAccount>> {
        Ok(self.tables.live_sub_account(id).cloned())
    }

    async fn apply_balance_change(
        &mut self,
        change: &BalanceChange,
    ) -> RepositoryResult<Transaction> {
        self.tables.apply_balance_change(change)
    }

    async fn append_log(&mut self, log: &TradingActivityLog) -> RepositoryResult<()> {
        self.tables.insert_log(log)
    }
}

/// Stores a failed attempt, bumping the retry counter. A processed record
/// is returned untouched.
fn upsert_failed(tables: &mut Tables, claim: &EventClaim, error: &str) -> EventProcessingRecord {
    let now = Timestamp::now();
    let record = tables
        .events
        .entry(claim.event_id.clone())
        .or_insert_with(|| {
            let mut fresh = claim.to_record(EventStatus::Failed);
            fresh.retry_count = 0;
            fresh
        });
    if record.is_processed() {
        return record.clone();
    }
    record.status = EventStatus::Failed;
    record.retry_count = record.retry_count.saturating_add(1);
    record.error_message = Some(error.to_string());
    record.updated_at = now;
    record.clone()
}

/// In-memory implementation of [`EventProcessingRepository`].
#[derive(Debug, Clone)]
pub struct InMemoryEventProcessingRepository {
    store: InMemoryStore,
}

impl InMemoryEventProcessingRepository {
    /// Creates a repository over `store`.
    #[must_use]
    pub fn new(store: InMemoryStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EventProcessingRepository for InMemoryEventProcessingRepository {
    async fn get_by_event_id(
        &self,
        event_id: &str,
    ) -> RepositoryResult<Option<EventProcessingRecord>> {
        let tables = self.store.read().await;
        Ok(tables.events.get(event_id).cloned())
    }

    async fn ingest(
        &self,
        claim: &EventClaim,
        work: &dyn IngestWork,
    ) -> RepositoryResult<IngestOutcome> {
        claim.to_record(EventStatus::Retrying).validate()?;

        let mut tables = self.store.write().await;
        if tables
            .events
            .get(&claim.event_id)
            .is_some_and(EventProcessingRecord::is_processed)
        {
            return Ok(IngestOutcome::DuplicateIgnored);
        }

        let mut scratch = tables.clone();
        let result = {
            let mut effects = TablesEffects {
                tables: &mut scratch,
            };
            work.apply(&mut effects).await
        };

        match result {
            Ok(()) => {
                let now = Timestamp::now();
                let record = scratch
                    .events
                    .entry(claim.event_id.clone())
                    .or_insert_with(|| claim.to_record(EventStatus::Processed));
                record.status = EventStatus::Processed;
                record.error_message = None;
                record.processed_at = now;
                record.updated_at = now;
                *tables = scratch;
                Ok(IngestOutcome::Processed)
            }
            Err(e) => {
                let error = e.to_string();
                let record = upsert_failed(&mut tables, claim, &error);
                Ok(IngestOutcome::Failed {
                    kind: e.kind(),
                    error,
                    retry_count: record.retry_count,
                })
            }
        }
    }

    async fn record_failure(
        &self,
        claim: &EventClaim,
        error: &str,
    ) -> RepositoryResult<EventProcessingRecord> {
        claim.to_record(EventStatus::Failed).validate()?;
        let mut tables = self.store.write().await;
        Ok(upsert_failed(&mut tables, claim, error))
    }

    async fn get_failed(
        &self,
        max_retries: u32,
        limit: u32,
    ) -> RepositoryResult<Vec<EventProcessingRecord>> {
        let tables = self.store.read().await;
        let mut failed: Vec<EventProcessingRecord> = tables
            .events
            .values()
            .filter(|r| r.is_retryable(max_retries))
            .cloned()
            .collect();
        failed.sort_by(|a, b| (a.created_at, &a.event_id).cmp(&(b.created_at, &b.event_id)));
        failed.truncate(limit as usize);
        Ok(failed)
    }

    async fn delete_older_than(&self, cutoff: Timestamp) -> RepositoryResult<u64> {
        let mut tables = self.store.write().await;
        let before = tables.events.len();
        tables
            .events
            .retain(|_, r| !(r.is_processed() && r.processed_at < cutoff));
        Ok((before - tables.events.len()) as u64)
    }

    async fn delete_by_user(&self, user_id: UserId) -> RepositoryResult<u64> {
        let mut tables = self.store.write().await;
        let before = tables.events.len();
        tables.events.retain(|_, r| r.user_id != Some(user_id));
        Ok((before - tables.events.len()) as u64)
    }

    async fn stats(&self) -> RepositoryResult<LedgerStats> {
        let tables = self.store.read().await;
        let mut stats = LedgerStats::default();
        for record in tables.events.values() {
            match record.status {
                EventStatus::Processed => stats.processed += 1,
                EventStatus::Failed => stats.failed += 1,
                EventStatus::Retrying => stats.retrying += 1,
            }
        }
        Ok(stats)
    }
}
