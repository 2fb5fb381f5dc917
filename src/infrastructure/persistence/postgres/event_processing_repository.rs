//! # PostgreSQL Event Processing Repository
//!
//! The event ingest ledger over the `event_processing` table.
//!
//! An ingest claims the event id with
//! `INSERT … ON CONFLICT (event_id) DO UPDATE … WHERE status <> 'processed'`
//! inside the transaction that also carries the event's effects. The claim
//! row stays locked until that transaction ends, so a concurrent delivery
//! of the same id waits, then finds the row processed and reports a
//! duplicate. If the work or the commit fails the transaction is rolled
//! back and the failure is upserted on its own connection.

use crate::domain::entities::{
    BalanceChange, EventProcessingRecord, SubAccount, TradingActivityLog, Transaction,
};
use crate::domain::value_objects::{EventStatus, SubAccountId, Timestamp, UserId};
use crate::infrastructure::persistence::postgres::balance_mutator::apply_balance_change_in;
use crate::infrastructure::persistence::postgres::errors::{Op, map_sqlx, query_error};
use crate::infrastructure::persistence::postgres::rows::{
    EVENT_COLUMNS, EventRow, at, convert_all, row_count,
};
use crate::infrastructure::persistence::postgres::sub_account_repository::fetch_sub_account;
use crate::infrastructure::persistence::postgres::trading_log_repository::insert_log;
use crate::infrastructure::persistence::traits::{
    EventClaim, EventEffects, EventProcessingRepository, IngestOutcome, IngestWork, LedgerStats,
    RepositoryError, RepositoryResult,
};
use async_trait::async_trait;
use sqlx::{PgConnection, PgPool, Postgres};
use tracing::{debug, warn};
use uuid::Uuid;

/// PostgreSQL implementation of [`EventProcessingRepository`].
#[derive(Debug, Clone)]
pub struct PostgresEventProcessingRepository {
    pool: PgPool,
}

/// Effects bound to the ledger's open transaction.
struct PgEffects<'c> {
    conn: &'c mut PgConnection,
}

#[async_trait]
impl EventEffects for PgEffects<'_> {
    async fn sub_account(&mut self, id: SubAccountId) -> RepositoryResult<Option<SubAccount>> {
        fetch_sub_account(&mut *self.conn, id, false).await
    }

    async fn apply_balance_change(
        &mut self,
        change: &BalanceChange,
    ) -> RepositoryResult<Transaction> {
        apply_balance_change_in(&mut *self.conn, change).await
    }

    async fn append_log(&mut self, log: &TradingActivityLog) -> RepositoryResult<()> {
        insert_log(&mut *self.conn, log).await
    }
}

/// Runs `work`, marks the claim processed and commits.
async fn run_claimed(
    mut tx: sqlx::Transaction<'_, Postgres>,
    event_id: &str,
    work: &dyn IngestWork,
) -> RepositoryResult<()> {
    {
        let mut effects = PgEffects { conn: &mut tx };
        work.apply(&mut effects).await?;
    }

    sqlx::query(
        r#"
        UPDATE event_processing
        SET status = 'processed', error_message = NULL, processed_at = now(), updated_at = now()
        WHERE event_id = $1
        "#,
    )
    .bind(event_id)
    .execute(&mut *tx)
    .await
    .map_err(query_error)?;

    tx.commit().await.map_err(query_error)
}

impl PostgresEventProcessingRepository {
    /// Creates a new ledger.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns a reference to the connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Inserts the claim as failed with one retry, or bumps an existing
    /// unprocessed row. A processed row is returned as it is.
    async fn upsert_failed(
        &self,
        claim: &EventClaim,
        error: &str,
    ) -> RepositoryResult<EventProcessingRecord> {
        let record = claim.to_record(EventStatus::Failed);
        let sql = format!(
            "INSERT INTO event_processing (
                id, event_id, event_type, subject, user_id, sub_account_id, status,
                retry_count, error_message, payload, processed_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, 'failed', 1, $7, $8, $9, $9, $9)
            ON CONFLICT (event_id) DO UPDATE
            SET status = 'failed',
                retry_count = event_processing.retry_count + 1,
                error_message = EXCLUDED.error_message,
                updated_at = EXCLUDED.updated_at
            WHERE event_processing.status <> 'processed'
            RETURNING {EVENT_COLUMNS}"
        );
        let stored = sqlx::query_as::<_, EventRow>(&sql)
            .bind(Uuid::from(record.id))
            .bind(&record.event_id)
            .bind(&record.event_type)
            .bind(&record.subject)
            .bind(record.user_id.map(Uuid::from))
            .bind(record.sub_account_id.map(Uuid::from))
            .bind(error)
            .bind(&record.payload)
            .bind(at(Timestamp::now()))
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx(Op::Write, "EventProcessingRecord", &claim.event_id))?;

        match stored {
            Some(row) => row.try_into_record(),
            None => self
                .get_by_event_id(&claim.event_id)
                .await?
                .ok_or_else(|| {
                    RepositoryError::not_found("EventProcessingRecord", &claim.event_id)
                }),
        }
    }
}

#[async_trait]
impl EventProcessingRepository for PostgresEventProcessingRepository {
    async fn get_by_event_id(
        &self,
        event_id: &str,
    ) -> RepositoryResult<Option<EventProcessingRecord>> {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM event_processing WHERE event_id = $1");
        sqlx::query_as::<_, EventRow>(&sql)
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error)?
            .map(EventRow::try_into_record)
            .transpose()
    }

    async fn ingest(
        &self,
        claim: &EventClaim,
        work: &dyn IngestWork,
    ) -> RepositoryResult<IngestOutcome> {
        let record = claim.to_record(EventStatus::Retrying);
        record.validate()?;

        let mut tx = self.pool.begin().await.map_err(query_error)?;
        let sql = format!(
            "INSERT INTO event_processing (
                id, event_id, event_type, subject, user_id, sub_account_id, status,
                retry_count, error_message, payload, processed_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, 'retrying', 0, NULL, $7, $8, $8, $8)
            ON CONFLICT (event_id) DO UPDATE
            SET status = 'retrying', updated_at = EXCLUDED.updated_at
            WHERE event_processing.status <> 'processed'
            RETURNING {EVENT_COLUMNS}"
        );
        let claimed = sqlx::query_as::<_, EventRow>(&sql)
            .bind(Uuid::from(record.id))
            .bind(&record.event_id)
            .bind(&record.event_type)
            .bind(&record.subject)
            .bind(record.user_id.map(Uuid::from))
            .bind(record.sub_account_id.map(Uuid::from))
            .bind(&record.payload)
            .bind(at(record.created_at))
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx(Op::Write, "EventProcessingRecord", &claim.event_id))?;

        if claimed.is_none() {
            tx.rollback().await.map_err(query_error)?;
            debug!(event_id = %claim.event_id, "duplicate event ignored");
            return Ok(IngestOutcome::DuplicateIgnored);
        }

        match run_claimed(tx, &claim.event_id, work).await {
            Ok(()) => {
                debug!(
                    event_id = %claim.event_id,
                    event_type = %claim.event_type,
                    "event processed"
                );
                Ok(IngestOutcome::Processed)
            }
            Err(e) => {
                let error = e.to_string();
                let stored = self.upsert_failed(claim, &error).await?;
                warn!(
                    event_id = %claim.event_id,
                    retry_count = stored.retry_count,
                    error = %error,
                    "event processing failed"
                );
                Ok(IngestOutcome::Failed {
                    kind: e.kind(),
                    error,
                    retry_count: stored.retry_count,
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
        self.upsert_failed(claim, error).await
    }

    async fn get_failed(
        &self,
        max_retries: u32,
        limit: u32,
    ) -> RepositoryResult<Vec<EventProcessingRecord>> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM event_processing \
             WHERE status = 'failed' AND retry_count < $1 \
             ORDER BY created_at ASC, event_id ASC LIMIT $2"
        );
        let rows = sqlx::query_as::<_, EventRow>(&sql)
            .bind(i64::from(max_retries))
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(query_error)?;
        convert_all(rows, EventRow::try_into_record)
    }

    async fn delete_older_than(&self, cutoff: Timestamp) -> RepositoryResult<u64> {
        let result = sqlx::query(
            "DELETE FROM event_processing WHERE status = 'processed' AND processed_at < $1",
        )
        .bind(at(cutoff))
        .execute(&self.pool)
        .await
        .map_err(query_error)?;
        Ok(result.rows_affected())
    }

    async fn delete_by_user(&self, user_id: UserId) -> RepositoryResult<u64> {
        let result = sqlx::query("DELETE FROM event_processing WHERE user_id = $1")
            .bind(Uuid::from(user_id))
            .execute(&self.pool)
            .await
            .map_err(query_error)?;
        Ok(result.rows_affected())
    }

    async fn stats(&self) -> RepositoryResult<LedgerStats> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM event_processing GROUP BY status")
                .fetch_all(&self.pool)
                .await
                .map_err(query_error)?;

        let mut stats = LedgerStats::default();
        for (status, count) in rows {
            let count = row_count(count);
            match status.parse::<EventStatus>() {
                Ok(EventStatus::Processed) => stats.processed = count,
                Ok(EventStatus::Failed) => stats.failed = count,
                Ok(EventStatus::Retrying) => stats.retrying = count,
                Err(e) => return Err(RepositoryError::serialization(e.to_string())),
            }
        }
        Ok(stats)
    }
}
