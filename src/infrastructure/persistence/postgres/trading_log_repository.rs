//! # PostgreSQL Trading Activity Log Repository
//!
//! PostgreSQL implementation of [`TradingActivityLogRepository`] over the
//! `trading_logs` table.

use crate::domain::entities::TradingActivityLog;
use crate::domain::value_objects::{
    Page, PageRequest, SubAccountId, Timestamp, TradingId, TradingLogId, UserId,
};
use crate::infrastructure::persistence::filters::LogFilter;
use crate::infrastructure::persistence::postgres::errors::{Op, map_sqlx, query_error};
use crate::infrastructure::persistence::postgres::rows::{
    LOG_COLUMNS, LogRow, at, convert_all, page_bounds, row_count,
};
use crate::infrastructure::persistence::traits::{
    RepositoryError, RepositoryResult, TradingActivityLogRepository,
};
use async_trait::async_trait;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

/// PostgreSQL implementation of [`TradingActivityLogRepository`].
#[derive(Debug, Clone)]
pub struct PostgresTradingLogRepository {
    pool: PgPool,
}

impl PostgresTradingLogRepository {
    /// Creates a new repository.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns a reference to the connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn page(
        &self,
        column: &'static str,
        scope: Uuid,
        filter: &LogFilter,
        page: PageRequest,
    ) -> RepositoryResult<Page<TradingActivityLog>> {
        let total: i64 = filtered("SELECT COUNT(*) FROM trading_logs", column, scope, filter)
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(query_error)?;

        let (limit, offset) = page_bounds(page);
        let mut qb = filtered(
            &format!("SELECT {LOG_COLUMNS} FROM trading_logs"),
            column,
            scope,
            filter,
        );
        qb.push(" ORDER BY \"timestamp\" DESC, id DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);
        let rows = qb
            .build_query_as::<LogRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(query_error)?;

        Ok(Page::new(
            convert_all(rows, LogRow::try_into_log)?,
            row_count(total),
            page,
        ))
    }
}

fn filtered(
    head: &str,
    column: &'static str,
    scope: Uuid,
    filter: &LogFilter,
) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(head);
    qb.push(" WHERE ").push(column).push(" = ").push_bind(scope);
    if let Some(log_type) = &filter.log_type {
        qb.push(" AND type = ").push_bind(log_type.clone());
    }
    if let Some(source) = filter.source {
        qb.push(" AND source = ").push_bind(source.as_str());
    }
    if let Some(from) = filter.from {
        qb.push(" AND \"timestamp\" >= ").push_bind(at(from));
    }
    if let Some(to) = filter.to {
        qb.push(" AND \"timestamp\" < ").push_bind(at(to));
    }
    qb
}

async fn owner_of(
    conn: &mut PgConnection,
    table: &'static str,
    entity: &'static str,
    id: Uuid,
) -> RepositoryResult<Uuid> {
    let sql = format!("SELECT user_id FROM {table} WHERE id = $1");
    sqlx::query_scalar::<_, Uuid>(&sql)
        .bind(id)
        .fetch_optional(conn)
        .await
        .map_err(query_error)?
        .ok_or_else(|| RepositoryError::reference_not_found(entity, id))
}

/// Validates a log entry, checks every referenced row belongs to its user,
/// and inserts it.
pub(crate) async fn insert_log(
    conn: &mut PgConnection,
    log: &TradingActivityLog,
) -> RepositoryResult<()> {
    log.validate()?;

    let user = Uuid::from(log.user_id);
    let refs = [
        Some(("tradings", "Trading", Uuid::from(log.trading_id))),
        log.sub_account_id
            .map(|id| ("sub_accounts", "SubAccount", Uuid::from(id))),
        log.transaction_id
            .map(|id| ("transactions", "Transaction", Uuid::from(id))),
    ];
    for (table, entity, id) in refs.into_iter().flatten() {
        if owner_of(&mut *conn, table, entity, id).await? != user {
            return Err(RepositoryError::access_denied(format!(
                "{entity} {id} is not owned by user {user}"
            )));
        }
    }

    sqlx::query(
        r#"
        INSERT INTO trading_logs (
            id, user_id, trading_id, sub_account_id, transaction_id, "timestamp",
            type, source, message, info, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(Uuid::from(log.id))
    .bind(user)
    .bind(Uuid::from(log.trading_id))
    .bind(log.sub_account_id.map(Uuid::from))
    .bind(log.transaction_id.map(Uuid::from))
    .bind(at(log.timestamp))
    .bind(&log.log_type)
    .bind(log.source.as_str())
    .bind(&log.message)
    .bind(log.info.to_json())
    .bind(at(log.created_at))
    .execute(conn)
    .await
    .map_err(map_sqlx(Op::Write, "TradingActivityLog", log.id))?;
    Ok(())
}

#[async_trait]
impl TradingActivityLogRepository for PostgresTradingLogRepository {
    async fn create(&self, log: &TradingActivityLog) -> RepositoryResult<()> {
        let mut conn = self.pool.acquire().await.map_err(query_error)?;
        insert_log(&mut conn, log).await
    }

    async fn get_by_id(&self, id: TradingLogId) -> RepositoryResult<Option<TradingActivityLog>> {
        let sql = format!("SELECT {LOG_COLUMNS} FROM trading_logs WHERE id = $1");
        sqlx::query_as::<_, LogRow>(&sql)
            .bind(Uuid::from(id))
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error)?
            .map(LogRow::try_into_log)
            .transpose()
    }

    async fn get_by_user(
        &self,
        user_id: UserId,
        filter: &LogFilter,
        page: PageRequest,
    ) -> RepositoryResult<Page<TradingActivityLog>> {
        self.page("user_id", user_id.into(), filter, page).await
    }

    async fn get_by_trading(
        &self,
        trading_id: TradingId,
        filter: &LogFilter,
        page: PageRequest,
    ) -> RepositoryResult<Page<TradingActivityLog>> {
        self.page("trading_id", trading_id.into(), filter, page).await
    }

    async fn get_by_sub_account(
        &self,
        sub_account_id: SubAccountId,
        filter: &LogFilter,
        page: PageRequest,
    ) -> RepositoryResult<Page<TradingActivityLog>> {
        self.page("sub_account_id", sub_account_id.into(), filter, page)
            .await
    }

    async fn delete(&self, id: TradingLogId) -> RepositoryResult<()> {
        let result = sqlx::query("DELETE FROM trading_logs WHERE id = $1")
            .bind(Uuid::from(id))
            .execute(&self.pool)
            .await
            .map_err(map_sqlx(Op::Delete, "TradingActivityLog", id))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::not_found("TradingActivityLog", id));
        }
        Ok(())
    }

    async fn delete_older_than(&self, cutoff: Timestamp) -> RepositoryResult<u64> {
        let result = sqlx::query(r#"DELETE FROM trading_logs WHERE "timestamp" < $1"#)
            .bind(at(cutoff))
            .execute(&self.pool)
            .await
            .map_err(query_error)?;
        Ok(result.rows_affected())
    }
}
