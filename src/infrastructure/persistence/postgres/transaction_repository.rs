//! # PostgreSQL Transaction Repository
//!
//! Append-only PostgreSQL implementation of [`TransactionRepository`].
//! Listing filters are assembled with [`QueryBuilder`] so that only the
//! predicates a caller set reach the planner.

use crate::domain::entities::Transaction;
use crate::domain::errors::DomainError;
use crate::domain::value_objects::{
    Page, PageRequest, SubAccountId, Timestamp, TradingId, TransactionDirection, TransactionId,
    UserId,
};
use crate::infrastructure::persistence::filters::TransactionFilter;
use crate::infrastructure::persistence::postgres::balance_mutator::insert_transaction;
use crate::infrastructure::persistence::postgres::errors::query_error;
use crate::infrastructure::persistence::postgres::rows::{
    TRANSACTION_COLUMNS, TransactionRow, at, convert_all, page_bounds, row_count,
};
use crate::infrastructure::persistence::traits::{
    DirectionTotals, RepositoryError, RepositoryResult, TransactionRepository,
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

/// PostgreSQL implementation of [`TransactionRepository`].
#[derive(Debug, Clone)]
pub struct PostgresTransactionRepository {
    pool: PgPool,
}

/// Column a listing is scoped by.
#[derive(Debug, Clone, Copy)]
enum Scope {
    User(UserId),
    SubAccount(SubAccountId),
    Trading(TradingId),
}

impl Scope {
    fn column(self) -> &'static str {
        match self {
            Self::User(_) => "user_id",
            Self::SubAccount(_) => "sub_account_id",
            Self::Trading(_) => "trading_id",
        }
    }

    fn id(self) -> Uuid {
        match self {
            Self::User(id) => id.into(),
            Self::SubAccount(id) => id.into(),
            Self::Trading(id) => id.into(),
        }
    }
}

fn filtered(
    head: &str,
    scope: Scope,
    filter: &TransactionFilter,
) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(head);
    qb.push(" WHERE ")
        .push(scope.column())
        .push(" = ")
        .push_bind(scope.id());
    if let Some(direction) = filter.direction {
        qb.push(" AND direction = ").push_bind(direction.as_str());
    }
    if let Some(reason) = &filter.reason {
        qb.push(" AND reason = ").push_bind(reason.clone());
    }
    if let Some(min) = filter.min_amount {
        qb.push(" AND amount >= ").push_bind(min);
    }
    if let Some(max) = filter.max_amount {
        qb.push(" AND amount <= ").push_bind(max);
    }
    if let Some(from) = filter.from {
        qb.push(" AND \"timestamp\" >= ").push_bind(at(from));
    }
    if let Some(to) = filter.to {
        qb.push(" AND \"timestamp\" < ").push_bind(at(to));
    }
    qb
}

impl PostgresTransactionRepository {
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
        scope: Scope,
        filter: &TransactionFilter,
        page: PageRequest,
    ) -> RepositoryResult<Page<Transaction>> {
        let total: i64 = filtered("SELECT COUNT(*) FROM transactions", scope, filter)
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(query_error)?;

        let (limit, offset) = page_bounds(page);
        let mut qb = filtered(
            &format!("SELECT {TRANSACTION_COLUMNS} FROM transactions"),
            scope,
            filter,
        );
        qb.push(" ORDER BY \"timestamp\" DESC, id DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);
        let rows = qb
            .build_query_as::<TransactionRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(query_error)?;

        Ok(Page::new(
            convert_all(rows, TransactionRow::try_into_transaction)?,
            row_count(total),
            page,
        ))
    }
}

#[async_trait]
impl TransactionRepository for PostgresTransactionRepository {
    async fn create(&self, transaction: &Transaction) -> RepositoryResult<()> {
        transaction.validate()?;

        let mut tx = self.pool.begin().await.map_err(query_error)?;
        let sub: Option<(Uuid, Uuid, Decimal)> = sqlx::query_as(
            "SELECT user_id, trading_id, balance FROM sub_accounts WHERE id = $1 FOR UPDATE",
        )
        .bind(Uuid::from(transaction.sub_account_id))
        .fetch_optional(&mut *tx)
        .await
        .map_err(query_error)?;

        let (owner, trading, balance) = sub.ok_or_else(|| {
            RepositoryError::reference_not_found("SubAccount", transaction.sub_account_id)
        })?;
        if owner != Uuid::from(transaction.user_id) || trading != Uuid::from(transaction.trading_id)
        {
            return Err(RepositoryError::access_denied(format!(
                "sub-account {} is not owned by user {}",
                transaction.sub_account_id, transaction.user_id
            )));
        }
        if balance != transaction.closing_balance {
            return Err(DomainError::invalid(
                "closing_balance",
                format!("does not match the sub-account balance {balance}"),
            )
            .into());
        }

        insert_transaction(&mut tx, transaction).await?;
        tx.commit().await.map_err(query_error)
    }

    async fn get_by_id(&self, id: TransactionId) -> RepositoryResult<Option<Transaction>> {
        let sql = format!("SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = $1");
        sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(Uuid::from(id))
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error)?
            .map(TransactionRow::try_into_transaction)
            .transpose()
    }

    async fn get_by_user(
        &self,
        user_id: UserId,
        filter: &TransactionFilter,
        page: PageRequest,
    ) -> RepositoryResult<Page<Transaction>> {
        self.page(Scope::User(user_id), filter, page).await
    }

    async fn get_by_sub_account(
        &self,
        sub_account_id: SubAccountId,
        filter: &TransactionFilter,
        page: PageRequest,
    ) -> RepositoryResult<Page<Transaction>> {
        self.page(Scope::SubAccount(sub_account_id), filter, page).await
    }

    async fn get_by_trading(
        &self,
        trading_id: TradingId,
        filter: &TransactionFilter,
        page: PageRequest,
    ) -> RepositoryResult<Page<Transaction>> {
        self.page(Scope::Trading(trading_id), filter, page).await
    }

    async fn sum_by_direction(
        &self,
        sub_account_id: SubAccountId,
        from: Option<Timestamp>,
        to: Option<Timestamp>,
    ) -> RepositoryResult<DirectionTotals> {
        let (debits, credits, count): (Decimal, Decimal, i64) = sqlx::query_as(
            r#"
            SELECT
                COALESCE(SUM(amount) FILTER (WHERE direction = $4), 0),
                COALESCE(SUM(amount) FILTER (WHERE direction = $5), 0),
                COUNT(*)
            FROM transactions
            WHERE sub_account_id = $1
              AND ($2::timestamptz IS NULL OR "timestamp" >= $2)
              AND ($3::timestamptz IS NULL OR "timestamp" < $3)
            "#,
        )
        .bind(Uuid::from(sub_account_id))
        .bind(from.map(at))
        .bind(to.map(at))
        .bind(TransactionDirection::Debit.as_str())
        .bind(TransactionDirection::Credit.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(query_error)?;

        Ok(DirectionTotals {
            debits,
            credits,
            count: row_count(count),
        })
    }

    async fn latest_for_sub_account(
        &self,
        sub_account_id: SubAccountId,
    ) -> RepositoryResult<Option<Transaction>> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE sub_account_id = $1 \
             ORDER BY \"timestamp\" DESC, id DESC LIMIT 1"
        );
        sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(Uuid::from(sub_account_id))
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error)?
            .map(TransactionRow::try_into_transaction)
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_builds_only_set_predicates() {
        let empty = filtered(
            "SELECT COUNT(*) FROM transactions",
            Scope::User(UserId::new_v4()),
            &TransactionFilter::new(),
        );
        assert_eq!(empty.sql(), "SELECT COUNT(*) FROM transactions WHERE user_id = $1");

        let filter = TransactionFilter::new()
            .direction(TransactionDirection::Credit)
            .amount_between(Some(Decimal::ONE), None);
        let qb = filtered(
            "SELECT COUNT(*) FROM transactions",
            Scope::SubAccount(SubAccountId::new_v4()),
            &filter,
        );
        assert_eq!(
            qb.sql(),
            "SELECT COUNT(*) FROM transactions WHERE sub_account_id = $1 \
             AND direction = $2 AND amount >= $3"
        );
    }
}
