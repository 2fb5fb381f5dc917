//! # PostgreSQL Balance Mutator
//!
//! Applies a verified balance change and journals it in one database
//! transaction:
//!
//! 1. `SELECT … FOR UPDATE` the live sub-account row
//! 2. verify the change against the locked balance
//! 3. `UPDATE` the balance
//! 4. `INSERT` the transaction row
//!
//! Concurrent changes to the same sub-account serialize on the row lock, so
//! each one verifies against the balance the previous one committed.

use crate::domain::entities::{BalanceChange, Transaction};
use crate::domain::value_objects::{Timestamp, TransactionId};
use crate::infrastructure::persistence::postgres::errors::{Op, map_sqlx, query_error};
use crate::infrastructure::persistence::postgres::sub_account_repository::fetch_sub_account;
use crate::infrastructure::persistence::postgres::rows::at;
use crate::infrastructure::persistence::traits::{
    BalanceMutator, RepositoryError, RepositoryResult,
};
use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};
use tracing::debug;
use uuid::Uuid;

/// PostgreSQL implementation of [`BalanceMutator`].
#[derive(Debug, Clone)]
pub struct PostgresBalanceMutator {
    pool: PgPool,
}

impl PostgresBalanceMutator {
    /// Creates a new mutator.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns a reference to the connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Inserts a journal row.
pub(crate) async fn insert_transaction(
    conn: &mut PgConnection,
    tx: &Transaction,
) -> RepositoryResult<()> {
    sqlx::query(
        r#"
        INSERT INTO transactions (
            id, user_id, trading_id, sub_account_id, "timestamp", direction, reason,
            amount, closing_balance, price, quote_symbol, info, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        "#,
    )
    .bind(Uuid::from(tx.id))
    .bind(Uuid::from(tx.user_id))
    .bind(Uuid::from(tx.trading_id))
    .bind(Uuid::from(tx.sub_account_id))
    .bind(at(tx.timestamp))
    .bind(tx.direction.as_str())
    .bind(&tx.reason)
    .bind(tx.amount)
    .bind(tx.closing_balance)
    .bind(tx.price)
    .bind(&tx.quote_symbol)
    .bind(tx.info.to_json())
    .bind(at(tx.created_at))
    .execute(conn)
    .await
    .map_err(map_sqlx(Op::Write, "Transaction", tx.id))?;
    Ok(())
}

/// Runs the lock, verify, update and insert steps on `conn`. The caller
/// owns the surrounding transaction.
pub(crate) async fn apply_balance_change_in(
    conn: &mut PgConnection,
    change: &BalanceChange,
) -> RepositoryResult<Transaction> {
    let sub = fetch_sub_account(&mut *conn, change.sub_account_id, true)
        .await?
        .ok_or_else(|| RepositoryError::not_found("SubAccount", change.sub_account_id))?;

    let now = Timestamp::now();
    let tx = sub.plan_balance_change(change, now)?;
    tx.validate()?;

    sqlx::query("UPDATE sub_accounts SET balance = $2, updated_at = $3 WHERE id = $1")
        .bind(Uuid::from(sub.id))
        .bind(tx.closing_balance)
        .bind(at(now))
        .execute(&mut *conn)
        .await
        .map_err(map_sqlx(Op::Write, "SubAccount", sub.id))?;

    insert_transaction(conn, &tx).await?;

    debug!(
        sub_account_id = %sub.id,
        transaction_id = %tx.id,
        direction = %tx.direction,
        amount = %tx.amount,
        closing_balance = %tx.closing_balance,
        "balance change applied"
    );
    Ok(tx)
}

#[async_trait]
impl BalanceMutator for PostgresBalanceMutator {
    async fn apply_balance_change(
        &self,
        change: &BalanceChange,
    ) -> RepositoryResult<TransactionId> {
        let mut db_tx = self.pool.begin().await.map_err(query_error)?;
        let tx = apply_balance_change_in(&mut db_tx, change).await?;
        db_tx.commit().await.map_err(query_error)?;
        Ok(tx.id)
    }
}
