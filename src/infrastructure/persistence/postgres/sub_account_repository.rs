//! # PostgreSQL Sub-Account Repository
//!
//! PostgreSQL implementation of [`SubAccountRepository`]. The balance
//! column is written only by the balance mutator.

use crate::domain::entities::SubAccount;
use crate::domain::errors::DomainError;
use crate::domain::value_objects::{Patch, Patchable, SubAccountId, Timestamp, TradingId, UserId};
use crate::infrastructure::persistence::postgres::errors::{Op, map_sqlx, query_error};
use crate::infrastructure::persistence::postgres::rows::{
    SUB_ACCOUNT_COLUMNS, SubAccountRow, at, convert_all,
};
use crate::infrastructure::persistence::traits::{
    RepositoryError, RepositoryResult, SubAccountRepository,
};
use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

/// PostgreSQL implementation of [`SubAccountRepository`].
#[derive(Debug, Clone)]
pub struct PostgresSubAccountRepository {
    pool: PgPool,
}

impl PostgresSubAccountRepository {
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
}

/// Reads a live sub-account, optionally taking the row lock.
pub(crate) async fn fetch_sub_account(
    conn: &mut PgConnection,
    id: SubAccountId,
    lock: bool,
) -> RepositoryResult<Option<SubAccount>> {
    let suffix = if lock { " FOR UPDATE" } else { "" };
    let sql = format!(
        "SELECT {SUB_ACCOUNT_COLUMNS} FROM sub_accounts \
         WHERE id = $1 AND deleted_at IS NULL{suffix}"
    );
    sqlx::query_as::<_, SubAccountRow>(&sql)
        .bind(Uuid::from(id))
        .fetch_optional(conn)
        .await
        .map_err(query_error)?
        .map(SubAccountRow::try_into_sub_account)
        .transpose()
}

#[async_trait]
impl SubAccountRepository for PostgresSubAccountRepository {
    async fn create(&self, sub_account: &SubAccount) -> RepositoryResult<()> {
        sub_account.validate()?;
        if !sub_account.balance.is_zero() {
            return Err(DomainError::invalid("balance", "must be zero on creation").into());
        }

        let mut tx = self.pool.begin().await.map_err(query_error)?;
        let owner: Option<Uuid> = sqlx::query_scalar(
            "SELECT user_id FROM tradings WHERE id = $1 AND deleted_at IS NULL FOR SHARE",
        )
        .bind(Uuid::from(sub_account.trading_id))
        .fetch_optional(&mut *tx)
        .await
        .map_err(query_error)?;

        match owner {
            None => {
                return Err(RepositoryError::reference_not_found(
                    "Trading",
                    sub_account.trading_id,
                ));
            }
            Some(owner) if owner != Uuid::from(sub_account.user_id) => {
                return Err(RepositoryError::access_denied(format!(
                    "trading {} is not owned by user {}",
                    sub_account.trading_id, sub_account.user_id
                )));
            }
            Some(_) => {}
        }

        sqlx::query(
            r#"
            INSERT INTO sub_accounts (
                id, user_id, trading_id, name, symbol, balance, info,
                created_at, updated_at, deleted_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(Uuid::from(sub_account.id))
        .bind(Uuid::from(sub_account.user_id))
        .bind(Uuid::from(sub_account.trading_id))
        .bind(&sub_account.name)
        .bind(&sub_account.symbol)
        .bind(sub_account.balance)
        .bind(sub_account.info.to_json())
        .bind(at(sub_account.created_at))
        .bind(at(sub_account.updated_at))
        .bind(sub_account.deleted_at.map(at))
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx(Op::Write, "SubAccount", sub_account.id))?;

        tx.commit().await.map_err(query_error)
    }

    async fn get_by_id(&self, id: SubAccountId) -> RepositoryResult<Option<SubAccount>> {
        let mut conn = self.pool.acquire().await.map_err(query_error)?;
        fetch_sub_account(&mut conn, id, false).await
    }

    async fn get_by_user(
        &self,
        user_id: UserId,
        trading_id: Option<TradingId>,
    ) -> RepositoryResult<Vec<SubAccount>> {
        let sql = format!(
            "SELECT {SUB_ACCOUNT_COLUMNS} FROM sub_accounts \
             WHERE user_id = $1 AND deleted_at IS NULL \
               AND ($2::uuid IS NULL OR trading_id = $2) \
             ORDER BY created_at DESC, id DESC"
        );
        let rows = sqlx::query_as::<_, SubAccountRow>(&sql)
            .bind(Uuid::from(user_id))
            .bind(trading_id.map(Uuid::from))
            .fetch_all(&self.pool)
            .await
            .map_err(query_error)?;
        convert_all(rows, SubAccountRow::try_into_sub_account)
    }

    async fn get_by_symbol(
        &self,
        user_id: UserId,
        symbol: &str,
    ) -> RepositoryResult<Vec<SubAccount>> {
        let sql = format!(
            "SELECT {SUB_ACCOUNT_COLUMNS} FROM sub_accounts \
             WHERE user_id = $1 AND symbol = $2 AND deleted_at IS NULL \
             ORDER BY created_at DESC, id DESC"
        );
        let rows = sqlx::query_as::<_, SubAccountRow>(&sql)
            .bind(Uuid::from(user_id))
            .bind(symbol.trim().to_uppercase())
            .fetch_all(&self.pool)
            .await
            .map_err(query_error)?;
        convert_all(rows, SubAccountRow::try_into_sub_account)
    }

    async fn update(&self, id: SubAccountId, patch: &Patch) -> RepositoryResult<SubAccount> {
        let mut tx = self.pool.begin().await.map_err(query_error)?;
        let mut sub = fetch_sub_account(&mut tx, id, true)
            .await?
            .ok_or_else(|| RepositoryError::not_found("SubAccount", id))?;

        sub.apply_patch(patch)?;
        sub.validate()?;
        sub.updated_at = Timestamp::now();

        sqlx::query(
            r#"
            UPDATE sub_accounts SET name = $2, symbol = $3, info = $4, updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(Uuid::from(id))
        .bind(&sub.name)
        .bind(&sub.symbol)
        .bind(sub.info.to_json())
        .bind(at(sub.updated_at))
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx(Op::Write, "SubAccount", id))?;

        tx.commit().await.map_err(query_error)?;
        Ok(sub)
    }

    async fn delete(&self, id: SubAccountId) -> RepositoryResult<()> {
        let mut tx = self.pool.begin().await.map_err(query_error)?;
        let sub = fetch_sub_account(&mut tx, id, true)
            .await?
            .ok_or_else(|| RepositoryError::not_found("SubAccount", id))?;
        sub.ensure_empty()?;

        sqlx::query("UPDATE sub_accounts SET deleted_at = now(), updated_at = now() WHERE id = $1")
            .bind(Uuid::from(id))
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx(Op::Delete, "SubAccount", id))?;

        tx.commit().await.map_err(query_error)
    }
}
