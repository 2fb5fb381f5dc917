//! # PostgreSQL Trading Repository
//!
//! PostgreSQL implementation of [`TradingRepository`]. Reads join the bound
//! exchange row so every returned trading carries its binding summary.

use crate::domain::entities::Trading;
use crate::domain::value_objects::{
    ExchangeBindingId, Page, PageRequest, Patch, Patchable, Timestamp, TradingId, UserId,
};
use crate::infrastructure::persistence::filters::TradingFilter;
use crate::infrastructure::persistence::postgres::errors::{Op, map_sqlx, query_error};
use crate::infrastructure::persistence::postgres::rows::{
    BINDING_COLUMNS, BindingRow, TRADING_SELECT, TradingRow, at, convert_all, page_bounds,
    row_count,
};
use crate::infrastructure::persistence::traits::{
    RepositoryError, RepositoryResult, TradingRepository,
};
use crate::infrastructure::persistence::postgres::user_repository::require_live_user;
use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

/// PostgreSQL implementation of [`TradingRepository`].
#[derive(Debug, Clone)]
pub struct PostgresTradingRepository {
    pool: PgPool,
}

impl PostgresTradingRepository {
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

/// Enforces that `user` may bind a trading to `binding_id`. The binding row
/// is share-locked until the caller's transaction ends.
async fn check_binding_usable(
    conn: &mut PgConnection,
    binding_id: ExchangeBindingId,
    user: UserId,
) -> RepositoryResult<()> {
    let sql = format!(
        "SELECT {BINDING_COLUMNS} FROM exchanges WHERE id = $1 AND deleted_at IS NULL FOR SHARE"
    );
    let binding = sqlx::query_as::<_, BindingRow>(&sql)
        .bind(Uuid::from(binding_id))
        .fetch_optional(conn)
        .await
        .map_err(query_error)?
        .ok_or_else(|| RepositoryError::reference_not_found("ExchangeBinding", binding_id))?
        .try_into_binding()?;

    if !binding.is_usable_by(user) {
        return Err(RepositoryError::access_denied(format!(
            "exchange binding {binding_id} belongs to another user"
        )));
    }
    Ok(())
}

async fn fetch_trading(
    conn: &mut PgConnection,
    id: TradingId,
    lock: bool,
) -> RepositoryResult<Option<Trading>> {
    let suffix = if lock { " FOR UPDATE OF t" } else { "" };
    let sql = format!("{TRADING_SELECT} WHERE t.id = $1 AND t.deleted_at IS NULL{suffix}");
    sqlx::query_as::<_, TradingRow>(&sql)
        .bind(Uuid::from(id))
        .fetch_optional(conn)
        .await
        .map_err(query_error)?
        .map(TradingRow::try_into_trading)
        .transpose()
}

#[async_trait]
impl TradingRepository for PostgresTradingRepository {
    async fn create(&self, trading: &Trading) -> RepositoryResult<Trading> {
        trading.validate()?;

        let mut tx = self.pool.begin().await.map_err(query_error)?;
        require_live_user(&mut tx, trading.user_id).await?;
        check_binding_usable(&mut tx, trading.exchange_binding_id, trading.user_id).await?;

        sqlx::query(
            r#"
            INSERT INTO tradings (
                id, user_id, exchange_id, name, trading_type, status, settings, info,
                created_at, updated_at, deleted_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(Uuid::from(trading.id))
        .bind(Uuid::from(trading.user_id))
        .bind(Uuid::from(trading.exchange_binding_id))
        .bind(&trading.name)
        .bind(trading.trading_type.as_str())
        .bind(trading.status.as_str())
        .bind(trading.settings.to_json())
        .bind(trading.info.to_json())
        .bind(at(trading.created_at))
        .bind(at(trading.updated_at))
        .bind(trading.deleted_at.map(at))
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx(Op::Write, "Trading", trading.id))?;

        let stored = fetch_trading(&mut tx, trading.id, false)
            .await?
            .ok_or_else(|| RepositoryError::internal("inserted trading is not readable"))?;
        tx.commit().await.map_err(query_error)?;
        Ok(stored)
    }

    async fn get_by_id(&self, id: TradingId) -> RepositoryResult<Option<Trading>> {
        let mut conn = self.pool.acquire().await.map_err(query_error)?;
        fetch_trading(&mut conn, id, false).await
    }

    async fn get_by_user(
        &self,
        user_id: UserId,
        filter: &TradingFilter,
        page: PageRequest,
    ) -> RepositoryResult<Page<Trading>> {
        const WHERE: &str = "WHERE t.user_id = $1 AND t.deleted_at IS NULL \
             AND ($2::text IS NULL OR t.status = $2) \
             AND ($3::text IS NULL OR t.trading_type = $3) \
             AND ($4::uuid IS NULL OR t.exchange_id = $4)";

        let status = filter.status.map(|s| s.as_str());
        let trading_type = filter.trading_type.map(|t| t.as_str());
        let binding = filter.exchange_binding_id.map(Uuid::from);

        let count_sql = format!("SELECT COUNT(*) FROM tradings t {WHERE}");
        let total: i64 = sqlx::query_scalar(&count_sql)
            .bind(Uuid::from(user_id))
            .bind(status)
            .bind(trading_type)
            .bind(binding)
            .fetch_one(&self.pool)
            .await
            .map_err(query_error)?;

        let (limit, offset) = page_bounds(page);
        let sql = format!(
            "{TRADING_SELECT} {WHERE} ORDER BY t.created_at DESC, t.id DESC LIMIT $5 OFFSET $6"
        );
        let rows = sqlx::query_as::<_, TradingRow>(&sql)
            .bind(Uuid::from(user_id))
            .bind(status)
            .bind(trading_type)
            .bind(binding)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(query_error)?;

        Ok(Page::new(
            convert_all(rows, TradingRow::try_into_trading)?,
            row_count(total),
            page,
        ))
    }

    async fn update(&self, id: TradingId, patch: &Patch) -> RepositoryResult<Trading> {
        let mut tx = self.pool.begin().await.map_err(query_error)?;
        let current = fetch_trading(&mut tx, id, true)
            .await?
            .ok_or_else(|| RepositoryError::not_found("Trading", id))?;

        let mut trading = current.clone();
        trading.apply_patch(patch)?;
        trading.validate()?;
        if trading.exchange_binding_id != current.exchange_binding_id {
            check_binding_usable(&mut tx, trading.exchange_binding_id, trading.user_id).await?;
        }
        trading.updated_at = Timestamp::now();

        sqlx::query(
            r#"
            UPDATE tradings
            SET exchange_id = $2, name = $3, trading_type = $4, status = $5,
                settings = $6, info = $7, updated_at = $8
            WHERE id = $1
            "#,
        )
        .bind(Uuid::from(id))
        .bind(Uuid::from(trading.exchange_binding_id))
        .bind(&trading.name)
        .bind(trading.trading_type.as_str())
        .bind(trading.status.as_str())
        .bind(trading.settings.to_json())
        .bind(trading.info.to_json())
        .bind(at(trading.updated_at))
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx(Op::Write, "Trading", id))?;

        let stored = fetch_trading(&mut tx, id, false)
            .await?
            .ok_or_else(|| RepositoryError::not_found("Trading", id))?;
        tx.commit().await.map_err(query_error)?;
        Ok(stored)
    }

    async fn delete(&self, id: TradingId) -> RepositoryResult<()> {
        let mut tx = self.pool.begin().await.map_err(query_error)?;
        fetch_trading(&mut tx, id, true)
            .await?
            .ok_or_else(|| RepositoryError::not_found("Trading", id))?;

        let referenced: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM sub_accounts \
             WHERE trading_id = $1 AND deleted_at IS NULL)",
        )
        .bind(Uuid::from(id))
        .fetch_one(&mut *tx)
        .await
        .map_err(query_error)?;
        if referenced {
            return Err(RepositoryError::in_use("Trading", id));
        }

        sqlx::query("UPDATE tradings SET deleted_at = now(), updated_at = now() WHERE id = $1")
            .bind(Uuid::from(id))
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx(Op::Delete, "Trading", id))?;

        tx.commit().await.map_err(query_error)
    }
}
