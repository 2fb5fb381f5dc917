//! # PostgreSQL Exchange Binding Repository
//!
//! PostgreSQL implementation of [`ExchangeBindingRepository`] over the
//! `exchanges` table.
//!
//! The shape rule (private rows carry an owner and all three credential
//! columns, public rows carry none) is checked by `validate()` before any
//! write and again by the `exchanges_visibility_shape` constraint. Name
//! uniqueness per owner, with public rows sharing one bucket, is a partial
//! unique index.

use crate::domain::entities::{ExchangeBinding, SealedCredentials, SupportedExchanges};
use crate::domain::errors::DomainError;
use crate::domain::value_objects::{
    BindingStatus, ExchangeBindingId, Page, PageRequest, Patch, Patchable, Timestamp, UserId,
};
use crate::infrastructure::persistence::postgres::errors::{Op, map_sqlx, query_error};
use crate::infrastructure::persistence::postgres::rows::{
    BINDING_COLUMNS, BindingRow, at, convert_all, page_bounds, row_count, to_i32,
};
use crate::infrastructure::persistence::traits::{
    ExchangeBindingRepository, RepositoryError, RepositoryResult,
};
use crate::infrastructure::persistence::postgres::user_repository::require_live_user;
use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};
use std::sync::Arc;
use uuid::Uuid;

/// PostgreSQL implementation of [`ExchangeBindingRepository`].
#[derive(Debug, Clone)]
pub struct PostgresExchangeBindingRepository {
    pool: PgPool,
    supported: Arc<SupportedExchanges>,
}

impl PostgresExchangeBindingRepository {
    /// Creates a repository validating against `supported`.
    #[must_use]
    pub fn new(pool: PgPool, supported: SupportedExchanges) -> Self {
        Self {
            pool,
            supported: Arc::new(supported),
        }
    }

    /// Returns a reference to the connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs a single-row `UPDATE … RETURNING` against a live binding.
    async fn update_returning(
        &self,
        set_clause: &str,
        id: ExchangeBindingId,
    ) -> RepositoryResult<ExchangeBinding> {
        let sql = format!(
            "UPDATE exchanges SET {set_clause}, updated_at = now() \
             WHERE id = $1 AND deleted_at IS NULL RETURNING {BINDING_COLUMNS}"
        );
        sqlx::query_as::<_, BindingRow>(&sql)
            .bind(Uuid::from(id))
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx(Op::Write, "ExchangeBinding", id))?
            .ok_or_else(|| RepositoryError::not_found("ExchangeBinding", id))?
            .try_into_binding()
    }
}

async fn lock_binding(
    conn: &mut PgConnection,
    id: ExchangeBindingId,
) -> RepositoryResult<ExchangeBinding> {
    let sql = format!(
        "SELECT {BINDING_COLUMNS} FROM exchanges WHERE id = $1 AND deleted_at IS NULL FOR UPDATE"
    );
    sqlx::query_as::<_, BindingRow>(&sql)
        .bind(Uuid::from(id))
        .fetch_optional(conn)
        .await
        .map_err(query_error)?
        .ok_or_else(|| RepositoryError::not_found("ExchangeBinding", id))?
        .try_into_binding()
}

/// Writes every mutable column of `binding`.
async fn store_binding(conn: &mut PgConnection, binding: &ExchangeBinding) -> RepositoryResult<()> {
    let credentials = binding.credentials.as_ref();
    sqlx::query(
        r#"
        UPDATE exchanges
        SET name = $2, exchange_type = $3, visibility = $4,
            encrypted_api_key = $5, encrypted_api_secret = $6, api_key_hash = $7,
            status = $8, last_used_at = $9, failure_count = $10, last_failure_at = $11,
            security_settings = $12, info = $13, updated_at = $14
        WHERE id = $1
        "#,
    )
    .bind(Uuid::from(binding.id))
    .bind(&binding.name)
    .bind(&binding.exchange_type)
    .bind(binding.visibility.as_str())
    .bind(credentials.map(|c| c.encrypted_api_key.as_str()))
    .bind(credentials.map(|c| c.encrypted_api_secret.as_str()))
    .bind(credentials.map(|c| c.api_key_hash.as_str()))
    .bind(binding.status.as_str())
    .bind(binding.last_used_at.map(at))
    .bind(to_i32("failure_count", binding.failure_count)?)
    .bind(binding.last_failure_at.map(at))
    .bind(binding.security_settings.to_json())
    .bind(binding.info.to_json())
    .bind(at(binding.updated_at))
    .execute(conn)
    .await
    .map_err(map_sqlx(
        Op::Write,
        "ExchangeBinding",
        format!("name={}", binding.name),
    ))?;
    Ok(())
}

#[async_trait]
impl ExchangeBindingRepository for PostgresExchangeBindingRepository {
    async fn create(&self, binding: &ExchangeBinding) -> RepositoryResult<()> {
        binding.validate(&self.supported)?;
        let credentials = binding.credentials.as_ref();

        let mut tx = self.pool.begin().await.map_err(query_error)?;
        if let Some(owner) = binding.user_id {
            require_live_user(&mut tx, owner).await?;
        }
        sqlx::query(
            r#"
            INSERT INTO exchanges (
                id, user_id, name, exchange_type, visibility,
                encrypted_api_key, encrypted_api_secret, api_key_hash,
                status, last_used_at, failure_count, last_failure_at,
                security_settings, info, created_at, updated_at, deleted_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(Uuid::from(binding.id))
        .bind(binding.user_id.map(Uuid::from))
        .bind(&binding.name)
        .bind(&binding.exchange_type)
        .bind(binding.visibility.as_str())
        .bind(credentials.map(|c| c.encrypted_api_key.as_str()))
        .bind(credentials.map(|c| c.encrypted_api_secret.as_str()))
        .bind(credentials.map(|c| c.api_key_hash.as_str()))
        .bind(binding.status.as_str())
        .bind(binding.last_used_at.map(at))
        .bind(to_i32("failure_count", binding.failure_count)?)
        .bind(binding.last_failure_at.map(at))
        .bind(binding.security_settings.to_json())
        .bind(binding.info.to_json())
        .bind(at(binding.created_at))
        .bind(at(binding.updated_at))
        .bind(binding.deleted_at.map(at))
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx(
            Op::Write,
            "ExchangeBinding",
            format!("name={}", binding.name),
        ))?;

        tx.commit().await.map_err(query_error)
    }

    async fn get_by_id(&self, id: ExchangeBindingId) -> RepositoryResult<Option<ExchangeBinding>> {
        let sql = format!(
            "SELECT {BINDING_COLUMNS} FROM exchanges WHERE id = $1 AND deleted_at IS NULL"
        );
        sqlx::query_as::<_, BindingRow>(&sql)
            .bind(Uuid::from(id))
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error)?
            .map(BindingRow::try_into_binding)
            .transpose()
    }

    async fn get_by_user(
        &self,
        user_id: UserId,
        page: PageRequest,
    ) -> RepositoryResult<Page<ExchangeBinding>> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM exchanges WHERE user_id = $1 AND deleted_at IS NULL",
        )
        .bind(Uuid::from(user_id))
        .fetch_one(&self.pool)
        .await
        .map_err(query_error)?;

        let (limit, offset) = page_bounds(page);
        let sql = format!(
            "SELECT {BINDING_COLUMNS} FROM exchanges WHERE user_id = $1 AND deleted_at IS NULL \
             ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3"
        );
        let rows = sqlx::query_as::<_, BindingRow>(&sql)
            .bind(Uuid::from(user_id))
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(query_error)?;

        Ok(Page::new(
            convert_all(rows, BindingRow::try_into_binding)?,
            row_count(total),
            page,
        ))
    }

    async fn get_public(
        &self,
        exchange_type: Option<&str>,
    ) -> RepositoryResult<Vec<ExchangeBinding>> {
        let sql = format!(
            "SELECT {BINDING_COLUMNS} FROM exchanges \
             WHERE visibility = 'public' AND status = 'active' AND deleted_at IS NULL \
               AND ($1::text IS NULL OR exchange_type = $1) \
             ORDER BY name"
        );
        let rows = sqlx::query_as::<_, BindingRow>(&sql)
            .bind(exchange_type)
            .fetch_all(&self.pool)
            .await
            .map_err(query_error)?;
        convert_all(rows, BindingRow::try_into_binding)
    }

    async fn get_by_name_and_owner(
        &self,
        name: &str,
        owner: Option<UserId>,
    ) -> RepositoryResult<Option<ExchangeBinding>> {
        let sql = format!(
            "SELECT {BINDING_COLUMNS} FROM exchanges \
             WHERE name = $1 AND user_id IS NOT DISTINCT FROM $2 AND deleted_at IS NULL"
        );
        sqlx::query_as::<_, BindingRow>(&sql)
            .bind(name)
            .bind(owner.map(Uuid::from))
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error)?
            .map(BindingRow::try_into_binding)
            .transpose()
    }

    async fn get_by_api_key_hash(&self, hash: &str) -> RepositoryResult<Option<ExchangeBinding>> {
        let sql = format!(
            "SELECT {BINDING_COLUMNS} FROM exchanges \
             WHERE api_key_hash = $1 AND deleted_at IS NULL \
             ORDER BY created_at DESC LIMIT 1"
        );
        sqlx::query_as::<_, BindingRow>(&sql)
            .bind(hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error)?
            .map(BindingRow::try_into_binding)
            .transpose()
    }

    async fn update(
        &self,
        id: ExchangeBindingId,
        patch: &Patch,
    ) -> RepositoryResult<ExchangeBinding> {
        let mut tx = self.pool.begin().await.map_err(query_error)?;
        let mut binding = lock_binding(&mut tx, id).await?;

        binding.apply_patch(patch)?;
        binding.validate(&self.supported)?;
        binding.updated_at = Timestamp::now();
        store_binding(&mut tx, &binding).await?;

        tx.commit().await.map_err(query_error)?;
        Ok(binding)
    }

    async fn rotate_credentials(
        &self,
        id: ExchangeBindingId,
        credentials: &SealedCredentials,
    ) -> RepositoryResult<ExchangeBinding> {
        let mut tx = self.pool.begin().await.map_err(query_error)?;
        let mut binding = lock_binding(&mut tx, id).await?;
        if binding.is_public() {
            return Err(DomainError::PublicMustNotCarryCredentials.into());
        }

        binding.credentials = Some(credentials.clone());
        binding.failure_count = 0;
        binding.last_failure_at = None;
        binding.validate(&self.supported)?;
        binding.updated_at = Timestamp::now();
        store_binding(&mut tx, &binding).await?;

        tx.commit().await.map_err(query_error)?;
        Ok(binding)
    }

    async fn update_status(
        &self,
        id: ExchangeBindingId,
        status: BindingStatus,
    ) -> RepositoryResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE exchanges SET status = $2, updated_at = now()
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(Uuid::from(id))
        .bind(status.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx(Op::Write, "ExchangeBinding", id))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::not_found("ExchangeBinding", id));
        }
        Ok(())
    }

    async fn touch_last_used(&self, id: ExchangeBindingId) -> RepositoryResult<()> {
        self.update_returning("last_used_at = now()", id)
            .await
            .map(|_| ())
    }

    async fn record_failure(&self, id: ExchangeBindingId) -> RepositoryResult<ExchangeBinding> {
        self.update_returning(
            "failure_count = failure_count + 1, last_failure_at = now()",
            id,
        )
        .await
    }

    async fn reset_failures(&self, id: ExchangeBindingId) -> RepositoryResult<()> {
        self.update_returning("failure_count = 0, last_failure_at = NULL", id)
            .await
            .map(|_| ())
    }

    async fn delete(&self, id: ExchangeBindingId) -> RepositoryResult<()> {
        let mut tx = self.pool.begin().await.map_err(query_error)?;
        lock_binding(&mut tx, id).await?;

        let referenced: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM tradings WHERE exchange_id = $1 AND deleted_at IS NULL)",
        )
        .bind(Uuid::from(id))
        .fetch_one(&mut *tx)
        .await
        .map_err(query_error)?;
        if referenced {
            return Err(RepositoryError::in_use("ExchangeBinding", id));
        }

        sqlx::query("UPDATE exchanges SET deleted_at = now(), updated_at = now() WHERE id = $1")
            .bind(Uuid::from(id))
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx(Op::Delete, "ExchangeBinding", id))?;

        tx.commit().await.map_err(query_error)
    }
}
