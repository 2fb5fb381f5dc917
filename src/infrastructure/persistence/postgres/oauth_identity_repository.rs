//! # PostgreSQL OAuth Identity Repository
//!
//! PostgreSQL implementation of [`OAuthIdentityRepository`] over the
//! `oauth_tokens` table. Token columns hold Secret Engine ciphertext.

use crate::domain::entities::OAuthIdentity;
use crate::domain::value_objects::{OAuthIdentityId, Patch, Patchable, Timestamp, UserId};
use crate::infrastructure::persistence::postgres::errors::{Op, map_sqlx, query_error};
use crate::infrastructure::persistence::postgres::rows::{
    IDENTITY_COLUMNS, IdentityRow, at, convert_all,
};
use crate::infrastructure::persistence::traits::{
    OAuthIdentityRepository, RepositoryError, RepositoryResult,
};
use crate::infrastructure::persistence::postgres::user_repository::require_live_user;
use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

/// PostgreSQL implementation of [`OAuthIdentityRepository`].
#[derive(Debug, Clone)]
pub struct PostgresOAuthIdentityRepository {
    pool: PgPool,
}

impl PostgresOAuthIdentityRepository {
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

async fn lock_identity(
    conn: &mut PgConnection,
    id: OAuthIdentityId,
) -> RepositoryResult<OAuthIdentity> {
    let sql = format!(
        "SELECT {IDENTITY_COLUMNS} FROM oauth_tokens \
         WHERE id = $1 AND deleted_at IS NULL FOR UPDATE"
    );
    sqlx::query_as::<_, IdentityRow>(&sql)
        .bind(Uuid::from(id))
        .fetch_optional(conn)
        .await
        .map_err(query_error)?
        .ok_or_else(|| RepositoryError::not_found("OAuthIdentity", id))?
        .try_into_identity()
}

async fn store_identity(conn: &mut PgConnection, identity: &OAuthIdentity) -> RepositoryResult<()> {
    sqlx::query(
        r#"
        UPDATE oauth_tokens
        SET provider = $2, provider_user_id = $3, access_token = $4, refresh_token = $5,
            expires_at = $6, info = $7, updated_at = $8
        WHERE id = $1
        "#,
    )
    .bind(Uuid::from(identity.id))
    .bind(&identity.provider)
    .bind(&identity.provider_user_id)
    .bind(&identity.access_token)
    .bind(&identity.refresh_token)
    .bind(identity.expires_at.map(at))
    .bind(identity.info.to_json())
    .bind(at(identity.updated_at))
    .execute(conn)
    .await
    .map_err(map_sqlx(Op::Write, "OAuthIdentity", identity.id))?;
    Ok(())
}

#[async_trait]
impl OAuthIdentityRepository for PostgresOAuthIdentityRepository {
    async fn create(&self, identity: &OAuthIdentity) -> RepositoryResult<()> {
        identity.validate()?;

        let mut tx = self.pool.begin().await.map_err(query_error)?;
        require_live_user(&mut tx, identity.user_id).await?;
        sqlx::query(
            r#"
            INSERT INTO oauth_tokens (
                id, user_id, provider, provider_user_id, access_token, refresh_token,
                expires_at, info, created_at, updated_at, deleted_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(Uuid::from(identity.id))
        .bind(Uuid::from(identity.user_id))
        .bind(&identity.provider)
        .bind(&identity.provider_user_id)
        .bind(&identity.access_token)
        .bind(&identity.refresh_token)
        .bind(identity.expires_at.map(at))
        .bind(identity.info.to_json())
        .bind(at(identity.created_at))
        .bind(at(identity.updated_at))
        .bind(identity.deleted_at.map(at))
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx(Op::Write, "OAuthIdentity", identity.user_id))?;

        tx.commit().await.map_err(query_error)
    }

    async fn get_by_id(&self, id: OAuthIdentityId) -> RepositoryResult<Option<OAuthIdentity>> {
        let sql = format!(
            "SELECT {IDENTITY_COLUMNS} FROM oauth_tokens WHERE id = $1 AND deleted_at IS NULL"
        );
        sqlx::query_as::<_, IdentityRow>(&sql)
            .bind(Uuid::from(id))
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error)?
            .map(IdentityRow::try_into_identity)
            .transpose()
    }

    async fn get_by_user(&self, user_id: UserId) -> RepositoryResult<Vec<OAuthIdentity>> {
        let sql = format!(
            "SELECT {IDENTITY_COLUMNS} FROM oauth_tokens \
             WHERE user_id = $1 AND deleted_at IS NULL ORDER BY created_at DESC, id DESC"
        );
        let rows = sqlx::query_as::<_, IdentityRow>(&sql)
            .bind(Uuid::from(user_id))
            .fetch_all(&self.pool)
            .await
            .map_err(query_error)?;
        convert_all(rows, IdentityRow::try_into_identity)
    }

    async fn get_by_user_and_provider(
        &self,
        user_id: UserId,
        provider: &str,
    ) -> RepositoryResult<Option<OAuthIdentity>> {
        let sql = format!(
            "SELECT {IDENTITY_COLUMNS} FROM oauth_tokens \
             WHERE user_id = $1 AND provider = $2 AND deleted_at IS NULL \
             ORDER BY created_at DESC, id DESC LIMIT 1"
        );
        sqlx::query_as::<_, IdentityRow>(&sql)
            .bind(Uuid::from(user_id))
            .bind(provider)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error)?
            .map(IdentityRow::try_into_identity)
            .transpose()
    }

    async fn get_by_provider_user_id(
        &self,
        provider: &str,
        provider_user_id: &str,
    ) -> RepositoryResult<Option<OAuthIdentity>> {
        let sql = format!(
            "SELECT {IDENTITY_COLUMNS} FROM oauth_tokens \
             WHERE provider = $1 AND provider_user_id = $2 AND deleted_at IS NULL \
             ORDER BY created_at DESC, id DESC LIMIT 1"
        );
        sqlx::query_as::<_, IdentityRow>(&sql)
            .bind(provider)
            .bind(provider_user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error)?
            .map(IdentityRow::try_into_identity)
            .transpose()
    }

    async fn update(
        &self,
        id: OAuthIdentityId,
        patch: &Patch,
    ) -> RepositoryResult<OAuthIdentity> {
        let mut tx = self.pool.begin().await.map_err(query_error)?;
        let mut identity = lock_identity(&mut tx, id).await?;

        identity.apply_patch(patch)?;
        identity.validate()?;
        identity.updated_at = Timestamp::now();
        store_identity(&mut tx, &identity).await?;

        tx.commit().await.map_err(query_error)?;
        Ok(identity)
    }

    async fn update_tokens(
        &self,
        id: OAuthIdentityId,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: Option<Timestamp>,
    ) -> RepositoryResult<()> {
        let mut tx = self.pool.begin().await.map_err(query_error)?;
        let mut identity = lock_identity(&mut tx, id).await?;

        identity.access_token = access_token.to_string();
        identity.refresh_token = refresh_token.map(str::to_string);
        identity.expires_at = expires_at;
        identity.validate()?;
        identity.updated_at = Timestamp::now();
        store_identity(&mut tx, &identity).await?;

        tx.commit().await.map_err(query_error)
    }

    async fn delete(&self, id: OAuthIdentityId) -> RepositoryResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE oauth_tokens SET deleted_at = now(), updated_at = now()
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(Uuid::from(id))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx(Op::Delete, "OAuthIdentity", id))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::not_found("OAuthIdentity", id));
        }
        Ok(())
    }

    async fn delete_by_user(&self, user_id: UserId) -> RepositoryResult<u64> {
        let result = sqlx::query("DELETE FROM oauth_tokens WHERE user_id = $1")
            .bind(Uuid::from(user_id))
            .execute(&self.pool)
            .await
            .map_err(map_sqlx(Op::Delete, "OAuthIdentity", user_id))?;
        Ok(result.rows_affected())
    }
}
