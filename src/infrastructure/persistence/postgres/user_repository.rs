//! # PostgreSQL User Repository
//!
//! PostgreSQL implementation of [`UserRepository`] using sqlx. Username and
//! email uniqueness among live rows is enforced by partial unique indexes.

use crate::domain::entities::User;
use crate::domain::value_objects::{Page, PageRequest, Patch, Patchable, Timestamp, UserId};
use crate::infrastructure::persistence::postgres::errors::{Op, map_sqlx, query_error};
use crate::infrastructure::persistence::postgres::rows::{
    USER_COLUMNS, UserRow, at, convert_all, page_bounds, row_count,
};
use crate::infrastructure::persistence::traits::{
    RepositoryError, RepositoryResult, UserRepository,
};
use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

/// Fails with `ReferenceNotFound` unless `id` names a live user. The row
/// stays share-locked until the caller's transaction ends, so a concurrent
/// soft delete waits.
pub(crate) async fn require_live_user(conn: &mut PgConnection, id: UserId) -> RepositoryResult<()> {
    let found: Option<Uuid> =
        sqlx::query_scalar("SELECT id FROM users WHERE id = $1 AND deleted_at IS NULL FOR SHARE")
            .bind(Uuid::from(id))
            .fetch_optional(conn)
            .await
            .map_err(query_error)?;
    found
        .map(|_| ())
        .ok_or_else(|| RepositoryError::reference_not_found("User", id))
}

/// PostgreSQL implementation of [`UserRepository`].
#[derive(Debug, Clone)]
pub struct PostgresUserRepository {
    pool: PgPool,
}

impl PostgresUserRepository {
    /// Creates a new PostgreSQL user repository.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns a reference to the connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn find_one(&self, column: &str, value: &str) -> RepositoryResult<Option<User>> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE {column} = $1 AND deleted_at IS NULL"
        );
        sqlx::query_as::<_, UserRow>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error)?
            .map(UserRow::try_into_user)
            .transpose()
    }
}

#[async_trait]
impl UserRepository for PostgresUserRepository {
    async fn create(&self, user: &User) -> RepositoryResult<()> {
        user.validate()?;

        sqlx::query(
            r#"
            INSERT INTO users (
                id, username, email, avatar_url, settings, info,
                created_at, updated_at, deleted_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(Uuid::from(user.id))
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.avatar_url)
        .bind(user.settings.to_json())
        .bind(user.info.to_json())
        .bind(at(user.created_at))
        .bind(at(user.updated_at))
        .bind(user.deleted_at.map(at))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx(
            Op::Write,
            "User",
            format!("username={} or email={}", user.username, user.email),
        ))?;

        Ok(())
    }

    async fn get_by_id(&self, id: UserId) -> RepositoryResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1 AND deleted_at IS NULL");
        sqlx::query_as::<_, UserRow>(&sql)
            .bind(Uuid::from(id))
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error)?
            .map(UserRow::try_into_user)
            .transpose()
    }

    async fn get_by_email(&self, email: &str) -> RepositoryResult<Option<User>> {
        self.find_one("email", email).await
    }

    async fn get_by_username(&self, username: &str) -> RepositoryResult<Option<User>> {
        self.find_one("username", username).await
    }

    async fn list(&self, page: PageRequest) -> RepositoryResult<Page<User>> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE deleted_at IS NULL")
            .fetch_one(&self.pool)
            .await
            .map_err(query_error)?;

        let (limit, offset) = page_bounds(page);
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE deleted_at IS NULL \
             ORDER BY created_at DESC, id DESC LIMIT $1 OFFSET $2"
        );
        let rows = sqlx::query_as::<_, UserRow>(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(query_error)?;

        Ok(Page::new(
            convert_all(rows, UserRow::try_into_user)?,
            row_count(total),
            page,
        ))
    }

    async fn update(&self, id: UserId, patch: &Patch) -> RepositoryResult<User> {
        let mut tx = self.pool.begin().await.map_err(query_error)?;

        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1 AND deleted_at IS NULL FOR UPDATE"
        );
        let mut user = sqlx::query_as::<_, UserRow>(&sql)
            .bind(Uuid::from(id))
            .fetch_optional(&mut *tx)
            .await
            .map_err(query_error)?
            .ok_or_else(|| RepositoryError::not_found("User", id))?
            .try_into_user()?;

        user.apply_patch(patch)?;
        user.validate()?;
        user.updated_at = Timestamp::now();

        sqlx::query(
            r#"
            UPDATE users
            SET username = $2, email = $3, avatar_url = $4, settings = $5, info = $6,
                updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(Uuid::from(id))
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.avatar_url)
        .bind(user.settings.to_json())
        .bind(user.info.to_json())
        .bind(at(user.updated_at))
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx(
            Op::Write,
            "User",
            format!("username={} or email={}", user.username, user.email),
        ))?;

        tx.commit().await.map_err(query_error)?;
        Ok(user)
    }

    async fn delete(&self, id: UserId) -> RepositoryResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE users SET deleted_at = now(), updated_at = now()
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(Uuid::from(id))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx(Op::Delete, "User", id))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::not_found("User", id));
        }
        Ok(())
    }
}
