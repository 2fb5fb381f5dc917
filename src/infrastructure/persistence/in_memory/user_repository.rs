//! # In-Memory User Repository
//!
//! In-memory implementation of [`UserRepository`] for testing.

use crate::domain::entities::User;
use crate::domain::value_objects::{Page, PageRequest, Patch, Patchable, Timestamp, UserId};
use crate::infrastructure::persistence::in_memory::store::{InMemoryStore, Tables, paginate};
use crate::infrastructure::persistence::traits::{
    RepositoryError, RepositoryResult, UserRepository,
};
use async_trait::async_trait;

/// In-memory implementation of [`UserRepository`].
#[derive(Debug, Clone)]
pub struct InMemoryUserRepository {
    store: InMemoryStore,
}

impl InMemoryUserRepository {
    /// Creates a repository over `store`.
    #[must_use]
    pub fn new(store: InMemoryStore) -> Self {
        Self { store }
    }
}

fn check_unique(tables: &Tables, user: &User) -> RepositoryResult<()> {
    for other in tables.users.values() {
        if other.id == user.id || other.is_deleted() {
            continue;
        }
        if other.username == user.username {
            return Err(RepositoryError::already_exists(
                "User",
                format!("username={}", user.username),
            ));
        }
        if other.email == user.email {
            return Err(RepositoryError::already_exists("User", format!("email={}", user.email)));
        }
    }
    Ok(())
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn create(&self, user: &User) -> RepositoryResult<()> {
        user.validate()?;
        let mut tables = self.store.write().await;
        if tables.users.contains_key(&user.id) {
            return Err(RepositoryError::already_exists("User", user.id.to_string()));
        }
        check_unique(&tables, user)?;
        tables.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: UserId) -> RepositoryResult<Option<User>> {
        let tables = self.store.read().await;
        Ok(tables.users.get(&id).filter(|u| !u.is_deleted()).cloned())
    }

    async fn get_by_email(&self, email: &str) -> RepositoryResult<Option<User>> {
        let tables = self.store.read().await;
        Ok(tables
            .users
            .values()
            .find(|u| !u.is_deleted() && u.email == email)
            .cloned())
    }

    async fn get_by_username(&self, username: &str) -> RepositoryResult<Option<User>> {
        let tables = self.store.read().await;
        Ok(tables
            .users
            .values()
            .find(|u| !u.is_deleted() && u.username == username)
            .cloned())
    }

    async fn list(&self, page: PageRequest) -> RepositoryResult<Page<User>> {
        let tables = self.store.read().await;
        let live: Vec<User> = tables
            .users
            .values()
            .filter(|u| !u.is_deleted())
            .cloned()
            .collect();
        Ok(paginate(live, page, |u| (u.created_at, u.id)))
    }

    async fn update(&self, id: UserId, patch: &Patch) -> RepositoryResult<User> {
        let mut tables = self.store.write().await;
        let mut user = tables
            .users
            .get(&id)
            .filter(|u| !u.is_deleted())
            .cloned()
            .ok_or_else(|| RepositoryError::not_found("User", id))?;

        user.apply_patch(patch)?;
        user.validate()?;
        check_unique(&tables, &user)?;
        user.updated_at = Timestamp::now();

        tables.users.insert(id, user.clone());
        Ok(user)
    }

    async fn delete(&self, id: UserId) -> RepositoryResult<()> {
        let mut tables = self.store.write().await;
        let user = tables
            .users
            .get_mut(&id)
            .filter(|u| !u.is_deleted())
            .ok_or_else(|| RepositoryError::not_found("User", id))?;
        let now = Timestamp::now();
        user.deleted_at = Some(now);
        user.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::domain::errors::ErrorKind;
    use serde_json::json;

    fn repo() -> InMemoryUserRepository {
        InMemoryUserRepository::new(InMemoryStore::default())
    }

    #[tokio::test]
    async fn create_and_get() {
        let repo = repo();
        let alice = User::new("alice", "a@x");
        repo.create(&alice).await.unwrap();

        assert_eq!(repo.get_by_id(alice.id).await.unwrap(), Some(alice.clone()));
        assert_eq!(repo.get_by_email("a@x").await.unwrap(), Some(alice.clone()));
        assert_eq!(repo.get_by_username("alice").await.unwrap(), Some(alice));
    }

    #[tokio::test]
    async fn lookups_are_case_sensitive() {
        let repo = repo();
        repo.create(&User::new("alice", "a@x")).await.unwrap();
        assert!(repo.get_by_username("ALICE").await.unwrap().is_none());
        assert!(repo.get_by_email("A@X").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_email_rejected() {
        let repo = repo();
        repo.create(&User::new("alice", "a@x")).await.unwrap();
        let err = repo.create(&User::new("bob", "a@x")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }

    #[tokio::test]
    async fn invalid_user_rejected() {
        let err = repo().create(&User::new("", "a@x")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn update_applies_patch() {
        let repo = repo();
        let alice = User::new("alice", "a@x");
        repo.create(&alice).await.unwrap();

        let patch = Patch::new().set("avatar_url", json!("https://img/a.png"));
        let updated = repo.update(alice.id, &patch).await.unwrap();
        assert_eq!(updated.avatar_url.as_deref(), Some("https://img/a.png"));
    }

    #[tokio::test]
    async fn update_rename_collision() {
        let repo = repo();
        let alice = User::new("alice", "a@x");
        repo.create(&alice).await.unwrap();
        repo.create(&User::new("bob", "b@x")).await.unwrap();

        let patch = Patch::new().set("username", json!("bob"));
        let err = repo.update(alice.id, &patch).await.unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn update_missing_is_not_found() {
        let err = repo()
            .update(UserId::new_v4(), &Patch::new())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn soft_delete_hides_and_frees_keys() {
        let repo = repo();
        let alice = User::new("alice", "a@x");
        repo.create(&alice).await.unwrap();
        repo.delete(alice.id).await.unwrap();

        assert!(repo.get_by_id(alice.id).await.unwrap().is_none());
        assert!(repo.delete(alice.id).await.unwrap_err().is_not_found());
        repo.create(&User::new("alice", "a@x")).await.unwrap();
    }

    #[tokio::test]
    async fn list_pages_newest_first() {
        let repo = repo();
        for i in 0..3 {
            let mut u = User::new(format!("u{i}"), format!("u{i}@x"));
            u.created_at = Timestamp::from_secs(1_000 + i).unwrap();
            repo.create(&u).await.unwrap();
        }
        let page = repo.list(PageRequest::new(1, 2)).await.unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.total_pages, 2);
        assert_eq!(page.items[0].username, "u2");

        let beyond = repo.list(PageRequest::new(5, 2)).await.unwrap();
        assert!(beyond.items.is_empty());
        assert_eq!(beyond.total, 3);
    }
}
