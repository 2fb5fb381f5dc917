//! # In-Memory OAuth Identity Repository
//!
//! In-memory implementation of [`OAuthIdentityRepository`] for testing.

use crate::domain::entities::OAuthIdentity;
use crate::domain::value_objects::{OAuthIdentityId, Patch, Patchable, Timestamp, UserId};
use crate::infrastructure::persistence::in_memory::store::InMemoryStore;
use crate::infrastructure::persistence::traits::{
    OAuthIdentityRepository, RepositoryError, RepositoryResult,
};
use async_trait::async_trait;

/// In-memory implementation of [`OAuthIdentityRepository`].
#[derive(Debug, Clone)]
pub struct InMemoryOAuthIdentityRepository {
    store: InMemoryStore,
}

impl InMemoryOAuthIdentityRepository {
    /// Creates a repository over `store`.
    #[must_use]
    pub fn new(store: InMemoryStore) -> Self {
        Self { store }
    }

    async fn newest_where<F>(&self, pred: F) -> Option<OAuthIdentity>
    where
        F: Fn(&OAuthIdentity) -> bool,
    {
        let tables = self.store.read().await;
        tables
            .identities
            .values()
            .filter(|i| !i.is_deleted() && pred(i))
            .max_by_key(|i| (i.created_at, i.id))
            .cloned()
    }
}

#[async_trait]
impl OAuthIdentityRepository for InMemoryOAuthIdentityRepository {
    async fn create(&self, identity: &OAuthIdentity) -> RepositoryResult<()> {
        identity.validate()?;
        let mut tables = self.store.write().await;
        tables.require_user(identity.user_id)?;
        if tables.identities.contains_key(&identity.id) {
            return Err(RepositoryError::already_exists(
                "OAuthIdentity",
                identity.id.to_string(),
            ));
        }
        tables.identities.insert(identity.id, identity.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: OAuthIdentityId) -> RepositoryResult<Option<OAuthIdentity>> {
        let tables = self.store.read().await;
        Ok(tables
            .identities
            .get(&id)
            .filter(|i| !i.is_deleted())
            .cloned())
    }

    async fn get_by_user(&self, user_id: UserId) -> RepositoryResult<Vec<OAuthIdentity>> {
        let tables = self.store.read().await;
        let mut found: Vec<OAuthIdentity> = tables
            .identities
            .values()
            .filter(|i| !i.is_deleted() && i.user_id == user_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(found)
    }

    async fn get_by_user_and_provider(
        &self,
        user_id: UserId,
        provider: &str,
    ) -> RepositoryResult<Option<OAuthIdentity>> {
        Ok(self
            .newest_where(|i| i.user_id == user_id && i.provider == provider)
            .await)
    }

    async fn get_by_provider_user_id(
        &self,
        provider: &str,
        provider_user_id: &str,
    ) -> RepositoryResult<Option<OAuthIdentity>> {
        Ok(self
            .newest_where(|i| i.provider == provider && i.provider_user_id == provider_user_id)
            .await)
    }

    async fn update(
        &self,
        id: OAuthIdentityId,
        patch: &Patch,
    ) -> RepositoryResult<OAuthIdentity> {
        let mut tables = self.store.write().await;
        let mut identity = tables
            .identities
            .get(&id)
            .filter(|i| !i.is_deleted())
            .cloned()
            .ok_or_else(|| RepositoryError::not_found("OAuthIdentity", id))?;

        identity.apply_patch(patch)?;
        identity.validate()?;
        identity.updated_at = Timestamp::now();

        tables.identities.insert(id, identity.clone());
        Ok(identity)
    }

    async fn update_tokens(
        &self,
        id: OAuthIdentityId,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: Option<Timestamp>,
    ) -> RepositoryResult<()> {
        let mut tables = self.store.write().await;
        let identity = tables
            .identities
            .get_mut(&id)
            .filter(|i| !i.is_deleted())
            .ok_or_else(|| RepositoryError::not_found("OAuthIdentity", id))?;

        let mut next = identity.clone();
        next.access_token = access_token.to_string();
        next.refresh_token = refresh_token.map(str::to_string);
        next.expires_at = expires_at;
        next.validate()?;
        next.updated_at = Timestamp::now();
        *identity = next;
        Ok(())
    }

    async fn delete(&self, id: OAuthIdentityId) -> RepositoryResult<()> {
        let mut tables = self.store.write().await;
        let identity = tables
            .identities
            .get_mut(&id)
            .filter(|i| !i.is_deleted())
            .ok_or_else(|| RepositoryError::not_found("OAuthIdentity", id))?;
        let now = Timestamp::now();
        identity.deleted_at = Some(now);
        identity.updated_at = now;
        Ok(())
    }

    async fn delete_by_user(&self, user_id: UserId) -> RepositoryResult<u64> {
        let mut tables = self.store.write().await;
        let before = tables.identities.len();
        tables.identities.retain(|_, i| i.user_id != user_id);
        Ok((before - tables.identities.len()) as u64)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::domain::entities::User;
    use crate::domain::errors::ErrorKind;
    use crate::infrastructure::persistence::in_memory::InMemoryUserRepository;
    use crate::infrastructure::persistence::traits::UserRepository;
    use serde_json::json;

    async fn setup() -> (InMemoryOAuthIdentityRepository, User) {
        let store = InMemoryStore::default();
        let user = User::new("alice", "a@x");
        InMemoryUserRepository::new(store.clone())
            .create(&user)
            .await
            .unwrap();
        (InMemoryOAuthIdentityRepository::new(store), user)
    }

    #[tokio::test]
    async fn lookups() {
        let (repo, user) = setup().await;
        let identity = OAuthIdentity::new(user.id, "github", "gh-1", "tok");
        repo.create(&identity).await.unwrap();

        let by_provider = repo
            .get_by_user_and_provider(user.id, "github")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_provider.id, identity.id);
        let by_puid = repo
            .get_by_provider_user_id("github", "gh-1")
            .await
            .unwrap();
        assert_eq!(by_puid.map(|i| i.id), Some(identity.id));
        assert!(
            repo.get_by_user_and_provider(user.id, "google")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn multiple_per_provider_allowed() {
        let (repo, user) = setup().await;
        repo.create(&OAuthIdentity::new(user.id, "github", "gh-1", "a"))
            .await
            .unwrap();
        repo.create(&OAuthIdentity::new(user.id, "github", "gh-2", "b"))
            .await
            .unwrap();
        assert_eq!(repo.get_by_user(user.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unknown_user_is_reference_not_found() {
        let (repo, _) = setup().await;
        let err = repo
            .create(&OAuthIdentity::new(UserId::new_v4(), "github", "gh", "t"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReferenceNotFound);
    }

    #[tokio::test]
    async fn tokens_rotate_only_through_update_tokens() {
        let (repo, user) = setup().await;
        let identity = OAuthIdentity::new(user.id, "github", "gh-1", "old");
        repo.create(&identity).await.unwrap();

        let patch = Patch::new().set("access_token", json!("new"));
        let err = repo.update(identity.id, &patch).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ImmutableField);

        repo.update_tokens(identity.id, "new", Some("refresh"), None)
            .await
            .unwrap();
        let stored = repo.get_by_id(identity.id).await.unwrap().unwrap();
        assert_eq!(stored.access_token, "new");
        assert_eq!(stored.refresh_token.as_deref(), Some("refresh"));
    }

    #[tokio::test]
    async fn delete_by_user_removes_all() {
        let (repo, user) = setup().await;
        repo.create(&OAuthIdentity::new(user.id, "github", "gh-1", "a"))
            .await
            .unwrap();
        repo.create(&OAuthIdentity::new(user.id, "google", "go-1", "b"))
            .await
            .unwrap();
        assert_eq!(repo.delete_by_user(user.id).await.unwrap(), 2);
        assert!(repo.get_by_user(user.id).await.unwrap().is_empty());
    }
}
