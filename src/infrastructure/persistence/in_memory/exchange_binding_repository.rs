//! # In-Memory Exchange Binding Repository
//!
//! In-memory implementation of [`ExchangeBindingRepository`] for testing.

use crate::domain::entities::{ExchangeBinding, SealedCredentials};
use crate::domain::errors::DomainError;
use crate::domain::value_objects::{
    BindingStatus, ExchangeBindingId, Page, PageRequest, Patch, Patchable, Timestamp, UserId,
};
use crate::infrastructure::persistence::in_memory::store::{InMemoryStore, Tables, paginate};
use crate::infrastructure::persistence::traits::{
    ExchangeBindingRepository, RepositoryError, RepositoryResult,
};
use async_trait::async_trait;

/// In-memory implementation of [`ExchangeBindingRepository`].
#[derive(Debug, Clone)]
pub struct InMemoryExchangeBindingRepository {
    store: InMemoryStore,
}

impl InMemoryExchangeBindingRepository {
    /// Creates a repository over `store`.
    #[must_use]
    pub fn new(store: InMemoryStore) -> Self {
        Self { store }
    }

    /// Applies `f` to a live binding under the write lock.
    async fn modify<F>(&self, id: ExchangeBindingId, f: F) -> RepositoryResult<ExchangeBinding>
    where
        F: FnOnce(&mut ExchangeBinding) -> RepositoryResult<()> + Send,
    {
        let mut tables = self.store.write().await;
        let binding = tables
            .bindings
            .get_mut(&id)
            .filter(|b| !b.is_deleted())
            .ok_or_else(|| RepositoryError::not_found("ExchangeBinding", id))?;
        let mut next = binding.clone();
        f(&mut next)?;
        next.updated_at = Timestamp::now();
        *binding = next.clone();
        Ok(next)
    }
}

fn check_unique(tables: &Tables, binding: &ExchangeBinding) -> RepositoryResult<()> {
    let taken = tables.bindings.values().any(|other| {
        other.id != binding.id
            && !other.is_deleted()
            && other.user_id == binding.user_id
            && other.name == binding.name
    });
    if taken {
        return Err(RepositoryError::already_exists(
            "ExchangeBinding",
            format!("name={}", binding.name),
        ));
    }
    Ok(())
}

#[async_trait]
impl ExchangeBindingRepository for InMemoryExchangeBindingRepository {
    async fn create(&self, binding: &ExchangeBinding) -> RepositoryResult<()> {
        binding.validate(self.store.supported_exchanges())?;
        let mut tables = self.store.write().await;
        if let Some(owner) = binding.user_id {
            tables.require_user(owner)?;
        }
        if tables.bindings.contains_key(&binding.id) {
            return Err(RepositoryError::already_exists(
                "ExchangeBinding",
                binding.id.to_string(),
            ));
        }
        check_unique(&tables, binding)?;
        tables.bindings.insert(binding.id, binding.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: ExchangeBindingId) -> RepositoryResult<Option<ExchangeBinding>> {
        let tables = self.store.read().await;
        Ok(tables.live_binding(id).cloned())
    }

    async fn get_by_user(
        &self,
        user_id: UserId,
        page: PageRequest,
    ) -> RepositoryResult<Page<ExchangeBinding>> {
        let tables = self.store.read().await;
        let owned: Vec<ExchangeBinding> = tables
            .bindings
            .values()
            .filter(|b| !b.is_deleted() && b.user_id == Some(user_id))
            .cloned()
            .collect();
        Ok(paginate(owned, page, |b| (b.created_at, b.id)))
    }

    async fn get_public(
        &self,
        exchange_type: Option<&str>,
    ) -> RepositoryResult<Vec<ExchangeBinding>> {
        let tables = self.store.read().await;
        let mut public: Vec<ExchangeBinding> = tables
            .bindings
            .values()
            .filter(|b| {
                !b.is_deleted()
                    && b.is_public()
                    && b.status == BindingStatus::Active
                    && exchange_type.is_none_or(|t| b.exchange_type == t)
            })
            .cloned()
            .collect();
        public.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(public)
    }

    async fn get_by_name_and_owner(
        &self,
        name: &str,
        owner: Option<UserId>,
    ) -> RepositoryResult<Option<ExchangeBinding>> {
        let tables = self.store.read().await;
        Ok(tables
            .bindings
            .values()
            .find(|b| !b.is_deleted() && b.user_id == owner && b.name == name)
            .cloned())
    }

    async fn get_by_api_key_hash(&self, hash: &str) -> RepositoryResult<Option<ExchangeBinding>> {
        let tables = self.store.read().await;
        Ok(tables
            .bindings
            .values()
            .find(|b| !b.is_deleted() && b.api_key_hash() == Some(hash))
            .cloned())
    }

    async fn update(
        &self,
        id: ExchangeBindingId,
        patch: &Patch,
    ) -> RepositoryResult<ExchangeBinding> {
        let mut tables = self.store.write().await;
        let mut binding = tables
            .live_binding(id)
            .cloned()
            .ok_or_else(|| RepositoryError::not_found("ExchangeBinding", id))?;

        binding.apply_patch(patch)?;
        binding.validate(self.store.supported_exchanges())?;
        check_unique(&tables, &binding)?;
        binding.updated_at = Timestamp::now();

        tables.bindings.insert(id, binding.clone());
        Ok(binding)
    }

    async fn rotate_credentials(
        &self,
        id: ExchangeBindingId,
        credentials: &SealedCredentials,
    ) -> RepositoryResult<ExchangeBinding> {
        let supported = self.store.supported_exchanges().clone();
        self.modify(id, move |binding| {
            if binding.is_public() {
                return Err(DomainError::PublicMustNotCarryCredentials.into());
            }
            binding.credentials = Some(credentials.clone());
            binding.failure_count = 0;
            binding.last_failure_at = None;
            binding.validate(&supported)?;
            Ok(())
        })
        .await
    }

    async fn update_status(
        &self,
        id: ExchangeBindingId,
        status: BindingStatus,
    ) -> RepositoryResult<()> {
        self.modify(id, |binding| {
            binding.status = status;
            Ok(())
        })
        .await
        .map(|_| ())
    }

    async fn touch_last_used(&self, id: ExchangeBindingId) -> RepositoryResult<()> {
        self.modify(id, |binding| {
            binding.last_used_at = Some(Timestamp::now());
            Ok(())
        })
        .await
        .map(|_| ())
    }

    async fn record_failure(&self, id: ExchangeBindingId) -> RepositoryResult<ExchangeBinding> {
        self.modify(id, |binding| {
            binding.failure_count = binding.failure_count.saturating_add(1);
            binding.last_failure_at = Some(Timestamp::now());
            Ok(())
        })
        .await
    }

    async fn reset_failures(&self, id: ExchangeBindingId) -> RepositoryResult<()> {
        self.modify(id, |binding| {
            binding.failure_count = 0;
            binding.last_failure_at = None;
            Ok(())
        })
        .await
        .map(|_| ())
    }

    async fn delete(&self, id: ExchangeBindingId) -> RepositoryResult<()> {
        let mut tables = self.store.write().await;
        if tables.live_binding(id).is_none() {
            return Err(RepositoryError::not_found("ExchangeBinding", id));
        }
        if tables
            .tradings
            .values()
            .any(|t| !t.is_deleted() && t.exchange_binding_id == id)
        {
            return Err(RepositoryError::in_use("ExchangeBinding", id));
        }
        if let Some(binding) = tables.bindings.get_mut(&id) {
            let now = Timestamp::now();
            binding.deleted_at = Some(now);
            binding.updated_at = now;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::domain::entities::{Trading, User};
    use crate::domain::errors::ErrorKind;
    use crate::domain::value_objects::TradingType;
    use crate::infrastructure::persistence::in_memory::{
        InMemoryTradingRepository, InMemoryUserRepository,
    };
    use crate::infrastructure::persistence::traits::{TradingRepository, UserRepository};
    use serde_json::json;
    use std::time::Duration;

    fn creds(key: &str) -> SealedCredentials {
        SealedCredentials {
            encrypted_api_key: format!("v1:{key}"),
            encrypted_api_secret: "v1:secret".into(),
            api_key_hash: format!("{key:0>64}"),
        }
    }

    async fn setup() -> (InMemoryStore, InMemoryExchangeBindingRepository, User) {
        let store = InMemoryStore::default();
        let user = User::new("alice", "a@x");
        InMemoryUserRepository::new(store.clone())
            .create(&user)
            .await
            .unwrap();
        let repo = InMemoryExchangeBindingRepository::new(store.clone());
        (store, repo, user)
    }

    #[tokio::test]
    async fn create_private_and_lookup_by_hash() {
        let (_, repo, user) = setup().await;
        let binding = ExchangeBinding::private(user.id, "main", "binance", creds("k1"));
        repo.create(&binding).await.unwrap();

        let found = repo
            .get_by_api_key_hash(&format!("{:0>64}", "k1"))
            .await
            .unwrap();
        assert_eq!(found.map(|b| b.id), Some(binding.id));
    }

    #[tokio::test]
    async fn name_unique_per_owner() {
        let (_, repo, user) = setup().await;
        repo.create(&ExchangeBinding::private(user.id, "main", "binance", creds("a")))
            .await
            .unwrap();
        let err = repo
            .create(&ExchangeBinding::private(user.id, "main", "kraken", creds("b")))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);

        // the public bucket is separate
        repo.create(&ExchangeBinding::public("main", "binance"))
            .await
            .unwrap();
        assert!(
            repo.get_by_name_and_owner("main", None)
                .await
                .unwrap()
                .unwrap()
                .is_public()
        );
    }

    #[tokio::test]
    async fn unsupported_exchange_rejected() {
        let (_, repo, _) = setup().await;
        let err = repo
            .create(&ExchangeBinding::public("p", "mtgox"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn generic_update_refuses_credentials() {
        let (_, repo, user) = setup().await;
        let binding = ExchangeBinding::private(user.id, "main", "binance", creds("a"));
        repo.create(&binding).await.unwrap();

        let patch = Patch::new().set("encrypted_api_key", json!("v1:evil"));
        let err = repo.update(binding.id, &patch).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ImmutableField);

        let renamed = repo
            .update(binding.id, &Patch::new().set("name", json!("primary")))
            .await
            .unwrap();
        assert_eq!(renamed.name, "primary");
    }

    #[tokio::test]
    async fn rotation_resets_failures() {
        let (_, repo, user) = setup().await;
        let binding = ExchangeBinding::private(user.id, "main", "binance", creds("a"));
        repo.create(&binding).await.unwrap();
        repo.record_failure(binding.id).await.unwrap();
        let failed = repo.record_failure(binding.id).await.unwrap();
        assert_eq!(failed.failure_count, 2);
        assert!(failed.last_failure_at.is_some());

        let rotated = repo.rotate_credentials(binding.id, &creds("b")).await.unwrap();
        assert_eq!(rotated.failure_count, 0);
        assert_eq!(rotated.api_key_hash(), Some(creds("b").api_key_hash.as_str()));
        assert!(
            repo.get_by_api_key_hash(&creds("a").api_key_hash)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn public_cannot_rotate() {
        let (_, repo, _) = setup().await;
        let public = ExchangeBinding::public("pub", "binance");
        repo.create(&public).await.unwrap();
        let err = repo
            .rotate_credentials(public.id, &creds("x"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn failure_window_decides_disable() {
        let (_, repo, user) = setup().await;
        let binding = ExchangeBinding::private(user.id, "main", "binance", creds("a"));
        repo.create(&binding).await.unwrap();
        repo.record_failure(binding.id).await.unwrap();
        repo.record_failure(binding.id).await.unwrap();
        let failed = repo.record_failure(binding.id).await.unwrap();
        let now = Timestamp::now();
        assert!(failed.should_disable(3, Duration::from_secs(60), now));
        assert!(!failed.should_disable(4, Duration::from_secs(60), now));

        repo.reset_failures(binding.id).await.unwrap();
        let reset = repo.get_by_id(binding.id).await.unwrap().unwrap();
        assert_eq!(reset.failure_count, 0);
        assert!(reset.last_failure_at.is_none());
    }

    #[tokio::test]
    async fn get_public_filters_and_sorts() {
        let (_, repo, _) = setup().await;
        repo.create(&ExchangeBinding::public("zeta", "binance"))
            .await
            .unwrap();
        repo.create(&ExchangeBinding::public("alpha", "binance"))
            .await
            .unwrap();
        let kraken = ExchangeBinding::public("kr", "kraken");
        repo.create(&kraken).await.unwrap();
        repo.update_status(kraken.id, BindingStatus::Inactive)
            .await
            .unwrap();

        let names: Vec<String> = repo
            .get_public(Some("binance"))
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.name)
            .collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
        assert!(repo.get_public(Some("kraken")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_in_use() {
        let (store, repo, user) = setup().await;
        let binding = ExchangeBinding::private(user.id, "main", "binance", creds("a"));
        repo.create(&binding).await.unwrap();
        let tradings = InMemoryTradingRepository::new(store);
        let trading = tradings
            .create(&Trading::new(user.id, binding.id, "bot", TradingType::Virtual))
            .await
            .unwrap();

        let err = repo.delete(binding.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InUse);

        tradings.delete(trading.id).await.unwrap();
        repo.delete(binding.id).await.unwrap();
        assert!(repo.get_by_id(binding.id).await.unwrap().is_none());
    }
}
