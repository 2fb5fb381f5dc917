//! # In-Memory Trading Repository
//!
//! In-memory implementation of [`TradingRepository`] for testing.

use crate::domain::entities::Trading;
use crate::domain::value_objects::{
    Page, PageRequest, Patch, Patchable, Timestamp, TradingId, UserId,
};
use crate::infrastructure::persistence::filters::TradingFilter;
use crate::infrastructure::persistence::in_memory::store::{InMemoryStore, paginate};
use crate::infrastructure::persistence::traits::{
    RepositoryError, RepositoryResult, TradingRepository,
};
use async_trait::async_trait;

/// In-memory implementation of [`TradingRepository`].
#[derive(Debug, Clone)]
pub struct InMemoryTradingRepository {
    store: InMemoryStore,
}

impl InMemoryTradingRepository {
    /// Creates a repository over `store`.
    #[must_use]
    pub fn new(store: InMemoryStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TradingRepository for InMemoryTradingRepository {
    async fn create(&self, trading: &Trading) -> RepositoryResult<Trading> {
        trading.validate()?;
        let mut tables = self.store.write().await;
        tables.require_user(trading.user_id)?;
        tables.check_binding_usable(trading.exchange_binding_id, trading.user_id)?;
        if tables.tradings.contains_key(&trading.id) {
            return Err(RepositoryError::already_exists("Trading", trading.id.to_string()));
        }

        let mut stored = trading.clone();
        stored.binding = None;
        tables.tradings.insert(stored.id, stored.clone());
        Ok(tables.with_binding(stored))
    }

    async fn get_by_id(&self, id: TradingId) -> RepositoryResult<Option<Trading>> {
        let tables = self.store.read().await;
        Ok(tables
            .tradings
            .get(&id)
            .filter(|t| !t.is_deleted())
            .cloned()
            .map(|t| tables.with_binding(t)))
    }

    async fn get_by_user(
        &self,
        user_id: UserId,
        filter: &TradingFilter,
        page: PageRequest,
    ) -> RepositoryResult<Page<Trading>> {
        let tables = self.store.read().await;
        let owned: Vec<Trading> = tables
            .tradings
            .values()
            .filter(|t| !t.is_deleted() && t.user_id == user_id && filter.matches(t))
            .cloned()
            .collect();
        Ok(paginate(owned, page, |t| (t.created_at, t.id)).map(|t| tables.with_binding(t)))
    }

    async fn update(&self, id: TradingId, patch: &Patch) -> RepositoryResult<Trading> {
        let mut tables = self.store.write().await;
        let current = tables
            .tradings
            .get(&id)
            .filter(|t| !t.is_deleted())
            .cloned()
            .ok_or_else(|| RepositoryError::not_found("Trading", id))?;

        let mut trading = current.clone();
        trading.apply_patch(patch)?;
        trading.validate()?;
        if trading.exchange_binding_id != current.exchange_binding_id {
            tables.check_binding_usable(trading.exchange_binding_id, trading.user_id)?;
        }
        trading.updated_at = Timestamp::now();
        trading.binding = None;

        tables.tradings.insert(id, trading.clone());
        Ok(tables.with_binding(trading))
    }

    async fn delete(&self, id: TradingId) -> RepositoryResult<()> {
        let mut tables = self.store.write().await;
        if !tables.tradings.get(&id).is_some_and(|t| !t.is_deleted()) {
            return Err(RepositoryError::not_found("Trading", id));
        }
        if tables
            .sub_accounts
            .values()
            .any(|s| !s.is_deleted() && s.trading_id == id)
        {
            return Err(RepositoryError::in_use("Trading", id));
        }
        if let Some(trading) = tables.tradings.get_mut(&id) {
            let now = Timestamp::now();
            trading.deleted_at = Some(now);
            trading.updated_at = now;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::domain::entities::{ExchangeBinding, SealedCredentials, SubAccount, User};
    use crate::domain::errors::ErrorKind;
    use crate::domain::value_objects::{TradingStatus, TradingType, Visibility};
    use crate::infrastructure::persistence::in_memory::{
        InMemoryExchangeBindingRepository, InMemorySubAccountRepository, InMemoryUserRepository,
    };
    use crate::infrastructure::persistence::traits::{
        ExchangeBindingRepository, SubAccountRepository, UserRepository,
    };
    use serde_json::json;

    struct Fixture {
        store: InMemoryStore,
        repo: InMemoryTradingRepository,
        u1: User,
        u2: User,
        private_u1: ExchangeBinding,
        public: ExchangeBinding,
    }

    async fn fixture() -> Fixture {
        let store = InMemoryStore::default();
        let users = InMemoryUserRepository::new(store.clone());
        let u1 = User::new("u1", "u1@x");
        let u2 = User::new("u2", "u2@x");
        users.create(&u1).await.unwrap();
        users.create(&u2).await.unwrap();

        let bindings = InMemoryExchangeBindingRepository::new(store.clone());
        let private_u1 = ExchangeBinding::private(
            u1.id,
            "main",
            "binance",
            SealedCredentials {
                encrypted_api_key: "v1:k".into(),
                encrypted_api_secret: "v1:s".into(),
                api_key_hash: "a".repeat(64),
            },
        );
        let public = ExchangeBinding::public("paper", "virtual");
        bindings.create(&private_u1).await.unwrap();
        bindings.create(&public).await.unwrap();

        Fixture {
            repo: InMemoryTradingRepository::new(store.clone()),
            store,
            u1,
            u2,
            private_u1,
            public,
        }
    }

    #[tokio::test]
    async fn owner_may_use_private_binding() {
        let f = fixture().await;
        let created = f
            .repo
            .create(&Trading::new(f.u1.id, f.private_u1.id, "bot", TradingType::Real))
            .await
            .unwrap();
        let summary = created.binding.unwrap();
        assert_eq!(summary.exchange_type, "binance");
        assert_eq!(summary.visibility, Visibility::Private);
    }

    #[tokio::test]
    async fn foreign_private_binding_denied() {
        let f = fixture().await;
        let err = f
            .repo
            .create(&Trading::new(f.u2.id, f.private_u1.id, "bot", TradingType::Real))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AccessDenied);
    }

    #[tokio::test]
    async fn anyone_may_use_public_binding() {
        let f = fixture().await;
        f.repo
            .create(&Trading::new(f.u2.id, f.public.id, "paper", TradingType::Virtual))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn soft_deleted_user_cannot_own_new_rows() {
        let f = fixture().await;
        InMemoryUserRepository::new(f.store.clone())
            .delete(f.u2.id)
            .await
            .unwrap();

        let err = f
            .repo
            .create(&Trading::new(f.u2.id, f.public.id, "paper", TradingType::Virtual))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReferenceNotFound);

        let binding = ExchangeBinding::private(
            f.u2.id,
            "late",
            "kraken",
            SealedCredentials {
                encrypted_api_key: "v1:k".into(),
                encrypted_api_secret: "v1:s".into(),
                api_key_hash: "b".repeat(64),
            },
        );
        let err = InMemoryExchangeBindingRepository::new(f.store.clone())
            .create(&binding)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReferenceNotFound);
    }

    #[tokio::test]
    async fn missing_binding_is_reference_not_found() {
        let f = fixture().await;
        let err = f
            .repo
            .create(&Trading::new(
                f.u1.id,
                crate::domain::value_objects::ExchangeBindingId::new_v4(),
                "bot",
                TradingType::Real,
            ))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReferenceNotFound);
    }

    #[tokio::test]
    async fn rebinding_rechecks_ownership() {
        let f = fixture().await;
        let t = f
            .repo
            .create(&Trading::new(f.u2.id, f.public.id, "paper", TradingType::Virtual))
            .await
            .unwrap();
        let patch = Patch::new().set("exchange_binding_id", json!(f.private_u1.id.to_string()));
        let err = f.repo.update(t.id, &patch).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AccessDenied);

        let paused = f
            .repo
            .update(t.id, &Patch::new().set("status", json!("paused")))
            .await
            .unwrap();
        assert_eq!(paused.status, TradingStatus::Paused);
        assert!(paused.binding.is_some());
    }

    #[tokio::test]
    async fn get_by_user_filters() {
        let f = fixture().await;
        f.repo
            .create(&Trading::new(f.u1.id, f.public.id, "a", TradingType::Virtual))
            .await
            .unwrap();
        f.repo
            .create(
                &Trading::new(f.u1.id, f.private_u1.id, "b", TradingType::Real)
                    .with_status(TradingStatus::Paused),
            )
            .await
            .unwrap();

        let all = f
            .repo
            .get_by_user(f.u1.id, &TradingFilter::default(), PageRequest::default())
            .await
            .unwrap();
        assert_eq!(all.total, 2);

        let filter = TradingFilter {
            status: Some(TradingStatus::Paused),
            ..TradingFilter::default()
        };
        let paused = f
            .repo
            .get_by_user(f.u1.id, &filter, PageRequest::default())
            .await
            .unwrap();
        assert_eq!(paused.total, 1);
        assert_eq!(paused.items[0].name, "b");
    }

    #[tokio::test]
    async fn delete_in_use_by_sub_account() {
        let f = fixture().await;
        let t = f
            .repo
            .create(&Trading::new(f.u1.id, f.public.id, "a", TradingType::Virtual))
            .await
            .unwrap();
        let subs = InMemorySubAccountRepository::new(f.store.clone());
        let sub = SubAccount::new(f.u1.id, t.id, "spot", "BTC");
        subs.create(&sub).await.unwrap();

        assert_eq!(f.repo.delete(t.id).await.unwrap_err().kind(), ErrorKind::InUse);
        subs.delete(sub.id).await.unwrap();
        f.repo.delete(t.id).await.unwrap();
        assert!(f.repo.get_by_id(t.id).await.unwrap().is_none());
    }
}
