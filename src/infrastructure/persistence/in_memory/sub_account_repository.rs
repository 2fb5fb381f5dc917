//! # In-Memory Sub-Account Repository
//!
//! In-memory implementation of [`SubAccountRepository`] for testing.

use crate::domain::entities::SubAccount;
use crate::domain::errors::DomainError;
use crate::domain::value_objects::{Patch, Patchable, SubAccountId, Timestamp, TradingId, UserId};
use crate::infrastructure::persistence::in_memory::store::InMemoryStore;
use crate::infrastructure::persistence::traits::{
    RepositoryError, RepositoryResult, SubAccountRepository,
};
use async_trait::async_trait;

/// In-memory implementation of [`SubAccountRepository`].
#[derive(Debug, Clone)]
pub struct InMemorySubAccountRepository {
    store: InMemoryStore,
}

impl InMemorySubAccountRepository {
    /// Creates a repository over `store`.
    #[must_use]
    pub fn new(store: InMemoryStore) -> Self {
        Self { store }
    }
}

fn newest_first(mut subs: Vec<SubAccount>) -> Vec<SubAccount> {
    subs.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
    subs
}

#[async_trait]
impl SubAccountRepository for InMemorySubAccountRepository {
    async fn create(&self, sub_account: &SubAccount) -> RepositoryResult<()> {
        sub_account.validate()?;
        if !sub_account.balance.is_zero() {
            return Err(DomainError::invalid("balance", "must be zero on creation").into());
        }
        let mut tables = self.store.write().await;
        let trading = tables
            .tradings
            .get(&sub_account.trading_id)
            .filter(|t| !t.is_deleted())
            .ok_or_else(|| {
                RepositoryError::reference_not_found("Trading", sub_account.trading_id)
            })?;
        if trading.user_id != sub_account.user_id {
            return Err(RepositoryError::access_denied(format!(
                "trading {} is not owned by user {}",
                sub_account.trading_id, sub_account.user_id
            )));
        }
        if tables.sub_accounts.contains_key(&sub_account.id) {
            return Err(RepositoryError::already_exists(
                "SubAccount",
                sub_account.id.to_string(),
            ));
        }
        tables.sub_accounts.insert(sub_account.id, sub_account.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: SubAccountId) -> RepositoryResult<Option<SubAccount>> {
        let tables = self.store.read().await;
        Ok(tables.live_sub_account(id).cloned())
    }

    async fn get_by_user(
        &self,
        user_id: UserId,
        trading_id: Option<TradingId>,
    ) -> RepositoryResult<Vec<SubAccount>> {
        let tables = self.store.read().await;
        Ok(newest_first(
            tables
                .sub_accounts
                .values()
                .filter(|s| {
                    !s.is_deleted()
                        && s.user_id == user_id
                        && trading_id.is_none_or(|t| s.trading_id == t)
                })
                .cloned()
                .collect(),
        ))
    }

    async fn get_by_symbol(
        &self,
        user_id: UserId,
        symbol: &str,
    ) -> RepositoryResult<Vec<SubAccount>> {
        let symbol = symbol.trim().to_uppercase();
        let tables = self.store.read().await;
        Ok(newest_first(
            tables
                .sub_accounts
                .values()
                .filter(|s| !s.is_deleted() && s.user_id == user_id && s.symbol == symbol)
                .cloned()
                .collect(),
        ))
    }

    async fn update(&self, id: SubAccountId, patch: &Patch) -> RepositoryResult<SubAccount> {
        let mut tables = self.store.write().await;
        let mut sub = tables
            .live_sub_account(id)
            .cloned()
            .ok_or_else(|| RepositoryError::not_found("SubAccount", id))?;

        sub.apply_patch(patch)?;
        sub.validate()?;
        sub.updated_at = Timestamp::now();

        tables.sub_accounts.insert(id, sub.clone());
        Ok(sub)
    }

    async fn delete(&self, id: SubAccountId) -> RepositoryResult<()> {
        let mut tables = self.store.write().await;
        let sub = tables
            .sub_accounts
            .get_mut(&id)
            .filter(|s| !s.is_deleted())
            .ok_or_else(|| RepositoryError::not_found("SubAccount", id))?;
        sub.ensure_empty()?;
        let now = Timestamp::now();
        sub.deleted_at = Some(now);
        sub.updated_at = now;
        Ok(())
    }
}
