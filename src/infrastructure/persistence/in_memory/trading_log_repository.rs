//! # In-Memory Trading Activity Log Repository
//!
//! In-memory implementation of [`TradingActivityLogRepository`] for
//! testing.

use crate::domain::entities::TradingActivityLog;
use crate::domain::value_objects::{
    Page, PageRequest, SubAccountId, Timestamp, TradingId, TradingLogId, UserId,
};
use crate::infrastructure::persistence::filters::LogFilter;
use crate::infrastructure::persistence::in_memory::store::{InMemoryStore, paginate};
use crate::infrastructure::persistence::traits::{
    RepositoryError, RepositoryResult, TradingActivityLogRepository,
};
use async_trait::async_trait;

/// In-memory implementation of [`TradingActivityLogRepository`].
#[derive(Debug, Clone)]
pub struct InMemoryTradingLogRepository {
    store: InMemoryStore,
}

impl InMemoryTradingLogRepository {
    /// Creates a repository over `store`.
    #[must_use]
    pub fn new(store: InMemoryStore) -> Self {
        Self { store }
    }

    async fn page_where<F>(
        &self,
        pred: F,
        filter: &LogFilter,
        page: PageRequest,
    ) -> Page<TradingActivityLog>
    where
        F: Fn(&TradingActivityLog) -> bool,
    {
        let tables = self.store.read().await;
        let matching: Vec<TradingActivityLog> = tables
            .logs
            .values()
            .filter(|log| pred(log) && filter.matches(log))
            .cloned()
            .collect();
        paginate(matching, page, |log| (log.timestamp, log.id))
    }
}

#[async_trait]
impl TradingActivityLogRepository for InMemoryTradingLogRepository {
    async fn create(&self, log: &TradingActivityLog) -> RepositoryResult<()> {
        let mut tables = self.store.write().await;
        tables.insert_log(log)
    }

    async fn get_by_id(&self, id: TradingLogId) -> RepositoryResult<Option<TradingActivityLog>> {
        let tables = self.store.read().await;
        Ok(tables.logs.get(&id).cloned())
    }

    async fn get_by_user(
        &self,
        user_id: UserId,
        filter: &LogFilter,
        page: PageRequest,
    ) -> RepositoryResult<Page<TradingActivityLog>> {
        Ok(self.page_where(|l| l.user_id == user_id, filter, page).await)
    }

    async fn get_by_trading(
        &self,
        trading_id: TradingId,
        filter: &LogFilter,
        page: PageRequest,
    ) -> RepositoryResult<Page<TradingActivityLog>> {
        Ok(self
            .page_where(|l| l.trading_id == trading_id, filter, page)
            .await)
    }

    async fn get_by_sub_account(
        &self,
        sub_account_id: SubAccountId,
        filter: &LogFilter,
        page: PageRequest,
    ) -> RepositoryResult<Page<TradingActivityLog>> {
        Ok(self
            .page_where(|l| l.sub_account_id == Some(sub_account_id), filter, page)
            .await)
    }

    async fn delete(&self, id: TradingLogId) -> RepositoryResult<()> {
        let mut tables = self.store.write().await;
        tables
            .logs
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| RepositoryError::not_found("TradingActivityLog", id))
    }

    async fn delete_older_than(&self, cutoff: Timestamp) -> RepositoryResult<u64> {
        let mut tables = self.store.write().await;
        let before = tables.logs.len();
        tables.logs.retain(|_, l| l.timestamp >= cutoff);
        Ok((before - tables.logs.len()) as u64)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::domain::entities::{ExchangeBinding, Trading, User, log_types};
    use crate::domain::errors::ErrorKind;
    use crate::domain::value_objects::{LogSource, TradingType};
    use crate::infrastructure::persistence::in_memory::{
        InMemoryExchangeBindingRepository, InMemoryTradingRepository, InMemoryUserRepository,
    };
    use crate::infrastructure::persistence::traits::{
        ExchangeBindingRepository, TradingRepository, UserRepository,
    };

    async fn setup() -> (InMemoryTradingLogRepository, User, Trading) {
        let store = InMemoryStore::default();
        let user = User::new("alice", "a@x");
        InMemoryUserRepository::new(store.clone())
            .create(&user)
            .await
            .unwrap();
        let binding = ExchangeBinding::public("paper", "virtual");
        InMemoryExchangeBindingRepository::new(store.clone())
            .create(&binding)
            .await
            .unwrap();
        let trading = InMemoryTradingRepository::new(store.clone())
            .create(&Trading::new(user.id, binding.id, "bot", TradingType::Virtual))
            .await
            .unwrap();
        (InMemoryTradingLogRepository::new(store), user, trading)
    }

    #[tokio::test]
    async fn create_filter_and_delete() {
        let (repo, user, trading) = setup().await;
        let order = TradingActivityLog::new(
            user.id,
            trading.id,
            log_types::ORDER,
            LogSource::Bot,
            "order filled",
        );
        let manual = TradingActivityLog::new(
            user.id,
            trading.id,
            log_types::SIGNAL,
            LogSource::Manual,
            "note",
        );
        repo.create(&order).await.unwrap();
        repo.create(&manual).await.unwrap();

        let bots = repo
            .get_by_trading(
                trading.id,
                &LogFilter::new().source(LogSource::Bot),
                PageRequest::default(),
            )
            .await
            .unwrap();
        assert_eq!(bots.total, 1);
        assert_eq!(bots.items[0].id, order.id);

        repo.delete(order.id).await.unwrap();
        assert!(repo.delete(order.id).await.unwrap_err().is_not_found());
        let all = repo
            .get_by_user(user.id, &LogFilter::new(), PageRequest::default())
            .await
            .unwrap();
        assert_eq!(all.total, 1);
    }

    #[tokio::test]
    async fn foreign_trading_denied() {
        let (repo, _, trading) = setup().await;
        let log = TradingActivityLog::new(
            UserId::new_v4(),
            trading.id,
            log_types::ORDER,
            LogSource::Bot,
            "x",
        );
        assert_eq!(
            repo.create(&log).await.unwrap_err().kind(),
            ErrorKind::AccessDenied
        );
    }

    #[tokio::test]
    async fn housekeeping_by_age() {
        let (repo, user, trading) = setup().await;
        let old = TradingActivityLog::new(user.id, trading.id, "order", LogSource::Bot, "old")
            .with_timestamp(Timestamp::now().sub_secs(3_600));
        let fresh = TradingActivityLog::new(user.id, trading.id, "order", LogSource::Bot, "new");
        repo.create(&old).await.unwrap();
        repo.create(&fresh).await.unwrap();

        let removed = repo
            .delete_older_than(Timestamp::now().sub_secs(60))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(repo.get_by_id(fresh.id).await.unwrap().is_some());
    }
}
