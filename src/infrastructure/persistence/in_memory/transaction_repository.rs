//! # In-Memory Transaction Repository
//!
//! In-memory implementation of [`TransactionRepository`] for testing.

use crate::domain::entities::Transaction;
use crate::domain::errors::DomainError;
use crate::domain::value_objects::{
    Page, PageRequest, SubAccountId, Timestamp, TradingId, TransactionDirection, TransactionId,
    UserId,
};
use crate::infrastructure::persistence::filters::TransactionFilter;
use crate::infrastructure::persistence::in_memory::store::{InMemoryStore, paginate};
use crate::infrastructure::persistence::traits::{
    DirectionTotals, RepositoryError, RepositoryResult, TransactionRepository,
};
use async_trait::async_trait;

/// In-memory implementation of [`TransactionRepository`].
#[derive(Debug, Clone)]
pub struct InMemoryTransactionRepository {
    store: InMemoryStore,
}

impl InMemoryTransactionRepository {
    /// Creates a repository over `store`.
    #[must_use]
    pub fn new(store: InMemoryStore) -> Self {
        Self { store }
    }

    async fn page_where<F>(
        &self,
        pred: F,
        filter: &TransactionFilter,
        page: PageRequest,
    ) -> Page<Transaction>
    where
        F: Fn(&Transaction) -> bool,
    {
        let tables = self.store.read().await;
        let matching: Vec<Transaction> = tables
            .transactions
            .values()
            .filter(|tx| pred(tx) && filter.matches(tx))
            .cloned()
            .collect();
        paginate(matching, page, |tx| (tx.timestamp, tx.id))
    }
}

#[async_trait]
impl TransactionRepository for InMemoryTransactionRepository {
    async fn create(&self, transaction: &Transaction) -> RepositoryResult<()> {
        let mut tables = self.store.write().await;
        tables.check_transaction(transaction)?;
        if tables.transactions.contains_key(&transaction.id) {
            return Err(RepositoryError::already_exists(
                "Transaction",
                transaction.id.to_string(),
            ));
        }
        let balance = tables
            .sub_accounts
            .get(&transaction.sub_account_id)
            .map(|s| s.balance)
            .unwrap_or_default();
        if balance != transaction.closing_balance {
            return Err(DomainError::invalid(
                "closing_balance",
                format!("does not match the sub-account balance {balance}"),
            )
            .into());
        }
        tables.transactions.insert(transaction.id, transaction.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: TransactionId) -> RepositoryResult<Option<Transaction>> {
        let tables = self.store.read().await;
        Ok(tables.transactions.get(&id).cloned())
    }

    async fn get_by_user(
        &self,
        user_id: UserId,
        filter: &TransactionFilter,
        page: PageRequest,
    ) -> RepositoryResult<Page<Transaction>> {
        Ok(self.page_where(|tx| tx.user_id == user_id, filter, page).await)
    }

    async fn get_by_sub_account(
        &self,
        sub_account_id: SubAccountId,
        filter: &TransactionFilter,
        page: PageRequest,
    ) -> RepositoryResult<Page<Transaction>> {
        Ok(self
            .page_where(|tx| tx.sub_account_id == sub_account_id, filter, page)
            .await)
    }

    async fn get_by_trading(
        &self,
        trading_id: TradingId,
        filter: &TransactionFilter,
        page: PageRequest,
    ) -> RepositoryResult<Page<Transaction>> {
        Ok(self
            .page_where(|tx| tx.trading_id == trading_id, filter, page)
            .await)
    }

    async fn sum_by_direction(
        &self,
        sub_account_id: SubAccountId,
        from: Option<Timestamp>,
        to: Option<Timestamp>,
    ) -> RepositoryResult<DirectionTotals> {
        let filter = TransactionFilter {
            from,
            to,
            ..TransactionFilter::default()
        };
        let tables = self.store.read().await;
        let mut totals = DirectionTotals::default();
        for tx in tables
            .transactions
            .values()
            .filter(|tx| tx.sub_account_id == sub_account_id && filter.matches(tx))
        {
            match tx.direction {
                TransactionDirection::Debit => totals.debits += tx.amount,
                TransactionDirection::Credit => totals.credits += tx.amount,
            }
            totals.count += 1;
        }
        Ok(totals)
    }

    async fn latest_for_sub_account(
        &self,
        sub_account_id: SubAccountId,
    ) -> RepositoryResult<Option<Transaction>> {
        let tables = self.store.read().await;
        Ok(tables
            .transactions
            .values()
            .filter(|tx| tx.sub_account_id == sub_account_id)
            .max_by_key(|tx| (tx.timestamp, tx.id))
            .cloned())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::domain::entities::{BalanceChange, ExchangeBinding, SubAccount, Trading, User};
    use crate::domain::errors::ErrorKind;
    use crate::domain::value_objects::TradingType;
    use crate::infrastructure::persistence::in_memory::{
        InMemoryBalanceMutator, InMemoryExchangeBindingRepository, InMemorySubAccountRepository,
        InMemoryTradingRepository, InMemoryUserRepository,
    };
    use crate::infrastructure::persistence::traits::{
        BalanceMutator, ExchangeBindingRepository, SubAccountRepository, TradingRepository,
        UserRepository,
    };
    use rust_decimal::Decimal;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    struct Fixture {
        repo: InMemoryTransactionRepository,
        mutator: InMemoryBalanceMutator,
        user: User,
        trading: Trading,
        sub: SubAccount,
    }

    async fn fixture() -> Fixture {
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
        let sub = SubAccount::new(user.id, trading.id, "spot", "BTC");
        InMemorySubAccountRepository::new(store.clone())
            .create(&sub)
            .await
            .unwrap();
        Fixture {
            repo: InMemoryTransactionRepository::new(store.clone()),
            mutator: InMemoryBalanceMutator::new(store),
            user,
            trading,
            sub,
        }
    }

    async fn apply(
        f: &Fixture,
        new: &str,
        amount: &str,
        dir: TransactionDirection,
    ) -> TransactionId {
        f.mutator
            .apply_balance_change(&BalanceChange::new(f.sub.id, dec(new), dec(amount), dir, "t"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn queries_by_owner_trading_and_sub_account() {
        let f = fixture().await;
        apply(&f, "1", "1", TransactionDirection::Credit).await;
        apply(&f, "0.5", "0.5", TransactionDirection::Debit).await;

        let page = PageRequest::default();
        let filter = TransactionFilter::new();
        assert_eq!(f.repo.get_by_user(f.user.id, &filter, page).await.unwrap().total, 2);
        assert_eq!(
            f.repo
                .get_by_trading(f.trading.id, &filter, page)
                .await
                .unwrap()
                .total,
            2
        );
        let debits = f
            .repo
            .get_by_sub_account(
                f.sub.id,
                &TransactionFilter::new().direction(TransactionDirection::Debit),
                page,
            )
            .await
            .unwrap();
        assert_eq!(debits.total, 1);
        assert_eq!(debits.items[0].closing_balance, dec("0.5"));
    }

    #[tokio::test]
    async fn time_range_query() {
        let f = fixture().await;
        apply(&f, "1", "1", TransactionDirection::Credit).await;
        let now = Timestamp::now();
        let hit = f
            .repo
            .get_by_time_range(
                f.user.id,
                now.sub_secs(60),
                now.add_secs(60),
                &TransactionFilter::new(),
                PageRequest::default(),
            )
            .await
            .unwrap();
        assert_eq!(hit.total, 1);
        let miss = f
            .repo
            .get_by_time_range(
                f.user.id,
                now.add_secs(60),
                now.add_secs(120),
                &TransactionFilter::new(),
                PageRequest::default(),
            )
            .await
            .unwrap();
        assert_eq!(miss.total, 0);
    }

    #[tokio::test]
    async fn totals_and_latest() {
        let f = fixture().await;
        apply(&f, "2", "2", TransactionDirection::Credit).await;
        let last = apply(&f, "1.25", "0.75", TransactionDirection::Debit).await;

        let totals = f.repo.sum_by_direction(f.sub.id, None, None).await.unwrap();
        assert_eq!(totals.credits, dec("2"));
        assert_eq!(totals.debits, dec("0.75"));
        assert_eq!(totals.net(), dec("1.25"));
        assert_eq!(totals.count, 2);

        let latest = f.repo.latest_for_sub_account(f.sub.id).await.unwrap().unwrap();
        assert_eq!(latest.id, last);
    }

    #[tokio::test]
    async fn direct_create_must_continue_balance() {
        let f = fixture().await;
        let stale = f
            .sub
            .plan_balance_change(
                &BalanceChange::new(
                    f.sub.id,
                    dec("1"),
                    dec("1"),
                    TransactionDirection::Credit,
                    "import",
                ),
                Timestamp::now(),
            )
            .unwrap();
        let err = f.repo.create(&stale).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
