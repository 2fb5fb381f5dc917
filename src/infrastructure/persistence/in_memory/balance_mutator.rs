//! # In-Memory Balance Mutator
//!
//! In-memory implementation of [`BalanceMutator`]. The store's write lock
//! serializes every change, which is stricter than the per-row lock the
//! Postgres tier takes.

use crate::domain::entities::BalanceChange;
use crate::domain::value_objects::TransactionId;
use crate::infrastructure::persistence::in_memory::store::InMemoryStore;
use crate::infrastructure::persistence::traits::{BalanceMutator, RepositoryResult};
use async_trait::async_trait;

/// In-memory implementation of [`BalanceMutator`].
#[derive(Debug, Clone)]
pub struct InMemoryBalanceMutator {
    store: InMemoryStore,
}

impl InMemoryBalanceMutator {
    /// Creates a mutator over `store`.
    #[must_use]
    pub fn new(store: InMemoryStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl BalanceMutator for InMemoryBalanceMutator {
    async fn apply_balance_change(
        &self,
        change: &BalanceChange,
    ) -> RepositoryResult<TransactionId> {
        let mut tables = self.store.write().await;
        let tx = tables.apply_balance_change(change)?;
        tracing::debug!(
            sub_account_id = %change.sub_account_id,
            transaction_id = %tx.id,
            closing_balance = %tx.closing_balance,
            "balance change applied"
        );
        Ok(tx.id)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::domain::entities::{ExchangeBinding, SubAccount, Trading, User};
    use crate::domain::errors::ErrorKind;
    use crate::domain::value_objects::{SubAccountId, TradingType, TransactionDirection};
    use crate::infrastructure::persistence::in_memory::{
        InMemoryExchangeBindingRepository, InMemorySubAccountRepository, InMemoryTradingRepository,
        InMemoryTransactionRepository, InMemoryUserRepository,
    };
    use crate::infrastructure::persistence::traits::{
        ExchangeBindingRepository, SubAccountRepository, TradingRepository, TransactionRepository,
        UserRepository,
    };
    use rust_decimal::Decimal;
    use std::sync::Arc;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    async fn funded(store: &InMemoryStore) -> SubAccount {
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
        InMemoryBalanceMutator::new(store.clone())
            .apply_balance_change(&BalanceChange::new(
                sub.id,
                dec("1.0"),
                dec("1.0"),
                TransactionDirection::Credit,
                "deposit",
            ))
            .await
            .unwrap();
        sub
    }

    #[tokio::test]
    async fn debit_journals_closing_balance() {
        let store = InMemoryStore::default();
        let sub = funded(&store).await;
        let mutator = InMemoryBalanceMutator::new(store.clone());

        let tx_id = mutator
            .apply_balance_change(&BalanceChange::new(
                sub.id,
                dec("0.5"),
                dec("0.5"),
                TransactionDirection::Debit,
                "withdraw",
            ))
            .await
            .unwrap();

        let balance = InMemorySubAccountRepository::new(store.clone())
            .get_by_id(sub.id)
            .await
            .unwrap()
            .unwrap()
            .balance;
        assert_eq!(balance, dec("0.5"));
        let tx = InMemoryTransactionRepository::new(store)
            .get_by_id(tx_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tx.closing_balance, dec("0.5"));
        assert_eq!(tx.amount, dec("0.5"));
        assert_eq!(tx.direction, TransactionDirection::Debit);
    }

    #[tokio::test]
    async fn negative_without_overdraft_rejected() {
        let store = InMemoryStore::default();
        let sub = funded(&store).await;
        let mutator = InMemoryBalanceMutator::new(store.clone());

        let err = mutator
            .apply_balance_change(&BalanceChange::new(
                sub.id,
                dec("-0.1"),
                dec("1.1"),
                TransactionDirection::Debit,
                "x",
            ))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NegativeBalance);

        let overdrawn = mutator
            .apply_balance_change(
                &BalanceChange::new(
                    sub.id,
                    dec("-0.1"),
                    dec("1.1"),
                    TransactionDirection::Debit,
                    "margin",
                )
                .allow_overdraft(),
            )
            .await;
        assert!(overdrawn.is_ok());
    }

    #[tokio::test]
    async fn arithmetic_mismatch_rejected() {
        let store = InMemoryStore::default();
        let sub = funded(&store).await;
        let err = InMemoryBalanceMutator::new(store)
            .apply_balance_change(&BalanceChange::new(
                sub.id,
                dec("3"),
                dec("1"),
                TransactionDirection::Credit,
                "deposit",
            ))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BalanceArithmeticMismatch);
    }

    #[tokio::test]
    async fn sub_precision_and_dust_amounts_rejected() {
        let store = InMemoryStore::default();
        let sub = funded(&store).await;
        let mutator = InMemoryBalanceMutator::new(store.clone());

        for (claimed, amount) in [("1.00000002", "0.000000015"), ("1", "0.000000004")] {
            let err = mutator
                .apply_balance_change(&BalanceChange::new(
                    sub.id,
                    dec(claimed),
                    dec(amount),
                    TransactionDirection::Credit,
                    "deposit",
                ))
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation);
        }

        let balance = InMemorySubAccountRepository::new(store.clone())
            .get_by_id(sub.id)
            .await
            .unwrap()
            .unwrap()
            .balance;
        assert_eq!(balance, dec("1.0"));
        let latest = InMemoryTransactionRepository::new(store)
            .latest_for_sub_account(sub.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.reason, "deposit");
        assert_eq!(latest.closing_balance, dec("1.0"));
        assert_eq!(latest.amount, dec("1.0"));
    }

    #[tokio::test]
    async fn missing_sub_account_is_not_found() {
        let err = InMemoryBalanceMutator::new(InMemoryStore::default())
            .apply_balance_change(&BalanceChange::new(
                SubAccountId::new_v4(),
                dec("1"),
                dec("1"),
                TransactionDirection::Credit,
                "deposit",
            ))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn concurrent_changes_serialize() {
        let store = InMemoryStore::default();
        let sub = funded(&store).await;
        let mutator = Arc::new(InMemoryBalanceMutator::new(store.clone()));
        let subs = InMemorySubAccountRepository::new(store);

        // Each task reads the balance and claims balance + 1; only changes
        // that saw the latest balance may commit.
        let mut handles = Vec::new();
        for _ in 0..8 {
            let mutator = Arc::clone(&mutator);
            let subs = subs.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    let current = subs.get_by_id(sub.id).await.unwrap().unwrap().balance;
                    let change = BalanceChange::new(
                        sub.id,
                        current + Decimal::ONE,
                        Decimal::ONE,
                        TransactionDirection::Credit,
                        "deposit",
                    );
                    match mutator.apply_balance_change(&change).await {
                        Ok(_) => break,
                        Err(e) => assert_eq!(e.kind(), ErrorKind::BalanceArithmeticMismatch),
                    }
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let balance = subs.get_by_id(sub.id).await.unwrap().unwrap().balance;
        assert_eq!(balance, dec("9"));
    }
}
