//! # In-Memory Store
//!
//! One shared table set behind a single `RwLock`. Every in-memory
//! repository holds a clone of the same [`InMemoryStore`], so cross-entity
//! checks (ownership, references, in-use) see one consistent state, the
//! way foreign keys do in Postgres.

use crate::domain::entities::{
    BalanceChange, EventProcessingRecord, ExchangeBinding, OAuthIdentity, SubAccount,
    SupportedExchanges, Trading, TradingActivityLog, Transaction, User,
};
use crate::domain::value_objects::{
    ExchangeBindingId, OAuthIdentityId, Page, PageRequest, SubAccountId, Timestamp, TradingId,
    TradingLogId, TransactionId, UserId,
};
use crate::infrastructure::persistence::traits::{RepositoryError, RepositoryResult};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Every table of the schema.
#[derive(Debug, Clone, Default)]
pub struct Tables {
    pub(crate) users: HashMap<UserId, User>,
    pub(crate) identities: HashMap<OAuthIdentityId, OAuthIdentity>,
    pub(crate) bindings: HashMap<ExchangeBindingId, ExchangeBinding>,
    pub(crate) tradings: HashMap<TradingId, Trading>,
    pub(crate) sub_accounts: HashMap<SubAccountId, SubAccount>,
    pub(crate) transactions: HashMap<TransactionId, Transaction>,
    pub(crate) logs: HashMap<TradingLogId, TradingActivityLog>,
    pub(crate) events: HashMap<String, EventProcessingRecord>,
}

impl Tables {
    pub(crate) fn live_sub_account(&self, id: SubAccountId) -> Option<&SubAccount> {
        self.sub_accounts.get(&id).filter(|s| !s.is_deleted())
    }

    pub(crate) fn live_binding(&self, id: ExchangeBindingId) -> Option<&ExchangeBinding> {
        self.bindings.get(&id).filter(|b| !b.is_deleted())
    }

    pub(crate) fn require_user(&self, id: UserId) -> RepositoryResult<()> {
        if self.users.get(&id).is_some_and(|u| !u.is_deleted()) {
            Ok(())
        } else {
            Err(RepositoryError::reference_not_found("User", id))
        }
    }

    /// Attaches the binding summary a trading response renders.
    pub(crate) fn with_binding(&self, mut trading: Trading) -> Trading {
        trading.binding = self
            .bindings
            .get(&trading.exchange_binding_id)
            .map(ExchangeBinding::summary);
        trading
    }

    /// Enforces that `user` may bind a trading to `binding_id`.
    pub(crate) fn check_binding_usable(
        &self,
        binding_id: ExchangeBindingId,
        user: UserId,
    ) -> RepositoryResult<()> {
        let binding = self
            .live_binding(binding_id)
            .ok_or_else(|| RepositoryError::reference_not_found("ExchangeBinding", binding_id))?;
        if !binding.is_usable_by(user) {
            return Err(RepositoryError::access_denied(format!(
                "exchange binding {binding_id} belongs to another user"
            )));
        }
        Ok(())
    }

    /// Verifies the change, writes the balance and journals it. The caller
    /// holds the write guard.
    pub(crate) fn apply_balance_change(
        &mut self,
        change: &BalanceChange,
    ) -> RepositoryResult<Transaction> {
        let sub = self
            .sub_accounts
            .get_mut(&change.sub_account_id)
            .filter(|s| !s.is_deleted())
            .ok_or_else(|| RepositoryError::not_found("SubAccount", change.sub_account_id))?;

        let now = Timestamp::now();
        let tx = sub.plan_balance_change(change, now)?;
        tx.validate()?;

        sub.balance = tx.closing_balance;
        sub.updated_at = now;
        self.transactions.insert(tx.id, tx.clone());
        Ok(tx)
    }

    /// Checks a journal entry's references and ownership.
    pub(crate) fn check_transaction(&self, tx: &Transaction) -> RepositoryResult<()> {
        tx.validate()?;
        let sub = self
            .sub_accounts
            .get(&tx.sub_account_id)
            .ok_or_else(|| RepositoryError::reference_not_found("SubAccount", tx.sub_account_id))?;
        if sub.user_id != tx.user_id || sub.trading_id != tx.trading_id {
            return Err(RepositoryError::access_denied(format!(
                "sub-account {} is not owned by user {}",
                tx.sub_account_id, tx.user_id
            )));
        }
        Ok(())
    }

    /// Validates and inserts an activity log entry.
    pub(crate) fn insert_log(&mut self, log: &TradingActivityLog) -> RepositoryResult<()> {
        log.validate()?;

        let trading = self
            .tradings
            .get(&log.trading_id)
            .ok_or_else(|| RepositoryError::reference_not_found("Trading", log.trading_id))?;
        if trading.user_id != log.user_id {
            return Err(RepositoryError::access_denied(format!(
                "trading {} is not owned by user {}",
                log.trading_id, log.user_id
            )));
        }
        if let Some(sub_id) = log.sub_account_id {
            let sub = self
                .sub_accounts
                .get(&sub_id)
                .ok_or_else(|| RepositoryError::reference_not_found("SubAccount", sub_id))?;
            if sub.user_id != log.user_id {
                return Err(RepositoryError::access_denied(format!(
                    "sub-account {sub_id} is not owned by user {}",
                    log.user_id
                )));
            }
        }
        if let Some(tx_id) = log.transaction_id {
            let tx = self
                .transactions
                .get(&tx_id)
                .ok_or_else(|| RepositoryError::reference_not_found("Transaction", tx_id))?;
            if tx.user_id != log.user_id {
                return Err(RepositoryError::access_denied(format!(
                    "transaction {tx_id} is not owned by user {}",
                    log.user_id
                )));
            }
        }
        if self.logs.contains_key(&log.id) {
            return Err(RepositoryError::already_exists("TradingActivityLog", log.id.to_string()));
        }

        self.logs.insert(log.id, log.clone());
        Ok(())
    }
}

/// Shared in-memory storage.
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
    supported: Arc<SupportedExchanges>,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new(supported: SupportedExchanges) -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
            supported: Arc::new(supported),
        }
    }

    /// Returns the configured exchange set.
    #[must_use]
    pub fn supported_exchanges(&self) -> &SupportedExchanges {
        &self.supported
    }

    pub(crate) async fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().await
    }

    pub(crate) async fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().await
    }

    /// Clears every table.
    pub async fn clear(&self) {
        let mut tables = self.tables.write().await;
        *tables = Tables::default();
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(SupportedExchanges::default())
    }
}

/// Sorts newest first and cuts one page.
pub(crate) fn paginate<T, K, F>(mut items: Vec<T>, page: PageRequest, key: F) -> Page<T>
where
    T: Clone,
    K: Ord,
    F: Fn(&T) -> K,
{
    items.sort_by(|a, b| key(b).cmp(&key(a)));
    let total = items.len() as u64;
    Page::new(page.slice(&items), total, page)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::domain::value_objects::TransactionDirection;
    use rust_decimal::Decimal;

    fn seeded() -> (Tables, SubAccount) {
        let mut tables = Tables::default();
        let user = User::new("alice", "a@x");
        let sub = SubAccount::new(user.id, TradingId::new_v4(), "spot", "BTC");
        tables.users.insert(user.id, user);
        tables.sub_accounts.insert(sub.id, sub.clone());
        (tables, sub)
    }

    #[test]
    fn balance_change_writes_balance_and_journal() {
        let (mut tables, sub) = seeded();
        let change = BalanceChange::new(
            sub.id,
            Decimal::ONE,
            Decimal::ONE,
            TransactionDirection::Credit,
            "deposit",
        );
        let tx = tables.apply_balance_change(&change).unwrap();
        assert_eq!(tables.sub_accounts[&sub.id].balance, Decimal::ONE);
        assert_eq!(tables.transactions[&tx.id].closing_balance, Decimal::ONE);
    }

    #[test]
    fn rejected_change_leaves_state() {
        let (mut tables, sub) = seeded();
        let change = BalanceChange::new(
            sub.id,
            Decimal::new(-1, 1),
            Decimal::new(1, 1),
            TransactionDirection::Debit,
            "x",
        );
        assert!(tables.apply_balance_change(&change).is_err());
        assert!(tables.sub_accounts[&sub.id].balance.is_zero());
        assert!(tables.transactions.is_empty());
    }

    #[test]
    fn paginate_sorts_descending() {
        let page = paginate(vec![1, 3, 2], PageRequest::new(1, 2), |v| *v);
        assert_eq!(page.items, vec![3, 2]);
        assert_eq!(page.total, 3);
        assert_eq!(page.total_pages, 2);
    }
}
