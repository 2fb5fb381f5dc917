//! # Account Service
//!
//! Whole-account operations that span every repository: data export,
//! account purge, and the balance auditor that checks sub-account
//! balances against the transaction journal.

use crate::application::error::{ApplicationError, ApplicationResult};
use crate::application::services::binding_service::{BindingView, ExchangeBindingService};
use crate::application::services::identity_service::IdentityView;
use crate::domain::entities::{SubAccount, Trading, TradingActivityLog, Transaction, User};
use crate::domain::errors::DomainError;
use crate::domain::value_objects::{MAX_LIMIT, Page, PageRequest, SubAccountId, Timestamp, UserId};
use crate::infrastructure::persistence::{
    LogFilter, Repositories, RepositoryResult, SubAccountRepository, TradingFilter,
    TransactionFilter, TransactionRepository,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

/// Everything stored about one user. Credentials appear masked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountExport {
    /// The user.
    pub user: User,
    /// Linked identities, without tokens.
    pub identities: Vec<IdentityView>,
    /// Private bindings, masked.
    pub bindings: Vec<BindingView>,
    /// Tradings.
    pub tradings: Vec<Trading>,
    /// Live sub-accounts.
    pub sub_accounts: Vec<SubAccount>,
    /// Full transaction journal.
    pub transactions: Vec<Transaction>,
    /// Activity logs.
    pub logs: Vec<TradingActivityLog>,
    /// When the export was taken.
    pub exported_at: Timestamp,
}

/// What a purge removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeReport {
    /// Activity logs hard-deleted.
    pub logs: u64,
    /// Ledger records deleted.
    pub events: u64,
    /// Sub-accounts soft-deleted.
    pub sub_accounts: u64,
    /// Tradings soft-deleted.
    pub tradings: u64,
    /// Private bindings soft-deleted.
    pub bindings: u64,
    /// Identities deleted.
    pub identities: u64,
}

/// Export and purge of whole accounts.
#[derive(Debug, Clone)]
pub struct AccountService {
    repos: Repositories,
    bindings: ExchangeBindingService,
}

impl AccountService {
    /// Creates a new service.
    #[must_use]
    pub fn new(repos: Repositories, bindings: ExchangeBindingService) -> Self {
        Self { repos, bindings }
    }

    async fn live_user(&self, user_id: UserId) -> ApplicationResult<User> {
        self.repos
            .users
            .get_by_id(user_id)
            .await?
            .filter(|u| !u.is_deleted())
            .ok_or_else(|| ApplicationError::not_found("User", user_id))
    }

    /// Collects everything stored about a user.
    ///
    /// # Errors
    ///
    /// - `ApplicationError::NotFound` if the user does not exist
    /// - Secret Engine errors if a stored credential cannot be decrypted
    pub async fn export(&self, user_id: UserId) -> ApplicationResult<AccountExport> {
        let user = self.live_user(user_id).await?;
        let repos = &self.repos;

        let identities = repos.identities.get_by_user(user_id).await?;
        let bindings = drain(|p| repos.bindings.get_by_user(user_id, p)).await?;
        let trading_filter = TradingFilter::default();
        let tradings = drain(|p| repos.tradings.get_by_user(user_id, &trading_filter, p)).await?;
        let sub_accounts = repos.sub_accounts.get_by_user(user_id, None).await?;
        let tx_filter = TransactionFilter::new();
        let transactions = drain(|p| repos.transactions.get_by_user(user_id, &tx_filter, p)).await?;
        let log_filter = LogFilter::new();
        let logs = drain(|p| repos.logs.get_by_user(user_id, &log_filter, p)).await?;

        let bindings = bindings
            .iter()
            .map(|b| self.bindings.view(b))
            .collect::<ApplicationResult<Vec<_>>>()?;

        info!(
            user_id = %user_id,
            transactions = transactions.len(),
            logs = logs.len(),
            "account exported"
        );
        Ok(AccountExport {
            user,
            identities: identities.iter().map(IdentityView::from).collect(),
            bindings,
            tradings,
            sub_accounts,
            transactions,
            logs,
            exported_at: Timestamp::now(),
        })
    }

    /// Removes a user's data and soft-deletes the user.
    ///
    /// The transaction journal is append-only and stays behind, attached
    /// to the soft-deleted sub-accounts. Nothing is removed if any
    /// sub-account still holds a balance.
    ///
    /// # Errors
    ///
    /// - `ApplicationError::NotFound` if the user does not exist
    /// - `DomainError::HasBalance` if a sub-account balance is not zero
    pub async fn purge(&self, user_id: UserId) -> ApplicationResult<PurgeReport> {
        self.live_user(user_id).await?;
        let repos = &self.repos;

        let sub_accounts = repos.sub_accounts.get_by_user(user_id, None).await?;
        if let Some(funded) = sub_accounts.iter().find(|s| !s.balance.is_zero()) {
            return Err(DomainError::HasBalance(funded.balance).into());
        }

        let mut report = PurgeReport::default();
        let log_filter = LogFilter::new();
        loop {
            let page = repos
                .logs
                .get_by_user(user_id, &log_filter, PageRequest::new(1, MAX_LIMIT))
                .await?;
            if page.items.is_empty() {
                break;
            }
            for log in &page.items {
                repos.logs.delete(log.id).await?;
                report.logs += 1;
            }
        }

        report.events = repos.events.delete_by_user(user_id).await?;

        for sub in &sub_accounts {
            repos.sub_accounts.delete(sub.id).await?;
            report.sub_accounts += 1;
        }

        let trading_filter = TradingFilter::default();
        for trading in drain(|p| repos.tradings.get_by_user(user_id, &trading_filter, p)).await? {
            repos.tradings.delete(trading.id).await?;
            report.tradings += 1;
        }

        for binding in drain(|p| repos.bindings.get_by_user(user_id, p)).await? {
            repos.bindings.delete(binding.id).await?;
            report.bindings += 1;
        }

        report.identities = repos.identities.delete_by_user(user_id).await?;
        repos.users.delete(user_id).await?;

        info!(user_id = %user_id, ?report, "account purged");
        Ok(report)
    }
}

/// Reads every page of a listing.
async fn drain<T, F, Fut>(mut fetch: F) -> RepositoryResult<Vec<T>>
where
    F: FnMut(PageRequest) -> Fut,
    Fut: Future<Output = RepositoryResult<Page<T>>>,
{
    let mut items = Vec::new();
    let mut page = 1;
    loop {
        let batch = fetch(PageRequest::new(page, MAX_LIMIT)).await?;
        let last = u64::from(batch.page) >= batch.total_pages || batch.items.is_empty();
        items.extend(batch.items);
        if last {
            return Ok(items);
        }
        page += 1;
    }
}

/// Result of checking one sub-account against its journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditReport {
    /// Audited sub-account.
    pub sub_account_id: SubAccountId,
    /// Stored balance.
    pub balance: Decimal,
    /// Closing balance of the newest journal entry.
    pub latest_closing: Option<Decimal>,
    /// Credits minus debits over the whole journal.
    pub journal_net: Decimal,
    /// Number of journal entries.
    pub entries: u64,
    /// Stored balance equals the newest closing balance (or is zero with
    /// an empty journal).
    pub consistent: bool,
    /// Stored balance equals the journal net.
    pub net_matches: bool,
}

/// Checks stored balances against the transaction journal.
#[derive(Debug, Clone)]
pub struct BalanceAuditor {
    sub_accounts: Arc<dyn SubAccountRepository>,
    transactions: Arc<dyn TransactionRepository>,
}

impl BalanceAuditor {
    /// Creates an auditor.
    #[must_use]
    pub fn new(
        sub_accounts: Arc<dyn SubAccountRepository>,
        transactions: Arc<dyn TransactionRepository>,
    ) -> Self {
        Self {
            sub_accounts,
            transactions,
        }
    }

    /// Audits one sub-account.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the sub-account does not exist.
    pub async fn verify_sub_account(&self, id: SubAccountId) -> ApplicationResult<AuditReport> {
        let sub = self
            .sub_accounts
            .get_by_id(id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("SubAccount", id))?;
        self.audit(&sub).await
    }

    /// Audits every live sub-account of a user.
    ///
    /// # Errors
    ///
    /// Returns an error only on infrastructure failure.
    pub async fn verify_user(&self, user_id: UserId) -> ApplicationResult<Vec<AuditReport>> {
        let mut reports = Vec::new();
        for sub in self.sub_accounts.get_by_user(user_id, None).await? {
            reports.push(self.audit(&sub).await?);
        }
        Ok(reports)
    }

    async fn audit(&self, sub: &SubAccount) -> ApplicationResult<AuditReport> {
        let latest = self.transactions.latest_for_sub_account(sub.id).await?;
        let totals = self.transactions.sum_by_direction(sub.id, None, None).await?;
        let latest_closing = latest.map(|t| t.closing_balance);
        let consistent = latest_closing.map_or(sub.balance.is_zero(), |c| c == sub.balance);

        let report = AuditReport {
            sub_account_id: sub.id,
            balance: sub.balance,
            latest_closing,
            journal_net: totals.net(),
            entries: totals.count,
            consistent,
            net_matches: totals.net() == sub.balance,
        };
        if !report.consistent {
            warn!(
                sub_account_id = %sub.id,
                balance = %sub.balance,
                latest_closing = ?latest_closing,
                "balance does not match journal"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::application::dto::CreateBindingRequest;
    use crate::config::BindingsConfig;
    use crate::domain::entities::{BalanceChange, SupportedExchanges};
    use crate::domain::errors::ErrorKind;
    use crate::domain::value_objects::{TradingType, TransactionDirection};
    use crate::infrastructure::crypto::SecretEngine;
    use serde_json::json;

    struct Fixture {
        repos: Repositories,
        service: AccountService,
        user: UserId,
        sub: SubAccount,
    }

    async fn fixture() -> Fixture {
        let repos = Repositories::in_memory(SupportedExchanges::default());
        let secrets = Arc::new(SecretEngine::new(b"master", b"signing").unwrap());
        let bindings = ExchangeBindingService::new(
            repos.bindings.clone(),
            secrets,
            &BindingsConfig::default(),
        );

        let user = User::new("alice", "a@x");
        repos.users.create(&user).await.unwrap();
        let request: CreateBindingRequest = serde_json::from_value(json!({
            "name": "main",
            "exchange_type": "binance",
            "api_key": "AKIA1234567890",
            "api_secret": "secret"
        }))
        .unwrap();
        let binding = bindings.create(Some(user.id), &request).await.unwrap();
        let trading = Trading::new(user.id, binding.id, "bot", TradingType::Real);
        repos.tradings.create(&trading).await.unwrap();
        let sub = SubAccount::new(user.id, trading.id, "btc", "BTC");
        repos.sub_accounts.create(&sub).await.unwrap();

        Fixture {
            service: AccountService::new(repos.clone(), bindings),
            repos,
            user: user.id,
            sub,
        }
    }

    fn change(
        f: &Fixture,
        new_balance: i64,
        amount: i64,
        direction: TransactionDirection,
    ) -> BalanceChange {
        BalanceChange::new(
            f.sub.id,
            Decimal::from(new_balance),
            Decimal::from(amount),
            direction,
            "test",
        )
    }

    #[tokio::test]
    async fn export_masks_credentials() {
        let f = fixture().await;
        f.repos
            .mutator
            .apply_balance_change(&change(&f, 2, 2, TransactionDirection::Credit))
            .await
            .unwrap();

        let export = f.service.export(f.user).await.unwrap();
        assert_eq!(export.bindings.len(), 1);
        assert_eq!(export.bindings[0].api_key.as_deref(), Some("AKIA...7890"));
        assert_eq!(export.tradings.len(), 1);
        assert_eq!(export.sub_accounts.len(), 1);
        assert_eq!(export.transactions.len(), 1);

        let text = serde_json::to_string(&export).unwrap();
        assert!(!text.contains("AKIA1234567890"));
    }

    #[tokio::test]
    async fn purge_refuses_funded_account() {
        let f = fixture().await;
        f.repos
            .mutator
            .apply_balance_change(&change(&f, 1, 1, TransactionDirection::Credit))
            .await
            .unwrap();

        let err = f.service.purge(f.user).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HasBalance);
        assert!(f.repos.sub_accounts.get_by_id(f.sub.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn purge_keeps_journal() {
        let f = fixture().await;
        f.repos
            .mutator
            .apply_balance_change(&change(&f, 1, 1, TransactionDirection::Credit))
            .await
            .unwrap();
        f.repos
            .mutator
            .apply_balance_change(&change(&f, 0, 1, TransactionDirection::Debit))
            .await
            .unwrap();

        let report = f.service.purge(f.user).await.unwrap();
        assert_eq!(report.sub_accounts, 1);
        assert_eq!(report.tradings, 1);
        assert_eq!(report.bindings, 1);

        let user = f.repos.users.get_by_id(f.user).await.unwrap();
        assert!(user.is_none_or(|u| u.is_deleted()));
        let journal = f
            .repos
            .transactions
            .get_by_sub_account(f.sub.id, &TransactionFilter::new(), PageRequest::default())
            .await
            .unwrap();
        assert_eq!(journal.total, 2);

        let err = f.service.export(f.user).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn auditor_agrees_with_mutator() {
        let f = fixture().await;
        f.repos
            .mutator
            .apply_balance_change(&change(&f, 5, 5, TransactionDirection::Credit))
            .await
            .unwrap();
        f.repos
            .mutator
            .apply_balance_change(&change(&f, 3, 2, TransactionDirection::Debit))
            .await
            .unwrap();

        let auditor =
            BalanceAuditor::new(f.repos.sub_accounts.clone(), f.repos.transactions.clone());
        let report = auditor.verify_sub_account(f.sub.id).await.unwrap();
        assert!(report.consistent);
        assert!(report.net_matches);
        assert_eq!(report.entries, 2);
        assert_eq!(report.balance, Decimal::from(3));

        let all = auditor.verify_user(f.user).await.unwrap();
        assert_eq!(all, vec![report]);
    }
}
