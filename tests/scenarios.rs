//! End-to-end account scenarios over the in-memory tier.

#![allow(clippy::unwrap_used)]

use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use trade_accounts::application::dto::CreateBindingRequest;
use trade_accounts::application::services::{
    DispatchOutcome, EventDispatcher, EventIngestLedger, ExchangeBindingService,
};
use trade_accounts::config::{BindingsConfig, EventsConfig};
use trade_accounts::domain::entities::{
    BalanceChange, ExchangeBinding, SubAccount, SupportedExchanges, Trading, User,
};
use trade_accounts::domain::errors::ErrorKind;
use trade_accounts::domain::value_objects::{
    Patch, Timestamp, TradingType, TransactionDirection, UserId,
};
use trade_accounts::infrastructure::crypto::SecretEngine;
use trade_accounts::infrastructure::persistence::Repositories;

fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

fn repos() -> Repositories {
    Repositories::in_memory(SupportedExchanges::default())
}

fn binding_service(repos: &Repositories) -> ExchangeBindingService {
    let secrets = Arc::new(SecretEngine::new(b"master-key", b"signing-key").unwrap());
    ExchangeBindingService::new(repos.bindings.clone(), secrets, &BindingsConfig::default())
}

async fn user(repos: &Repositories, name: &str, email: &str) -> UserId {
    let user = User::new(name, email);
    repos.users.create(&user).await.unwrap();
    user.id
}

async fn private_binding(repos: &Repositories, owner: UserId) -> ExchangeBinding {
    let request: CreateBindingRequest = serde_json::from_value(json!({
        "name": "main",
        "exchange_type": "binance",
        "visibility": "private",
        "api_key": "K",
        "api_secret": "S"
    }))
    .unwrap();
    binding_service(repos).create(Some(owner), &request).await.unwrap()
}

#[tokio::test]
async fn duplicate_email_is_rejected() {
    let repos = repos();
    user(&repos, "alice", "a@x").await;

    let err = repos
        .users
        .create(&User::new("alice2", "a@x"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);

    assert!(repos.users.get_by_username("ALICE").await.unwrap().is_none());
}

#[tokio::test]
async fn private_binding_credentials_are_sealed() {
    let repos = repos();
    let owner = user(&repos, "alice", "a@x").await;
    let binding = private_binding(&repos, owner).await;
    let service = binding_service(&repos);

    assert_eq!(service.view(&binding).unwrap().api_key.as_deref(), Some("***"));
    let found = service.find_by_api_key("K").await.unwrap();
    assert_eq!(found.map(|b| b.id), Some(binding.id));

    let err = repos
        .bindings
        .update(binding.id, &Patch::new().set("encrypted_api_key", json!("x")))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ImmutableField);
}

#[tokio::test]
async fn trading_on_foreign_private_binding_is_denied() {
    let repos = repos();
    let owner = user(&repos, "alice", "a@x").await;
    let other = user(&repos, "bob", "b@x").await;
    let binding = private_binding(&repos, owner).await;

    let err = repos
        .tradings
        .create(&Trading::new(other, binding.id, "steal", TradingType::Real))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AccessDenied);
}

async fn funded_sub_account(repos: &Repositories, balance: &str) -> SubAccount {
    let owner = user(repos, "alice", "a@x").await;
    let binding = private_binding(repos, owner).await;
    let trading = Trading::new(owner, binding.id, "spot", TradingType::Real);
    repos.tradings.create(&trading).await.unwrap();
    let sub = SubAccount::new(owner, trading.id, "btc", "BTC");
    repos.sub_accounts.create(&sub).await.unwrap();
    repos
        .mutator
        .apply_balance_change(&BalanceChange::new(
            sub.id,
            dec(balance),
            dec(balance),
            TransactionDirection::Credit,
            "deposit",
        ))
        .await
        .unwrap();
    repos.sub_accounts.get_by_id(sub.id).await.unwrap().unwrap()
}

#[tokio::test]
async fn debit_journals_and_overdraft_is_refused() {
    let repos = repos();
    let sub = funded_sub_account(&repos, "1.0").await;

    let tx_id = repos
        .mutator
        .apply_balance_change(&BalanceChange::new(
            sub.id,
            dec("0.5"),
            dec("0.5"),
            TransactionDirection::Debit,
            "withdraw",
        ))
        .await
        .unwrap();

    let after = repos.sub_accounts.get_by_id(sub.id).await.unwrap().unwrap();
    assert_eq!(after.balance, dec("0.5"));
    let tx = repos.transactions.get_by_id(tx_id).await.unwrap().unwrap();
    assert_eq!(tx.closing_balance, dec("0.5"));
    assert_eq!(tx.amount, dec("0.5"));
    assert_eq!(tx.direction, TransactionDirection::Debit);

    let err = repos
        .mutator
        .apply_balance_change(&BalanceChange::new(
            sub.id,
            dec("-0.1"),
            dec("0.6"),
            TransactionDirection::Debit,
            "x",
        ))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NegativeBalance);
    let unchanged = repos.sub_accounts.get_by_id(sub.id).await.unwrap().unwrap();
    assert_eq!(unchanged.balance, dec("0.5"));

    let err = repos.sub_accounts.delete(sub.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::HasBalance);
}

#[tokio::test]
async fn redelivered_event_credits_once() {
    let repos = repos();
    let sub = funded_sub_account(&repos, "1").await;
    let ledger = EventIngestLedger::new(repos.events.clone(), &EventsConfig::default());
    let dispatcher = EventDispatcher::new(ledger);

    let bytes = serde_json::to_vec(&json!({
        "event_id": "E1",
        "event_type": "balance.updated",
        "user_id": sub.user_id.to_string(),
        "sub_account_id": sub.id.to_string(),
        "symbol": "btc",
        "previous_balance": "1",
        "new_balance": "1.25",
        "amount": "0.25",
        "direction": "credit",
        "reason": "fill"
    }))
    .unwrap();

    let first = dispatcher.dispatch("trading.balance.updated", &bytes).await.unwrap();
    let second = dispatcher.dispatch("trading.balance.updated", &bytes).await.unwrap();
    assert_eq!(first, DispatchOutcome::Processed);
    assert_eq!(second, DispatchOutcome::DuplicateIgnored);

    let after = repos.sub_accounts.get_by_id(sub.id).await.unwrap().unwrap();
    assert_eq!(after.balance, dec("1.25"));
}

#[test]
fn auto_disable_window() {
    let mut binding = ExchangeBinding::public("shared", "binance");
    let now = Timestamp::now();
    binding.failure_count = 10;
    binding.last_failure_at = Some(now.sub_secs(30));

    assert!(binding.should_disable(10, Duration::from_secs(60), now));
    assert!(!binding.should_disable(10, Duration::from_secs(60), now.add_secs(3600)));
}
