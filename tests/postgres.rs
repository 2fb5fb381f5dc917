//! Postgres tier against a throwaway container. Needs Docker:
//! `cargo test --test postgres -- --ignored`.

#![allow(clippy::unwrap_used)]

use rust_decimal::Decimal;
use std::time::Duration;
use testcontainers::core::{IntoContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{GenericImage, ImageExt};
use trade_accounts::config::DatabaseConfig;
use trade_accounts::domain::entities::{
    BalanceChange, ExchangeBinding, SubAccount, SupportedExchanges, Trading, User,
};
use trade_accounts::domain::errors::ErrorKind;
use trade_accounts::domain::value_objects::{TradingType, TransactionDirection};
use trade_accounts::infrastructure::persistence::postgres::DatabasePool;
use trade_accounts::infrastructure::persistence::{EventClaim, NoEffects, Repositories};

async fn connect(url: String) -> DatabasePool {
    let config = DatabaseConfig {
        url,
        ..DatabaseConfig::default()
    };
    // The image logs "ready" once during init before the final restart.
    for _ in 0..30 {
        if let Ok(pool) = DatabasePool::connect(&config).await {
            return pool;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    DatabasePool::connect(&config).await.unwrap()
}

#[tokio::test]
#[ignore = "requires docker"]
async fn ledger_and_mutator_round_trip() {
    let container = GenericImage::new("postgres", "16-alpine")
        .with_exposed_port(5432.tcp())
        .with_wait_for(WaitFor::message_on_stderr(
            "database system is ready to accept connections",
        ))
        .with_env_var("POSTGRES_PASSWORD", "postgres")
        .start()
        .await
        .unwrap();
    let host = container.get_host().await.unwrap();
    let port = container.get_host_port_ipv4(5432).await.unwrap();
    let pool = connect(format!("postgres://postgres:postgres@{host}:{port}/postgres")).await;
    let repos = Repositories::postgres(pool.inner().clone(), SupportedExchanges::default());

    let user = User::new("alice", "a@x");
    repos.users.create(&user).await.unwrap();
    let err = repos.users.create(&User::new("alice2", "a@x")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);

    let binding = ExchangeBinding::public("shared", "binance");
    repos.bindings.create(&binding).await.unwrap();
    let trading = Trading::new(user.id, binding.id, "bot", TradingType::Virtual);
    repos.tradings.create(&trading).await.unwrap();
    let sub = SubAccount::new(user.id, trading.id, "btc", "BTC");
    repos.sub_accounts.create(&sub).await.unwrap();

    let tx_id = repos
        .mutator
        .apply_balance_change(&BalanceChange::new(
            sub.id,
            Decimal::ONE,
            Decimal::ONE,
            TransactionDirection::Credit,
            "deposit",
        ))
        .await
        .unwrap();
    let tx = repos.transactions.get_by_id(tx_id).await.unwrap().unwrap();
    assert_eq!(tx.closing_balance, Decimal::ONE);

    let err = repos.sub_accounts.delete(sub.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::HasBalance);

    for (claimed, amount) in [("1.00000002", "0.000000015"), ("1", "0.000000004")] {
        let err = repos
            .mutator
            .apply_balance_change(&BalanceChange::new(
                sub.id,
                claimed.parse().unwrap(),
                amount.parse().unwrap(),
                TransactionDirection::Credit,
                "deposit",
            ))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
    let latest = repos.transactions.latest_for_sub_account(sub.id).await.unwrap().unwrap();
    assert_eq!(latest.id, tx_id);

    let gone = User::new("bob", "b@x");
    repos.users.create(&gone).await.unwrap();
    repos.users.delete(gone.id).await.unwrap();
    let err = repos
        .tradings
        .create(&Trading::new(gone.id, binding.id, "late", TradingType::Virtual))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ReferenceNotFound);

    let claim = EventClaim::new("E1", "bot.heartbeat");
    assert!(repos.events.ingest(&claim, &NoEffects).await.unwrap().is_processed());
    assert!(repos.events.ingest(&claim, &NoEffects).await.unwrap().is_duplicate());

    pool.close().await;
}
