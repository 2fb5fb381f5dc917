//! Housekeeping CLI for the trade-accounts store.
//!
//! Usage:
//!   accounts_admin migrate
//!   accounts_admin purge-events --hours 72
//!   accounts_admin retry-failed --follow
//!   accounts_admin stats
//!   accounts_admin generate-key --prefix whk --length 40

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use trade_accounts::application::services::{EventDispatcher, EventIngestLedger, RetryWorker};
use trade_accounts::config::AppConfig;
use trade_accounts::domain::value_objects::Timestamp;
use trade_accounts::infrastructure::crypto::SecretEngine;
use trade_accounts::infrastructure::persistence::Repositories;
use trade_accounts::infrastructure::persistence::postgres::DatabasePool;
use trade_accounts::telemetry;

#[derive(Parser)]
#[command(name = "accounts_admin")]
#[command(about = "Maintenance commands for the trade-accounts store")]
struct Args {
    /// Config file (extension optional); environment overrides it
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply pending schema migrations
    Migrate,

    /// Delete processed ledger records past retention
    PurgeEvents {
        /// Override the configured retention window
        #[arg(long)]
        hours: Option<i64>,
    },

    /// Re-dispatch failed events from their stored payloads
    RetryFailed {
        /// Keep running passes until Ctrl-C
        #[arg(long, default_value = "false")]
        follow: bool,
    },

    /// Print ledger counts per status
    Stats,

    /// Print a random key
    GenerateKey {
        /// Key prefix
        #[arg(long, default_value = "")]
        prefix: String,

        /// Random characters after the prefix
        #[arg(long, default_value = "44")]
        length: usize,
    },

    /// Consume the bus and retry failures until Ctrl-C
    #[cfg(feature = "nats")]
    Consume,
}

fn load_config(path: Option<&str>) -> Result<AppConfig> {
    let config = match path {
        Some(file) => {
            dotenvy::dotenv().ok();
            AppConfig::load_from(file)
        }
        None => AppConfig::load(),
    };
    config.context("loading configuration")
}

async fn repositories(config: &AppConfig) -> Result<Repositories> {
    let pool = DatabasePool::connect(&config.database)
        .await
        .context("connecting to database")?;
    Ok(Repositories::postgres(
        pool.inner().clone(),
        config.bindings.supported(),
    ))
}

fn shutdown_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
        }
        let _ = tx.send(true);
    });
    rx
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Command::GenerateKey { prefix, length } = &args.command {
        println!("{}", SecretEngine::generate(prefix, *length));
        return Ok(());
    }

    let mut config = load_config(args.config.as_deref())?;
    telemetry::init(&config.logging);

    if matches!(args.command, Command::Migrate) {
        config.database.run_migrations = false;
        let pool = DatabasePool::connect(&config.database)
            .await
            .context("connecting to database")?;
        pool.migrate().await.context("applying migrations")?;
        println!("migrations applied");
        return Ok(());
    }

    let repos = repositories(&config).await?;
    let ledger = EventIngestLedger::new(repos.events.clone(), &config.events);

    match args.command {
        Command::PurgeEvents { hours } => {
            let removed = match hours {
                Some(h) => {
                    let cutoff = Timestamp::now().sub_secs(h.saturating_mul(3600));
                    ledger.purge_processed_before(cutoff).await?
                }
                None => ledger.purge_processed().await?,
            };
            println!("{removed} processed events removed");
        }
        Command::RetryFailed { follow } => {
            let dispatcher = Arc::new(EventDispatcher::new(ledger));
            let worker = RetryWorker::new(dispatcher, &config.events);
            if follow {
                worker.run_until(shutdown_on_ctrl_c()).await;
            } else {
                let report = worker.run_once().await?;
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
        }
        Command::Stats => {
            let stats = ledger.stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        #[cfg(feature = "nats")]
        Command::Consume => {
            use trade_accounts::infrastructure::messaging::nats::NatsConsumer;

            let dispatcher = Arc::new(EventDispatcher::new(ledger));
            let shutdown = shutdown_on_ctrl_c();
            let worker = RetryWorker::new(dispatcher.clone(), &config.events);
            let retry_shutdown = shutdown.clone();
            let retries = tokio::spawn(async move { worker.run_until(retry_shutdown).await });

            let consumer = NatsConsumer::connect(&config.events).await?;
            let report = consumer.run(&dispatcher, shutdown).await?;
            retries.await.context("retry worker panicked")?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Migrate | Command::GenerateKey { .. } => {}
    }
    Ok(())
}
