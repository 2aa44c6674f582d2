use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};

use bonusgate::accrual::{AccrualClient, WorkerPool};
use bonusgate::config::Config;
use bonusgate::db::Database;
use bonusgate::gateway::{self, AppState};
use bonusgate::logging;
use bonusgate::services::{AuthManager, BalanceManager, OrderManager, WithdrawManager};
use bonusgate::store::postgres::{PgOrderStore, PgUserStore, PgWithdrawalStore};
use bonusgate::store::{OrderStore, UserStore, WithdrawalStore};

/// How long in-flight HTTP handlers get to finish after the shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    config.validate()?;
    let _log_guard = logging::init_logging(&config);

    let db = Database::connect(&config.database_uri)
        .await
        .context("connect database")?;
    db.migrate().await.context("apply migrations")?;

    let users: Arc<dyn UserStore> = Arc::new(PgUserStore::new(db.pool().clone()));
    let orders: Arc<dyn OrderStore> = Arc::new(PgOrderStore::new(db.pool().clone()));
    let withdrawals: Arc<dyn WithdrawalStore> = Arc::new(PgWithdrawalStore::new(db.pool().clone()));

    let client = Arc::new(AccrualClient::new(&config.accrual_address));
    let mut workers = WorkerPool::new(
        Arc::clone(&orders),
        client,
        config.workers,
        Duration::from_secs(config.poll_interval),
    );

    let auth = AuthManager::new(
        Arc::clone(&users),
        config.token_secret.clone(),
        config.hash_time_cost,
    )?;
    let state = AppState {
        auth: Arc::new(auth),
        orders: Arc::new(OrderManager::new(orders)),
        balance: Arc::new(BalanceManager::new(users)),
        withdrawals: Arc::new(WithdrawManager::new(withdrawals)),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    workers.start(shutdown_rx.clone());

    let mut server = tokio::spawn(gateway::run_server(
        config.run_address.clone(),
        state,
        shutdown_rx,
    ));

    tokio::select! {
        result = &mut server => {
            // The server exited on its own: listen failure or serve error.
            let _ = shutdown_tx.send(true);
            workers.wait().await;
            return result.context("server task")?;
        }
        result = shutdown_signal() => {
            result?;
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    }

    match tokio::time::timeout(SHUTDOWN_GRACE, server).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(err))) => warn!(error = %err, "server shutdown failed"),
        Ok(Err(err)) => warn!(error = %err, "server task panicked"),
        Err(_) => warn!("graceful shutdown window elapsed"),
    }

    workers.wait().await;
    info!("bonusgate stopped");
    Ok(())
}

async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut terminate =
            signal(SignalKind::terminate()).context("install SIGTERM handler")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.context("listen for SIGINT")?,
            _ = terminate.recv() => {}
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.context("listen for SIGINT")?;
        Ok(())
    }
}
