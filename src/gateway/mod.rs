//! HTTP surface of the gateway.

pub mod handlers;
pub mod middleware;

use std::sync::Arc;

use anyhow::Context;
use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use crate::services::{AuthManager, BalanceManager, OrderManager, WithdrawManager};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthManager>,
    pub orders: Arc<OrderManager>,
    pub balance: Arc<BalanceManager>,
    pub withdrawals: Arc<WithdrawManager>,
}

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route(
            "/api/user/orders",
            post(handlers::submit_order).get(handlers::list_orders),
        )
        .route("/api/user/balance", get(handlers::balance))
        .route("/api/user/balance/withdraw", post(handlers::withdraw))
        .route("/api/user/withdrawals", get(handlers::list_withdrawals))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ));

    Router::new()
        .route("/ping", get(handlers::ping))
        .route("/api/user/register", post(handlers::register))
        .route("/api/user/login", post(handlers::login))
        .merge(protected)
        .with_state(state)
}

/// Serves the API until `shutdown` flips, then finishes in-flight requests.
pub async fn run_server(
    addr: String,
    state: AppState,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!(%addr, "gateway listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await
        .context("serve http")?;

    Ok(())
}
