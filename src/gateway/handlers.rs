//! Handlers for the public API.
//!
//! The wire contract is plain status codes with JSON bodies only where the
//! endpoint returns data; error mapping follows the service error kinds.

use axum::{
    Extension, Json,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::error;

use super::AppState;
use super::middleware::{AuthUser, TOKEN_COOKIE};
use crate::services::{AuthError, OrderError, WithdrawError};
use crate::store::{Order, OrderStatus};

#[derive(Debug, Deserialize)]
pub struct Credentials {
    pub login: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
struct OrderItem {
    number: String,
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    accrual: Option<Decimal>,
    uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct BalanceBody {
    current: Decimal,
    withdrawn: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct WithdrawRequest {
    pub order: String,
    pub sum: Decimal,
}

#[derive(Debug, Serialize)]
struct WithdrawalItem {
    order: String,
    sum: Decimal,
    processed_at: DateTime<Utc>,
}

pub async fn ping() -> &'static str {
    "ok"
}

pub async fn register(State(state): State<AppState>, Json(creds): Json<Credentials>) -> Response {
    match state.auth.register(&creds.login, &creds.password).await {
        Ok(token) => with_token_cookie(&token),
        Err(AuthError::LoginTaken) => StatusCode::CONFLICT.into_response(),
        Err(AuthError::InvalidCredentials) => StatusCode::BAD_REQUEST.into_response(),
        Err(err) => internal_error("register", err),
    }
}

pub async fn login(State(state): State<AppState>, Json(creds): Json<Credentials>) -> Response {
    match state.auth.login(&creds.login, &creds.password).await {
        Ok(token) => with_token_cookie(&token),
        Err(AuthError::InvalidCredentials) => StatusCode::UNAUTHORIZED.into_response(),
        Err(err) => internal_error("login", err),
    }
}

pub async fn submit_order(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    headers: HeaderMap,
    body: String,
) -> Response {
    if !is_plain_text(&headers) {
        return StatusCode::BAD_REQUEST.into_response();
    }

    match state.orders.submit_order(user_id, body.trim()).await {
        Ok(true) => StatusCode::ACCEPTED.into_response(),
        Ok(false) => StatusCode::OK.into_response(),
        Err(OrderError::InvalidNumber) => StatusCode::UNPROCESSABLE_ENTITY.into_response(),
        Err(OrderError::OwnedByAnother) => StatusCode::CONFLICT.into_response(),
        Err(err) => internal_error("submit order", err),
    }
}

pub async fn list_orders(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Response {
    match state.orders.list_user_orders(user_id).await {
        Ok(orders) if orders.is_empty() => StatusCode::NO_CONTENT.into_response(),
        Ok(orders) => {
            let items: Vec<OrderItem> = orders.into_iter().map(order_item).collect();
            Json(items).into_response()
        }
        Err(err) => internal_error("list orders", err),
    }
}

pub async fn balance(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Response {
    match state.balance.get_balance(user_id).await {
        Ok((current, withdrawn)) => Json(BalanceBody { current, withdrawn }).into_response(),
        Err(err) => internal_error("read balance", err),
    }
}

pub async fn withdraw(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(request): Json<WithdrawRequest>,
) -> Response {
    match state
        .withdrawals
        .withdraw(user_id, &request.order, request.sum)
        .await
    {
        Ok(()) => StatusCode::OK.into_response(),
        Err(WithdrawError::InvalidNumber) => StatusCode::UNPROCESSABLE_ENTITY.into_response(),
        Err(WithdrawError::InvalidAmount) => StatusCode::BAD_REQUEST.into_response(),
        Err(WithdrawError::InsufficientFunds) => StatusCode::PAYMENT_REQUIRED.into_response(),
        Err(err) => internal_error("withdraw", err),
    }
}

pub async fn list_withdrawals(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Response {
    match state.withdrawals.list_withdrawals(user_id).await {
        Ok(withdrawals) if withdrawals.is_empty() => StatusCode::NO_CONTENT.into_response(),
        Ok(withdrawals) => {
            let items: Vec<WithdrawalItem> = withdrawals
                .into_iter()
                .map(|w| WithdrawalItem {
                    order: w.order_number,
                    sum: w.sum,
                    processed_at: w.processed_at,
                })
                .collect();
            Json(items).into_response()
        }
        Err(err) => internal_error("list withdrawals", err),
    }
}

fn order_item(order: Order) -> OrderItem {
    // Accrual becomes user-visible only once the order is fully processed.
    let accrual = if order.status == OrderStatus::Processed {
        order.accrual
    } else {
        None
    };
    OrderItem {
        number: order.number,
        status: order.status.to_string(),
        accrual,
        uploaded_at: order.uploaded_at,
    }
}

fn is_plain_text(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("text/plain"))
}

fn with_token_cookie(token: &str) -> Response {
    let cookie = format!("{TOKEN_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax");
    match header::HeaderValue::from_str(&cookie) {
        Ok(value) => (StatusCode::OK, [(header::SET_COOKIE, value)]).into_response(),
        Err(err) => internal_error("set auth cookie", err),
    }
}

fn internal_error(operation: &str, err: impl std::fmt::Display) -> Response {
    error!(error = %err, "{} failed", operation);
    StatusCode::INTERNAL_SERVER_ERROR.into_response()
}
