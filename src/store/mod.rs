//! Durable state: users, orders, withdrawals and the processing queue.
//!
//! Services depend on the traits in this module, never on a concrete
//! backend. [`postgres`] provides the production implementation;
//! [`memory`] is a lock-based fake the test suites run against.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

pub mod memory;
pub mod postgres;

#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub login: String,
    pub password_hash: String,
    pub balance: Decimal,
    pub withdrawn: Decimal,
}

/// Scoring status of an order.
///
/// The external scoring service is the source of truth for interim values
/// and may report statuses outside the known set; those are preserved
/// verbatim as [`OrderStatus::Other`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderStatus {
    New,
    Registered,
    Processing,
    Invalid,
    Processed,
    Other(String),
}

impl OrderStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "NEW" => OrderStatus::New,
            "REGISTERED" => OrderStatus::Registered,
            "PROCESSING" => OrderStatus::Processing,
            "INVALID" => OrderStatus::Invalid,
            "PROCESSED" => OrderStatus::Processed,
            other => OrderStatus::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::Registered => "REGISTERED",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Invalid => "INVALID",
            OrderStatus::Processed => "PROCESSED",
            OrderStatus::Other(raw) => raw,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Order {
    pub number: String,
    pub user_id: i64,
    pub status: OrderStatus,
    pub accrual: Option<Decimal>,
    pub uploaded_at: DateTime<Utc>,
    pub accrual_applied: bool,
}

#[derive(Debug, Clone)]
pub struct Withdrawal {
    pub id: i64,
    pub user_id: i64,
    pub order_number: String,
    pub sum: Decimal,
    pub processed_at: DateTime<Utc>,
}

/// Queue entry lifecycle state. Entries leave the queue only by deletion;
/// re-queueing takes a fresh submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStatus {
    New,
    Processing,
}

impl QueueStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            QueueStatus::New => "NEW",
            QueueStatus::Processing => "PROCESSING",
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("login already in use")]
    LoginTaken,
    #[error("user not found")]
    UserNotFound,
    #[error("order not found")]
    OrderNotFound,
    #[error("order already exists")]
    OrderExists,
    #[error("no items in processing queue")]
    NoQueueItems,
    #[error("insufficient funds")]
    InsufficientFunds,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Fails with [`StoreError::LoginTaken`] on a unique-key collision.
    async fn create_user(&self, login: &str, password_hash: &str) -> Result<User, StoreError>;

    async fn get_by_login(&self, login: &str) -> Result<User, StoreError>;

    /// Returns `(balance, withdrawn)`.
    async fn get_balance(&self, user_id: i64) -> Result<(Decimal, Decimal), StoreError>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn get_order(&self, number: &str) -> Result<Order, StoreError>;

    /// Fails with [`StoreError::OrderExists`] on a primary-key collision.
    async fn create_order(&self, order: &Order) -> Result<(), StoreError>;

    /// Inserts a queue entry or updates its status; `last_check` is left
    /// untouched on update.
    async fn upsert_queue(&self, number: &str, status: QueueStatus) -> Result<(), StoreError>;

    /// Claims the least-recently-checked eligible entry, marking it
    /// PROCESSING with a fresh `last_check` under a row lock that excludes
    /// concurrent claimers.
    async fn claim_next(&self) -> Result<String, StoreError>;

    /// Sets the order's status, and its accrual when one is given.
    /// `accrual_applied` is reset only when the new status is not
    /// PROCESSED; reaching an applied PROCESSED goes through
    /// [`OrderStore::apply_accrual`].
    async fn update_order_status(
        &self,
        number: &str,
        status: &OrderStatus,
        accrual: Option<Decimal>,
    ) -> Result<(), StoreError>;

    async fn update_queue_status(
        &self,
        number: &str,
        status: QueueStatus,
        last_check: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn delete_queue(&self, number: &str) -> Result<(), StoreError>;

    /// Sorted by `uploaded_at` descending.
    async fn list_user_orders(&self, user_id: i64) -> Result<Vec<Order>, StoreError>;

    /// Credits the owner's balance by `amount` exactly once per order and
    /// removes the queue entry. Returns `false` when the accrual had
    /// already been applied.
    async fn apply_accrual(&self, number: &str, amount: Decimal) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait WithdrawalStore: Send + Sync {
    /// Debits the balance and records the withdrawal atomically. Fails with
    /// [`StoreError::InsufficientFunds`] and no side effects when the
    /// balance does not cover `amount`.
    async fn withdraw(
        &self,
        user_id: i64,
        order_number: &str,
        amount: Decimal,
    ) -> Result<(), StoreError>;

    /// Sorted by `processed_at` descending.
    async fn list_withdrawals(&self, user_id: i64) -> Result<Vec<Withdrawal>, StoreError>;
}
