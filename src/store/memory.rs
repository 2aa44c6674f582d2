//! In-memory store used by the test suites.
//!
//! Implements the same traits as the Postgres stores over locked maps;
//! the whole-store mutex stands in for row locks, so the transactional
//! invariants (claim exclusivity, at-most-once accrual, non-negative
//! balance) hold the same way they do under Postgres.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use super::{
    Order, OrderStatus, OrderStore, QueueStatus, StoreError, User, UserStore, Withdrawal,
    WithdrawalStore,
};

#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub status: QueueStatus,
    pub last_check: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Inner {
    next_user_id: i64,
    next_withdrawal_id: i64,
    users: BTreeMap<i64, User>,
    orders: BTreeMap<String, Order>,
    queue: BTreeMap<String, QueueEntry>,
    withdrawals: Vec<Withdrawal>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("memory store lock poisoned")
    }

    /// Inserts a user directly, bypassing registration.
    pub fn seed_user(&self, login: &str, password_hash: &str, balance: Decimal) -> i64 {
        let mut inner = self.lock();
        inner.next_user_id += 1;
        let id = inner.next_user_id;
        inner.users.insert(
            id,
            User {
                id,
                login: login.to_string(),
                password_hash: password_hash.to_string(),
                balance,
                withdrawn: Decimal::ZERO,
            },
        );
        id
    }

    /// Inserts a NEW order together with its queue entry, creating the
    /// owning user with a zero balance when it does not exist yet.
    pub fn seed_order(&self, number: &str, user_id: i64) {
        let mut inner = self.lock();
        inner.users.entry(user_id).or_insert_with(|| User {
            id: user_id,
            login: format!("user-{user_id}"),
            password_hash: String::new(),
            balance: Decimal::ZERO,
            withdrawn: Decimal::ZERO,
        });
        if inner.next_user_id < user_id {
            inner.next_user_id = user_id;
        }
        inner.orders.insert(
            number.to_string(),
            Order {
                number: number.to_string(),
                user_id,
                status: OrderStatus::New,
                accrual: None,
                uploaded_at: Utc::now(),
                accrual_applied: false,
            },
        );
        inner.queue.insert(
            number.to_string(),
            QueueEntry {
                status: QueueStatus::New,
                last_check: None,
            },
        );
    }

    pub fn order(&self, number: &str) -> Option<Order> {
        self.lock().orders.get(number).cloned()
    }

    pub fn queue_entry(&self, number: &str) -> Option<QueueEntry> {
        self.lock().queue.get(number).cloned()
    }

    pub fn queue_len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn balance_of(&self, user_id: i64) -> Decimal {
        self.lock()
            .users
            .get(&user_id)
            .map(|user| user.balance)
            .unwrap_or(Decimal::ZERO)
    }

    pub fn withdrawn_of(&self, user_id: i64) -> Decimal {
        self.lock()
            .users
            .get(&user_id)
            .map(|user| user.withdrawn)
            .unwrap_or(Decimal::ZERO)
    }

    /// Marks an order's accrual as already applied, as if a previous run
    /// had credited it.
    pub fn mark_applied(&self, number: &str, accrual: Decimal) {
        let mut inner = self.lock();
        if let Some(order) = inner.orders.get_mut(number) {
            order.status = OrderStatus::Processed;
            order.accrual = Some(accrual);
            order.accrual_applied = true;
        }
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn create_user(&self, login: &str, password_hash: &str) -> Result<User, StoreError> {
        let mut inner = self.lock();
        if inner.users.values().any(|user| user.login == login) {
            return Err(StoreError::LoginTaken);
        }
        inner.next_user_id += 1;
        let user = User {
            id: inner.next_user_id,
            login: login.to_string(),
            password_hash: password_hash.to_string(),
            balance: Decimal::ZERO,
            withdrawn: Decimal::ZERO,
        };
        inner.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get_by_login(&self, login: &str) -> Result<User, StoreError> {
        self.lock()
            .users
            .values()
            .find(|user| user.login == login)
            .cloned()
            .ok_or(StoreError::UserNotFound)
    }

    async fn get_balance(&self, user_id: i64) -> Result<(Decimal, Decimal), StoreError> {
        self.lock()
            .users
            .get(&user_id)
            .map(|user| (user.balance, user.withdrawn))
            .ok_or(StoreError::UserNotFound)
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn get_order(&self, number: &str) -> Result<Order, StoreError> {
        self.lock()
            .orders
            .get(number)
            .cloned()
            .ok_or(StoreError::OrderNotFound)
    }

    async fn create_order(&self, order: &Order) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if inner.orders.contains_key(&order.number) {
            return Err(StoreError::OrderExists);
        }
        inner.orders.insert(order.number.clone(), order.clone());
        Ok(())
    }

    async fn upsert_queue(&self, number: &str, status: QueueStatus) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner
            .queue
            .entry(number.to_string())
            .and_modify(|entry| entry.status = status)
            .or_insert(QueueEntry {
                status,
                last_check: None,
            });
        Ok(())
    }

    async fn claim_next(&self) -> Result<String, StoreError> {
        let mut inner = self.lock();
        let epoch = DateTime::<Utc>::UNIX_EPOCH;

        let claimed = inner
            .queue
            .iter()
            .filter(|(_, entry)| {
                matches!(entry.status, QueueStatus::New | QueueStatus::Processing)
            })
            .min_by_key(|(_, entry)| entry.last_check.unwrap_or(epoch))
            .map(|(number, _)| number.clone());

        let Some(number) = claimed else {
            return Err(StoreError::NoQueueItems);
        };

        let entry = inner
            .queue
            .get_mut(&number)
            .ok_or(StoreError::NoQueueItems)?;
        entry.status = QueueStatus::Processing;
        entry.last_check = Some(Utc::now());
        Ok(number)
    }

    async fn update_order_status(
        &self,
        number: &str,
        status: &OrderStatus,
        accrual: Option<Decimal>,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let order = inner
            .orders
            .get_mut(number)
            .ok_or(StoreError::OrderNotFound)?;
        order.status = status.clone();
        if accrual.is_some() {
            order.accrual = accrual;
        }
        if *status != OrderStatus::Processed {
            order.accrual_applied = false;
        }
        Ok(())
    }

    async fn update_queue_status(
        &self,
        number: &str,
        status: QueueStatus,
        last_check: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let entry = inner
            .queue
            .get_mut(number)
            .ok_or(StoreError::OrderNotFound)?;
        entry.status = status;
        entry.last_check = Some(last_check);
        Ok(())
    }

    async fn delete_queue(&self, number: &str) -> Result<(), StoreError> {
        self.lock().queue.remove(number);
        Ok(())
    }

    async fn list_user_orders(&self, user_id: i64) -> Result<Vec<Order>, StoreError> {
        let mut orders: Vec<Order> = self
            .lock()
            .orders
            .values()
            .filter(|order| order.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        Ok(orders)
    }

    async fn apply_accrual(&self, number: &str, amount: Decimal) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        let order = inner
            .orders
            .get_mut(number)
            .ok_or(StoreError::OrderNotFound)?;

        if order.accrual_applied {
            inner.queue.remove(number);
            return Ok(false);
        }

        order.status = OrderStatus::Processed;
        order.accrual = Some(amount);
        order.accrual_applied = true;
        let user_id = order.user_id;

        if let Some(user) = inner.users.get_mut(&user_id) {
            user.balance += amount;
        }
        inner.queue.remove(number);
        Ok(true)
    }
}

#[async_trait]
impl WithdrawalStore for MemoryStore {
    async fn withdraw(
        &self,
        user_id: i64,
        order_number: &str,
        amount: Decimal,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let user = inner
            .users
            .get_mut(&user_id)
            .ok_or(StoreError::UserNotFound)?;

        if user.balance < amount {
            return Err(StoreError::InsufficientFunds);
        }
        user.balance -= amount;
        user.withdrawn += amount;

        inner.next_withdrawal_id += 1;
        let withdrawal = Withdrawal {
            id: inner.next_withdrawal_id,
            user_id,
            order_number: order_number.to_string(),
            sum: amount,
            processed_at: Utc::now(),
        };
        inner.withdrawals.push(withdrawal);
        Ok(())
    }

    async fn list_withdrawals(&self, user_id: i64) -> Result<Vec<Withdrawal>, StoreError> {
        let mut withdrawals: Vec<Withdrawal> = self
            .lock()
            .withdrawals
            .iter()
            .filter(|withdrawal| withdrawal.user_id == user_id)
            .cloned()
            .collect();
        withdrawals.sort_by(|a, b| b.processed_at.cmp(&a.processed_at));
        Ok(withdrawals)
    }
}
