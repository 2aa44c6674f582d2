//! PostgreSQL-backed stores.
//!
//! All queries are runtime-bound; multi-row invariants (claiming, accrual
//! application, withdrawal) run inside explicit transactions with row
//! locks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use super::{
    Order, OrderStatus, OrderStore, QueueStatus, StoreError, User, UserStore, Withdrawal,
    WithdrawalStore,
};

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn create_user(&self, login: &str, password_hash: &str) -> Result<User, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO users (login, password_hash)
            VALUES ($1, $2)
            RETURNING id, balance, withdrawn
            "#,
        )
        .bind(login)
        .bind(password_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                StoreError::LoginTaken
            } else {
                StoreError::Database(err)
            }
        })?;

        Ok(User {
            id: row.get("id"),
            login: login.to_string(),
            password_hash: password_hash.to_string(),
            balance: row.get("balance"),
            withdrawn: row.get("withdrawn"),
        })
    }

    async fn get_by_login(&self, login: &str) -> Result<User, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, login, password_hash, balance, withdrawn
            FROM users
            WHERE login = $1
            "#,
        )
        .bind(login)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::UserNotFound)?;

        Ok(User {
            id: row.get("id"),
            login: row.get("login"),
            password_hash: row.get("password_hash"),
            balance: row.get("balance"),
            withdrawn: row.get("withdrawn"),
        })
    }

    async fn get_balance(&self, user_id: i64) -> Result<(Decimal, Decimal), StoreError> {
        let row = sqlx::query("SELECT balance, withdrawn FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::UserNotFound)?;

        Ok((row.get("balance"), row.get("withdrawn")))
    }
}

pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn order_from_row(row: &PgRow) -> Order {
    let status: String = row.get("status");
    Order {
        number: row.get("number"),
        user_id: row.get("user_id"),
        status: OrderStatus::parse(&status),
        accrual: row.get("accrual"),
        uploaded_at: row.get("uploaded_at"),
        accrual_applied: row.get("accrual_applied"),
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn get_order(&self, number: &str) -> Result<Order, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT number, user_id, status, accrual, uploaded_at, accrual_applied
            FROM orders
            WHERE number = $1
            "#,
        )
        .bind(number)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::OrderNotFound)?;

        Ok(order_from_row(&row))
    }

    async fn create_order(&self, order: &Order) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO orders (number, user_id, status, accrual, uploaded_at, accrual_applied)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&order.number)
        .bind(order.user_id)
        .bind(order.status.as_str())
        .bind(order.accrual)
        .bind(order.uploaded_at)
        .bind(order.accrual_applied)
        .execute(&self.pool)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                StoreError::OrderExists
            } else {
                StoreError::Database(err)
            }
        })?;

        Ok(())
    }

    async fn upsert_queue(&self, number: &str, status: QueueStatus) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO processing_queue (number, last_check, status)
            VALUES ($1, NULL, $2)
            ON CONFLICT (number) DO UPDATE
            SET status = EXCLUDED.status
            "#,
        )
        .bind(number)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn claim_next(&self) -> Result<String, StoreError> {
        let mut tx = self.pool.begin().await?;

        // NULL last_check sorts as oldest so fresh entries are picked first;
        // SKIP LOCKED keeps concurrent claimers off the same row.
        let row = sqlx::query(
            r#"
            SELECT number
            FROM processing_queue
            WHERE status IN ('NEW', 'PROCESSING')
            ORDER BY COALESCE(last_check, 'epoch'::timestamptz) ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Err(StoreError::NoQueueItems);
        };
        let number: String = row.get("number");

        sqlx::query(
            r#"
            UPDATE processing_queue
            SET status = 'PROCESSING', last_check = $2
            WHERE number = $1
            "#,
        )
        .bind(&number)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(number)
    }

    async fn update_order_status(
        &self,
        number: &str,
        status: &OrderStatus,
        accrual: Option<Decimal>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE orders
            SET status = $2,
                accrual = COALESCE($3, accrual),
                accrual_applied = CASE WHEN $2 = 'PROCESSED' THEN accrual_applied ELSE FALSE END
            WHERE number = $1
            "#,
        )
        .bind(number)
        .bind(status.as_str())
        .bind(accrual)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_queue_status(
        &self,
        number: &str,
        status: QueueStatus,
        last_check: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE processing_queue
            SET status = $2, last_check = $3
            WHERE number = $1
            "#,
        )
        .bind(number)
        .bind(status.as_str())
        .bind(last_check)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_queue(&self, number: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM processing_queue WHERE number = $1")
            .bind(number)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn list_user_orders(&self, user_id: i64) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT number, user_id, status, accrual, uploaded_at, accrual_applied
            FROM orders
            WHERE user_id = $1
            ORDER BY uploaded_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(order_from_row).collect())
    }

    async fn apply_accrual(&self, number: &str, amount: Decimal) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            SELECT user_id, accrual_applied
            FROM orders
            WHERE number = $1
            FOR UPDATE
            "#,
        )
        .bind(number)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Err(StoreError::OrderNotFound);
        };
        let user_id: i64 = row.get("user_id");
        let applied: bool = row.get("accrual_applied");

        if applied {
            sqlx::query("DELETE FROM processing_queue WHERE number = $1")
                .bind(number)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            UPDATE orders
            SET status = 'PROCESSED', accrual = $2, accrual_applied = TRUE
            WHERE number = $1
            "#,
        )
        .bind(number)
        .bind(amount)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE users SET balance = balance + $2 WHERE id = $1")
            .bind(user_id)
            .bind(amount)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM processing_queue WHERE number = $1")
            .bind(number)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }
}

pub struct PgWithdrawalStore {
    pool: PgPool,
}

impl PgWithdrawalStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WithdrawalStore for PgWithdrawalStore {
    async fn withdraw(
        &self,
        user_id: i64,
        order_number: &str,
        amount: Decimal,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT balance FROM users WHERE id = $1 FOR UPDATE")
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(row) = row else {
            return Err(StoreError::UserNotFound);
        };
        let balance: Decimal = row.get("balance");

        if balance < amount {
            // Dropping the transaction rolls back and releases the row lock.
            return Err(StoreError::InsufficientFunds);
        }

        sqlx::query(
            r#"
            UPDATE users
            SET balance = balance - $2, withdrawn = withdrawn + $2
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(amount)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO withdrawals (user_id, order_number, sum, processed_at)
            VALUES ($1, $2, $3, NOW())
            "#,
        )
        .bind(user_id)
        .bind(order_number)
        .bind(amount)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn list_withdrawals(&self, user_id: i64) -> Result<Vec<Withdrawal>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, order_number, sum, processed_at
            FROM withdrawals
            WHERE user_id = $1
            ORDER BY processed_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| Withdrawal {
                id: row.get("id"),
                user_id: row.get("user_id"),
                order_number: row.get("order_number"),
                sum: row.get("sum"),
                processed_at: row.get("processed_at"),
            })
            .collect())
    }
}
