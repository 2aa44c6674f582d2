//! Database connection management and schema migration.

use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

/// Idempotent schema statements, applied in order at startup.
const MIGRATIONS: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS users (
        id BIGSERIAL PRIMARY KEY,
        login TEXT UNIQUE NOT NULL,
        password_hash TEXT NOT NULL,
        balance NUMERIC(18,2) NOT NULL DEFAULT 0,
        withdrawn NUMERIC(18,2) NOT NULL DEFAULT 0
    )"#,
    r#"CREATE TABLE IF NOT EXISTS orders (
        number TEXT PRIMARY KEY,
        user_id BIGINT NOT NULL,
        status TEXT NOT NULL,
        accrual NUMERIC(18,2),
        uploaded_at TIMESTAMPTZ NOT NULL,
        accrual_applied BOOLEAN NOT NULL DEFAULT FALSE
    )"#,
    r#"CREATE TABLE IF NOT EXISTS withdrawals (
        id BIGSERIAL PRIMARY KEY,
        user_id BIGINT NOT NULL,
        order_number TEXT NOT NULL,
        sum NUMERIC(18,2) NOT NULL,
        processed_at TIMESTAMPTZ NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS processing_queue (
        number TEXT PRIMARY KEY,
        last_check TIMESTAMPTZ,
        status TEXT NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS orders_user_id_idx ON orders (user_id)",
    "CREATE INDEX IF NOT EXISTS withdrawals_user_id_idx ON withdrawals (user_id)",
];

/// PostgreSQL connection pool.
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .idle_timeout(Duration::from_secs(300))
            .max_lifetime(Duration::from_secs(3600))
            .connect(database_url)
            .await?;

        info!("postgres connection pool established");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        for statement in MIGRATIONS {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("schema migrations applied");
        Ok(())
    }

    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
