//! SQLite-backed key/value store using sqlx.
//!
//! Several hub processes on one host can share a database file and see the
//! same directory.

use std::time::Duration;

use {
    async_trait::async_trait,
    chrono::Utc,
    sqlx::{Row, SqlitePool, sqlite::SqlitePoolOptions},
};

use crate::{Result, backend::KvBackend};

pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    /// Connect with a dedicated pool and create the tables.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Self::with_pool(pool).await
    }

    /// Use an existing pool, creating the tables if needed.
    pub async fn with_pool(pool: SqlitePool) -> Result<Self> {
        let backend = Self { pool };
        backend.init().await?;
        Ok(backend)
    }

    async fn init(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS kv_values (
                key        TEXT PRIMARY KEY,
                value      TEXT NOT NULL,
                expires_at INTEGER
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS kv_sets (
                key    TEXT NOT NULL,
                member TEXT NOT NULL,
                PRIMARY KEY (key, member)
            )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[async_trait]
impl KvBackend for SqliteBackend {
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.map(|ttl| now_ms() + ttl.as_millis() as i64);
        sqlx::query(
            "INSERT INTO kv_values (key, value, expires_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
        )
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = now_ms();
        sqlx::query("DELETE FROM kv_values WHERE key = ? AND expires_at IS NOT NULL AND expires_at <= ?")
            .bind(key)
            .bind(now)
            .execute(&self.pool)
            .await?;
        let row = sqlx::query("SELECT value FROM kv_values WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("value")))
    }

    async fn del(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM kv_values WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO kv_sets (key, member) VALUES (?, ?)")
            .bind(key)
            .bind(member)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> Result<()> {
        sqlx::query("DELETE FROM kv_sets WHERE key = ? AND member = ?")
            .bind(key)
            .bind(member)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT member FROM kv_sets WHERE key = ? ORDER BY member")
            .bind(key)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|r| r.get("member")).collect())
    }
}
