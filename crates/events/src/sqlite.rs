//! SQLite-backed pub/sub: an append-only event table that subscribers poll.
//!
//! Hub processes on one host share the database file.

use std::time::Duration;

use {
    async_trait::async_trait,
    chrono::Utc,
    futures::{StreamExt, stream},
    sqlx::{Row, SqlitePool, sqlite::SqlitePoolOptions},
    tracing::warn,
};

use crate::{
    Result,
    backend::{EventStream, PubSubBackend},
};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);
/// Rows older than this are pruned on publish.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(3600);
const POLL_BATCH: i64 = 256;

pub struct SqlitePubSub {
    pool: SqlitePool,
    poll_interval: Duration,
    retention: Duration,
}

impl SqlitePubSub {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Self::with_pool(pool).await
    }

    pub async fn with_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS fabric_events (
                seq        INTEGER PRIMARY KEY AUTOINCREMENT,
                channel    TEXT NOT NULL,
                key        TEXT NOT NULL,
                payload    BLOB NOT NULL,
                created_at INTEGER NOT NULL
            )",
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_fabric_events_channel ON fabric_events(channel, seq)",
        )
        .execute(&pool)
        .await?;
        Ok(Self {
            pool,
            poll_interval: DEFAULT_POLL_INTERVAL,
            retention: DEFAULT_RETENTION,
        })
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

#[async_trait]
impl PubSubBackend for SqlitePubSub {
    async fn publish(&self, channel: &str, key: &str, payload: Vec<u8>) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        sqlx::query(
            "INSERT INTO fabric_events (channel, key, payload, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(channel)
        .bind(key)
        .bind(payload)
        .bind(now)
        .execute(&self.pool)
        .await?;
        sqlx::query("DELETE FROM fabric_events WHERE created_at < ?")
            .bind(now - self.retention.as_millis() as i64)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Streams events appended after this call.
    async fn subscribe(&self, channel: &str) -> Result<EventStream> {
        let start: i64 =
            sqlx::query("SELECT COALESCE(MAX(seq), 0) AS seq FROM fabric_events WHERE channel = ?")
                .bind(channel)
                .fetch_one(&self.pool)
                .await?
                .get("seq");

        let pool = self.pool.clone();
        let interval = self.poll_interval;
        let channel = channel.to_string();

        let batches = stream::unfold(start, move |last| {
            let pool = pool.clone();
            let channel = channel.clone();
            async move {
                loop {
                    let rows = sqlx::query(
                        "SELECT seq, payload FROM fabric_events
                         WHERE channel = ? AND seq > ? ORDER BY seq LIMIT ?",
                    )
                    .bind(&channel)
                    .bind(last)
                    .bind(POLL_BATCH)
                    .fetch_all(&pool)
                    .await;
                    match rows {
                        Ok(rows) if !rows.is_empty() => {
                            let next = rows.last().map_or(last, |r| r.get::<i64, _>("seq"));
                            let batch: Vec<Vec<u8>> =
                                rows.iter().map(|r| r.get::<Vec<u8>, _>("payload")).collect();
                            return Some((batch, next));
                        },
                        Ok(_) => {},
                        Err(e) => warn!(channel = %channel, error = %e, "events: poll failed"),
                    }
                    tokio::time::sleep(interval).await;
                }
            }
        });

        Ok(batches.flat_map(stream::iter).boxed())
    }
}
