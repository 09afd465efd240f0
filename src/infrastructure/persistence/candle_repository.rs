use crate::domain::candle::FinalizedCandle;
use crate::domain::repositories::CandleRepository;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

pub struct SqliteCandleRepository {
    pool: SqlitePool,
}

impl SqliteCandleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn map_rows(&self, rows: Vec<sqlx::sqlite::SqliteRow>) -> Result<Vec<FinalizedCandle>> {
        let mut candles = Vec::new();
        for row in rows {
            let finalized_at: DateTime<Utc> = row.try_get("finalized_at")?;
            candles.push(FinalizedCandle {
                symbol: row.try_get("symbol")?,
                minute_bucket_ms: row.try_get("minute_bucket_ms")?,
                open: row.try_get("open")?,
                high: row.try_get("high")?,
                low: row.try_get("low")?,
                close: row.try_get("close")?,
                volume: row.try_get("volume")?,
                finalized_at,
            });
        }
        Ok(candles)
    }
}

#[async_trait]
impl CandleRepository for SqliteCandleRepository {
    async fn upsert(&self, candle: &FinalizedCandle) -> Result<()> {
        // Last writer wins on (symbol, minute_bucket_ms)
        sqlx::query(
            r#"
            INSERT INTO candles_1m (symbol, minute_bucket_ms, open, high, low, close, volume, finalized_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(symbol, minute_bucket_ms)
            DO UPDATE SET
                open = excluded.open,
                high = excluded.high,
                low = excluded.low,
                close = excluded.close,
                volume = excluded.volume,
                finalized_at = excluded.finalized_at
            "#,
        )
        .bind(&candle.symbol)
        .bind(candle.minute_bucket_ms)
        .bind(candle.open)
        .bind(candle.high)
        .bind(candle.low)
        .bind(candle.close)
        .bind(candle.volume)
        .bind(candle.finalized_at)
        .execute(&self.pool)
        .await
        .context("Failed to upsert candle")?;

        Ok(())
    }

    async fn recent(&self, symbol: &str, limit: usize) -> Result<Vec<FinalizedCandle>> {
        let rows = sqlx::query(
            "SELECT * FROM candles_1m WHERE symbol = ? ORDER BY minute_bucket_ms DESC LIMIT ?",
        )
        .bind(symbol)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        self.map_rows(rows)
    }
}

/// In-memory implementation for tests and ephemeral runs.
pub struct InMemoryCandleRepository {
    rows: tokio::sync::RwLock<Vec<FinalizedCandle>>,
}

impl InMemoryCandleRepository {
    pub fn new() -> Self {
        Self {
            rows: tokio::sync::RwLock::new(Vec::new()),
        }
    }

    pub async fn count(&self) -> usize {
        self.rows.read().await.len()
    }
}

impl Default for InMemoryCandleRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CandleRepository for InMemoryCandleRepository {
    async fn upsert(&self, candle: &FinalizedCandle) -> Result<()> {
        let mut rows = self.rows.write().await;
        if let Some(existing) = rows
            .iter_mut()
            .find(|c| c.symbol == candle.symbol && c.minute_bucket_ms == candle.minute_bucket_ms)
        {
            *existing = candle.clone();
        } else {
            rows.push(candle.clone());
        }
        Ok(())
    }

    async fn recent(&self, symbol: &str, limit: usize) -> Result<Vec<FinalizedCandle>> {
        let rows = self.rows.read().await;
        let mut matched: Vec<FinalizedCandle> =
            rows.iter().filter(|c| c.symbol == symbol).cloned().collect();
        matched.sort_by_key(|c| std::cmp::Reverse(c.minute_bucket_ms));
        matched.truncate(limit);
        Ok(matched)
    }
}
