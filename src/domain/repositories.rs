use crate::domain::candle::FinalizedCandle;
use anyhow::Result;
use async_trait::async_trait;

/// Durable store of finalized one-minute candles.
///
/// The table is the canonical record; conflicts on `(symbol, minute_bucket)`
/// resolve last-writer-wins.
#[async_trait]
pub trait CandleRepository: Send + Sync {
    /// Insert or overwrite the row for the candle's `(symbol, minute_bucket)`.
    async fn upsert(&self, candle: &FinalizedCandle) -> Result<()>;

    /// Most recent `limit` candles for a symbol, newest first.
    async fn recent(&self, symbol: &str, limit: usize) -> Result<Vec<FinalizedCandle>>;
}
