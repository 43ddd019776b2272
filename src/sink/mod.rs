//! Candle persistence boundary
//!
//! Completed candles leave the pipeline through [`CandleSink`]. Persistence
//! itself is an external collaborator; idempotency on replays is the sink's
//! responsibility, and the engines guarantee at most one candle per
//! (instrument, minute) per engine instance.

use async_trait::async_trait;
use std::sync::Mutex;

use crate::candle::Candle;

/// Destination for completed candles
#[async_trait]
pub trait CandleSink: Send + Sync {
    /// Store one completed candle
    async fn store(&self, candle: &Candle) -> anyhow::Result<()>;

    /// Store a batch of candles (flush output)
    async fn store_batch(&self, candles: &[Candle]) -> anyhow::Result<()> {
        for candle in candles {
            self.store(candle).await?;
        }
        Ok(())
    }
}

/// Sink that records candles to the structured log
///
/// Stands in for external persistence in the default run mode.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl CandleSink for LogSink {
    async fn store(&self, candle: &Candle) -> anyhow::Result<()> {
        tracing::info!(
            instrument = %candle.instrument_key,
            minute = %candle.timestamp,
            open = %candle.open,
            high = %candle.high,
            low = %candle.low,
            close = %candle.close,
            volume_1m = candle.volume_1m,
            "candle completed"
        );
        Ok(())
    }
}

/// In-memory sink for tests and local inspection
#[derive(Debug, Default)]
pub struct MemorySink {
    candles: Mutex<Vec<Candle>>,
}

impl MemorySink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything stored so far
    pub fn stored(&self) -> Vec<Candle> {
        self.candles.lock().expect("sink lock poisoned").clone()
    }
}

#[async_trait]
impl CandleSink for MemorySink {
    async fn store(&self, candle: &Candle) -> anyhow::Result<()> {
        self.candles
            .lock()
            .expect("sink lock poisoned")
            .push(candle.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    fn candle(key: &str) -> Candle {
        Candle {
            instrument_key: key.to_string(),
            timestamp: Utc.timestamp_millis_opt(1_700_000_040_000).single().unwrap(),
            open: Decimal::ONE,
            high: Decimal::ONE,
            low: Decimal::ONE,
            close: Decimal::ONE,
            prev_close: Decimal::ZERO,
            price_diff: Decimal::ZERO,
            bid_ask: Default::default(),
            spread_diff: Decimal::ZERO,
            greeks: Default::default(),
            delta_diff: Decimal::ZERO,
            theta_diff: Decimal::ZERO,
            gamma_diff: Decimal::ZERO,
            vega_diff: Decimal::ZERO,
            rho_diff: Decimal::ZERO,
            atp: Decimal::ZERO,
            atp_diff: Decimal::ZERO,
            vtt: 0,
            volume_1m: 0,
            oi: 0,
            oi_diff: 0,
            iv: Decimal::ZERO,
            iv_diff: Decimal::ZERO,
            tbq: 0,
            tbq_diff: 0,
            tsq: 0,
            tsq_diff: 0,
        }
    }

    #[tokio::test]
    async fn test_memory_sink_stores_in_order() {
        let sink = MemorySink::new();
        sink.store(&candle("A")).await.unwrap();
        sink.store_batch(&[candle("B"), candle("C")]).await.unwrap();

        let stored = sink.stored();
        let keys: Vec<&str> = stored.iter().map(|c| c.instrument_key.as_str()).collect();
        assert_eq!(keys, vec!["A", "B", "C"]);
    }
}
