//! Minute-bucket candle aggregation engine
//!
//! Single-writer-per-instrument state machine: each engine instance owns its
//! bucket maps outright, so one driving task per instance needs no
//! cross-task synchronization. Engines are cheap; subscribers that want
//! their own candle stream get their own instance over their own log cursor.

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;

use super::types::{BidAskSnapshot, Candle, WallInfo};
use crate::tick::{DepthLevel, Tick};

/// Candle aggregation settings
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Bucket width in milliseconds
    pub bucket_ms: i64,
    /// Strict lower bound for wall detection: a level qualifies when its
    /// quantity is greater than this (a quantity equal to the threshold does
    /// not qualify)
    pub wall_threshold: i64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            bucket_ms: 60_000,
            wall_threshold: 2000,
        }
    }
}

/// Real-time tick-to-candle aggregator
///
/// Buckets are created lazily on the first tick of a minute and consumed
/// when the next minute's first tick arrives or on flush. Late ticks for a
/// minute whose bucket was already finalized are dropped as stale; this is
/// best-effort streaming aggregation, not authoritative history.
pub struct CandleAggregator {
    config: AggregatorConfig,
    /// instrument_key -> floored minute -> ticks in arrival order
    buckets: HashMap<String, HashMap<i64, Vec<Tick>>>,
    /// instrument_key -> currently tracked minute
    current_minute: HashMap<String, i64>,
}

impl CandleAggregator {
    /// Create an aggregator with the given settings
    pub fn new(config: AggregatorConfig) -> Self {
        Self {
            config,
            buckets: HashMap::new(),
            current_minute: HashMap::new(),
        }
    }

    /// Create an aggregator with default settings
    pub fn with_defaults() -> Self {
        Self::new(AggregatorConfig::default())
    }

    /// Floor a timestamp to the start of its bucket
    pub fn floor_bucket(&self, ts_ms: i64) -> i64 {
        (ts_ms / self.config.bucket_ms) * self.config.bucket_ms
    }

    /// Observe one tick; returns the finalized candle when this tick is the
    /// first of a new minute for its instrument
    ///
    /// At most one candle is produced per call: the bucket whose boundary
    /// was just crossed.
    pub fn observe(&mut self, tick: Tick) -> Option<Candle> {
        let minute = self.floor_bucket(tick.ltt);
        let key = tick.instrument_key.clone();

        let mut completed = None;
        match self.current_minute.get(&key).copied() {
            Some(current) if minute > current => {
                // Boundary crossed: finalize the previous bucket.
                if let Some(ticks) = self
                    .buckets
                    .get_mut(&key)
                    .and_then(|buckets| buckets.remove(&current))
                {
                    if !ticks.is_empty() {
                        completed = Some(self.build_candle(&key, current, &ticks));
                    }
                }
                self.push_tick(&key, minute, tick);
                self.current_minute.insert(key, minute);
            }
            Some(current) if minute == current => {
                self.push_tick(&key, minute, tick);
            }
            Some(current) => {
                // Tick for an older minute. Accumulate if that bucket is
                // still open, otherwise drop it as stale.
                if let Some(bucket) =
                    self.buckets.get_mut(&key).and_then(|b| b.get_mut(&minute))
                {
                    bucket.push(tick);
                } else {
                    metrics::counter!("tickflow_stale_ticks_dropped_total").increment(1);
                    tracing::debug!(
                        instrument = %key,
                        tick_minute = minute,
                        current_minute = current,
                        "dropping stale tick for finalized minute"
                    );
                }
            }
            None => {
                self.push_tick(&key, minute, tick);
                self.current_minute.insert(key, minute);
            }
        }

        completed
    }

    /// Force-finalize the currently open bucket for one instrument
    ///
    /// Used on graceful shutdown or subscriber disconnect so the in-flight
    /// minute is not silently lost.
    pub fn flush(&mut self, instrument_key: &str) -> Option<Candle> {
        let buckets = self.buckets.get_mut(instrument_key)?;
        let latest = buckets.keys().max().copied()?;
        let ticks = buckets.remove(&latest)?;
        buckets.clear();
        if ticks.is_empty() {
            return None;
        }
        Some(self.build_candle(instrument_key, latest, &ticks))
    }

    /// Flush every tracked instrument, in unspecified order
    pub fn flush_all(&mut self) -> Vec<Candle> {
        let keys: Vec<String> = self.buckets.keys().cloned().collect();
        keys.iter().filter_map(|key| self.flush(key)).collect()
    }

    /// Number of instruments with an open bucket
    pub fn open_instruments(&self) -> usize {
        self.buckets.values().filter(|b| !b.is_empty()).count()
    }

    fn push_tick(&mut self, key: &str, minute: i64, tick: Tick) {
        self.buckets
            .entry(key.to_string())
            .or_default()
            .entry(minute)
            .or_default()
            .push(tick);
    }

    fn build_candle(&self, instrument_key: &str, minute_ts: i64, ticks: &[Tick]) -> Candle {
        debug_assert!(!ticks.is_empty());
        let first = &ticks[0];
        let last = &ticks[ticks.len() - 1];

        let open = first.ltp;
        let close = last.ltp;
        let high = ticks.iter().map(|t| t.ltp).max().unwrap_or(open);
        let low = ticks.iter().map(|t| t.ltp).min().unwrap_or(open);

        let bid_ask = depth_snapshot(&last.depth, self.config.wall_threshold);
        let open_spread = if first.depth.is_empty() {
            Decimal::ZERO
        } else {
            depth_snapshot(&first.depth, self.config.wall_threshold).spread
        };

        Candle {
            instrument_key: instrument_key.to_string(),
            timestamp: minute_timestamp(minute_ts),

            open,
            high,
            low,
            close,
            prev_close: last.cp,
            price_diff: (close - open).round_dp(2),

            spread_diff: (bid_ask.spread - open_spread).round_dp(2),
            bid_ask,

            greeks: last.greeks,
            delta_diff: (last.greeks.delta - first.greeks.delta).round_dp(4),
            theta_diff: (last.greeks.theta - first.greeks.theta).round_dp(4),
            gamma_diff: (last.greeks.gamma - first.greeks.gamma).round_dp(6),
            vega_diff: (last.greeks.vega - first.greeks.vega).round_dp(4),
            rho_diff: (last.greeks.rho - first.greeks.rho).round_dp(4),

            atp: last.atp,
            atp_diff: (last.atp - first.atp).round_dp(2),

            vtt: last.vtt,
            volume_1m: last.vtt - first.vtt,

            oi: last.oi,
            oi_diff: last.oi - first.oi,

            iv: last.iv,
            iv_diff: (last.iv - first.iv).round_dp(6),

            tbq: last.tbq,
            tbq_diff: last.tbq - first.tbq,
            tsq: last.tsq,
            tsq_diff: last.tsq - first.tsq,
        }
    }
}

/// Convert a floored bucket timestamp (epoch ms) to a UTC datetime
fn minute_timestamp(minute_ts: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(minute_ts)
        .single()
        .unwrap_or_default()
}

/// Build the order-book summary for a tick's depth levels
///
/// The first level is the top of book. Walls are levels whose quantity is
/// strictly greater than `threshold`; all qualifying levels are reported.
fn depth_snapshot(depth: &[DepthLevel], threshold: i64) -> BidAskSnapshot {
    let Some(best) = depth.first() else {
        return BidAskSnapshot::default();
    };

    let (bid_walls, ask_walls) = extract_walls(depth, threshold);

    BidAskSnapshot {
        bid_walls,
        ask_walls,
        best_bid_price: best.bid_price,
        best_bid_qty: best.bid_qty,
        best_ask_price: best.ask_price,
        best_ask_qty: best.ask_qty,
        spread: (best.ask_price - best.bid_price).round_dp(2),
        total_bid_qty: depth.iter().map(|l| l.bid_qty).sum(),
        total_ask_qty: depth.iter().map(|l| l.ask_qty).sum(),
    }
}

fn extract_walls(depth: &[DepthLevel], threshold: i64) -> (Vec<WallInfo>, Vec<WallInfo>) {
    let mut bid_walls = Vec::new();
    let mut ask_walls = Vec::new();
    for level in depth {
        if level.bid_qty > threshold {
            bid_walls.push(WallInfo {
                price: level.bid_price,
                qty: level.bid_qty,
            });
        }
        if level.ask_qty > threshold {
            ask_walls.push(WallInfo {
                price: level.ask_price,
                qty: level.ask_qty,
            });
        }
    }
    (bid_walls, ask_walls)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tick::Greeks;
    use rust_decimal_macros::dec;

    fn tick(key: &str, ltt: i64, ltp: Decimal, vtt: i64) -> Tick {
        Tick {
            instrument_key: key.to_string(),
            ltp,
            ltt,
            vtt,
            atp: ltp,
            ..Tick::default()
        }
    }

    fn level(bid_qty: i64, bid_price: Decimal, ask_qty: i64, ask_price: Decimal) -> DepthLevel {
        DepthLevel {
            bid_qty,
            bid_price,
            ask_qty,
            ask_price,
        }
    }

    const M0: i64 = 1_700_000_040_000; // minute-aligned
    const M1: i64 = M0 + 60_000;
    const M2: i64 = M0 + 120_000;

    #[test]
    fn test_candle_emitted_on_minute_boundary() {
        let mut agg = CandleAggregator::with_defaults();
        assert!(agg.observe(tick("A", M0 + 1_000, dec!(100), 500)).is_none());
        assert!(agg.observe(tick("A", M0 + 30_000, dec!(105), 600)).is_none());

        let candle = agg.observe(tick("A", M1 + 500, dec!(103), 700)).unwrap();
        assert_eq!(candle.open, dec!(100));
        assert_eq!(candle.close, dec!(105));
        assert_eq!(candle.high, dec!(105));
        assert_eq!(candle.low, dec!(100));
        assert_eq!(candle.price_diff, dec!(5.00));
        assert_eq!(candle.volume_1m, 100);
        assert_eq!(candle.timestamp.timestamp_millis(), M0);
    }

    #[test]
    fn test_one_candle_per_distinct_minute() {
        let mut agg = CandleAggregator::with_defaults();
        let mut emitted = 0;
        for (i, &minute) in [M0, M1, M2].iter().enumerate() {
            for j in 0..3i64 {
                let t = tick("A", minute + j * 1_000, dec!(100) + Decimal::from(i), 100);
                if agg.observe(t).is_some() {
                    emitted += 1;
                }
            }
        }
        // Three distinct minutes, final bucket still open.
        assert_eq!(emitted, 2);
        assert_eq!(agg.flush_all().len(), 1);
    }

    #[test]
    fn test_single_tick_bucket_is_a_valid_candle() {
        let mut agg = CandleAggregator::with_defaults();
        agg.observe(tick("A", M0, dec!(101.5), 42));
        let candle = agg.observe(tick("A", M1, dec!(102), 42)).unwrap();
        assert_eq!(candle.open, candle.close);
        assert_eq!(candle.high, candle.low);
        assert_eq!(candle.price_diff, dec!(0.00));
        assert_eq!(candle.volume_1m, 0);
        assert_eq!(candle.delta_diff, dec!(0.0000));
    }

    #[test]
    fn test_stale_tick_for_finalized_minute_is_dropped() {
        let mut agg = CandleAggregator::with_defaults();
        agg.observe(tick("A", M0, dec!(100), 1));
        agg.observe(tick("A", M1, dec!(101), 2)).unwrap();

        // M0's bucket is gone; this tick must not resurrect it.
        assert!(agg.observe(tick("A", M0 + 5_000, dec!(99), 3)).is_none());
        let candle = agg.observe(tick("A", M2, dec!(102), 4)).unwrap();
        assert_eq!(candle.timestamp.timestamp_millis(), M1);
        assert_eq!(candle.open, dec!(101));
    }

    #[test]
    fn test_instruments_bucket_independently() {
        let mut agg = CandleAggregator::with_defaults();
        agg.observe(tick("A", M0, dec!(100), 1));
        agg.observe(tick("B", M0, dec!(200), 1));

        // A crosses the boundary; B stays in its first minute.
        let candle = agg.observe(tick("A", M1, dec!(101), 2)).unwrap();
        assert_eq!(candle.instrument_key, "A");
        assert!(agg.observe(tick("B", M0 + 10_000, dec!(201), 2)).is_none());
    }

    #[test]
    fn test_flush_all_returns_one_candle_per_instrument() {
        let mut agg = CandleAggregator::with_defaults();
        agg.observe(tick("A", M0, dec!(100), 1));
        agg.observe(tick("B", M0, dec!(200), 1));

        let mut candles = agg.flush_all();
        candles.sort_by(|a, b| a.instrument_key.cmp(&b.instrument_key));
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].instrument_key, "A");
        assert_eq!(candles[1].instrument_key, "B");

        // Buckets are empty afterwards.
        assert_eq!(agg.open_instruments(), 0);
        assert!(agg.flush("A").is_none());
        assert!(agg.flush_all().is_empty());
    }

    #[test]
    fn test_flush_unknown_instrument_is_none() {
        let mut agg = CandleAggregator::with_defaults();
        assert!(agg.flush("NOPE").is_none());
    }

    #[test]
    fn test_wall_threshold_is_strict() {
        let mut agg = CandleAggregator::with_defaults();
        let mut t = tick("A", M0, dec!(100), 1);
        t.depth = vec![
            level(2500, dec!(99.5), 2000, dec!(100.5)),
            level(2000, dec!(99.0), 1999, dec!(101.0)),
        ];
        agg.observe(t);
        let candle = agg.flush("A").unwrap();

        // Exactly one bid wall; 2000 on the ask side does not qualify.
        assert_eq!(candle.bid_ask.bid_walls.len(), 1);
        assert_eq!(candle.bid_ask.bid_walls[0].price, dec!(99.5));
        assert_eq!(candle.bid_ask.bid_walls[0].qty, 2500);
        assert!(candle.bid_ask.ask_walls.is_empty());
    }

    #[test]
    fn test_depth_snapshot_from_last_tick_and_spread_diff() {
        let mut agg = CandleAggregator::with_defaults();
        let mut first = tick("A", M0, dec!(100), 1);
        first.depth = vec![level(100, dec!(99.0), 100, dec!(100.0))]; // spread 1.00
        let mut last = tick("A", M0 + 10_000, dec!(101), 2);
        last.depth = vec![level(200, dec!(100.5), 300, dec!(102.0))]; // spread 1.50
        agg.observe(first);
        agg.observe(last);

        let candle = agg.flush("A").unwrap();
        assert_eq!(candle.bid_ask.best_bid_price, dec!(100.5));
        assert_eq!(candle.bid_ask.best_ask_qty, 300);
        assert_eq!(candle.bid_ask.spread, dec!(1.50));
        assert_eq!(candle.spread_diff, dec!(0.50));
        assert_eq!(candle.bid_ask.total_bid_qty, 200);
    }

    #[test]
    fn test_spread_diff_zero_when_first_tick_has_no_depth() {
        let mut agg = CandleAggregator::with_defaults();
        let first = tick("A", M0, dec!(100), 1); // no depth
        let mut last = tick("A", M0 + 10_000, dec!(101), 2);
        last.depth = vec![level(10, dec!(100.0), 10, dec!(101.2))];
        agg.observe(first);
        agg.observe(last);

        let candle = agg.flush("A").unwrap();
        assert_eq!(candle.spread_diff, candle.bid_ask.spread);
    }

    #[test]
    fn test_greek_diff_rounding() {
        let mut agg = CandleAggregator::with_defaults();
        let mut first = tick("A", M0, dec!(100), 1);
        first.greeks = Greeks {
            delta: dec!(0.50001),
            gamma: dec!(0.0012345),
            ..Greeks::default()
        };
        first.iv = dec!(0.1811111);
        let mut last = tick("A", M0 + 1_000, dec!(100), 1);
        last.greeks = Greeks {
            delta: dec!(0.52543),
            gamma: dec!(0.0012388),
            ..Greeks::default()
        };
        last.iv = dec!(0.1899999);
        agg.observe(first);
        agg.observe(last);

        let candle = agg.flush("A").unwrap();
        assert_eq!(candle.delta_diff, dec!(0.0254));
        assert_eq!(candle.gamma_diff, dec!(0.000004));
        assert_eq!(candle.iv_diff, dec!(0.008889));
    }

    #[test]
    fn test_replay_is_deterministic() {
        let ticks: Vec<Tick> = (0..10i64)
            .map(|i| tick("A", M0 + i * 13_000, dec!(100) + Decimal::from(i), 100 + i))
            .collect();

        let run = |ticks: &[Tick]| {
            let mut agg = CandleAggregator::with_defaults();
            let mut out: Vec<Candle> =
                ticks.iter().cloned().filter_map(|t| agg.observe(t)).collect();
            out.extend(agg.flush_all());
            out
        };

        assert_eq!(run(&ticks), run(&ticks));
    }
}
