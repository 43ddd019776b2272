//! Candle output types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::tick::Greeks;

/// An order-book level whose resting quantity exceeds the wall threshold
///
/// Walls act as visible support/resistance; every qualifying level is
/// reported, not just the best one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WallInfo {
    /// Price of the wall level
    pub price: Decimal,
    /// Quantity resting at the level (strictly above the threshold)
    pub qty: i64,
}

/// Order-book summary taken from the bucket's last tick
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BidAskSnapshot {
    /// Bid levels with quantity strictly above the wall threshold
    pub bid_walls: Vec<WallInfo>,
    /// Ask levels with quantity strictly above the wall threshold
    pub ask_walls: Vec<WallInfo>,
    /// Best (highest) bid price
    pub best_bid_price: Decimal,
    /// Quantity at the best bid
    pub best_bid_qty: i64,
    /// Best (lowest) ask price
    pub best_ask_price: Decimal,
    /// Quantity at the best ask
    pub best_ask_qty: i64,
    /// Best ask minus best bid, rounded to 2 decimals
    pub spread: Decimal,
    /// Sum of all bid quantities across the depth
    pub total_bid_qty: i64,
    /// Sum of all ask quantities across the depth
    pub total_ask_qty: i64,
}

/// Immutable 1-minute candle derived from exactly one minute bucket
///
/// Snapshot fields (bid/ask, Greeks, ATP, OI, IV, TBQ/TSQ) come from the
/// bucket's last tick; `*_diff` fields are last-minus-first, rounded to the
/// per-field presentation precision. `timestamp` is the floored minute the
/// candle closes, not the wall-clock emission time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub instrument_key: String,
    /// Minute-aligned close time (UTC)
    pub timestamp: DateTime<Utc>,

    // Price
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    /// Previous session close
    pub prev_close: Decimal,
    /// close - open, 2 decimals
    pub price_diff: Decimal,

    // Order book
    pub bid_ask: BidAskSnapshot,
    /// Last spread minus first-tick spread, 2 decimals (0 when the first
    /// tick carried no depth)
    pub spread_diff: Decimal,

    // Greeks
    pub greeks: Greeks,
    /// 4 decimals
    pub delta_diff: Decimal,
    /// 4 decimals
    pub theta_diff: Decimal,
    /// 6 decimals
    pub gamma_diff: Decimal,
    /// 4 decimals
    pub vega_diff: Decimal,
    /// 4 decimals
    pub rho_diff: Decimal,

    // ATP
    pub atp: Decimal,
    /// 2 decimals
    pub atp_diff: Decimal,

    // Volume
    /// Cumulative volume traded today at close
    pub vtt: i64,
    /// Volume traded within this minute (last.vtt - first.vtt)
    pub volume_1m: i64,

    // Open interest
    pub oi: i64,
    pub oi_diff: i64,

    // Implied volatility
    pub iv: Decimal,
    /// 6 decimals
    pub iv_diff: Decimal,

    // Aggregate book quantities
    pub tbq: i64,
    pub tbq_diff: i64,
    pub tsq: i64,
    pub tsq_diff: i64,
}
