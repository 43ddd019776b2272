//! Normalized tick types

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One bid/ask level from the 30-depth order book
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DepthLevel {
    /// Quantity resting at this bid level
    pub bid_qty: i64,
    /// Bid price at this level
    pub bid_price: Decimal,
    /// Quantity resting at this ask level
    pub ask_qty: i64,
    /// Ask price at this level
    pub ask_price: Decimal,
}

/// Option Greeks at a point in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Greeks {
    pub delta: Decimal,
    pub theta: Decimal,
    pub gamma: Decimal,
    pub vega: Decimal,
    pub rho: Decimal,
}

/// One normalized market-data update for an instrument
///
/// `ltt` (last traded time, epoch milliseconds) is the ordering key used for
/// minute bucketing, not the wall-clock receipt time. `vtt`, `oi`, `tbq` and
/// `tsq` are cumulative session counters; a same-or-lower value than
/// previously seen signals a session reset and is handled by the engines.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    /// Instrument identity, e.g. "NSE_FO|61755"
    pub instrument_key: String,
    /// Last traded price
    pub ltp: Decimal,
    /// Last traded time in epoch milliseconds
    pub ltt: i64,
    /// Last traded quantity
    pub ltq: i64,
    /// Previous session close price
    pub cp: Decimal,
    /// Up to 30 levels of order-book depth
    pub depth: Vec<DepthLevel>,
    /// Option Greeks
    pub greeks: Greeks,
    /// Broker-reported average traded price
    pub atp: Decimal,
    /// Volume traded today (cumulative)
    pub vtt: i64,
    /// Open interest
    pub oi: i64,
    /// Implied volatility
    pub iv: Decimal,
    /// Total bid quantity
    pub tbq: i64,
    /// Total sell quantity
    pub tsq: i64,
}
