//! Per-instrument 1-minute candle aggregation
//!
//! Ticks are bucketed by the minute their `ltt` floors into; a bucket is
//! finalized into a [`Candle`] when the first tick of a later minute arrives
//! for that instrument, or on explicit flush.

mod aggregator;
mod types;

pub use aggregator::{AggregatorConfig, CandleAggregator};
pub use types::{BidAskSnapshot, Candle, WallInfo};
