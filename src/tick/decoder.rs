//! Feed frame decoding
//!
//! One upstream message may carry updates for several instruments; the whole
//! message decodes into a single [`FeedEnvelope`]. Numeric fields arrive
//! either as JSON numbers or as strings ("vtt": "500"), so every integer
//! field goes through a tolerant deserializer. Absent fields default to
//! zero/empty.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use super::types::{DepthLevel, Greeks, Tick};

/// Decoding errors for a single feed frame
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Text frame was not valid JSON in the expected shape
    #[error("invalid JSON frame: {0}")]
    Json(#[from] serde_json::Error),
    /// Binary frame was not valid MessagePack in the expected shape
    #[error("invalid MessagePack frame: {0}")]
    MsgPack(#[from] rmp_serde::decode::Error),
}

/// A raw frame as received from the upstream socket
#[derive(Debug, Clone, Copy)]
pub enum WireFrame<'a> {
    /// Verbose textual encoding (JSON)
    Text(&'a str),
    /// Compact binary encoding (MessagePack)
    Binary(&'a [u8]),
}

/// Decode one raw frame into a [`FeedEnvelope`]
///
/// Pure function; callers decide what to do with a failure (the ingestion
/// worker logs and skips, it never aborts the stream).
pub fn decode_frame(frame: WireFrame<'_>) -> Result<FeedEnvelope, DecodeError> {
    match frame {
        WireFrame::Text(text) => Ok(serde_json::from_str(text)?),
        WireFrame::Binary(bytes) => Ok(rmp_serde::from_slice(bytes)?),
    }
}

/// One decoded upstream message
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedEnvelope {
    /// Upstream message type tag, e.g. "live_feed"
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub feed_type: Option<String>,
    /// Per-instrument payloads keyed by instrument key
    #[serde(default)]
    pub feeds: BTreeMap<String, InstrumentFeed>,
    /// Upstream send timestamp
    #[serde(default, rename = "currentTs", skip_serializing_if = "Option::is_none")]
    pub current_ts: Option<String>,
}

impl FeedEnvelope {
    /// True when the message carries no instrument payloads
    pub fn is_empty(&self) -> bool {
        self.feeds.is_empty()
    }

    /// Normalize every instrument payload into a [`Tick`]
    ///
    /// Entries without full market data (index-only or LTPC-mode payloads)
    /// are skipped.
    pub fn into_ticks(self) -> Vec<Tick> {
        self.feeds
            .into_iter()
            .filter_map(|(key, feed)| {
                let market = feed.full_feed?.market_ff?;
                Some(market.into_tick(key))
            })
            .collect()
    }
}

/// Per-instrument payload wrapper
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstrumentFeed {
    #[serde(default, rename = "fullFeed", skip_serializing_if = "Option::is_none")]
    pub full_feed: Option<FullFeed>,
}

/// Full-mode feed payload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FullFeed {
    #[serde(default, rename = "marketFF", skip_serializing_if = "Option::is_none")]
    pub market_ff: Option<MarketFull>,
}

/// Full market data for one instrument
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketFull {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ltpc: Option<Ltpc>,
    #[serde(default, rename = "marketLevel", skip_serializing_if = "Option::is_none")]
    pub market_level: Option<MarketLevel>,
    #[serde(default, rename = "optionGreeks", skip_serializing_if = "Option::is_none")]
    pub option_greeks: Option<WireGreeks>,
    #[serde(default)]
    pub atp: Decimal,
    #[serde(default, deserialize_with = "int_or_string")]
    pub vtt: i64,
    #[serde(default, deserialize_with = "int_or_string")]
    pub oi: i64,
    #[serde(default)]
    pub iv: Decimal,
    #[serde(default, deserialize_with = "int_or_string")]
    pub tbq: i64,
    #[serde(default, deserialize_with = "int_or_string")]
    pub tsq: i64,
}

impl MarketFull {
    fn into_tick(self, instrument_key: String) -> Tick {
        let ltpc = self.ltpc.unwrap_or_default();
        let depth = self
            .market_level
            .map(|level| {
                level
                    .bid_ask_quote
                    .into_iter()
                    .map(|q| DepthLevel {
                        bid_qty: q.bid_q,
                        bid_price: q.bid_p,
                        ask_qty: q.ask_q,
                        ask_price: q.ask_p,
                    })
                    .collect()
            })
            .unwrap_or_default();
        let greeks = self
            .option_greeks
            .map(|g| Greeks {
                delta: g.delta,
                theta: g.theta,
                gamma: g.gamma,
                vega: g.vega,
                rho: g.rho,
            })
            .unwrap_or_default();

        Tick {
            instrument_key,
            ltp: ltpc.ltp,
            ltt: ltpc.ltt,
            ltq: ltpc.ltq,
            cp: ltpc.cp,
            depth,
            greeks,
            atp: self.atp,
            vtt: self.vtt,
            oi: self.oi,
            iv: self.iv,
            tbq: self.tbq,
            tsq: self.tsq,
        }
    }
}

/// Last trade price/time/quantity and previous close
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ltpc {
    #[serde(default)]
    pub ltp: Decimal,
    #[serde(default, deserialize_with = "int_or_string")]
    pub ltt: i64,
    #[serde(default, deserialize_with = "int_or_string")]
    pub ltq: i64,
    #[serde(default)]
    pub cp: Decimal,
}

/// 30-depth order book container
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketLevel {
    #[serde(default, rename = "bidAskQuote")]
    pub bid_ask_quote: Vec<WireQuote>,
}

/// Single depth level on the wire
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WireQuote {
    #[serde(default, rename = "bidQ", deserialize_with = "int_or_string")]
    pub bid_q: i64,
    #[serde(default, rename = "bidP")]
    pub bid_p: Decimal,
    #[serde(default, rename = "askQ", deserialize_with = "int_or_string")]
    pub ask_q: i64,
    #[serde(default, rename = "askP")]
    pub ask_p: Decimal,
}

/// Greeks as sent on the wire
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WireGreeks {
    #[serde(default)]
    pub delta: Decimal,
    #[serde(default)]
    pub theta: Decimal,
    #[serde(default)]
    pub gamma: Decimal,
    #[serde(default)]
    pub vega: Decimal,
    #[serde(default)]
    pub rho: Decimal,
}

/// Accept an integer that may be encoded as a number or a string
fn int_or_string<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Float(f64),
        Str(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Int(n) => Ok(n),
        Raw::Float(f) => Ok(f as i64),
        Raw::Str(s) if s.trim().is_empty() => Ok(0),
        Raw::Str(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|e| serde::de::Error::custom(format!("invalid integer {s:?}: {e}"))),
    }
}
