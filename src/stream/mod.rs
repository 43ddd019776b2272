//! Fan-out publishing
//!
//! Adapts engine output into per-subscriber push streams. Every subscriber
//! owns its sink (an mpsc receiver); the consumer loop driving it owns its
//! own log cursor and engine instance, so subscribers join and leave without
//! affecting ingestion or each other.

mod publisher;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

pub use publisher::{run_candle_stream, run_tick_stream, run_vwap_stream, StreamSettings};

use crate::candle::Candle;
use crate::tick::Tick;
use crate::vwap::VwapUpdate;

/// One push event on a subscriber stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    /// A completed 1-minute candle
    Candle(Candle),
    /// A raw decoded tick
    Tick(Tick),
    /// An incremental VWAP observation
    Vwap(VwapUpdate),
    /// No data arrived within the wait window; connection is alive
    Keepalive,
    /// Subscriber-facing failure; other subscribers are unaffected
    Error { message: String },
}

/// Optional per-subscriber instrument allow-list
///
/// Absence of a filter forwards everything.
#[derive(Debug, Clone, Default)]
pub struct StreamFilter {
    allow: Option<HashSet<String>>,
}

impl StreamFilter {
    /// Forward every instrument
    pub fn all() -> Self {
        Self { allow: None }
    }

    /// Forward only the given instrument keys
    pub fn allow<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allow: Some(keys.into_iter().map(Into::into).collect()),
        }
    }

    /// Whether an instrument passes the filter
    pub fn matches(&self, instrument_key: &str) -> bool {
        match &self.allow {
            None => true,
            Some(keys) => keys.contains(instrument_key),
        }
    }
}
