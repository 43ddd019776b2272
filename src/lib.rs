//! tickflow: market tick ingestion and streaming aggregation
//!
//! This library provides the core components for:
//! - Websocket feed ingestion with subscription management
//! - Two wire encodings (JSON and MessagePack) decoding to one tick shape
//! - A bounded in-process broadcast log with independent reader cursors
//! - Streaming 1-minute OHLC candle aggregation with book and Greek diffs
//! - Incremental session VWAP
//! - Per-subscriber fan-out streams
//! - Structured logging and Prometheus metrics

pub mod candle;
pub mod cli;
pub mod config;
pub mod feed;
pub mod log;
pub mod sink;
pub mod stream;
pub mod telemetry;
pub mod tick;
pub mod vwap;
