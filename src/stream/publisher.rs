//! Per-subscriber consumer loops
//!
//! Each loop polls its own log cursor with a bounded wait, decodes
//! envelopes, drives its engine, and pushes events into the subscriber's
//! sink. The sink closing is the cancellation signal: the loop stops reading
//! and, for candle subscribers, flushes open buckets before exiting so the
//! in-flight minute is not silently lost.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use super::{StreamEvent, StreamFilter};
use crate::candle::CandleAggregator;
use crate::log::{Envelope, LogReader};
use crate::sink::CandleSink;
use crate::tick::{decode_frame, Tick, WireFrame};
use crate::vwap::VwapEngine;

/// Consumer loop tuning
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Max envelopes per read call
    pub read_count: usize,
    /// Bounded wait before an empty read becomes a keep-alive
    pub read_wait: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            read_count: 100,
            read_wait: Duration::from_secs(1),
        }
    }
}

/// Drive a candle aggregator for one subscriber
///
/// Emits a `candle` event per completed minute and stores it in the candle
/// sink. When the subscriber goes away, open buckets are flushed to the
/// sink (and best-effort to the subscriber) before the loop returns.
pub async fn run_candle_stream(
    mut reader: LogReader,
    filter: StreamFilter,
    mut aggregator: CandleAggregator,
    store: Arc<dyn CandleSink>,
    sink: mpsc::Sender<StreamEvent>,
    settings: StreamSettings,
) {
    loop {
        let batch = tokio::select! {
            _ = sink.closed() => break,
            batch = reader.read(settings.read_count, settings.read_wait) => batch,
        };
        if batch.skipped > 0 {
            tracing::warn!(skipped = batch.skipped, "candle stream lost log entries");
        }
        if batch.is_empty() {
            if sink.send(StreamEvent::Keepalive).await.is_err() {
                break;
            }
            continue;
        }

        for envelope in &batch.entries {
            for tick in envelope_ticks(envelope) {
                if !filter.matches(&tick.instrument_key) {
                    continue;
                }
                let Some(candle) = aggregator.observe(tick) else {
                    continue;
                };
                metrics::counter!("tickflow_candles_emitted_total").increment(1);

                if let Err(e) = store.store(&candle).await {
                    tracing::warn!(error = %e, instrument = %candle.instrument_key, "candle store failed");
                    let _ = sink
                        .send(StreamEvent::Error {
                            message: format!("candle store failed: {e}"),
                        })
                        .await;
                }
                if sink.send(StreamEvent::Candle(candle)).await.is_err() {
                    flush_open_buckets(&mut aggregator, store.as_ref(), &sink).await;
                    return;
                }
            }
        }
    }

    flush_open_buckets(&mut aggregator, store.as_ref(), &sink).await;
}

/// Drive a VWAP engine for one subscriber
///
/// Unlike the candle loop, every matching tick produces an event.
pub async fn run_vwap_stream(
    mut reader: LogReader,
    filter: StreamFilter,
    mut engine: VwapEngine,
    sink: mpsc::Sender<StreamEvent>,
    settings: StreamSettings,
) {
    loop {
        let batch = tokio::select! {
            _ = sink.closed() => return,
            batch = reader.read(settings.read_count, settings.read_wait) => batch,
        };
        if batch.skipped > 0 {
            tracing::warn!(skipped = batch.skipped, "vwap stream lost log entries");
        }
        if batch.is_empty() {
            if sink.send(StreamEvent::Keepalive).await.is_err() {
                return;
            }
            continue;
        }

        for envelope in &batch.entries {
            for tick in envelope_ticks(envelope) {
                if !filter.matches(&tick.instrument_key) {
                    continue;
                }
                let update = engine.observe(&tick);
                metrics::counter!("tickflow_vwap_updates_total").increment(1);
                if sink.send(StreamEvent::Vwap(update)).await.is_err() {
                    return;
                }
            }
        }
    }
}

/// Forward raw decoded ticks for one subscriber
pub async fn run_tick_stream(
    mut reader: LogReader,
    filter: StreamFilter,
    sink: mpsc::Sender<StreamEvent>,
    settings: StreamSettings,
) {
    loop {
        let batch = tokio::select! {
            _ = sink.closed() => return,
            batch = reader.read(settings.read_count, settings.read_wait) => batch,
        };
        if batch.is_empty() {
            if sink.send(StreamEvent::Keepalive).await.is_err() {
                return;
            }
            continue;
        }

        for envelope in &batch.entries {
            for tick in envelope_ticks(envelope) {
                if !filter.matches(&tick.instrument_key) {
                    continue;
                }
                if sink.send(StreamEvent::Tick(tick)).await.is_err() {
                    return;
                }
            }
        }
    }
}

/// Decode one envelope's ticks; malformed payloads are skipped
fn envelope_ticks(envelope: &Envelope) -> Vec<Tick> {
    match decode_frame(WireFrame::Text(&envelope.payload)) {
        Ok(decoded) => decoded.into_ticks(),
        Err(e) => {
            tracing::debug!(seq = envelope.seq, error = %e, "skipping undecodable envelope");
            Vec::new()
        }
    }
}

async fn flush_open_buckets(
    aggregator: &mut CandleAggregator,
    store: &dyn CandleSink,
    sink: &mpsc::Sender<StreamEvent>,
) {
    let candles = aggregator.flush_all();
    if candles.is_empty() {
        return;
    }
    tracing::info!(count = candles.len(), "flushing open candle buckets");
    if let Err(e) = store.store_batch(&candles).await {
        tracing::warn!(error = %e, "failed to store flushed candles");
    }
    for candle in candles {
        // Best effort: the subscriber is usually already gone.
        let _ = sink.try_send(StreamEvent::Candle(candle));
    }
}
