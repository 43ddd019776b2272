//! Run command implementation
//!
//! Wires the full pipeline: feed worker appending to the broadcast log, a
//! candle consumer and a VWAP consumer reading their own cursors, and a
//! supervisor that reconnects the feed with exponential backoff. After every
//! successful connect the supervisor re-issues the tracked subscription set
//! and reconciles it against the configured instruments; on the first
//! connect the tracked set is empty, so this collapses to the initial
//! subscribe.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use tokio::sync::mpsc;

use crate::candle::{AggregatorConfig, CandleAggregator};
use crate::config::{Config, FeedConfig};
use crate::feed::{FeedState, FeedWorker};
use crate::log::{BroadcastLog, ReadFrom};
use crate::sink::{CandleSink, LogSink};
use crate::stream::{
    run_candle_stream, run_vwap_stream, StreamEvent, StreamFilter, StreamSettings,
};
use crate::vwap::VwapEngine;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Log every subscriber event at debug level
    #[arg(short, long)]
    pub verbose: bool,
}

impl RunArgs {
    pub async fn execute(&self, config: Config) -> anyhow::Result<()> {
        let log = BroadcastLog::new(config.log.retention);
        let worker = Arc::new(FeedWorker::new(log.clone(), config.feed.clone()));

        let settings = StreamSettings::from(&config.stream);
        let store: Arc<dyn CandleSink> = Arc::new(LogSink);
        let aggregator = CandleAggregator::new(AggregatorConfig::from(&config.aggregation));

        let (candle_tx, candle_rx) = mpsc::channel(config.stream.event_buffer);
        let candle_task = tokio::spawn(run_candle_stream(
            log.reader(ReadFrom::Latest),
            StreamFilter::all(),
            aggregator,
            store,
            candle_tx,
            settings.clone(),
        ));

        let (vwap_tx, vwap_rx) = mpsc::channel(config.stream.event_buffer);
        let vwap_task = tokio::spawn(run_vwap_stream(
            log.reader(ReadFrom::Latest),
            StreamFilter::all(),
            VwapEngine::new(),
            vwap_tx,
            settings,
        ));

        let drain = tokio::spawn(drain_events(candle_rx, vwap_rx, self.verbose));
        let supervisor = tokio::spawn(supervise_feed(Arc::clone(&worker), config.feed.clone()));

        tokio::signal::ctrl_c().await?;
        tracing::info!("shutdown requested");

        supervisor.abort();
        worker.disconnect().await;

        // Dropping the receivers closes the subscriber sinks; the candle
        // loop flushes its open buckets on the way out.
        drain.abort();
        let _ = candle_task.await;
        let _ = vwap_task.await;

        tracing::info!("pipeline stopped");
        Ok(())
    }
}

/// Keep the feed connected, re-subscribing after every reconnect
async fn supervise_feed(worker: Arc<FeedWorker>, feed: FeedConfig) {
    let desired: HashSet<String> = feed.desired_instruments();
    let initial_delay = Duration::from_millis(feed.reconnect_initial_delay_ms);
    let max_delay = Duration::from_millis(feed.reconnect_max_delay_ms);
    let mut delay = initial_delay;
    let mut attempts = 0u32;

    loop {
        match worker.connect().await {
            Ok(()) => {
                attempts = 0;
                delay = initial_delay;

                if let Err(e) = worker.resubscribe(feed.mode).await {
                    tracing::warn!(error = %e, "re-subscription failed");
                }
                match worker.reconcile(&desired, feed.mode).await {
                    Ok(report) => tracing::info!(
                        subscribed = report.subscribed,
                        unsubscribed = report.unsubscribed,
                        "subscriptions reconciled"
                    ),
                    Err(e) => tracing::warn!(error = %e, "subscription reconcile failed"),
                }

                while worker.state().await == FeedState::Streaming {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
                tracing::warn!("feed connection lost");
            }
            Err(e) => {
                attempts += 1;
                if feed.max_reconnect_attempts != 0 && attempts >= feed.max_reconnect_attempts {
                    tracing::error!(error = %e, attempts, "feed connect failed; giving up");
                    return;
                }
                tracing::warn!(
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "feed connect failed; retrying"
                );
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(max_delay);
            }
        }
    }
}

/// Drain subscriber events in the default run mode
///
/// Completed candles already reach the log via [`LogSink`]; this keeps the
/// channels moving and surfaces VWAP progress.
async fn drain_events(
    mut candles: mpsc::Receiver<StreamEvent>,
    mut vwaps: mpsc::Receiver<StreamEvent>,
    verbose: bool,
) {
    loop {
        let event = tokio::select! {
            Some(event) = candles.recv() => event,
            Some(event) = vwaps.recv() => event,
            else => return,
        };
        match event {
            StreamEvent::Vwap(update) => {
                if verbose {
                    tracing::debug!(
                        instrument = %update.instrument_key,
                        vwap = %update.vwap,
                        volume = update.volume,
                        "vwap update"
                    );
                }
            }
            StreamEvent::Error { message } => tracing::warn!(%message, "stream error"),
            StreamEvent::Keepalive => {}
            // Candle events are already recorded by the sink.
            _ => {}
        }
    }
}
