//! End-to-end pipeline tests: log fan-out, candle stream, VWAP stream

use std::sync::Arc;
use std::time::Duration;

use rust_decimal_macros::dec;
use tokio::sync::mpsc;

use tickflow::candle::{AggregatorConfig, CandleAggregator};
use tickflow::log::{BroadcastLog, ReadFrom};
use tickflow::sink::{CandleSink, MemorySink};
use tickflow::stream::{
    run_candle_stream, run_tick_stream, run_vwap_stream, StreamEvent, StreamFilter, StreamSettings,
};
use tickflow::vwap::VwapEngine;

const MINUTE_MS: i64 = 60_000;
const M0: i64 = 1_700_000_040_000;

fn frame(key: &str, ltp: &str, ltt: i64, vtt: i64) -> String {
    format!(
        r#"{{"type":"live_feed","feeds":{{"{key}":{{"fullFeed":{{"marketFF":{{"ltpc":{{"ltp":{ltp},"ltt":"{ltt}","ltq":"10","cp":100.0}},"atp":{ltp},"vtt":"{vtt}"}}}}}}}},"currentTs":"{ltt}"}}"#
    )
}

fn settings() -> StreamSettings {
    StreamSettings {
        read_count: 100,
        read_wait: Duration::from_millis(50),
    }
}

#[tokio::test]
async fn test_log_fan_out_is_independent() {
    let log = BroadcastLog::new(16);
    log.append(frame("NSE_FO|1", "101.0", M0, 100));
    log.append(frame("NSE_FO|1", "102.0", M0 + 1000, 150));

    let mut slow = log.reader(ReadFrom::Seq(0));
    let mut fast = log.reader(ReadFrom::Seq(0));

    let all = fast.read(10, Duration::from_millis(10)).await;
    assert_eq!(all.entries.len(), 2);

    // The slow reader still sees everything from its own cursor.
    let first = slow.read(1, Duration::from_millis(10)).await;
    assert_eq!(first.entries.len(), 1);
    assert_eq!(first.entries[0].seq, 0);
    let second = slow.read(1, Duration::from_millis(10)).await;
    assert_eq!(second.entries[0].seq, 1);
}

#[tokio::test]
async fn test_candle_stream_emits_on_minute_rollover() {
    let log = BroadcastLog::new(64);
    let store = Arc::new(MemorySink::new());
    let (tx, mut rx) = mpsc::channel(16);

    let task = tokio::spawn(run_candle_stream(
        log.reader(ReadFrom::Seq(0)),
        StreamFilter::all(),
        CandleAggregator::new(AggregatorConfig::default()),
        Arc::clone(&store) as Arc<dyn CandleSink>,
        tx,
        settings(),
    ));

    log.append(frame("NSE_FO|1", "101.0", M0, 100));
    log.append(frame("NSE_FO|1", "103.5", M0 + 30_000, 160));
    // Next minute finalizes the first.
    log.append(frame("NSE_FO|1", "104.0", M0 + MINUTE_MS, 200));

    let event = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match rx.recv().await {
                Some(StreamEvent::Candle(candle)) => break candle,
                Some(_) => continue,
                None => panic!("stream ended without a candle"),
            }
        }
    })
    .await
    .expect("no candle within timeout");

    assert_eq!(event.instrument_key, "NSE_FO|1");
    assert_eq!(event.open, dec!(101.0));
    assert_eq!(event.close, dec!(103.5));
    assert_eq!(event.volume_1m, 60);

    // Closing the subscriber flushes the open bucket to the store.
    drop(rx);
    task.await.unwrap();
    let stored = store.stored();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[1].close, dec!(104.0));
}

#[tokio::test]
async fn test_candle_stream_respects_instrument_filter() {
    let log = BroadcastLog::new(64);
    let store = Arc::new(MemorySink::new());
    let (tx, rx) = mpsc::channel(16);

    let task = tokio::spawn(run_candle_stream(
        log.reader(ReadFrom::Seq(0)),
        StreamFilter::allow(["NSE_FO|1"]),
        CandleAggregator::new(AggregatorConfig::default()),
        Arc::clone(&store) as Arc<dyn CandleSink>,
        tx,
        settings(),
    ));

    log.append(frame("NSE_FO|1", "101.0", M0, 100));
    log.append(frame("NSE_FO|2", "55.0", M0, 100));
    tokio::time::sleep(Duration::from_millis(200)).await;

    drop(rx);
    task.await.unwrap();

    let stored = store.stored();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].instrument_key, "NSE_FO|1");
}

#[tokio::test]
async fn test_vwap_stream_reports_every_tick() {
    let log = BroadcastLog::new(64);
    let (tx, mut rx) = mpsc::channel(16);

    let task = tokio::spawn(run_vwap_stream(
        log.reader(ReadFrom::Seq(0)),
        StreamFilter::all(),
        VwapEngine::new(),
        tx,
        settings(),
    ));

    log.append(frame("NSE_FO|1", "100.0", M0, 100));
    log.append(frame("NSE_FO|1", "105.0", M0 + 1000, 150));

    let mut updates = Vec::new();
    while updates.len() < 2 {
        match tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("no vwap update within timeout")
        {
            Some(StreamEvent::Vwap(update)) => updates.push(update),
            Some(_) => continue,
            None => panic!("stream ended early"),
        }
    }

    // Seed reports the average traded price; the next tick blends in the
    // 50-lot trade at 105.
    assert_eq!(updates[0].vwap, dec!(100.0));
    assert_eq!(updates[0].volume, 100);
    assert_eq!(updates[1].vwap, dec!(101.67));
    assert_eq!(updates[1].volume, 150);

    drop(rx);
    task.await.unwrap();
}

#[tokio::test]
async fn test_tick_stream_forwards_decoded_ticks() {
    let log = BroadcastLog::new(64);
    let (tx, mut rx) = mpsc::channel(16);

    let task = tokio::spawn(run_tick_stream(
        log.reader(ReadFrom::Seq(0)),
        StreamFilter::allow(["NSE_FO|2"]),
        tx,
        settings(),
    ));

    log.append(frame("NSE_FO|1", "100.0", M0, 100));
    log.append(frame("NSE_FO|2", "55.5", M0, 80));

    let event = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match rx.recv().await {
                Some(StreamEvent::Tick(tick)) => break tick,
                Some(_) => continue,
                None => panic!("stream ended without a tick"),
            }
        }
    })
    .await
    .expect("no tick within timeout");

    assert_eq!(event.instrument_key, "NSE_FO|2");
    assert_eq!(event.ltp, dec!(55.5));
    assert_eq!(event.vtt, 80);

    drop(rx);
    task.await.unwrap();
}

#[tokio::test]
async fn test_idle_stream_sends_keepalives() {
    let log = BroadcastLog::new(16);
    let (tx, mut rx) = mpsc::channel(16);

    let task = tokio::spawn(run_vwap_stream(
        log.reader(ReadFrom::Latest),
        StreamFilter::all(),
        VwapEngine::new(),
        tx,
        settings(),
    ));

    let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("no keepalive")
        .expect("stream ended");
    assert_eq!(event, StreamEvent::Keepalive);

    drop(rx);
    task.await.unwrap();
}
