//! Prometheus metric registration

/// Frames accepted from the feed socket
pub const FEED_MESSAGES: &str = "tickflow_feed_messages_total";
/// Instrument entries carried by accepted frames
pub const FEED_INSTRUMENTS: &str = "tickflow_feed_instruments_total";
/// Frames dropped because they failed validation or decoding
pub const DECODE_FAILURES: &str = "tickflow_decode_failures_total";
/// Log entries evicted by the retention window
pub const LOG_ENTRIES_EVICTED: &str = "tickflow_log_entries_evicted_total";
/// Ticks discarded because their minute was already finalized
pub const STALE_TICKS_DROPPED: &str = "tickflow_stale_ticks_dropped_total";
/// Completed candles pushed to subscribers
pub const CANDLES_EMITTED: &str = "tickflow_candles_emitted_total";
/// VWAP observations pushed to subscribers
pub const VWAP_UPDATES: &str = "tickflow_vwap_updates_total";
/// Seconds between an entry's append and a reader observing it
pub const LOG_READ_LATENCY: &str = "tickflow_log_read_latency_seconds";

/// Register help text for every counter the pipeline records
pub fn describe_metrics() {
    metrics::describe_counter!(FEED_MESSAGES, "Frames accepted from the feed socket");
    metrics::describe_counter!(
        FEED_INSTRUMENTS,
        "Instrument entries carried by accepted frames"
    );
    metrics::describe_counter!(DECODE_FAILURES, "Frames dropped as undecodable or invalid");
    metrics::describe_counter!(
        LOG_ENTRIES_EVICTED,
        "Log entries evicted by the retention window"
    );
    metrics::describe_counter!(
        STALE_TICKS_DROPPED,
        "Ticks discarded for already-finalized minutes"
    );
    metrics::describe_counter!(CANDLES_EMITTED, "Completed candles pushed to subscribers");
    metrics::describe_counter!(VWAP_UPDATES, "VWAP observations pushed to subscribers");
    metrics::describe_histogram!(
        LOG_READ_LATENCY,
        "Seconds between append and a reader observing the entry"
    );
}
