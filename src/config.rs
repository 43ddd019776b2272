//! Configuration types for tickflow

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;

use crate::feed::SubscriptionMode;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub aggregation: AggregationConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Config = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.log.retention > 0, "log.retention must be at least 1");
        anyhow::ensure!(
            self.aggregation.bucket_ms > 0,
            "aggregation.bucket_ms must be positive"
        );
        anyhow::ensure!(
            self.stream.read_count > 0,
            "stream.read_count must be at least 1"
        );
        anyhow::ensure!(
            self.stream.event_buffer > 0,
            "stream.event_buffer must be at least 1"
        );
        anyhow::ensure!(
            self.feed.ping_interval_secs > 0,
            "feed.ping_interval_secs must be at least 1"
        );
        Ok(())
    }
}

/// Feed connection and subscription configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// Direct websocket endpoint; ignored when `authorize_url` is set
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Authorization endpoint that trades an access token for a socket URL
    #[serde(default)]
    pub authorize_url: Option<String>,
    /// Bearer token for the authorization endpoint
    #[serde(default)]
    pub access_token: Option<String>,
    /// Instrument keys to subscribe on startup
    #[serde(default)]
    pub instruments: Vec<String>,
    /// Session-critical keys that unsubscribe silently retains
    #[serde(default)]
    pub protected_instruments: Vec<String>,
    /// Subscription mode used for sub and re-sub control frames
    #[serde(default)]
    pub mode: SubscriptionMode,
    /// Ping frame interval
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    /// Delay before the first reconnect attempt
    #[serde(default = "default_reconnect_initial_delay_ms")]
    pub reconnect_initial_delay_ms: u64,
    /// Cap for exponential reconnect backoff
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
    /// Max consecutive reconnect attempts (0 = retry forever)
    #[serde(default)]
    pub max_reconnect_attempts: u32,
}

impl FeedConfig {
    /// Desired startup subscription set
    pub fn desired_instruments(&self) -> HashSet<String> {
        self.instruments.iter().cloned().collect()
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            authorize_url: None,
            access_token: None,
            instruments: Vec::new(),
            protected_instruments: Vec::new(),
            mode: SubscriptionMode::default(),
            ping_interval_secs: default_ping_interval_secs(),
            reconnect_initial_delay_ms: default_reconnect_initial_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
            max_reconnect_attempts: 0,
        }
    }
}

/// Broadcast log configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Max trailing entries retained before eviction
    #[serde(default = "default_retention")]
    pub retention: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            retention: default_retention(),
        }
    }
}

/// Candle aggregation configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AggregationConfig {
    /// Candle bucket width in milliseconds
    #[serde(default = "default_bucket_ms")]
    pub bucket_ms: i64,
    /// Strict threshold for order-book wall detection
    #[serde(default = "default_wall_threshold")]
    pub wall_threshold: i64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            bucket_ms: default_bucket_ms(),
            wall_threshold: default_wall_threshold(),
        }
    }
}

impl From<&AggregationConfig> for crate::candle::AggregatorConfig {
    fn from(config: &AggregationConfig) -> Self {
        Self {
            bucket_ms: config.bucket_ms,
            wall_threshold: config.wall_threshold,
        }
    }
}

/// Subscriber stream configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// Max envelopes per log read
    #[serde(default = "default_read_count")]
    pub read_count: usize,
    /// Bounded read wait before a keep-alive, in milliseconds
    #[serde(default = "default_read_wait_ms")]
    pub read_wait_ms: u64,
    /// Per-subscriber event channel capacity
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            read_count: default_read_count(),
            read_wait_ms: default_read_wait_ms(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl From<&StreamConfig> for crate::stream::StreamSettings {
    fn from(config: &StreamConfig) -> Self {
        Self {
            read_count: config.read_count,
            read_wait: std::time::Duration::from_millis(config.read_wait_ms),
        }
    }
}

/// Telemetry configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    /// Prometheus exporter port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    /// Default log level when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            metrics_port: default_metrics_port(),
            log_level: default_log_level(),
        }
    }
}

fn default_ping_interval_secs() -> u64 {
    30
}
fn default_reconnect_initial_delay_ms() -> u64 {
    1000
}
fn default_reconnect_max_delay_ms() -> u64 {
    60_000
}
fn default_retention() -> usize {
    10_000
}
fn default_bucket_ms() -> i64 {
    60_000
}
fn default_wall_threshold() -> i64 {
    2000
}
fn default_read_count() -> usize {
    100
}
fn default_read_wait_ms() -> u64 {
    1000
}
fn default_event_buffer() -> usize {
    1024
}
fn default_metrics_port() -> u16 {
    9090
}
fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.log.retention, 10_000);
        assert_eq!(config.aggregation.bucket_ms, 60_000);
        assert_eq!(config.aggregation.wall_threshold, 2000);
        assert_eq!(config.stream.read_wait_ms, 1000);
        assert_eq!(config.feed.mode, SubscriptionMode::Full);
        assert_eq!(config.feed.ping_interval_secs, 30);
        assert!(config.feed.instruments.is_empty());
    }

    #[test]
    fn test_full_config_parses() {
        let toml = r#"
            [feed]
            endpoint = "wss://feed.example.com/v3"
            instruments = ["NSE_FO|61755", "NSE_FO|61756"]
            protected_instruments = ["NSE_INDEX|Nifty 50"]
            mode = "full_d30"
            ping_interval_secs = 15

            [log]
            retention = 5000

            [aggregation]
            bucket_ms = 60000
            wall_threshold = 1500

            [stream]
            read_count = 50
            read_wait_ms = 500

            [telemetry]
            metrics_port = 9100
            log_level = "debug"
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.feed.mode, SubscriptionMode::FullD30);
        assert_eq!(config.feed.instruments.len(), 2);
        assert_eq!(config.feed.protected_instruments[0], "NSE_INDEX|Nifty 50");
        assert_eq!(config.log.retention, 5000);
        assert_eq!(config.aggregation.wall_threshold, 1500);
        assert_eq!(config.stream.read_count, 50);
        assert_eq!(config.telemetry.metrics_port, 9100);
    }

    #[test]
    fn test_zero_retention_is_rejected() {
        let config: Config = toml::from_str("[log]\nretention = 0").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("log.retention"));
    }

    #[test]
    fn test_zero_bucket_width_is_rejected() {
        let config: Config = toml::from_str("[aggregation]\nbucket_ms = 0").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("bucket_ms"));
    }

    #[test]
    fn test_defaults_pass_validation() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_desired_instruments_deduplicates() {
        let config = FeedConfig {
            instruments: vec!["A".to_string(), "B".to_string(), "A".to_string()],
            ..FeedConfig::default()
        };
        assert_eq!(config.desired_instruments().len(), 2);
    }
}
