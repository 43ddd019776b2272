//! Telemetry module
//!
//! Metrics and structured logging

mod logging;
mod metrics;

pub use logging::init_logging;
pub use metrics::describe_metrics;

use crate::config::TelemetryConfig;

/// Initialize all telemetry subsystems
///
/// Installs the global tracing subscriber and the Prometheus exporter.
/// Call once at process start, before any pipeline task spawns.
pub fn init_telemetry(config: &TelemetryConfig) -> anyhow::Result<()> {
    init_logging(&config.log_level)?;

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("failed to install metrics exporter: {}", e))?;
    describe_metrics();

    tracing::info!(%addr, "metrics exporter listening");
    Ok(())
}
