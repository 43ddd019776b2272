use clap::Parser;
use tickflow::cli::{Cli, Commands};
use tickflow::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::load(&cli.config).unwrap_or_else(|e| {
        eprintln!("Warning: Could not load config from {}: {}", cli.config, e);
        eprintln!("Using default configuration");
        Config::default()
    });

    tickflow::telemetry::init_telemetry(&config.telemetry)?;

    match cli.command {
        Commands::Run(args) => {
            tracing::info!("starting tick pipeline");
            args.execute(config).await?;
        }
        Commands::Config => {
            println!("Current configuration:");
            println!(
                "  Feed: endpoint={} instruments={} protected={} mode={}",
                config.feed.endpoint.as_deref().unwrap_or("<authorize>"),
                config.feed.instruments.len(),
                config.feed.protected_instruments.len(),
                config.feed.mode.as_str()
            );
            println!("  Log: retention={} entries", config.log.retention);
            println!(
                "  Aggregation: bucket={}ms wall_threshold={}",
                config.aggregation.bucket_ms, config.aggregation.wall_threshold
            );
            println!(
                "  Stream: read_count={} read_wait={}ms buffer={}",
                config.stream.read_count, config.stream.read_wait_ms, config.stream.event_buffer
            );
            println!(
                "  Telemetry: metrics_port={} log_level={}",
                config.telemetry.metrics_port, config.telemetry.log_level
            );
        }
    }

    Ok(())
}
