use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use polymarket_whale_detector::alert::{AlertEmitter, AlertSink, SHUTDOWN_MESSAGE, STARTUP_MESSAGE};
use polymarket_whale_detector::api::PolymarketGateway;
use polymarket_whale_detector::config::{AppConfig, CONFIG_PATH};
use polymarket_whale_detector::exclusion::{self, ExclusionSet};
use polymarket_whale_detector::housekeeping::{HousekeepingConfig, StatsSources, spawn_housekeeping};
use polymarket_whale_detector::processor::TradeProcessor;
use polymarket_whale_detector::reporter;
use polymarket_whale_detector::stream::StreamConnector;

#[derive(Parser)]
#[command(name = "whale-detector", about = "Polymarket whale trade detector")]
struct Args {
    /// Path to the TOML config file (defaults apply when it does not exist)
    #[arg(long, default_value = CONFIG_PATH)]
    config: PathBuf,

    /// Log alerts instead of sending them to Telegram
    #[arg(long)]
    dry_run: bool,

    /// Write the effective config to `--config` and exit
    #[arg(long)]
    write_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut config = AppConfig::load_or_default(&args.config)?;
    config.apply_env()?;
    config.validate().context("Invalid configuration")?;

    if args.write_config {
        config.save(&args.config)?;
        info!("Wrote config to {}", args.config.display());
        return Ok(());
    }

    let alerts = AlertEmitter::new(&config.alerts, args.dry_run)?;
    info!("=== Polymarket Whale Detector ===");
    info!("  Stream:          {}", config.stream.ws_url);
    info!("  Min trade:       ${:.0}", config.filters.min_trade_usd);
    if let Some(max_price) = config.filters.max_price {
        info!("  Max price:       {max_price:.2}");
    }
    info!("  Max wallet age:  {} days", config.scoring.max_fresh_age_days);
    info!("  Alert threshold: {:.0}", config.scoring.alert_threshold);
    info!(
        "  Alerts:          {}",
        if alerts.is_dry_run() { "dry run (log only)" } else { "Telegram" }
    );

    let gateway = Arc::new(PolymarketGateway::new(&config.api)?);
    let exclusions = Arc::new(ExclusionSet::default());
    if !config.filters.excluded_tag_ids.is_empty() {
        info!(
            "Loading excluded markets for tag(s) {:?}...",
            config.filters.excluded_tag_ids
        );
        exclusion::refresh(&*gateway, &config.filters.excluded_tag_ids, &exclusions).await;
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (event_tx, mut event_rx) = mpsc::channel(config.stream.channel_capacity);

    let connector = StreamConnector::new(config.stream.clone(), event_tx, shutdown_rx.clone());
    let connector_stats = connector.stats();
    let connector_task = tokio::spawn(connector.run());

    let mut processor =
        TradeProcessor::new(&config, Arc::clone(&gateway), Arc::clone(&exclusions), alerts);

    let sources = StatsSources {
        pipeline: processor.stats(),
        connector: connector_stats,
        cache: processor.cache_stats(),
        exclusions: Arc::clone(&exclusions),
        started: tokio::time::Instant::now(),
    };
    let housekeeping = spawn_housekeeping(
        Arc::clone(&gateway),
        sources.clone(),
        HousekeepingConfig {
            stats_interval: Duration::from_secs(config.stats.interval_secs),
            refresh_interval: Duration::from_secs(config.filters.exclusion_refresh_secs),
            excluded_tag_ids: config.filters.excluded_tag_ids.clone(),
        },
        shutdown_rx,
    );

    processor.sink().send(STARTUP_MESSAGE).await;
    info!("Watching trades. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            event = event_rx.recv() => match event {
                Some(event) => {
                    processor.process(event).await;
                }
                None => {
                    warn!("Stream connector exited");
                    break;
                }
            },
        }
    }

    let _ = shutdown_tx.send(true);
    if let Err(e) = connector_task.await {
        warn!("Stream connector task failed: {e}");
    }
    if let Err(e) = housekeeping.await {
        warn!("Housekeeping task failed: {e}");
    }

    processor.sink().send(SHUTDOWN_MESSAGE).await;
    reporter::report_exit_summary(&sources.snapshot("exit_summary"));
    Ok(())
}
