//! Probe: RTDS activity/trades feed
//!
//! Runs the stream connector for a fixed duration and prints every trade as it
//! normalizes, plus connection state changes. Useful to eyeball payload shapes
//! and how many trades clear a given notional.

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use polymarket_whale_detector::alert::format_usd;
use polymarket_whale_detector::config::StreamConfig;
use polymarket_whale_detector::stream::StreamConnector;
use polymarket_whale_detector::types::Trade;

#[derive(Parser)]
#[command(name = "probe_stream", about = "Print normalized RTDS trades")]
struct Args {
    /// How long to listen, in seconds
    #[arg(long, default_value_t = 60)]
    seconds: u64,

    /// Only print trades at or above this notional (USD)
    #[arg(long, default_value_t = 0.0)]
    min_usd: f64,

    /// Print raw payloads that fail to normalize
    #[arg(long)]
    show_rejects: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    println!("=== Probe: RTDS trades ===");
    println!("Listening for {}s, min notional {}", args.seconds, format_usd(args.min_usd));
    println!();

    let (stop_tx, stop_rx) = watch::channel(false);
    let (tx, mut rx) = mpsc::channel(1024);
    let connector = StreamConnector::new(StreamConfig::default(), tx, stop_rx);
    let stats = connector.stats();
    let mut state = connector.subscribe_state();
    let task = tokio::spawn(connector.run());

    let deadline = Instant::now() + Duration::from_secs(args.seconds);
    let start = Instant::now();
    let mut printed = 0u64;
    let mut rejected = 0u64;

    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => break,
            _ = tokio::signal::ctrl_c() => break,
            Ok(()) = state.changed() => {
                println!("[{:>6.1}s] state -> {}", start.elapsed().as_secs_f64(), *state.borrow());
            }
            event = rx.recv() => {
                let Some(event) = event else { break };
                match Trade::from_payload(&event.payload, event.received_at) {
                    Ok(trade) if trade.notional() >= args.min_usd => {
                        printed += 1;
                        println!(
                            "[{:>6.1}s] {:<4} {:>12} @ {:.3}  {:<8} {}  wallet={} tx={}",
                            start.elapsed().as_secs_f64(),
                            trade.side,
                            format_usd(trade.notional()),
                            trade.price,
                            trade.outcome,
                            trade.title.as_deref().unwrap_or(&trade.market_slug),
                            trade.wallet,
                            trade.tx_hash,
                        );
                    }
                    Ok(_) => {}
                    Err(e) => {
                        rejected += 1;
                        if args.show_rejects {
                            println!("  reject ({e}): {}", event.payload);
                        }
                    }
                }
            }
        }
    }

    let _ = stop_tx.send(true);
    task.await?;

    let s = stats.snapshot();
    println!();
    println!("=== Summary ===");
    println!("  Messages:     {}", s.messages);
    println!("  Forwarded:    {}", s.forwarded);
    println!("  Printed:      {printed}");
    println!("  Rejected:     {rejected}");
    println!("  Malformed:    {}", s.malformed);
    println!("  Dropped:      {}", s.dropped);
    println!("  Reconnects:   {}", s.reconnects);
    println!("  Stale closes: {}", s.stale_closes);
    Ok(())
}
