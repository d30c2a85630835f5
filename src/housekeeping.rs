use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::info;

use crate::api::MarketDataGateway;
use crate::cache::CacheStats;
use crate::exclusion::{self, ExclusionSet};
use crate::reporter;
use crate::state::{PipelineStats, StatsSnapshot};
use crate::stream::ConnectorStats;

/// Shared counters that make up a stats report.
#[derive(Clone)]
pub struct StatsSources {
    pub pipeline: Arc<PipelineStats>,
    pub connector: Arc<ConnectorStats>,
    pub cache: Arc<CacheStats>,
    pub exclusions: Arc<ExclusionSet>,
    pub started: Instant,
}

impl StatsSources {
    pub fn snapshot(&self, event: &'static str) -> StatsSnapshot {
        StatsSnapshot {
            event,
            timestamp: Utc::now().to_rfc3339(),
            uptime_secs: self.started.elapsed().as_secs(),
            pipeline: self.pipeline.snapshot(),
            connector: self.connector.snapshot(),
            cache: self.cache.snapshot(),
            excluded_markets: self.exclusions.len(),
        }
    }
}

pub struct HousekeepingConfig {
    pub stats_interval: Duration,
    pub refresh_interval: Duration,
    pub excluded_tag_ids: Vec<String>,
}

/// Periodic stats reports and exclusion-set refreshes until shutdown.
///
/// Both timers skip their immediate first tick; the caller does the initial refresh.
pub fn spawn_housekeeping<G>(
    gateway: Arc<G>,
    sources: StatsSources,
    config: HousekeepingConfig,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()>
where
    G: MarketDataGateway + 'static,
{
    tokio::spawn(async move {
        let mut stats_tick = tokio::time::interval(config.stats_interval);
        stats_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        stats_tick.tick().await;
        let mut refresh_tick = tokio::time::interval(config.refresh_interval);
        refresh_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        refresh_tick.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = stats_tick.tick() => {
                    let snapshot = sources.snapshot("stats");
                    let p = &snapshot.pipeline;
                    info!(
                        "Stats: {} received, {} above min notional, {} alerted, {} dropped, {} reconnects",
                        p.received,
                        p.passed_min_notional,
                        p.alerted,
                        snapshot.connector.dropped,
                        snapshot.connector.reconnects,
                    );
                    reporter::report_stats(&snapshot);
                }
                _ = refresh_tick.tick() => {
                    exclusion::refresh(&*gateway, &config.excluded_tag_ids, &sources.exclusions).await;
                }
            }
        }
        info!("Housekeeping stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::stub::StubGateway;
    use std::sync::atomic::Ordering;

    fn sources() -> StatsSources {
        StatsSources {
            pipeline: Arc::new(PipelineStats::default()),
            connector: Arc::new(ConnectorStats::default()),
            cache: Arc::new(CacheStats::default()),
            exclusions: Arc::new(ExclusionSet::default()),
            started: Instant::now(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn refreshes_exclusions_on_interval() {
        let gateway = Arc::new(StubGateway::default());
        gateway.tagged.lock().unwrap().insert("0xsports".to_string());
        let sources = sources();
        let (stop_tx, stop_rx) = watch::channel(false);

        let handle = spawn_housekeeping(
            Arc::clone(&gateway),
            sources.clone(),
            HousekeepingConfig {
                stats_interval: Duration::from_secs(60),
                refresh_interval: Duration::from_secs(3600),
                excluded_tag_ids: vec!["1".into()],
            },
            stop_rx,
        );

        tokio::time::sleep(Duration::from_secs(3599)).await;
        assert_eq!(gateway.tag_calls.load(Ordering::SeqCst), 0);
        assert!(!sources.exclusions.contains("0xsports"));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(gateway.tag_calls.load(Ordering::SeqCst), 1);
        assert!(sources.exclusions.contains("0xsports"));

        stop_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[test]
    fn snapshot_collects_all_sources() {
        let sources = sources();
        PipelineStats::incr(&sources.pipeline.received);
        sources.connector.reconnects.fetch_add(2, Ordering::Relaxed);
        sources.cache.hits.fetch_add(3, Ordering::Relaxed);

        let snap = sources.snapshot("stats");
        assert_eq!(snap.event, "stats");
        assert_eq!(snap.pipeline.received, 1);
        assert_eq!(snap.connector.reconnects, 2);
        assert_eq!(snap.cache.hits, 3);
        assert_eq!(snap.excluded_markets, 0);
    }
}
