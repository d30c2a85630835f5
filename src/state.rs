use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::cache::CacheStatsSnapshot;
use crate::filters::FilterCounters;
use crate::stream::ConnectorSnapshot;

/// Monotonic counters for every outcome of the processing pipeline.
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub received: AtomicU64,
    pub malformed: AtomicU64,
    pub missing_wallet: AtomicU64,
    pub duplicate: AtomicU64,
    /// Pass counts per fast-filter stage.
    pub filter_passed: FilterCounters,
    pub excluded_market: AtomicU64,
    pub below_min_notional: AtomicU64,
    pub above_max_price: AtomicU64,
    pub enrichment_unavailable: AtomicU64,
    pub lp_rejected: AtomicU64,
    pub below_threshold: AtomicU64,
    pub alerted: AtomicU64,
    pub alert_send_failed: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineSnapshot {
    pub received: u64,
    pub malformed: u64,
    pub missing_wallet: u64,
    pub duplicate: u64,
    pub passed_excluded_market: u64,
    pub passed_min_notional: u64,
    pub passed_max_price: u64,
    pub excluded_market: u64,
    pub below_min_notional: u64,
    pub above_max_price: u64,
    pub enrichment_unavailable: u64,
    pub lp_rejected: u64,
    pub below_threshold: u64,
    pub alerted: u64,
    pub alert_send_failed: u64,
}

impl PipelineStats {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        PipelineSnapshot {
            received: load(&self.received),
            malformed: load(&self.malformed),
            missing_wallet: load(&self.missing_wallet),
            duplicate: load(&self.duplicate),
            passed_excluded_market: load(&self.filter_passed.excluded_market),
            passed_min_notional: load(&self.filter_passed.min_notional),
            passed_max_price: load(&self.filter_passed.max_price),
            excluded_market: load(&self.excluded_market),
            below_min_notional: load(&self.below_min_notional),
            above_max_price: load(&self.above_max_price),
            enrichment_unavailable: load(&self.enrichment_unavailable),
            lp_rejected: load(&self.lp_rejected),
            below_threshold: load(&self.below_threshold),
            alerted: load(&self.alerted),
            alert_send_failed: load(&self.alert_send_failed),
        }
    }
}

/// Periodic stats report: pipeline, connector and cache counters together.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub event: &'static str,
    pub timestamp: String,
    pub uptime_secs: u64,
    pub pipeline: PipelineSnapshot,
    pub connector: ConnectorSnapshot,
    pub cache: CacheStatsSnapshot,
    pub excluded_markets: usize,
}
