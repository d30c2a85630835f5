use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use crate::alert::{AlertSink, Urgency, WhaleAlert, format_alert};
use crate::api::MarketDataGateway;
use crate::cache::{CacheStats, EnrichmentCache, Lookup};
use crate::config::AppConfig;
use crate::dedup::Deduplicator;
use crate::exclusion::ExclusionSet;
use crate::filters::{FastFilters, FilterStage};
use crate::liquidity::LpClassifier;
use crate::reporter;
use crate::scoring::{ScoringContext, SignalScorer, portfolio_concentration};
use crate::state::PipelineStats;
use crate::types::{NormalizeError, RawEvent, Trade};

/// What happened to one stream event.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Malformed,
    MissingWallet,
    Duplicate,
    Filtered { stage: FilterStage },
    EnrichmentUnavailable,
    LiquidityProvider,
    BelowThreshold { score: f64 },
    Alerted { score: f64, delivered: bool },
}

/// Runs each event through normalize, dedup, filters, enrichment, scoring and alerting.
///
/// Events are handled one at a time, so alerts go out in arrival order.
pub struct TradeProcessor<G, A> {
    cache: EnrichmentCache<G>,
    dedup: Deduplicator,
    filters: FastFilters,
    exclusions: Arc<ExclusionSet>,
    lp: LpClassifier,
    scorer: SignalScorer,
    sink: A,
    stats: Arc<PipelineStats>,
}

impl<G: MarketDataGateway, A: AlertSink> TradeProcessor<G, A> {
    pub fn new(
        config: &AppConfig,
        gateway: Arc<G>,
        exclusions: Arc<ExclusionSet>,
        sink: A,
    ) -> Self {
        Self {
            cache: EnrichmentCache::new(gateway, &config.cache),
            dedup: Deduplicator::new(config.dedup.capacity),
            filters: FastFilters::new(&config.filters),
            exclusions,
            lp: LpClassifier::new(config.lp.clone()),
            scorer: SignalScorer::new(config.scoring.clone()),
            sink,
            stats: Arc::new(PipelineStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        Arc::clone(&self.stats)
    }

    pub fn cache_stats(&self) -> Arc<CacheStats> {
        self.cache.stats()
    }

    pub fn sink(&self) -> &A {
        &self.sink
    }

    pub async fn process(&mut self, event: RawEvent) -> Verdict {
        PipelineStats::incr(&self.stats.received);

        let trade = match Trade::from_payload(&event.payload, event.received_at) {
            Ok(trade) => trade,
            Err(NormalizeError::MissingWallet) => {
                PipelineStats::incr(&self.stats.missing_wallet);
                return Verdict::MissingWallet;
            }
            Err(e) => {
                PipelineStats::incr(&self.stats.malformed);
                debug!("Dropping trade payload: {e}");
                return Verdict::Malformed;
            }
        };

        if !self.dedup.check_and_mark(trade.dedup_key()) {
            PipelineStats::incr(&self.stats.duplicate);
            return Verdict::Duplicate;
        }

        if let Err(stage) =
            self.filters
                .evaluate(&trade, &self.exclusions, &self.stats.filter_passed)
        {
            let counter = match stage {
                FilterStage::ExcludedMarket => &self.stats.excluded_market,
                FilterStage::MinNotional => &self.stats.below_min_notional,
                FilterStage::MaxPrice => &self.stats.above_max_price,
            };
            PipelineStats::incr(counter);
            return Verdict::Filtered { stage };
        }

        debug!(
            "Large trade: {} {} {} ${:.0} @ {:.3} in {}",
            trade.wallet,
            trade.side,
            trade.outcome,
            trade.notional(),
            trade.price,
            trade.market_id
        );

        let positions = match self.cache.positions(&trade.wallet).await {
            Lookup::Found(positions) => positions,
            Lookup::NotFound => Vec::new(),
            Lookup::Unavailable => return self.unavailable(&trade, "positions"),
        };
        if self.lp.is_liquidity_provider(&positions, &trade.market_id) {
            PipelineStats::incr(&self.stats.lp_rejected);
            debug!("Skipping {}: balanced book in {}", trade.wallet, trade.market_id);
            return Verdict::LiquidityProvider;
        }

        let profile = match self.cache.profile(&trade.wallet).await {
            Lookup::Unavailable => return self.unavailable(&trade, "profile"),
            lookup => lookup.found(),
        };
        let market = match self.cache.market(&trade.market_id).await {
            Lookup::Unavailable => return self.unavailable(&trade, "market"),
            lookup => lookup.found(),
        };
        let history = match self.cache.trade_history(&trade.wallet).await {
            Lookup::Unavailable => return self.unavailable(&trade, "history"),
            lookup => lookup.found().unwrap_or_default(),
        };
        let markets_traded = match self.cache.markets_traded(&trade.wallet).await {
            Lookup::Unavailable => return self.unavailable(&trade, "markets traded"),
            lookup => lookup.found(),
        };

        let now = Utc::now();
        let wallet_age_days = profile.as_ref().and_then(|p| p.age_days(now));
        let ctx = ScoringContext {
            now,
            wallet_age_days,
            positions: &positions,
            history: &history,
            market: market.as_ref(),
            markets_traded,
        };
        let score = self.scorer.score(&trade, &ctx);
        let total = score.total();

        if !self.scorer.should_alert(&score) {
            PipelineStats::incr(&self.stats.below_threshold);
            debug!(
                "Trade {} scored {total:.1} (< {:.1})",
                trade.tx_hash,
                self.scorer.threshold()
            );
            return Verdict::BelowThreshold { score: total };
        }

        let market_title = market
            .map(|m| m.title)
            .filter(|t| !t.is_empty())
            .or_else(|| trade.title.clone())
            .unwrap_or_else(|| trade.market_id.clone());
        let trader = trade
            .trader_name
            .clone()
            .or_else(|| profile.and_then(|p| p.display_name))
            .unwrap_or_else(|| short_address(&trade.wallet));

        let alert = WhaleAlert {
            market_title,
            trader,
            wallet_age_days,
            portfolio_share: portfolio_concentration(&positions, &trade.market_id),
            markets_traded,
            open_positions: positions.len(),
            urgency: Urgency::from_score(total),
            score,
            trade,
        };

        let delivered = self.sink.send(&format_alert(&alert)).await;
        PipelineStats::incr(&self.stats.alerted);
        if !delivered {
            PipelineStats::incr(&self.stats.alert_send_failed);
        }
        info!(
            "🐋 {} alert: {} on \"{}\" ({}, score {total:.1}){}",
            alert.urgency,
            alert.trader,
            alert.market_title,
            alert.trade.side,
            if delivered { "" } else { " [delivery failed]" }
        );
        reporter::report_alert(&alert, delivered);

        Verdict::Alerted {
            score: total,
            delivered,
        }
    }

    fn unavailable(&self, trade: &Trade, what: &str) -> Verdict {
        PipelineStats::incr(&self.stats.enrichment_unavailable);
        debug!("Skipping {}: {what} unavailable", trade.tx_hash);
        Verdict::EnrichmentUnavailable
    }
}

fn short_address(address: &str) -> String {
    if address.len() <= 10 || !address.is_ascii() {
        return address.to_string();
    }
    format!("{}…{}", &address[..6], &address[address.len() - 4..])
}
