use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::config::FilterConfig;
use crate::exclusion::ExclusionSet;
use crate::types::Trade;

/// Call-free checks run before any enrichment, in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterStage {
    ExcludedMarket,
    MinNotional,
    MaxPrice,
}

impl std::fmt::Display for FilterStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterStage::ExcludedMarket => write!(f, "excluded_market"),
            FilterStage::MinNotional => write!(f, "min_notional"),
            FilterStage::MaxPrice => write!(f, "max_price"),
        }
    }
}

/// Pass counters, one per stage.
#[derive(Debug, Default)]
pub struct FilterCounters {
    pub excluded_market: AtomicU64,
    pub min_notional: AtomicU64,
    pub max_price: AtomicU64,
}

impl FilterCounters {
    fn passed(&self, stage: FilterStage) {
        let counter = match stage {
            FilterStage::ExcludedMarket => &self.excluded_market,
            FilterStage::MinNotional => &self.min_notional,
            FilterStage::MaxPrice => &self.max_price,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone)]
pub struct FastFilters {
    min_trade_usd: f64,
    max_price: Option<f64>,
}

impl FastFilters {
    pub fn new(config: &FilterConfig) -> Self {
        Self {
            min_trade_usd: config.min_trade_usd,
            max_price: config.max_price,
        }
    }

    /// Run the stages in order, stopping at the first failure.
    ///
    /// Every stage passed bumps its counter; the failing stage is returned.
    pub fn evaluate(
        &self,
        trade: &Trade,
        exclusions: &ExclusionSet,
        counters: &FilterCounters,
    ) -> Result<(), FilterStage> {
        if exclusions.contains(&trade.market_id) {
            return Err(FilterStage::ExcludedMarket);
        }
        counters.passed(FilterStage::ExcludedMarket);

        if trade.notional() < self.min_trade_usd {
            return Err(FilterStage::MinNotional);
        }
        counters.passed(FilterStage::MinNotional);

        if let Some(max_price) = self.max_price {
            if trade.price >= max_price {
                return Err(FilterStage::MaxPrice);
            }
            counters.passed(FilterStage::MaxPrice);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TradeSide;
    use chrono::Utc;
    use std::collections::HashSet;

    fn trade(market: &str, size: f64, price: f64) -> Trade {
        Trade {
            tx_hash: "0xtx".into(),
            market_id: market.into(),
            market_slug: String::new(),
            title: None,
            wallet: "0xw".into(),
            trader_name: None,
            side: TradeSide::Buy,
            outcome: "Yes".into(),
            size,
            price,
            timestamp: Utc::now(),
        }
    }

    fn filters(max_price: Option<f64>) -> FastFilters {
        FastFilters::new(&FilterConfig {
            min_trade_usd: 500.0,
            max_price,
            ..FilterConfig::default()
        })
    }

    #[test]
    fn excluded_market_fails_first() {
        let exclusions = ExclusionSet::new(HashSet::from(["m".to_string()]));
        let counters = FilterCounters::default();
        // would also fail the notional check, but exclusion runs first
        let result = filters(None).evaluate(&trade("m", 1.0, 0.1), &exclusions, &counters);
        assert_eq!(result, Err(FilterStage::ExcludedMarket));
        assert_eq!(counters.excluded_market.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn small_trade_fails_notional() {
        let counters = FilterCounters::default();
        let result =
            filters(None).evaluate(&trade("m", 1000.0, 0.4), &ExclusionSet::default(), &counters);
        assert_eq!(result, Err(FilterStage::MinNotional));
        assert_eq!(counters.excluded_market.load(Ordering::Relaxed), 1);
        assert_eq!(counters.min_notional.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn notional_boundary_is_inclusive() {
        let counters = FilterCounters::default();
        let result =
            filters(None).evaluate(&trade("m", 1000.0, 0.5), &ExclusionSet::default(), &counters);
        assert_eq!(result, Ok(()));
    }

    #[test]
    fn price_bound_is_strict_and_optional() {
        let counters = FilterCounters::default();
        let exclusions = ExclusionSet::default();
        assert_eq!(
            filters(Some(0.3)).evaluate(&trade("m", 10_000.0, 0.3), &exclusions, &counters),
            Err(FilterStage::MaxPrice)
        );
        assert_eq!(
            filters(Some(0.3)).evaluate(&trade("m", 10_000.0, 0.29), &exclusions, &counters),
            Ok(())
        );
        assert_eq!(counters.max_price.load(Ordering::Relaxed), 1);

        // without a bound, expensive outcomes pass
        assert_eq!(
            filters(None).evaluate(&trade("m", 10_000.0, 0.95), &exclusions, &counters),
            Ok(())
        );
        assert_eq!(counters.max_price.load(Ordering::Relaxed), 1);
    }
}
