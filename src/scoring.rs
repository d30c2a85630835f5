use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::ScoringConfig;
use crate::types::{HistoricalTrade, MarketMetadata, Position, Trade};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    FreshWallet,
    Longshot,
    SizeAnomaly,
    Timing,
    Concentration,
    LowDiversity,
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            SignalKind::FreshWallet => "Fresh wallet",
            SignalKind::Longshot => "Longshot",
            SignalKind::SizeAnomaly => "Size anomaly",
            SignalKind::Timing => "Timing",
            SignalKind::Concentration => "Concentration",
            SignalKind::LowDiversity => "Low diversity",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Signal {
    pub kind: SignalKind,
    pub score: f64,
    pub detail: String,
}

/// Triggered signals and their sum. Only built through `from_signals`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreResult {
    signals: Vec<Signal>,
    total: f64,
}

impl ScoreResult {
    pub fn from_signals(signals: Vec<Signal>) -> Self {
        let total = signals.iter().map(|s| s.score).sum();
        Self { signals, total }
    }

    pub fn total(&self) -> f64 {
        self.total
    }

    pub fn signals(&self) -> &[Signal] {
        &self.signals
    }

    /// Signals by descending score, for presentation.
    pub fn sorted(&self) -> Vec<&Signal> {
        let mut sorted: Vec<&Signal> = self.signals.iter().collect();
        sorted.sort_by(|a, b| b.score.total_cmp(&a.score));
        sorted
    }

    pub fn get(&self, kind: SignalKind) -> Option<&Signal> {
        self.signals.iter().find(|s| s.kind == kind)
    }
}

/// Everything the signal functions may look at besides the trade itself.
#[derive(Debug, Clone, Copy)]
pub struct ScoringContext<'a> {
    pub now: DateTime<Utc>,
    pub wallet_age_days: Option<u32>,
    pub positions: &'a [Position],
    pub history: &'a [HistoricalTrade],
    pub market: Option<&'a MarketMetadata>,
    pub markets_traded: Option<u64>,
}

type SignalFn = fn(&Trade, &ScoringContext<'_>, &ScoringConfig) -> Option<Signal>;
type WeightFn = fn(&ScoringConfig) -> f64;

/// Signal functions with their max weight. A zero weight skips the function;
/// a triggered signal is kept even when its score decays to 0.
const SIGNALS: &[(SignalKind, WeightFn, SignalFn)] = &[
    (SignalKind::FreshWallet, |c| c.fresh_wallet_max, fresh_wallet),
    (SignalKind::Longshot, |c| c.longshot_max, longshot),
    (SignalKind::SizeAnomaly, |c| c.size_anomaly_max, size_anomaly),
    (SignalKind::Timing, |c| c.timing_max, timing),
    (SignalKind::Concentration, |c| c.concentration_max, concentration),
    (SignalKind::LowDiversity, |c| c.low_diversity_max, low_diversity),
];

#[derive(Debug, Clone)]
pub struct SignalScorer {
    config: ScoringConfig,
}

impl SignalScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn threshold(&self) -> f64 {
        self.config.alert_threshold
    }

    pub fn score(&self, trade: &Trade, ctx: &ScoringContext<'_>) -> ScoreResult {
        let signals = SIGNALS
            .iter()
            .filter(|(_, weight, _)| weight(&self.config) > 0.0)
            .filter_map(|(_, _, signal)| signal(trade, ctx, &self.config))
            .collect();
        ScoreResult::from_signals(signals)
    }

    pub fn should_alert(&self, result: &ScoreResult) -> bool {
        result.total() >= self.config.alert_threshold
    }
}

fn fresh_wallet(_: &Trade, ctx: &ScoringContext<'_>, cfg: &ScoringConfig) -> Option<Signal> {
    let age = ctx.wallet_age_days?;
    if age > cfg.max_fresh_age_days || cfg.max_fresh_age_days == 0 {
        return None;
    }
    let score = cfg.fresh_wallet_max * (1.0 - f64::from(age) / f64::from(cfg.max_fresh_age_days));
    Some(Signal {
        kind: SignalKind::FreshWallet,
        score,
        detail: format!("account is {age} day(s) old"),
    })
}

fn longshot(trade: &Trade, _: &ScoringContext<'_>, cfg: &ScoringConfig) -> Option<Signal> {
    if cfg.longshot_threshold <= 0.0 || trade.price >= cfg.longshot_threshold {
        return None;
    }
    let score = cfg.longshot_max * (1.0 - trade.price / cfg.longshot_threshold);
    let odds = trade
        .decimal_odds()
        .map(|odds| format!("{odds:.1}x"))
        .unwrap_or_else(|| "unbounded".to_string());
    Some(Signal {
        kind: SignalKind::Longshot,
        score,
        detail: format!("bought at {:.0}¢ ({odds} odds)", trade.price * 100.0),
    })
}

fn size_anomaly(trade: &Trade, ctx: &ScoringContext<'_>, cfg: &ScoringConfig) -> Option<Signal> {
    let prior: Vec<f64> = ctx
        .history
        .iter()
        .filter(|h| !h.tx_hash.eq_ignore_ascii_case(&trade.tx_hash))
        .map(|h| h.notional)
        .collect();
    if prior.is_empty() || prior.len() < cfg.min_history_trades {
        return None;
    }
    let avg = prior.iter().sum::<f64>() / prior.len() as f64;
    if avg <= 0.0 {
        return None;
    }
    let ratio = trade.notional() / avg;
    if ratio <= cfg.size_anomaly_multiplier {
        return None;
    }
    let saturation = cfg.size_anomaly_multiplier * cfg.size_anomaly_saturation;
    let raw = if saturation > 0.0 {
        cfg.size_anomaly_max * ratio / saturation
    } else {
        cfg.size_anomaly_max
    };
    let score = raw.max(cfg.size_anomaly_min_score).min(cfg.size_anomaly_max);
    Some(Signal {
        kind: SignalKind::SizeAnomaly,
        score,
        detail: format!("{ratio:.1}x the wallet's average trade of ${avg:.0}"),
    })
}

fn timing(_: &Trade, ctx: &ScoringContext<'_>, cfg: &ScoringConfig) -> Option<Signal> {
    let end = ctx.market?.end_date?;
    if cfg.timing_window_hours <= 0.0 {
        return None;
    }
    let hours_left = (end - ctx.now).num_seconds() as f64 / 3600.0;
    if !(0.0..=cfg.timing_window_hours).contains(&hours_left) {
        return None;
    }
    let score = cfg.timing_max * (1.0 - hours_left / cfg.timing_window_hours);
    Some(Signal {
        kind: SignalKind::Timing,
        score,
        detail: format!("market resolves in {hours_left:.1}h"),
    })
}

fn concentration(trade: &Trade, ctx: &ScoringContext<'_>, cfg: &ScoringConfig) -> Option<Signal> {
    match portfolio_concentration(ctx.positions, &trade.market_id) {
        None => Some(Signal {
            kind: SignalKind::Concentration,
            score: cfg.concentration_max,
            detail: "first position in this market".to_string(),
        }),
        Some(share) if share > cfg.concentration_threshold => Some(Signal {
            kind: SignalKind::Concentration,
            score: cfg.concentration_max * share,
            detail: format!("{:.0}% of portfolio in this market", share * 100.0),
        }),
        Some(_) => None,
    }
}

fn low_diversity(_: &Trade, ctx: &ScoringContext<'_>, cfg: &ScoringConfig) -> Option<Signal> {
    let traded = ctx.markets_traded?;
    if traded >= cfg.max_markets_traded {
        return None;
    }
    let score =
        cfg.low_diversity_max * (1.0 - traded as f64 / cfg.max_markets_traded as f64);
    Some(Signal {
        kind: SignalKind::LowDiversity,
        score,
        detail: format!("{traded} market(s) traded in total"),
    })
}

/// Share of the wallet's portfolio value held in `market_id`.
///
/// `None` when the wallet holds nothing in that market yet.
pub fn portfolio_concentration(positions: &[Position], market_id: &str) -> Option<f64> {
    let (in_market, total) = positions.iter().fold((0.0, 0.0), |(m, t), p| {
        let value = p.current_value.abs();
        if p.market_id == market_id {
            (m + value, t + value)
        } else {
            (m, t + value)
        }
    });
    if in_market <= 0.0 || total <= 0.0 {
        return None;
    }
    Some(in_market / total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TradeSide;
    use chrono::Duration;

    fn approx_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    fn trade(size: f64, price: f64) -> Trade {
        Trade {
            tx_hash: "0xcurrent".into(),
            market_id: "m".into(),
            market_slug: "m-slug".into(),
            title: Some("Market".into()),
            wallet: "0xw".into(),
            trader_name: None,
            side: TradeSide::Buy,
            outcome: "Yes".into(),
            size,
            price,
            timestamp: Utc::now(),
        }
    }

    fn pos(market: &str, value: f64) -> Position {
        Position {
            market_id: market.into(),
            outcome: "Yes".into(),
            outcome_index: Some(0),
            current_value: value,
        }
    }

    fn hist(tx: &str, notional: f64) -> HistoricalTrade {
        HistoricalTrade {
            tx_hash: tx.into(),
            market_id: "other".into(),
            notional,
        }
    }

    fn ctx<'a>(
        age: Option<u32>,
        positions: &'a [Position],
        history: &'a [HistoricalTrade],
        market: Option<&'a MarketMetadata>,
    ) -> ScoringContext<'a> {
        ScoringContext {
            now: Utc::now(),
            wallet_age_days: age,
            positions,
            history,
            market,
            markets_traded: None,
        }
    }

    // ── fresh wallet ─────────────────────────────────────────────

    #[test]
    fn fresh_wallet_decays_to_zero_at_max_age() {
        let cfg = ScoringConfig::default();
        let t = trade(1000.0, 0.5);
        let score = |age| fresh_wallet(&t, &ctx(Some(age), &[], &[], None), &cfg).map(|s| s.score);
        assert!(approx_eq(score(0).unwrap(), 30.0));
        assert!(approx_eq(score(45).unwrap(), 0.0));
        assert_eq!(score(46), None);
    }

    #[test]
    fn unknown_age_is_not_fresh() {
        let cfg = ScoringConfig::default();
        assert!(fresh_wallet(&trade(1000.0, 0.5), &ctx(None, &[], &[], None), &cfg).is_none());
    }

    // ── longshot ─────────────────────────────────────────────────

    #[test]
    fn longshot_scales_with_price() {
        let cfg = ScoringConfig::default();
        let c = ctx(None, &[], &[], None);
        assert!(approx_eq(longshot(&trade(1.0, 0.1), &c, &cfg).unwrap().score, 12.5));
        assert!(approx_eq(longshot(&trade(1.0, 0.0), &c, &cfg).unwrap().score, 25.0));
        assert!(longshot(&trade(1.0, 0.2), &c, &cfg).is_none());
    }

    // ── size anomaly ─────────────────────────────────────────────

    #[test]
    fn size_anomaly_needs_enough_history() {
        let cfg = ScoringConfig::default();
        // the current transaction does not count toward history
        let history = [hist("0xa", 100.0), hist("0xb", 100.0), hist("0xCURRENT", 100.0)];
        let c = ctx(None, &[], &history, None);
        assert!(size_anomaly(&trade(10_000.0, 0.5), &c, &cfg).is_none());
    }

    #[test]
    fn size_anomaly_is_floored_and_capped() {
        let cfg = ScoringConfig::default();
        let history = [hist("0xa", 100.0), hist("0xb", 100.0), hist("0xc", 100.0)];
        let c = ctx(None, &[], &history, None);

        // ratio 4: 25 * 4 / 9 = 11.1
        let mid = size_anomaly(&trade(800.0, 0.5), &c, &cfg).unwrap();
        assert!(approx_eq(mid.score, 25.0 * 4.0 / 9.0));

        // ratio 100: capped
        let huge = size_anomaly(&trade(20_000.0, 0.5), &c, &cfg).unwrap();
        assert!(approx_eq(huge.score, 25.0));

        // ratio 3 is not above the multiplier
        assert!(size_anomaly(&trade(600.0, 0.5), &c, &cfg).is_none());

        let floored = ScoringConfig {
            size_anomaly_min_score: 15.0,
            ..ScoringConfig::default()
        };
        let low = size_anomaly(&trade(800.0, 0.5), &c, &floored).unwrap();
        assert!(approx_eq(low.score, 15.0));
    }

    // ── timing ───────────────────────────────────────────────────

    #[test]
    fn timing_window() {
        let cfg = ScoringConfig::default();
        let now = Utc::now();
        let market = |hours: i64| MarketMetadata {
            market_id: "m".into(),
            title: "Market".into(),
            slug: "m".into(),
            end_date: Some(now + Duration::hours(hours)),
        };
        let score = |m: &MarketMetadata| {
            let c = ScoringContext {
                now,
                ..ctx(None, &[], &[], Some(m))
            };
            timing(&trade(1.0, 0.5), &c, &cfg).map(|s| s.score)
        };
        assert!(approx_eq(score(&market(12)).unwrap(), 15.0));
        assert!(approx_eq(score(&market(0)).unwrap(), 20.0));
        assert_eq!(score(&market(49)), None);
        assert_eq!(score(&market(-1)), None);
    }

    // ── concentration ────────────────────────────────────────────

    #[test]
    fn first_position_gets_full_weight() {
        let cfg = ScoringConfig::default();
        let positions = [pos("other", 500.0)];
        let s = concentration(&trade(1.0, 0.5), &ctx(None, &positions, &[], None), &cfg).unwrap();
        assert!(approx_eq(s.score, 10.0));
    }

    #[test]
    fn concentration_above_threshold() {
        let cfg = ScoringConfig::default();
        let focused = [pos("m", 800.0), pos("other", 200.0)];
        let spread = [pos("m", 400.0), pos("other", 600.0)];
        let t = trade(1.0, 0.5);
        let s = concentration(&t, &ctx(None, &focused, &[], None), &cfg).unwrap();
        assert!(approx_eq(s.score, 8.0));
        assert!(concentration(&t, &ctx(None, &spread, &[], None), &cfg).is_none());
    }

    // ── low diversity ────────────────────────────────────────────

    #[test]
    fn low_diversity_scales_with_markets_traded() {
        let cfg = ScoringConfig::default();
        let t = trade(1.0, 0.5);
        let score = |traded| {
            let c = ScoringContext {
                markets_traded: traded,
                ..ctx(None, &[], &[], None)
            };
            low_diversity(&t, &c, &cfg).map(|s| s.score)
        };
        assert!(approx_eq(score(Some(0)).unwrap(), 10.0));
        assert!(approx_eq(score(Some(5)).unwrap(), 5.0));
        assert_eq!(score(Some(10)), None);
        assert_eq!(score(None), None);
    }

    // ── composite ────────────────────────────────────────────────

    #[test]
    fn composite_score_crosses_threshold() {
        let scorer = SignalScorer::new(ScoringConfig::default());
        let positions = [pos("m", 800.0), pos("other", 200.0)];
        let result = scorer.score(&trade(10_000.0, 0.1), &ctx(Some(0), &positions, &[], None));

        assert_eq!(result.signals().len(), 3);
        assert!(approx_eq(result.total(), 50.5));
        assert!(scorer.should_alert(&result));

        let sorted: Vec<SignalKind> = result.sorted().iter().map(|s| s.kind).collect();
        assert_eq!(
            sorted,
            vec![SignalKind::FreshWallet, SignalKind::Longshot, SignalKind::Concentration]
        );

        let strict = SignalScorer::new(ScoringConfig {
            alert_threshold: 50.6,
            ..ScoringConfig::default()
        });
        assert!(!strict.should_alert(&result));
    }

    #[test]
    fn zero_weight_disables_signal() {
        let scorer = SignalScorer::new(ScoringConfig {
            fresh_wallet_max: 0.0,
            ..ScoringConfig::default()
        });
        let result = scorer.score(&trade(1.0, 0.5), &ctx(Some(0), &[pos("m", 1.0)], &[], None));
        assert!(result.get(SignalKind::FreshWallet).is_none());
    }

    #[test]
    fn zero_score_signal_is_kept_in_result() {
        let scorer = SignalScorer::new(ScoringConfig::default());
        let held = [pos("m", 100.0), pos("other", 900.0)];
        let t = trade(1.0, 0.5);

        let at_max = scorer.score(&t, &ctx(Some(45), &held, &[], None));
        let fresh = at_max.get(SignalKind::FreshWallet).unwrap();
        assert!(approx_eq(fresh.score, 0.0));
        assert_eq!(at_max.signals().len(), 1);
        assert!(approx_eq(at_max.total(), 0.0));

        let past_max = scorer.score(&t, &ctx(Some(46), &held, &[], None));
        assert!(past_max.get(SignalKind::FreshWallet).is_none());
        assert!(past_max.signals().is_empty());
    }

    #[test]
    fn total_is_sum_of_signals() {
        let signals = vec![
            Signal {
                kind: SignalKind::Timing,
                score: 4.0,
                detail: String::new(),
            },
            Signal {
                kind: SignalKind::Longshot,
                score: 6.5,
                detail: String::new(),
            },
        ];
        let result = ScoreResult::from_signals(signals);
        assert!(approx_eq(result.total(), 10.5));
        assert_eq!(result.sorted()[0].kind, SignalKind::Longshot);
    }
}
