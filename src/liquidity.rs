use crate::config::LpConfig;
use crate::types::Position;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BookSide {
    First,
    Second,
}

/// Which side of a binary market a position is on: "Yes"/"No" labels first,
/// otherwise outcome index 0/1.
fn book_side(pos: &Position) -> Option<BookSide> {
    match pos.outcome.trim().to_ascii_lowercase().as_str() {
        "yes" => Some(BookSide::First),
        "no" => Some(BookSide::Second),
        _ => match pos.outcome_index {
            Some(0) => Some(BookSide::First),
            Some(1) => Some(BookSide::Second),
            _ => None,
        },
    }
}

/// Per-side absolute exposure of a wallet in one market.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BookExposure {
    pub first: f64,
    pub second: f64,
    pub positions: usize,
}

impl BookExposure {
    pub fn of(positions: &[Position], market_id: &str) -> Self {
        let mut exposure = Self::default();
        for pos in positions.iter().filter(|p| p.market_id == market_id) {
            exposure.positions += 1;
            match book_side(pos) {
                Some(BookSide::First) => exposure.first += pos.current_value.abs(),
                Some(BookSide::Second) => exposure.second += pos.current_value.abs(),
                None => {}
            }
        }
        exposure
    }

    /// Smaller side over larger side, 0 when either is empty.
    pub fn balance(&self) -> f64 {
        let larger = self.first.max(self.second);
        if larger <= 0.0 {
            return 0.0;
        }
        self.first.min(self.second) / larger
    }
}

/// Flags wallets holding a balanced book on both outcomes of the traded market.
#[derive(Debug, Clone)]
pub struct LpClassifier {
    config: LpConfig,
}

impl LpClassifier {
    pub fn new(config: LpConfig) -> Self {
        Self { config }
    }

    pub fn is_liquidity_provider(&self, positions: &[Position], market_id: &str) -> bool {
        let exposure = BookExposure::of(positions, market_id);
        if exposure.positions < 2 {
            return false;
        }
        exposure.first > self.config.min_side_value
            && exposure.second > self.config.min_side_value
            && exposure.balance() > self.config.balance_ratio
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(market: &str, outcome: &str, value: f64) -> Position {
        Position {
            market_id: market.to_string(),
            outcome: outcome.to_string(),
            outcome_index: None,
            current_value: value,
        }
    }

    fn classifier() -> LpClassifier {
        LpClassifier::new(LpConfig::default())
    }

    #[test]
    fn balanced_book_is_lp() {
        let positions = vec![pos("m", "Yes", 600.0), pos("m", "No", 500.0)];
        assert!(classifier().is_liquidity_provider(&positions, "m"));
    }

    #[test]
    fn lopsided_book_is_not_lp() {
        let positions = vec![pos("m", "Yes", 600.0), pos("m", "No", 50.0)];
        assert!(!classifier().is_liquidity_provider(&positions, "m"));
    }

    #[test]
    fn symmetric_under_side_swap() {
        let c = classifier();
        let balanced = vec![pos("m", "No", 600.0), pos("m", "Yes", 500.0)];
        let lopsided = vec![pos("m", "No", 600.0), pos("m", "Yes", 50.0)];
        assert!(c.is_liquidity_provider(&balanced, "m"));
        assert!(!c.is_liquidity_provider(&lopsided, "m"));
    }

    #[test]
    fn single_position_is_not_lp() {
        let positions = vec![pos("m", "Yes", 600.0), pos("other", "No", 600.0)];
        assert!(!classifier().is_liquidity_provider(&positions, "m"));
    }

    #[test]
    fn both_sides_need_minimum_size() {
        let positions = vec![pos("m", "Yes", 90.0), pos("m", "No", 80.0)];
        assert!(!classifier().is_liquidity_provider(&positions, "m"));
    }

    #[test]
    fn negative_values_count_by_magnitude() {
        let positions = vec![pos("m", "yes", -600.0), pos("m", "NO", 500.0)];
        assert!(classifier().is_liquidity_provider(&positions, "m"));
    }

    #[test]
    fn falls_back_to_outcome_index() {
        let mut up = pos("m", "Up", 400.0);
        up.outcome_index = Some(0);
        let mut down = pos("m", "Down", 380.0);
        down.outcome_index = Some(1);
        assert!(classifier().is_liquidity_provider(&[up, down], "m"));
    }

    #[test]
    fn exposure_balance() {
        let exposure = BookExposure::of(&[pos("m", "Yes", 600.0), pos("m", "No", 500.0)], "m");
        assert!((exposure.balance() - 500.0 / 600.0).abs() < 1e-9);
        assert_eq!(BookExposure::default().balance(), 0.0);
    }
}
