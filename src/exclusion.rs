use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use tracing::{info, warn};

use crate::api::MarketDataGateway;

/// Set of market ids excluded from detection.
///
/// A refresh builds a complete new set and swaps the `Arc`, so a reader holds
/// either the old or the new set, never a partially populated one.
#[derive(Debug, Default)]
pub struct ExclusionSet {
    markets: RwLock<Arc<HashSet<String>>>,
}

impl ExclusionSet {
    pub fn new(markets: HashSet<String>) -> Self {
        Self {
            markets: RwLock::new(Arc::new(markets)),
        }
    }

    pub fn contains(&self, market_id: &str) -> bool {
        self.snapshot().contains(market_id)
    }

    /// Current set. Cheap: clones the `Arc`, not the set.
    pub fn snapshot(&self) -> Arc<HashSet<String>> {
        match self.markets.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn replace(&self, markets: HashSet<String>) {
        let next = Arc::new(markets);
        match self.markets.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}

/// Rebuild the exclusion set from the markets listed under `tag_ids`.
///
/// On gateway failure the previous set stays in place. Returns the size of the
/// active set afterwards.
pub async fn refresh<G: MarketDataGateway>(
    gateway: &G,
    tag_ids: &[String],
    exclusions: &ExclusionSet,
) -> usize {
    if tag_ids.is_empty() {
        return exclusions.len();
    }
    match gateway.markets_in_categories(tag_ids).await {
        Ok(markets) => {
            let count = markets.len();
            exclusions.replace(markets);
            info!("Exclusion set refreshed: {count} market(s) across {} tag(s)", tag_ids.len());
            count
        }
        Err(e) => {
            let kept = exclusions.len();
            warn!("Exclusion refresh failed, keeping {kept} market(s): {e}");
            kept
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::stub::StubGateway;

    fn set(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn replace_swaps_whole_set() {
        let exclusions = ExclusionSet::new(set(&["a", "b"]));
        let before = exclusions.snapshot();
        exclusions.replace(set(&["c"]));

        // a reader holding the old snapshot still sees the complete old set
        assert!(before.contains("a") && before.contains("b"));
        assert!(!exclusions.contains("a"));
        assert!(exclusions.contains("c"));
        assert_eq!(exclusions.len(), 1);
    }

    #[test]
    fn default_is_empty() {
        let exclusions = ExclusionSet::default();
        assert!(exclusions.is_empty());
        assert!(!exclusions.contains("anything"));
    }

    #[tokio::test]
    async fn refresh_swaps_in_tagged_markets() {
        let gateway = StubGateway::default();
        *gateway.tagged.lock().unwrap() = set(&["0xsports1", "0xsports2"]);
        let exclusions = ExclusionSet::new(set(&["0xstale"]));

        let count = refresh(&gateway, &["1".to_string()], &exclusions).await;
        assert_eq!(count, 2);
        assert!(exclusions.contains("0xsports1"));
        assert!(!exclusions.contains("0xstale"));
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_set() {
        let gateway = StubGateway::default();
        gateway.set_failing(true);
        let exclusions = ExclusionSet::new(set(&["0xkeep"]));

        assert_eq!(refresh(&gateway, &["1".to_string()], &exclusions).await, 1);
        assert!(exclusions.contains("0xkeep"));
    }

    #[tokio::test]
    async fn no_tags_skips_gateway() {
        let gateway = StubGateway::default();
        let exclusions = ExclusionSet::default();
        refresh(&gateway, &[], &exclusions).await;
        assert_eq!(gateway.total_calls(), 0);
    }
}
