use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

use crate::api::{GatewayResult, MarketDataGateway};
use crate::config::CacheConfig;
use crate::types::{HistoricalTrade, MarketMetadata, Position, WalletProfile};

/// Cached value with its insertion time. `None` records a confirmed "not found".
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: Option<V>,
    pub inserted_at: Instant,
}

/// Map whose entries are only valid for `ttl` after insertion.
#[derive(Debug)]
pub struct TtlCache<V> {
    entries: HashMap<String, CacheEntry<V>>,
    ttl: Duration,
    max_entries: usize,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    /// Fresh entry for `key`, or `None` on miss. Expired entries are dropped.
    pub fn get_at(&mut self, key: &str, now: Instant) -> Option<Option<V>> {
        let expired = match self.entries.get(key) {
            Some(entry) if now.duration_since(entry.inserted_at) < self.ttl => {
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }

    pub fn get(&mut self, key: &str) -> Option<Option<V>> {
        self.get_at(key, Instant::now())
    }

    pub fn insert_at(&mut self, key: &str, value: Option<V>, now: Instant) {
        if !self.entries.contains_key(key) && self.entries.len() >= self.max_entries {
            self.purge_expired(now);
            if self.entries.len() >= self.max_entries {
                self.evict_oldest();
            }
        }
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                inserted_at: now,
            },
        );
    }

    pub fn insert(&mut self, key: &str, value: Option<V>) {
        self.insert_at(key, value, Instant::now());
    }

    pub fn purge_expired(&mut self, now: Instant) {
        let ttl = self.ttl;
        self.entries
            .retain(|_, entry| now.duration_since(entry.inserted_at) < ttl);
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.inserted_at)
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Result of a cache-aside lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    Found(T),
    NotFound,
    /// The gateway failed; nothing was cached.
    Unavailable,
}

impl<T> Lookup<T> {
    pub fn found(self) -> Option<T> {
        match self {
            Lookup::Found(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Lookup::Unavailable)
    }
}

#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
}

impl CacheStats {
    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// TTL-cached view of the market data gateway, one cache per entity kind.
pub struct EnrichmentCache<G> {
    gateway: Arc<G>,
    profiles: Mutex<TtlCache<WalletProfile>>,
    positions: Mutex<TtlCache<Vec<Position>>>,
    markets: Mutex<TtlCache<MarketMetadata>>,
    history: Mutex<TtlCache<Vec<HistoricalTrade>>>,
    traded: Mutex<TtlCache<u64>>,
    stats: Arc<CacheStats>,
}

impl<G: MarketDataGateway> EnrichmentCache<G> {
    pub fn new(gateway: Arc<G>, config: &CacheConfig) -> Self {
        let ttl = Duration::from_secs;
        Self {
            gateway,
            profiles: Mutex::new(TtlCache::new(ttl(config.profile_ttl_secs), config.max_entries)),
            positions: Mutex::new(TtlCache::new(ttl(config.positions_ttl_secs), config.max_entries)),
            markets: Mutex::new(TtlCache::new(ttl(config.market_ttl_secs), config.max_entries)),
            history: Mutex::new(TtlCache::new(ttl(config.history_ttl_secs), config.max_entries)),
            traded: Mutex::new(TtlCache::new(ttl(config.traded_ttl_secs), config.max_entries)),
            stats: Arc::new(CacheStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<CacheStats> {
        Arc::clone(&self.stats)
    }

    pub async fn profile(&self, address: &str) -> Lookup<WalletProfile> {
        let gateway = &self.gateway;
        self.get_or_fetch("profile", &self.profiles, address, || {
            gateway.wallet_profile(address)
        })
        .await
    }

    pub async fn positions(&self, address: &str) -> Lookup<Vec<Position>> {
        let gateway = &self.gateway;
        self.get_or_fetch("positions", &self.positions, address, || {
            gateway.positions(address)
        })
        .await
    }

    pub async fn market(&self, market_id: &str) -> Lookup<MarketMetadata> {
        let gateway = &self.gateway;
        self.get_or_fetch("market", &self.markets, market_id, || {
            gateway.market(market_id)
        })
        .await
    }

    pub async fn trade_history(&self, address: &str) -> Lookup<Vec<HistoricalTrade>> {
        let gateway = &self.gateway;
        self.get_or_fetch("history", &self.history, address, || {
            gateway.recent_trades(address)
        })
        .await
    }

    pub async fn markets_traded(&self, address: &str) -> Lookup<u64> {
        let gateway = &self.gateway;
        self.get_or_fetch("traded", &self.traded, address, || {
            gateway.markets_traded(address)
        })
        .await
    }

    async fn get_or_fetch<T, F, Fut>(
        &self,
        kind: &str,
        cache: &Mutex<TtlCache<T>>,
        key: &str,
        fetch: F,
    ) -> Lookup<T>
    where
        T: Clone,
        F: FnOnce() -> Fut,
        Fut: Future<Output = GatewayResult<Option<T>>>,
    {
        if let Some(cached) = lock(cache).get(key) {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            return match cached {
                Some(value) => Lookup::Found(value),
                None => Lookup::NotFound,
            };
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);

        match fetch().await {
            Ok(value) => {
                lock(cache).insert(key, value.clone());
                match value {
                    Some(value) => Lookup::Found(value),
                    None => Lookup::NotFound,
                }
            }
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                debug!("{kind} lookup for {key} failed: {e}");
                Lookup::Unavailable
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
