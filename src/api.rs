use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use polymarket_client_sdk::data::Client;
use polymarket_client_sdk::data::types::request::PositionsRequest;
use polymarket_client_sdk::data::types::response::Position as SdkPosition;
use polymarket_client_sdk::types::Address;
use reqwest::StatusCode;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

use crate::config::ApiConfig;
use crate::types::{HistoricalTrade, MarketMetadata, Position, WalletProfile, lenient_f64};

/// Page size for the data API positions endpoint.
const POSITIONS_PAGE_SIZE: i32 = 100;

/// Upper bound on position pages fetched per wallet.
const MAX_POSITION_PAGES: i32 = 5;

/// Page size and page cap when listing tagged markets on Gamma.
const TAGGED_MARKETS_PAGE_SIZE: usize = 500;
const MAX_TAGGED_MARKET_PAGES: usize = 20;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GatewayError {
    #[error("request timed out")]
    Timeout,
    #[error("unexpected HTTP status {0}")]
    Status(u16),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GatewayError::Timeout
        } else if e.is_decode() {
            GatewayError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            GatewayError::Status(status.as_u16())
        } else {
            GatewayError::Transport(e.to_string())
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Market data lookups used to enrich a trade.
///
/// `Ok(None)` means the entity does not exist; `Err` is a transient failure.
/// Callers treat both as "no data this cycle", but only the former is cached.
pub trait MarketDataGateway: Send + Sync {
    fn wallet_profile(
        &self,
        address: &str,
    ) -> impl Future<Output = GatewayResult<Option<WalletProfile>>> + Send;

    fn positions(
        &self,
        address: &str,
    ) -> impl Future<Output = GatewayResult<Option<Vec<Position>>>> + Send;

    fn market(
        &self,
        market_id: &str,
    ) -> impl Future<Output = GatewayResult<Option<MarketMetadata>>> + Send;

    fn recent_trades(
        &self,
        address: &str,
    ) -> impl Future<Output = GatewayResult<Option<Vec<HistoricalTrade>>>> + Send;

    /// Number of distinct markets the wallet has ever traded.
    fn markets_traded(
        &self,
        address: &str,
    ) -> impl Future<Output = GatewayResult<Option<u64>>> + Send;

    /// Condition ids of all open markets under the given category tags.
    fn markets_in_categories(
        &self,
        tag_ids: &[String],
    ) -> impl Future<Output = GatewayResult<HashSet<String>>> + Send;
}

/// Gateway backed by the public Polymarket data and Gamma APIs.
pub struct PolymarketGateway {
    data: Client,
    http: reqwest::Client,
    data_api_base: String,
    gamma_api_base: String,
    history_limit: u32,
}

impl PolymarketGateway {
    pub fn new(config: &ApiConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            data: Client::default(),
            http,
            data_api_base: config.data_api_base.trim_end_matches('/').to_string(),
            gamma_api_base: config.gamma_api_base.trim_end_matches('/').to_string(),
            history_limit: config.history_limit,
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> GatewayResult<Option<T>> {
        let resp = self.http.get(url).query(query).send().await?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(GatewayError::Status(status.as_u16()));
        }
        let body = resp
            .json::<T>()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))?;
        Ok(Some(body))
    }
}

impl MarketDataGateway for PolymarketGateway {
    async fn wallet_profile(&self, address: &str) -> GatewayResult<Option<WalletProfile>> {
        let url = format!("{}/public-profile", self.gamma_api_base);
        let profile: Option<ProfileResponse> = self
            .get_json(&url, &[("address", address.to_string())])
            .await?;
        Ok(profile.map(|p| WalletProfile {
            address: address.to_string(),
            display_name: p.pseudonym.or(p.name).filter(|n| !n.is_empty()),
            created_at: p.created_at.as_deref().and_then(parse_datetime),
        }))
    }

    async fn positions(&self, address: &str) -> GatewayResult<Option<Vec<Position>>> {
        let Ok(addr) = address.parse::<Address>() else {
            debug!("Not an EVM address, no positions: {address}");
            return Ok(None);
        };

        let mut all = Vec::new();
        let mut offset: i32 = 0;
        for _ in 0..MAX_POSITION_PAGES {
            let req = PositionsRequest::builder()
                .user(addr)
                .limit(POSITIONS_PAGE_SIZE)
                .map_err(sdk_error)?
                .offset(offset)
                .map_err(sdk_error)?
                .build();
            let page = self.data.positions(&req).await.map_err(sdk_error)?;
            let count = page.len() as i32;

            all.extend(page.iter().filter(|p| is_active(p)).map(to_position));

            if count < POSITIONS_PAGE_SIZE {
                break;
            }
            offset += POSITIONS_PAGE_SIZE;
        }

        debug!("Fetched {} active positions for {address}", all.len());
        Ok(Some(all))
    }

    async fn market(&self, market_id: &str) -> GatewayResult<Option<MarketMetadata>> {
        let url = format!("{}/markets", self.gamma_api_base);
        let markets: Option<Vec<MarketResponse>> = self
            .get_json(&url, &[("condition_ids", market_id.to_string())])
            .await?;
        Ok(markets
            .and_then(|list| list.into_iter().next())
            .map(|m| m.into_metadata(market_id)))
    }

    async fn recent_trades(&self, address: &str) -> GatewayResult<Option<Vec<HistoricalTrade>>> {
        let url = format!("{}/trades", self.data_api_base);
        let trades: Option<Vec<TradeRecord>> = self
            .get_json(
                &url,
                &[
                    ("user", address.to_string()),
                    ("limit", self.history_limit.to_string()),
                ],
            )
            .await?;
        Ok(trades.map(|list| {
            list.into_iter()
                .map(|t| HistoricalTrade {
                    tx_hash: t.transaction_hash.unwrap_or_default(),
                    market_id: t.condition_id.unwrap_or_default().to_lowercase(),
                    notional: t.size.unwrap_or(0.0) * t.price.unwrap_or(0.0),
                })
                .collect()
        }))
    }

    async fn markets_traded(&self, address: &str) -> GatewayResult<Option<u64>> {
        let url = format!("{}/traded", self.data_api_base);
        let traded: Option<TradedResponse> = self
            .get_json(&url, &[("user", address.to_string())])
            .await?;
        Ok(traded.and_then(|t| t.traded))
    }

    async fn markets_in_categories(&self, tag_ids: &[String]) -> GatewayResult<HashSet<String>> {
        let url = format!("{}/markets", self.gamma_api_base);
        let mut markets = HashSet::new();
        for tag in tag_ids {
            for page in 0..MAX_TAGGED_MARKET_PAGES {
                let query = [
                    ("tag_id", tag.clone()),
                    ("closed", "false".to_string()),
                    ("limit", TAGGED_MARKETS_PAGE_SIZE.to_string()),
                    ("offset", (page * TAGGED_MARKETS_PAGE_SIZE).to_string()),
                ];
                let list: Vec<MarketResponse> =
                    self.get_json(&url, &query).await?.unwrap_or_default();
                let count = list.len();
                markets.extend(
                    list.into_iter()
                        .filter_map(|m| m.condition_id)
                        .map(|id| id.to_lowercase()),
                );
                if count < TAGGED_MARKETS_PAGE_SIZE {
                    break;
                }
            }
        }
        debug!("Fetched {} market(s) for tags {:?}", markets.len(), tag_ids);
        Ok(markets)
    }
}

fn sdk_error<E: std::fmt::Display>(e: E) -> GatewayError {
    GatewayError::Transport(e.to_string())
}

/// Open, valued positions only: resolved markets trade at 0 or 1.
fn is_active(pos: &SdkPosition) -> bool {
    pos.current_value > Decimal::ZERO && pos.cur_price > Decimal::ZERO && pos.cur_price < Decimal::ONE
}

fn to_position(pos: &SdkPosition) -> Position {
    Position {
        market_id: format!("{}", pos.condition_id).to_lowercase(),
        outcome: pos.outcome.clone(),
        outcome_index: u32::try_from(pos.outcome_index).ok(),
        current_value: pos.current_value.to_f64().unwrap_or(0.0),
    }
}

/// Parse an RFC 3339 timestamp or a bare `YYYY-MM-DD` date (midnight UTC).
pub fn parse_datetime(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%#z") {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileResponse {
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    pseudonym: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarketResponse {
    #[serde(default)]
    condition_id: Option<String>,
    #[serde(default)]
    question: Option<String>,
    #[serde(default)]
    slug: Option<String>,
    #[serde(default)]
    end_date: Option<String>,
    #[serde(default)]
    end_date_iso: Option<String>,
}

impl MarketResponse {
    fn into_metadata(self, requested_id: &str) -> MarketMetadata {
        let end_date = self
            .end_date
            .as_deref()
            .and_then(parse_datetime)
            .or_else(|| self.end_date_iso.as_deref().and_then(parse_datetime));
        MarketMetadata {
            market_id: self
                .condition_id
                .map(|id| id.to_lowercase())
                .unwrap_or_else(|| requested_id.to_string()),
            title: self.question.unwrap_or_default(),
            slug: self.slug.unwrap_or_default(),
            end_date,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TradeRecord {
    #[serde(default)]
    transaction_hash: Option<String>,
    #[serde(default)]
    condition_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    size: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    price: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct TradedResponse {
    #[serde(default, alias = "total", deserialize_with = "lenient_u64")]
    traded: Option<u64>,
}

fn lenient_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(lenient_f64(deserializer)?
        .filter(|n| n.is_finite() && *n >= 0.0)
        .map(|n| n as u64))
}

/// In-memory gateway for tests, with per-method call counters.
#[cfg(test)]
pub(crate) mod stub {
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::{GatewayError, GatewayResult, MarketDataGateway};
    use crate::types::{HistoricalTrade, MarketMetadata, Position, WalletProfile};

    #[derive(Default)]
    pub struct StubGateway {
        pub profiles: Mutex<HashMap<String, WalletProfile>>,
        pub positions: Mutex<HashMap<String, Vec<Position>>>,
        pub markets: Mutex<HashMap<String, MarketMetadata>>,
        pub history: Mutex<HashMap<String, Vec<HistoricalTrade>>>,
        pub traded: Mutex<HashMap<String, u64>>,
        pub tagged: Mutex<HashSet<String>>,
        pub failing: AtomicBool,
        pub profile_calls: AtomicUsize,
        pub position_calls: AtomicUsize,
        pub market_calls: AtomicUsize,
        pub history_calls: AtomicUsize,
        pub traded_calls: AtomicUsize,
        pub tag_calls: AtomicUsize,
    }

    impl StubGateway {
        pub fn total_calls(&self) -> usize {
            self.profile_calls.load(Ordering::SeqCst)
                + self.position_calls.load(Ordering::SeqCst)
                + self.market_calls.load(Ordering::SeqCst)
                + self.history_calls.load(Ordering::SeqCst)
                + self.traded_calls.load(Ordering::SeqCst)
                + self.tag_calls.load(Ordering::SeqCst)
        }

        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        fn check(&self, counter: &AtomicUsize) -> GatewayResult<()> {
            counter.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                Err(GatewayError::Timeout)
            } else {
                Ok(())
            }
        }
    }

    impl MarketDataGateway for StubGateway {
        async fn wallet_profile(&self, address: &str) -> GatewayResult<Option<WalletProfile>> {
            self.check(&self.profile_calls)?;
            Ok(self.profiles.lock().unwrap().get(address).cloned())
        }

        async fn positions(&self, address: &str) -> GatewayResult<Option<Vec<Position>>> {
            self.check(&self.position_calls)?;
            Ok(self.positions.lock().unwrap().get(address).cloned())
        }

        async fn market(&self, market_id: &str) -> GatewayResult<Option<MarketMetadata>> {
            self.check(&self.market_calls)?;
            Ok(self.markets.lock().unwrap().get(market_id).cloned())
        }

        async fn recent_trades(
            &self,
            address: &str,
        ) -> GatewayResult<Option<Vec<HistoricalTrade>>> {
            self.check(&self.history_calls)?;
            Ok(self.history.lock().unwrap().get(address).cloned())
        }

        async fn markets_traded(&self, address: &str) -> GatewayResult<Option<u64>> {
            self.check(&self.traded_calls)?;
            Ok(self.traded.lock().unwrap().get(address).copied())
        }

        async fn markets_in_categories(&self, _tag_ids: &[String]) -> GatewayResult<HashSet<String>> {
            self.check(&self.tag_calls)?;
            Ok(self.tagged.lock().unwrap().clone())
        }
    }
}
