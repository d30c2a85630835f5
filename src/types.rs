use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Trade payload as received from the stream, before normalization.
#[derive(Debug, Clone)]
pub struct RawEvent {
    pub payload: serde_json::Value,
    pub received_at: DateTime<Utc>,
}

impl RawEvent {
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            payload,
            received_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl std::fmt::Display for TradeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeSide::Buy => write!(f, "BUY"),
            TradeSide::Sell => write!(f, "SELL"),
        }
    }
}

/// A normalized trade. Immutable once built by [`Trade::from_payload`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trade {
    pub tx_hash: String,
    pub market_id: String,
    pub market_slug: String,
    pub title: Option<String>,
    pub wallet: String,
    pub trader_name: Option<String>,
    pub side: TradeSide,
    pub outcome: String,
    pub size: f64,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

impl Trade {
    /// USD cost of the trade (`size × price`).
    pub fn notional(&self) -> f64 {
        self.size * self.price
    }

    /// `1 / price`, or `None` at price 0.
    pub fn decimal_odds(&self) -> Option<f64> {
        if self.price > 0.0 {
            Some(1.0 / self.price)
        } else {
            None
        }
    }

    /// Probability implied by the trade for the side actually taken.
    pub fn implied_probability(&self) -> f64 {
        match self.side {
            TradeSide::Buy => self.price,
            TradeSide::Sell => 1.0 - self.price,
        }
    }

    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            tx_hash: self.tx_hash.clone(),
            market_id: self.market_id.clone(),
        }
    }

    /// Normalize a stream payload into a `Trade`.
    ///
    /// The activity feed is inconsistent about key casing, so both the
    /// camelCase and snake_case spellings are accepted for the wallet, condition,
    /// transaction hash and event slug fields. Numeric fields may be JSON numbers
    /// or decimal strings. `received_at` is used when the payload has no timestamp.
    pub fn from_payload(
        payload: &serde_json::Value,
        received_at: DateTime<Utc>,
    ) -> Result<Self, NormalizeError> {
        let raw = TradePayload::deserialize(payload)
            .map_err(|e| NormalizeError::Malformed(e.to_string()))?;

        let wallet = non_empty(raw.proxy_wallet).ok_or(NormalizeError::MissingWallet)?;
        let tx_hash =
            non_empty(raw.transaction_hash).ok_or(NormalizeError::MissingField("transactionHash"))?;
        let market_id =
            non_empty(raw.condition_id).ok_or(NormalizeError::MissingField("conditionId"))?;
        let side = match raw.side.as_deref().map(str::to_ascii_uppercase).as_deref() {
            Some("BUY") => TradeSide::Buy,
            Some("SELL") => TradeSide::Sell,
            Some(other) => return Err(NormalizeError::UnknownSide(other.to_string())),
            None => return Err(NormalizeError::MissingField("side")),
        };
        let size = raw.size.ok_or(NormalizeError::MissingField("size"))?;
        let price = raw.price.ok_or(NormalizeError::MissingField("price"))?;
        if !size.is_finite() || size < 0.0 {
            return Err(NormalizeError::InvalidSize(size));
        }
        if !price.is_finite() || !(0.0..=1.0).contains(&price) {
            return Err(NormalizeError::PriceOutOfRange(price));
        }

        let timestamp = raw
            .timestamp
            .and_then(timestamp_from_epoch)
            .unwrap_or(received_at);

        Ok(Self {
            tx_hash,
            market_id: market_id.to_lowercase(),
            market_slug: non_empty(raw.slug)
                .or_else(|| non_empty(raw.event_slug))
                .unwrap_or_default(),
            title: non_empty(raw.title),
            wallet: wallet.to_lowercase(),
            trader_name: non_empty(raw.pseudonym).or_else(|| non_empty(raw.name)),
            side,
            outcome: raw.outcome.unwrap_or_default(),
            size,
            price,
            timestamp,
        })
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum NormalizeError {
    #[error("malformed trade payload: {0}")]
    Malformed(String),
    #[error("trade payload has no wallet address")]
    MissingWallet,
    #[error("trade payload is missing `{0}`")]
    MissingField(&'static str),
    #[error("unknown trade side `{0}`")]
    UnknownSide(String),
    #[error("invalid trade size {0}")]
    InvalidSize(f64),
    #[error("price {0} outside [0, 1]")]
    PriceOutOfRange(f64),
}

/// Identity of a processed trade event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub tx_hash: String,
    pub market_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TradePayload {
    #[serde(default, alias = "proxy_wallet")]
    proxy_wallet: Option<String>,
    #[serde(default, alias = "transaction_hash")]
    transaction_hash: Option<String>,
    #[serde(default, alias = "condition_id")]
    condition_id: Option<String>,
    #[serde(default)]
    slug: Option<String>,
    #[serde(default, alias = "event_slug")]
    event_slug: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    side: Option<String>,
    #[serde(default)]
    outcome: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    size: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    price: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    timestamp: Option<f64>,
    #[serde(default)]
    pseudonym: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// Epoch seconds, or milliseconds when the value is too large to be seconds.
fn timestamp_from_epoch(value: f64) -> Option<DateTime<Utc>> {
    if !value.is_finite() || value <= 0.0 {
        return None;
    }
    let millis = if value > 1e12 { value } else { value * 1000.0 };
    Utc.timestamp_millis_opt(millis as i64).single()
}

/// Deserialize an optional number that may be encoded as a JSON number or string.
pub(crate) fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrStr {
        Num(f64),
        Str(String),
    }

    match Option::<NumOrStr>::deserialize(deserializer)? {
        Some(NumOrStr::Num(n)) => Ok(Some(n)),
        Some(NumOrStr::Str(s)) if s.trim().is_empty() => Ok(None),
        Some(NumOrStr::Str(s)) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}

/// Public profile of a wallet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WalletProfile {
    pub address: String,
    pub display_name: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl WalletProfile {
    /// Whole days since account creation, `None` when the creation date is unknown.
    pub fn age_days(&self, now: DateTime<Utc>) -> Option<u32> {
        let created = self.created_at?;
        let days = (now - created).num_days().max(0);
        Some(u32::try_from(days).unwrap_or(u32::MAX))
    }
}

/// Snapshot of one wallet position. May be stale within its cache TTL.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Position {
    pub market_id: String,
    pub outcome: String,
    pub outcome_index: Option<u32>,
    pub current_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketMetadata {
    pub market_id: String,
    pub title: String,
    pub slug: String,
    pub end_date: Option<DateTime<Utc>>,
}

/// A past trade of a wallet, reduced to what the size-anomaly signal needs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoricalTrade {
    pub tx_hash: String,
    pub market_id: String,
    pub notional: f64,
}
