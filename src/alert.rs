use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::AlertConfig;
use crate::scoring::ScoreResult;
use crate::types::Trade;

pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";
pub const POLYGONSCAN_TX_URL: &str = "https://polygonscan.com/tx/";

pub const STARTUP_MESSAGE: &str =
    "🐋 <b>Whale Detector started</b>\n\nMonitoring Polymarket for suspicious large trades...";
pub const SHUTDOWN_MESSAGE: &str = "🛑 <b>Whale Detector stopped</b>";

/// Where formatted alerts go. Returns whether delivery succeeded.
pub trait AlertSink {
    fn send(&self, text: &str) -> impl Future<Output = bool> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Urgency {
    High,
    Medium,
    Low,
}

impl Urgency {
    pub fn from_score(score: f64) -> Self {
        if score >= 70.0 {
            Urgency::High
        } else if score >= 50.0 {
            Urgency::Medium
        } else {
            Urgency::Low
        }
    }

    fn badge(self) -> &'static str {
        match self {
            Urgency::High => "🚨🐋",
            Urgency::Medium => "⚠️🐋",
            Urgency::Low => "📊",
        }
    }
}

impl std::fmt::Display for Urgency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Urgency::High => write!(f, "HIGH"),
            Urgency::Medium => write!(f, "MEDIUM"),
            Urgency::Low => write!(f, "LOW"),
        }
    }
}

/// A scored trade that crossed the alert threshold, with the context shown to the reader.
#[derive(Debug, Clone, Serialize)]
pub struct WhaleAlert {
    pub trade: Trade,
    pub market_title: String,
    pub trader: String,
    pub wallet_age_days: Option<u32>,
    /// Share of the wallet's portfolio already in this market; `None` for a first position.
    pub portfolio_share: Option<f64>,
    pub markets_traded: Option<u64>,
    pub open_positions: usize,
    pub score: ScoreResult,
    pub urgency: Urgency,
}

pub fn format_alert(alert: &WhaleAlert) -> String {
    let trade = &alert.trade;
    let mut lines = vec![
        format!(
            "{} <b>WHALE ALERT</b> [{}]",
            alert.urgency.badge(),
            alert.urgency
        ),
        String::new(),
        format!("<b>Market:</b> {}", escape_html(&alert.market_title)),
        format!(
            "<b>Bet:</b> {} ({})",
            escape_html(&trade.outcome),
            trade.side
        ),
        format!("<b>Amount:</b> {}", format_usd(trade.notional())),
    ];

    let odds = trade
        .decimal_odds()
        .map(|o| format!(", {o:.1}x odds"))
        .unwrap_or_default();
    lines.push(format!(
        "<b>Price:</b> {:.2} ({:.0}% implied{odds})",
        trade.price,
        trade.implied_probability() * 100.0
    ));

    lines.push(String::new());
    lines.push("<b>Trader Profile:</b>".to_string());
    lines.push(format!("• Username: {}", escape_html(&alert.trader)));
    lines.push(match alert.wallet_age_days {
        Some(days) => format!("• Account Age: {days} days"),
        None => "• Account Age: unknown".to_string(),
    });
    lines.push(match alert.portfolio_share {
        Some(share) => format!("• Portfolio Focus: {:.0}% in this market", share * 100.0),
        None => "• Portfolio Focus: first position in this market".to_string(),
    });
    lines.push(match alert.markets_traded {
        Some(n) => format!("• Total Markets: {n}"),
        None => "• Total Markets: unknown".to_string(),
    });
    lines.push(format!("• Open Positions: {}", alert.open_positions));

    lines.push(String::new());
    lines.push("<b>Signals:</b>".to_string());
    for signal in alert.score.sorted() {
        lines.push(format!(
            "• {} (+{:.1}): {}",
            signal.kind,
            signal.score,
            escape_html(&signal.detail)
        ));
    }

    lines.push(String::new());
    lines.push(format!(
        "<b>Whale Score:</b> {:.1}/100",
        alert.score.total()
    ));
    lines.push(String::new());
    lines.push(format!(
        "🔗 <a href=\"{POLYGONSCAN_TX_URL}{}\">View Transaction</a>",
        escape_html(&trade.tx_hash)
    ));

    lines.join("\n")
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// `$12,345.67`
pub fn format_usd(amount: f64) -> String {
    let cents = (amount.abs() * 100.0).round() as u64;
    let whole = (cents / 100).to_string();
    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, c) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    let sign = if amount < 0.0 { "-" } else { "" };
    format!("{sign}${grouped}.{:02}", cents % 100)
}

// ── Rate limiting ───────────────────────────────────────────────

/// Spaces sends at least `min_interval` apart; callers wait out the remainder.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: Mutex::new(None),
        }
    }

    pub async fn wait(&self) {
        let mut last = self.last.lock().await;
        if let Some(prev) = *last {
            let ready_at = prev + self.min_interval;
            if ready_at > Instant::now() {
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }
}

// ── Telegram ────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct TelegramTarget {
    token: String,
    chat_id: String,
}

/// Sends alerts to Telegram, or only logs them in dry-run mode.
pub struct AlertEmitter {
    http: reqwest::Client,
    telegram: Option<TelegramTarget>,
    api_base: String,
    limiter: RateLimiter,
}

impl AlertEmitter {
    /// Dry run when `dry_run` is set or either Telegram credential is missing.
    pub fn new(config: &AlertConfig, dry_run: bool) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build Telegram HTTP client")?;

        let telegram = match (&config.telegram_bot_token, &config.telegram_chat_id) {
            (Some(token), Some(chat_id)) if !dry_run => Some(TelegramTarget {
                token: token.clone(),
                chat_id: chat_id.clone(),
            }),
            _ => None,
        };

        Ok(Self {
            http,
            telegram,
            api_base: TELEGRAM_API_BASE.to_string(),
            limiter: RateLimiter::new(Duration::from_secs(config.min_interval_secs)),
        })
    }

    pub fn is_dry_run(&self) -> bool {
        self.telegram.is_none()
    }

    async fn post(&self, target: &TelegramTarget, text: &str) -> bool {
        let url = format!("{}/bot{}/sendMessage", self.api_base, target.token);
        let body = json!({
            "chat_id": target.chat_id,
            "text": text,
            "parse_mode": "HTML",
            "disable_web_page_preview": true,
        });

        match self.http.post(&url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                let status = resp.status();
                let detail = resp.text().await.unwrap_or_default();
                warn!("Telegram sendMessage returned {status}: {detail}");
                false
            }
            // Error text can carry the URL, and with it the bot token.
            Err(e) => {
                warn!("Telegram sendMessage failed: {}", e.without_url());
                false
            }
        }
    }
}

impl AlertSink for AlertEmitter {
    async fn send(&self, text: &str) -> bool {
        self.limiter.wait().await;
        match &self.telegram {
            Some(target) => self.post(target, text).await,
            None => {
                info!("[dry-run] alert:\n{text}");
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::{Signal, SignalKind};
    use crate::types::TradeSide;
    use chrono::Utc;

    fn alert(score: f64) -> WhaleAlert {
        let signals = vec![
            Signal {
                kind: SignalKind::Longshot,
                score: score - 30.0,
                detail: "bought at 10¢ (10.0x odds)".into(),
            },
            Signal {
                kind: SignalKind::FreshWallet,
                score: 30.0,
                detail: "account is 0 day(s) old".into(),
            },
        ];
        WhaleAlert {
            trade: Trade {
                tx_hash: "0xdeadbeef".into(),
                market_id: "0xm".into(),
                market_slug: "slug".into(),
                title: None,
                wallet: "0xw".into(),
                trader_name: None,
                side: TradeSide::Buy,
                outcome: "Yes".into(),
                size: 12_345.0,
                price: 0.1,
                timestamp: Utc::now(),
            },
            market_title: "Will <X> & Y happen?".into(),
            trader: "whale".into(),
            wallet_age_days: Some(0),
            portfolio_share: Some(0.8),
            markets_traded: Some(3),
            open_positions: 2,
            score: ScoreResult::from_signals(signals),
            urgency: Urgency::from_score(score),
        }
    }

    #[test]
    fn urgency_tiers() {
        assert_eq!(Urgency::from_score(70.0), Urgency::High);
        assert_eq!(Urgency::from_score(69.9), Urgency::Medium);
        assert_eq!(Urgency::from_score(50.0), Urgency::Medium);
        assert_eq!(Urgency::from_score(49.9), Urgency::Low);
    }

    #[test]
    fn formats_alert_message() {
        let text = format_alert(&alert(55.0));
        assert!(text.starts_with("⚠️🐋 <b>WHALE ALERT</b> [MEDIUM]"));
        assert!(text.contains("<b>Market:</b> Will &lt;X&gt; &amp; Y happen?"));
        assert!(text.contains("<b>Bet:</b> Yes (BUY)"));
        assert!(text.contains("<b>Amount:</b> $1,234.50"));
        assert!(text.contains("(10% implied, 10.0x odds)"));
        assert!(text.contains("Portfolio Focus: 80% in this market"));
        assert!(text.contains("• Total Markets: 3\n• Open Positions: 2"));
        assert!(text.contains("<b>Whale Score:</b> 55.0/100"));
        assert!(text.contains("https://polygonscan.com/tx/0xdeadbeef"));

        // highest signal first
        let fresh = text.find("Fresh wallet (+30.0)").unwrap();
        let longshot = text.find("Longshot (+25.0)").unwrap();
        assert!(fresh < longshot);
    }

    #[test]
    fn unknown_markets_traded() {
        let mut a = alert(55.0);
        a.markets_traded = None;
        assert!(format_alert(&a).contains("• Total Markets: unknown"));
    }

    #[test]
    fn usd_grouping() {
        assert_eq!(format_usd(0.5), "$0.50");
        assert_eq!(format_usd(999.999), "$1,000.00");
        assert_eq!(format_usd(1_234_567.8), "$1,234,567.80");
        assert_eq!(format_usd(-1500.0), "-$1,500.00");
    }

    #[test]
    fn missing_credentials_means_dry_run() {
        let config = AlertConfig {
            telegram_bot_token: Some("token".into()),
            telegram_chat_id: None,
            ..AlertConfig::default()
        };
        assert!(AlertEmitter::new(&config, false).unwrap().is_dry_run());

        let full = AlertConfig {
            telegram_bot_token: Some("token".into()),
            telegram_chat_id: Some("42".into()),
            ..AlertConfig::default()
        };
        assert!(!AlertEmitter::new(&full, false).unwrap().is_dry_run());
        assert!(AlertEmitter::new(&full, true).unwrap().is_dry_run());
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limiter_spaces_sends() {
        let limiter = RateLimiter::new(Duration::from_secs(3));
        let start = Instant::now();
        limiter.wait().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
        limiter.wait().await;
        assert_eq!(start.elapsed(), Duration::from_secs(3));

        tokio::time::advance(Duration::from_secs(10)).await;
        let before = Instant::now();
        limiter.wait().await;
        assert_eq!(before.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn dry_run_send_succeeds() {
        let emitter = AlertEmitter::new(&AlertConfig::default(), true).unwrap();
        assert!(emitter.send("hello").await);
    }
}
