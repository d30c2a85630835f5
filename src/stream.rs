use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::config::StreamConfig;
use crate::types::RawEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Subscribed,
    Healthy,
    Stale,
    Closing,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "DISCONNECTED",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Subscribed => "SUBSCRIBED",
            ConnectionState::Healthy => "HEALTHY",
            ConnectionState::Stale => "STALE",
            ConnectionState::Closing => "CLOSING",
        };
        f.write_str(s)
    }
}

/// The one subscription sent after every connect: all trades on the activity feed.
pub fn subscription_message() -> Value {
    json!({
        "action": "subscribe",
        "subscriptions": [{
            "topic": "activity",
            "type": "trades"
        }]
    })
}

// ── Backoff ─────────────────────────────────────────────────────

/// Doubling reconnect delay, capped, reset after a successful subscribe.
#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        let max = max.max(min);
        Self {
            min,
            max,
            current: min,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.min;
    }
}

// ── Health ──────────────────────────────────────────────────────

/// Time of the last frame of any kind seen on the socket.
#[derive(Debug)]
pub struct HealthMonitor {
    last_seen: Mutex<Instant>,
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self {
            last_seen: Mutex::new(Instant::now()),
        }
    }

    pub fn observe(&self) {
        *self.lock() = Instant::now();
    }

    pub fn is_stale_at(&self, now: Instant, stale_after: Duration) -> bool {
        now.saturating_duration_since(*self.lock()) > stale_after
    }

    pub fn is_stale(&self, stale_after: Duration) -> bool {
        self.is_stale_at(Instant::now(), stale_after)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Instant> {
        self.last_seen
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Check the monitor every `check_every`; notify once and exit when it goes stale.
///
/// Also exits when shutdown is signalled. Only reads the monitor.
pub fn spawn_watchdog(
    monitor: Arc<HealthMonitor>,
    stale_after: Duration,
    check_every: Duration,
    stale: Arc<Notify>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(check_every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => return,
            }
            if *shutdown.borrow() {
                return;
            }
            if monitor.is_stale(stale_after) {
                stale.notify_one();
                return;
            }
        }
    })
}

// ── Stats ───────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct ConnectorStats {
    pub messages: AtomicU64,
    pub malformed: AtomicU64,
    pub forwarded: AtomicU64,
    pub dropped: AtomicU64,
    pub reconnects: AtomicU64,
    pub stale_closes: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectorSnapshot {
    pub messages: u64,
    pub malformed: u64,
    pub forwarded: u64,
    pub dropped: u64,
    pub reconnects: u64,
    pub stale_closes: u64,
}

impl ConnectorStats {
    pub fn snapshot(&self) -> ConnectorSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        ConnectorSnapshot {
            messages: load(&self.messages),
            malformed: load(&self.malformed),
            forwarded: load(&self.forwarded),
            dropped: load(&self.dropped),
            reconnects: load(&self.reconnects),
            stale_closes: load(&self.stale_closes),
        }
    }
}

// ── Connector ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Shutdown,
    Stale,
    Closed,
    /// The processor side of the channel is gone.
    ReceiverGone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Inbound {
    Forwarded,
    Dropped,
    Ignored,
    Malformed,
    ReceiverGone,
}

/// Keeps one RTDS subscription alive and forwards trade payloads to the processor.
pub struct StreamConnector {
    config: StreamConfig,
    tx: mpsc::Sender<RawEvent>,
    shutdown: watch::Receiver<bool>,
    state: watch::Sender<ConnectionState>,
    stats: Arc<ConnectorStats>,
}

impl StreamConnector {
    pub fn new(
        config: StreamConfig,
        tx: mpsc::Sender<RawEvent>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            config,
            tx,
            shutdown,
            state,
            stats: Arc::new(ConnectorStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<ConnectorStats> {
        Arc::clone(&self.stats)
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn set_state(&self, next: ConnectionState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            debug!("RTDS {prev} -> {next}");
        }
    }

    fn stopping(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Reconnect loop. Returns once shutdown is signalled or the receiver is dropped.
    pub async fn run(mut self) {
        let mut backoff = Backoff::new(self.config.backoff_min(), self.config.backoff_max());

        loop {
            if self.stopping() {
                break;
            }
            self.set_state(ConnectionState::Connecting);
            let end = match self.session(&mut backoff).await {
                Ok(end) => end,
                Err(e) => {
                    warn!("RTDS session failed: {e:#}");
                    SessionEnd::Closed
                }
            };
            self.set_state(ConnectionState::Disconnected);

            match end {
                SessionEnd::Shutdown => break,
                SessionEnd::ReceiverGone => {
                    info!("Trade receiver dropped, stopping RTDS connector");
                    break;
                }
                SessionEnd::Stale | SessionEnd::Closed => {}
            }
            if self.stopping() {
                break;
            }

            let delay = backoff.next_delay();
            self.stats.reconnects.fetch_add(1, Ordering::Relaxed);
            info!("Reconnecting to RTDS in {}s", delay.as_secs());
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.changed() => break,
            }
        }

        self.set_state(ConnectionState::Disconnected);
        info!("RTDS connector stopped");
    }

    async fn session(&mut self, backoff: &mut Backoff) -> Result<SessionEnd> {
        let url = self.config.ws_url.clone();
        let ws = tokio::select! {
            res = connect_async(url.as_str()) => res.context("RTDS connect failed")?.0,
            _ = self.shutdown.changed() => return Ok(SessionEnd::Shutdown),
        };
        let (mut write, mut read) = ws.split();

        write
            .send(Message::Text(subscription_message().to_string().into()))
            .await
            .context("RTDS subscribe failed")?;
        self.set_state(ConnectionState::Subscribed);
        backoff.reset();
        info!("Subscribed to RTDS activity/trades at {url}");

        let monitor = Arc::new(HealthMonitor::new());
        let stale = Arc::new(Notify::new());
        let watchdog = spawn_watchdog(
            Arc::clone(&monitor),
            self.config.stale_after(),
            self.config.health_check_interval(),
            Arc::clone(&stale),
            self.shutdown.clone(),
        );

        let mut ping = tokio::time::interval(self.config.ping_interval());
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ping.tick().await;

        let end = loop {
            tokio::select! {
                _ = self.shutdown.changed() => break SessionEnd::Shutdown,
                _ = stale.notified() => {
                    self.set_state(ConnectionState::Stale);
                    self.stats.stale_closes.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        "No RTDS traffic for over {}s, closing connection",
                        self.config.stale_after_secs
                    );
                    break SessionEnd::Stale;
                }
                _ = ping.tick() => {
                    if let Err(e) = write.send(Message::Ping(vec![].into())).await {
                        warn!("RTDS ping failed: {e}");
                        break SessionEnd::Closed;
                    }
                }
                msg = read.next() => match msg {
                    Some(Ok(msg)) => {
                        monitor.observe();
                        if *self.state.borrow() == ConnectionState::Subscribed {
                            self.set_state(ConnectionState::Healthy);
                        }
                        match msg {
                            Message::Text(text) => {
                                if self.handle_text(text.as_str()) == Inbound::ReceiverGone {
                                    break SessionEnd::ReceiverGone;
                                }
                            }
                            Message::Close(frame) => {
                                info!("RTDS closed by server: {frame:?}");
                                break SessionEnd::Closed;
                            }
                            _ => {}
                        }
                    }
                    Some(Err(e)) => {
                        warn!("RTDS read error: {e}");
                        break SessionEnd::Closed;
                    }
                    None => {
                        info!("RTDS stream ended");
                        break SessionEnd::Closed;
                    }
                },
            }
        };

        watchdog.abort();
        self.set_state(ConnectionState::Closing);
        let _ = write.send(Message::Close(None)).await;
        Ok(end)
    }

    fn handle_text(&self, text: &str) -> Inbound {
        self.stats.messages.fetch_add(1, Ordering::Relaxed);
        let parsed: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(_) => {
                self.stats.malformed.fetch_add(1, Ordering::Relaxed);
                debug!("Dropping non-JSON RTDS message ({} bytes)", text.len());
                return Inbound::Malformed;
            }
        };

        let topic = parsed.get("topic").and_then(Value::as_str);
        let kind = parsed.get("type").and_then(Value::as_str);
        if topic != Some("activity") || kind.is_some_and(|k| k != "trades") {
            return Inbound::Ignored;
        }
        let Some(payload) = parsed.get("payload").filter(|p| p.is_object()) else {
            self.stats.malformed.fetch_add(1, Ordering::Relaxed);
            return Inbound::Malformed;
        };

        match self.tx.try_send(RawEvent::new(payload.clone())) {
            Ok(()) => {
                self.stats.forwarded.fetch_add(1, Ordering::Relaxed);
                Inbound::Forwarded
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("Trade channel full, dropping event");
                Inbound::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Inbound::ReceiverGone,
        }
    }
}
