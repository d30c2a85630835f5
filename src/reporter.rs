use chrono::Utc;
use serde::Serialize;

use crate::alert::WhaleAlert;
use crate::state::StatsSnapshot;

#[derive(Serialize)]
struct AlertReport<'a> {
    event: &'static str,
    timestamp: String,
    delivered: bool,
    #[serde(flatten)]
    alert: &'a WhaleAlert,
}

/// Emit an alert as a single JSON line to stdout.
pub fn report_alert(alert: &WhaleAlert, delivered: bool) {
    let report = AlertReport {
        event: "whale_alert",
        timestamp: Utc::now().to_rfc3339(),
        delivered,
        alert,
    };
    if let Ok(json) = serde_json::to_string(&report) {
        println!("{json}");
    }
}

/// Emit a periodic stats snapshot as a single JSON line to stdout.
pub fn report_stats(stats: &StatsSnapshot) {
    if let Ok(json) = serde_json::to_string(stats) {
        println!("{json}");
    }
}

/// Emit the final counters as pretty-printed JSON to stdout.
pub fn report_exit_summary(stats: &StatsSnapshot) {
    if let Ok(json) = serde_json::to_string_pretty(stats) {
        println!("{json}");
    }
}
