use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connection status snapshot exposed to the dashboard
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub connected: bool,
    pub xray_running: bool,
    pub restarting: bool,
    pub current_server: String,
    pub protocol: String,
    pub latency_ms: i64,
    pub uptime: String,
    pub last_check: Option<DateTime<Utc>>,
    pub watchdog_active: bool,
}

/// Render an uptime as `"{h}h {m}m"`, or `"{m}m"` within the first hour
pub fn format_uptime(uptime: Duration) -> String {
    let total_minutes = uptime.as_secs() / 60;
    let hours = total_minutes / 60;
    let minutes = total_minutes % 60;
    if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else {
        format!("{}m", minutes)
    }
}
