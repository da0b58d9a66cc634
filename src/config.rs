use crate::error::{PanelError, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// API server configuration
    pub api: ApiServerConfig,
    /// XKeen / Xray integration
    pub xkeen: XkeenConfig,
    /// Watchdog configuration
    pub watchdog: WatchdogConfig,
    /// Admin credentials
    pub admin: AdminConfig,
    /// Logging configuration
    pub log: LogConfig,
    /// Directory holding subscription.json
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Port for the API server (default: 3000)
    pub port: u16,
    /// Host to bind to (default: 0.0.0.0)
    pub host: String,
    /// Allowed CORS origins (comma-separated, empty = localhost only)
    pub cors_origins: Vec<String>,
    /// JWT secret for token generation
    pub jwt_secret: String,
}

#[derive(Debug, Clone)]
pub struct XkeenConfig {
    /// Path to the xkeen CLI
    pub xkeen_path: PathBuf,
    /// Path to the Xray outbounds document rewritten on failover
    pub outbounds_file: PathBuf,
}

#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    /// Seconds between probes
    pub check_interval: u64,
    /// URL probed through the transparent proxy
    pub check_url: String,
    /// Consecutive failures before failover
    pub max_fails: u32,
    /// Durable log sink (None disables it)
    pub log_file: Option<PathBuf>,
}

/// Intervals below this are treated as misconfiguration.
pub const MIN_CHECK_INTERVAL: Duration = Duration::from_secs(10);
/// Replacement for intervals below [`MIN_CHECK_INTERVAL`].
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(120);

impl WatchdogConfig {
    /// Probe interval with the sanity floor applied
    pub fn effective_interval(&self) -> Duration {
        let configured = Duration::from_secs(self.check_interval);
        if configured < MIN_CHECK_INTERVAL {
            DEFAULT_CHECK_INTERVAL
        } else {
            configured
        }
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            check_interval: 120,
            check_url: "https://www.google.com".to_string(),
            max_fails: 3,
            log_file: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AdminConfig {
    /// Admin username for the dashboard
    pub username: String,
    /// Admin password for the dashboard
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let log_file = get_env_or("LOG_FILE", "xkeen-panel.log");

        Ok(Config {
            api: ApiServerConfig {
                port: get_env_or("PANEL_PORT", "3000").parse().map_err(|_| {
                    PanelError::InvalidConfig("PANEL_PORT must be a valid port number".into())
                })?,
                host: get_env_or("PANEL_HOST", "0.0.0.0"),
                cors_origins: get_env_or("CORS_ORIGINS", "")
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                jwt_secret: get_env_or("JWT_SECRET", ""),
            },
            xkeen: XkeenConfig {
                xkeen_path: get_env_or("XKEEN_PATH", "/opt/sbin/xkeen").into(),
                outbounds_file: get_env_or(
                    "OUTBOUNDS_FILE",
                    "/opt/etc/xray/configs/04_outbounds.json",
                )
                .into(),
            },
            watchdog: WatchdogConfig {
                check_interval: get_env_or("CHECK_INTERVAL", "120").parse().map_err(|_| {
                    PanelError::InvalidConfig("CHECK_INTERVAL must be a number of seconds".into())
                })?,
                check_url: get_env_or("CHECK_URL", "https://www.google.com"),
                max_fails: get_env_or("MAX_FAILS", "3").parse().map_err(|_| {
                    PanelError::InvalidConfig("MAX_FAILS must be a positive number".into())
                })?,
                log_file: if log_file.trim().is_empty() {
                    None
                } else {
                    Some(PathBuf::from(log_file))
                },
            },
            admin: AdminConfig {
                username: get_env_or("PANEL_ADMIN_USER", "admin"),
                password: get_env_or("PANEL_ADMIN_PASSWORD", "admin"),
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "pretty"),
            },
            data_dir: get_env_or("DATA_DIR", "data").into(),
        })
    }

    /// Get the API server address
    pub fn api_addr(&self) -> String {
        format!("{}:{}", self.api.host, self.api.port)
    }
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
