//! XKeen Panel - proxy endpoint failover for xkeen/Xray routers
//!
//! Keeps an Xray proxy outbound pointed at a working endpoint from a
//! subscription feed.
//!
//! ## Features
//!
//! - Subscription feeds with `vless://`, `vmess://`, `trojan://` and `ss://` descriptors
//! - Outbound synthesis into xkeen's `04_outbounds.json`
//! - Connectivity watchdog with automatic failover to the next endpoint
//! - Daemon restart/update through the `xkeen` wrapper
//! - REST API with JWT auth and Server-Sent Events for live status and logs

pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod models;
pub mod services;
pub mod subscription;
pub mod xray;

pub use config::Config;
pub use error::{PanelError, Result};
