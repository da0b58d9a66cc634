//! Subscription store
//!
//! Owns the endpoint list, the active pointer and the feed URL, and mirrors
//! every mutation to `subscription.json` before releasing its lock.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, instrument};

use super::feed::FeedSource;
use super::parser::parse_subscription;
use crate::error::{PanelError, Result};
use crate::models::{Endpoint, SubscriptionData};

const SUBSCRIPTION_FILE: &str = "subscription.json";

/// Subscription state plus its on-disk copy
pub struct SubscriptionStore {
    data_dir: PathBuf,
    data: RwLock<SubscriptionData>,
    feed: Arc<dyn FeedSource>,
}

impl SubscriptionStore {
    pub fn new(data_dir: impl Into<PathBuf>, feed: Arc<dyn FeedSource>) -> Self {
        Self {
            data_dir: data_dir.into(),
            data: RwLock::new(SubscriptionData::default()),
            feed,
        }
    }

    pub fn file_path(&self) -> PathBuf {
        self.data_dir.join(SUBSCRIPTION_FILE)
    }

    /// Load persisted state; a missing file leaves the store empty
    pub fn load(&self) -> Result<()> {
        let path = self.file_path();
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No subscription file at {}", path.display());
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let mut loaded: SubscriptionData = serde_json::from_slice(&raw)?;
        if loaded.active_id >= loaded.servers.len() {
            loaded.active_id = 0;
        }

        info!(
            "Loaded subscription with {} endpoints (active {})",
            loaded.servers.len(),
            loaded.active_id
        );
        *self.data.write() = loaded;
        Ok(())
    }

    /// Persist the current state
    pub fn save(&self) -> Result<()> {
        let data = self.data.write();
        self.persist(&data)
    }

    /// Set a new feed URL, download it and replace the endpoint list
    #[instrument(skip(self))]
    pub async fn update_url(&self, url: &str) -> Result<Vec<Endpoint>> {
        let servers = self.download(url).await?;

        let mut data = self.data.write();
        data.url = url.to_string();
        data.replace_servers(servers);
        self.persist(&data)?;

        info!("Subscription updated: {} endpoints", data.servers.len());
        Ok(data.servers.clone())
    }

    /// Re-download the stored feed URL
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Result<Vec<Endpoint>> {
        let url = self.data.read().url.clone();
        if url.is_empty() {
            return Err(PanelError::Config("no feed URL set".into()));
        }

        let servers = self.download(&url).await?;

        let mut data = self.data.write();
        data.replace_servers(servers);
        self.persist(&data)?;

        info!("Subscription refreshed: {} endpoints", data.servers.len());
        Ok(data.servers.clone())
    }

    /// Make endpoint `id` the active one
    pub fn select_active(&self, id: usize) -> Result<Endpoint> {
        let mut data = self.data.write();
        self.select_locked(&mut data, id)
    }

    /// Advance to the next endpoint, wrapping around
    pub fn select_next(&self) -> Result<Endpoint> {
        let mut data = self.data.write();
        let count = data.servers.len();
        if count == 0 {
            return Err(PanelError::NotFound("no endpoints available".into()));
        }

        let next = (data.active_id + 1) % count;
        self.select_locked(&mut data, next)
    }

    pub fn active_endpoint(&self) -> Option<Endpoint> {
        self.data.read().active().cloned()
    }

    pub fn all_endpoints(&self) -> Vec<Endpoint> {
        self.data.read().servers.clone()
    }

    pub fn data(&self) -> SubscriptionData {
        self.data.read().clone()
    }

    /// Store measured latencies; results for endpoints replaced since the sweep started are ignored
    pub fn record_latencies(&self, measured: &[Endpoint]) -> Result<()> {
        let mut data = self.data.write();
        let mut changed = false;
        for m in measured {
            if let Some(server) = data.servers.get_mut(m.id) {
                if server.address == m.address && server.port == m.port {
                    server.latency_ms = m.latency_ms;
                    changed = true;
                }
            }
        }

        if changed {
            self.persist(&data)?;
        }
        Ok(())
    }

    fn select_locked(&self, data: &mut SubscriptionData, id: usize) -> Result<Endpoint> {
        if id >= data.servers.len() {
            return Err(PanelError::EndpointNotFound { id: id as i64 });
        }

        data.mark_active(id);
        self.persist(data)?;

        let selected = data.servers[id].clone();
        info!("Selected endpoint {} ({})", selected.id, selected.name);
        Ok(selected)
    }

    async fn download(&self, url: &str) -> Result<Vec<Endpoint>> {
        let body = self.feed.fetch(url).await?;
        parse_subscription(&body)
    }

    fn persist(&self, data: &SubscriptionData) -> Result<()> {
        let json = serde_json::to_vec_pretty(data)?;
        write_private(&self.data_dir, &self.file_path(), &json)
    }
}

/// Write `contents` with owner-only permissions, creating the directory if needed
pub(crate) fn write_private(dir: &Path, path: &Path, contents: &[u8]) -> Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(dir)?;

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.sync_all()?;
    Ok(())
}
