use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Endpoint;

/// Persisted subscription record (`subscription.json`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionData {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub servers: Vec<Endpoint>,
    #[serde(default)]
    pub active_id: usize,
}

impl SubscriptionData {
    /// Swap in a freshly parsed endpoint list, keeping the active index valid
    pub fn replace_servers(&mut self, servers: Vec<Endpoint>) {
        self.servers = servers;
        self.last_updated = Some(Utc::now());
        if self.active_id >= self.servers.len() {
            self.active_id = 0;
        }
        self.mark_active(self.active_id);
    }

    /// Flip the `active` flag so only `id` carries it
    pub fn mark_active(&mut self, id: usize) {
        self.active_id = id;
        for (i, server) in self.servers.iter_mut().enumerate() {
            server.active = i == id;
        }
    }

    pub fn active(&self) -> Option<&Endpoint> {
        self.servers.get(self.active_id)
    }
}

/// Summary returned by `GET /api/subscription`
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionSummary {
    pub url: String,
    pub last_updated: Option<DateTime<Utc>>,
    pub server_count: usize,
}

impl From<&SubscriptionData> for SubscriptionSummary {
    fn from(data: &SubscriptionData) -> Self {
        Self {
            url: data.url.clone(),
            last_updated: data.last_updated,
            server_count: data.servers.len(),
        }
    }
}

/// Request to set a new feed URL
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateSubscriptionRequest {
    pub url: String,
}

/// Request to select an endpoint by id
#[derive(Debug, Clone, Deserialize)]
pub struct SelectServerRequest {
    pub id: usize,
}
