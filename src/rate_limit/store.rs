//! Client Registry
//!
//! In-memory storage for per-client quota state and statistics.
//!
//! Locking is split in two scopes:
//!
//! - the registry map behind a reader/writer lock, taken exclusively only to
//!   insert or remove a client and shared for lookups;
//! - one mutex per client for its quota state and one for its statistics,
//!   so traffic for different clients never contends on the same lock.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

use super::config::ClientConfig;
use super::quota::ClientQuota;
use super::stats::ClientStats;

/// Everything the registry knows about one client
#[derive(Debug)]
pub struct ClientEntry {
    /// Active configuration and buckets
    pub quota: Mutex<ClientQuota>,

    /// Running statistics
    pub stats: Mutex<ClientStats>,
}

impl ClientEntry {
    fn new(config: ClientConfig) -> Self {
        let stats = ClientStats::new(config.client_id.clone());
        Self {
            quota: Mutex::new(ClientQuota::from_config(config)),
            stats: Mutex::new(stats),
        }
    }
}

/// Registry of all known clients
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: RwLock<HashMap<String, Arc<ClientEntry>>>,
}

impl ClientRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a client
    pub fn get(&self, client_id: &str) -> Option<Arc<ClientEntry>> {
        self.clients.read().get(client_id).cloned()
    }

    /// Get a client, provisioning it as enabled and unlimited if unknown.
    ///
    /// Concurrent first sightings of the same identifier all observe the
    /// same entry; exactly one is created.
    pub fn get_or_provision(&self, client_id: &str) -> Arc<ClientEntry> {
        if let Some(entry) = self.get(client_id) {
            return entry;
        }

        let mut clients = self.clients.write();
        clients
            .entry(client_id.to_string())
            .or_insert_with(|| {
                tracing::debug!(client_id, "Provisioning unlimited client on first request");
                Arc::new(ClientEntry::new(ClientConfig::unlimited(client_id)))
            })
            .clone()
    }

    /// Install a configuration.
    ///
    /// An existing client has its quota state rebuilt in place (buckets start
    /// full again) and keeps its statistics. An unknown client is created
    /// with zeroed statistics. Returns `true` if the client already existed.
    pub fn upsert(&self, config: ClientConfig) -> bool {
        if let Some(entry) = self.get(&config.client_id) {
            *entry.quota.lock() = ClientQuota::from_config(config);
            return true;
        }

        let mut clients = self.clients.write();
        match clients.get(&config.client_id) {
            // Lost a race with another creator between the two lock scopes
            Some(entry) => {
                *entry.quota.lock() = ClientQuota::from_config(config);
                true
            }
            None => {
                let client_id = config.client_id.clone();
                clients.insert(client_id, Arc::new(ClientEntry::new(config)));
                false
            }
        }
    }

    /// Remove a client and its statistics. Returns whether it existed.
    pub fn remove(&self, client_id: &str) -> bool {
        self.clients.write().remove(client_id).is_some()
    }

    /// Snapshot of all entries.
    ///
    /// The registry lock is released before the caller touches any entry.
    pub fn entries(&self) -> Vec<(String, Arc<ClientEntry>)> {
        self.clients
            .read()
            .iter()
            .map(|(id, entry)| (id.clone(), Arc::clone(entry)))
            .collect()
    }

    /// Number of known clients
    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    /// Whether no client is known
    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }
}
