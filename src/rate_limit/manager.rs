//! Admission Manager
//!
//! Central entry point for admission decisions, client configuration and
//! statistics. Every transport (proxy, REST, JSON-RPC, metrics export) holds a
//! clone of the same [`AdmissionManager`] and goes through this API; nothing
//! outside the manager keeps references to bucket or statistics objects.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::config::ClientConfig;
use super::stats::{ClientStats, Dimension};
use super::store::{ClientEntry, ClientRegistry};

/// Why a request was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RejectReason {
    /// The request-rate bucket had no unit left
    #[serde(rename = "request-rate-exceeded")]
    RequestRateExceeded,
    /// The weight-rate bucket could not cover the request weight
    #[serde(rename = "weight-rate-exceeded")]
    WeightRateExceeded,
}

impl RejectReason {
    /// Stable reason code
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::RequestRateExceeded => "request-rate-exceeded",
            RejectReason::WeightRateExceeded => "weight-rate-exceeded",
        }
    }

    /// Human-readable message
    pub fn message(&self) -> &'static str {
        match self {
            RejectReason::RequestRateExceeded => "Request rate limit exceeded",
            RejectReason::WeightRateExceeded => "Weight rate limit exceeded",
        }
    }

    /// Dimension the rejection is attributed to
    pub fn dimension(&self) -> Dimension {
        match self {
            RejectReason::RequestRateExceeded => Dimension::Request,
            RejectReason::WeightRateExceeded => Dimension::Weight,
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Details of a rejected request
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    /// Reason code
    pub reason: RejectReason,

    /// Time until the same request could pass the failing bucket, if ever
    pub retry_after: Option<Duration>,
}

/// Outcome of one admission decision
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Forward the request
    Admitted,
    /// Do not forward the request
    Rejected(Rejection),
}

impl Verdict {
    /// Whether the request may proceed
    pub fn is_admitted(&self) -> bool {
        matches!(self, Verdict::Admitted)
    }

    /// Rejection reason, if rejected
    pub fn reason(&self) -> Option<RejectReason> {
        match self {
            Verdict::Admitted => None,
            Verdict::Rejected(rejection) => Some(rejection.reason),
        }
    }
}

/// Admission manager
///
/// Cheap to clone; clones share the same registry.
#[derive(Debug, Clone, Default)]
pub struct AdmissionManager {
    registry: Arc<ClientRegistry>,
}

impl AdmissionManager {
    /// Create a manager with an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether a request from `client_id` with the given weight is
    /// admitted, consuming quota and updating statistics.
    ///
    /// Unknown clients are provisioned as enabled and unlimited. Disabled
    /// clients are always admitted. The request-rate unit taken before a
    /// weight-rate rejection is not given back.
    pub fn decide(&self, client_id: &str, weight: u64) -> Verdict {
        let entry = self.registry.get_or_provision(client_id);

        let rejection = {
            let mut quota = entry.quota.lock();
            if !quota.enabled() {
                None
            } else {
                let request_rejection = quota.request_bucket().and_then(|bucket| {
                    (!bucket.try_consume(1)).then(|| Rejection {
                        reason: RejectReason::RequestRateExceeded,
                        retry_after: bucket.time_until_available(1),
                    })
                });

                request_rejection.or_else(|| {
                    quota.weight_bucket().and_then(|bucket| {
                        (!bucket.try_consume(weight)).then(|| Rejection {
                            reason: RejectReason::WeightRateExceeded,
                            retry_after: bucket.time_until_available(weight),
                        })
                    })
                })
            }
        };

        let mut stats = entry.stats.lock();
        match rejection {
            None => {
                stats.record_success(weight);
                debug!(client_id, weight, "Request admitted");
                Verdict::Admitted
            }
            Some(rejection) => {
                stats.record_drop(rejection.reason.dimension());
                debug!(client_id, weight, reason = %rejection.reason, "Request rejected");
                Verdict::Rejected(rejection)
            }
        }
    }

    /// Replace a client's configuration.
    ///
    /// Buckets are rebuilt full; existing statistics are kept, missing ones
    /// are created.
    pub fn set_config(&self, config: ClientConfig) {
        let client_id = config.client_id.clone();
        let existed = self.registry.upsert(config);
        debug!(client_id = %client_id, existed, "Client configuration installed");
    }

    /// Configuration of a known client
    pub fn get_config(&self, client_id: &str) -> Option<ClientConfig> {
        self.registry
            .get(client_id)
            .map(|entry| entry.quota.lock().config().clone())
    }

    /// Statistics of a known client, with remaining quota refreshed
    pub fn get_stats(&self, client_id: &str) -> Option<ClientStats> {
        self.registry.get(client_id).map(|entry| snapshot_stats(&entry))
    }

    /// Configurations of all known clients
    pub fn list_configs(&self) -> HashMap<String, ClientConfig> {
        self.registry
            .entries()
            .into_iter()
            .map(|(id, entry)| {
                let config = entry.quota.lock().config().clone();
                (id, config)
            })
            .collect()
    }

    /// Statistics of all known clients, with remaining quota refreshed
    pub fn list_stats(&self) -> HashMap<String, ClientStats> {
        self.registry
            .entries()
            .into_iter()
            .map(|(id, entry)| {
                let stats = snapshot_stats(&entry);
                (id, stats)
            })
            .collect()
    }

    /// Remove a client's configuration and statistics.
    ///
    /// Returns whether the client existed.
    pub fn delete_client(&self, client_id: &str) -> bool {
        let existed = self.registry.remove(client_id);
        debug!(client_id, existed, "Client deleted");
        existed
    }

    /// Fold a latency observation into a client's average.
    ///
    /// Does nothing for an unknown client.
    pub fn record_latency(&self, client_id: &str, latency_ms: f64) {
        if let Some(entry) = self.registry.get(client_id) {
            entry.stats.lock().record_latency(latency_ms);
        }
    }

    /// Number of known clients
    pub fn client_count(&self) -> usize {
        self.registry.len()
    }
}

/// Copy a client's statistics after refreshing the remaining-quota fields.
///
/// The quota lock is released before the statistics lock is taken.
fn snapshot_stats(entry: &ClientEntry) -> ClientStats {
    let (rpm_remaining, tpm_remaining) = entry.quota.lock().remaining();

    let mut stats = entry.stats.lock();
    stats.rpm_remaining = rpm_remaining;
    stats.tpm_remaining = tpm_remaining;
    stats.clone()
}
