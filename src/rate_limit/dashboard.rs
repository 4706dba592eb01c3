//! Operator Dashboard Support
//!
//! Aggregate view over every client known to the admission manager, built
//! only from its public list APIs.

use serde::{Deserialize, Serialize};

use super::manager::AdmissionManager;
use super::stats::drop_rate_percent;

/// Snapshot for the operator summary endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardData {
    /// Timestamp of data generation
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Aggregated counters
    pub summary: QuotaSummary,
}

/// Totals across all clients
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuotaSummary {
    /// Clients in the registry
    pub total_clients: usize,

    /// Clients with rate limiting enabled
    pub enabled_clients: usize,

    /// Enabled clients with at least one limit configured
    pub limited_clients: usize,

    pub total_requests: u64,
    pub success_requests: u64,
    pub dropped_requests: u64,
    pub rpm_dropped: u64,
    pub tpm_dropped: u64,
    pub tokens_used: u64,

    /// Dropped share of all requests
    pub drop_rate_percent: f64,
}

/// Builds [`DashboardData`] from a manager
pub struct DashboardBuilder {
    manager: AdmissionManager,
}

impl DashboardBuilder {
    /// Create a new dashboard builder
    pub fn new(manager: AdmissionManager) -> Self {
        Self { manager }
    }

    /// Build dashboard data
    pub fn build(&self) -> DashboardData {
        let configs = self.manager.list_configs();
        let stats = self.manager.list_stats();

        let mut summary = QuotaSummary {
            total_clients: configs.len(),
            enabled_clients: configs.values().filter(|c| c.enabled).count(),
            limited_clients: configs
                .values()
                .filter(|c| c.enabled && c.is_limited())
                .count(),
            ..QuotaSummary::default()
        };

        for stat in stats.values() {
            summary.total_requests += stat.total_requests;
            summary.success_requests += stat.success_requests;
            summary.dropped_requests += stat.dropped_requests;
            summary.rpm_dropped += stat.rpm_dropped;
            summary.tpm_dropped += stat.tpm_dropped;
            summary.tokens_used = summary.tokens_used.saturating_add(stat.tokens_used);
        }

        summary.drop_rate_percent =
            drop_rate_percent(summary.dropped_requests, summary.total_requests);

        DashboardData {
            timestamp: chrono::Utc::now(),
            summary,
        }
    }
}
