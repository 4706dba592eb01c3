//! Per-client running statistics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which dimension caused a drop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    /// Request count per minute
    Request,
    /// Weight units per minute
    Weight,
}

impl Dimension {
    /// Both dimensions, request first
    pub const ALL: [Dimension; 2] = [Dimension::Request, Dimension::Weight];

    /// Short label used in metrics and logs
    pub fn label(&self) -> &'static str {
        match self {
            Dimension::Request => "rpm",
            Dimension::Weight => "tpm",
        }
    }
}

/// Runtime statistics for a client.
///
/// Counters only move forward. `total_requests` always equals
/// `success_requests + dropped_requests`, and `dropped_requests` always
/// equals `rpm_dropped + tpm_dropped`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientStats {
    pub client_id: String,
    pub total_requests: u64,
    pub success_requests: u64,
    pub dropped_requests: u64,
    pub rpm_dropped: u64,
    pub tpm_dropped: u64,
    /// Cumulative weight of admitted requests
    pub tokens_used: u64,
    /// Remaining request quota, `None` when unlimited
    pub rpm_remaining: Option<u64>,
    /// Remaining weight quota, `None` when unlimited
    pub tpm_remaining: Option<u64>,
    pub last_request_time: Option<DateTime<Utc>>,
    pub avg_latency_ms: Option<f64>,
}

impl ClientStats {
    /// Zeroed record for a client
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            total_requests: 0,
            success_requests: 0,
            dropped_requests: 0,
            rpm_dropped: 0,
            tpm_dropped: 0,
            tokens_used: 0,
            rpm_remaining: None,
            tpm_remaining: None,
            last_request_time: None,
            avg_latency_ms: None,
        }
    }

    /// Record an admitted request of the given weight
    pub fn record_success(&mut self, weight: u64) {
        self.total_requests += 1;
        self.success_requests += 1;
        self.tokens_used = self.tokens_used.saturating_add(weight);
        self.last_request_time = Some(Utc::now());
    }

    /// Record a request dropped on `dimension`
    pub fn record_drop(&mut self, dimension: Dimension) {
        self.total_requests += 1;
        self.dropped_requests += 1;
        self.last_request_time = Some(Utc::now());

        match dimension {
            Dimension::Request => self.rpm_dropped += 1,
            Dimension::Weight => self.tpm_dropped += 1,
        }
    }

    /// Fold a latency sample into the running average.
    ///
    /// The first sample becomes the average; later samples are averaged
    /// with the current value, so recent samples dominate.
    pub fn record_latency(&mut self, latency_ms: f64) {
        self.avg_latency_ms = Some(match self.avg_latency_ms {
            Some(avg) => (avg + latency_ms) / 2.0,
            None => latency_ms,
        });
    }
}

/// Percentage of `total` that was dropped; zero when nothing was seen
pub fn drop_rate_percent(dropped: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        dropped as f64 / total as f64 * 100.0
    }
}
