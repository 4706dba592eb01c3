// Prometheus metrics for quotagate
//
// Exposes per-client admission metrics on the /metrics HTTP endpoint:
// - Request outcomes and drops by dimension (counters)
// - Weight admitted (counter)
// - Remaining quota, configured limits, enabled flag, latency (gauges)
//
// Values are pulled from the admission manager on a fixed interval by
// MetricsExporter; the request path never touches the registry.

use lazy_static::lazy_static;
use prometheus::{
    Encoder, GaugeVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Registry, TextEncoder,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::rate_limit::{AdmissionManager, ClientConfig, ClientStats, Dimension};

lazy_static! {
    pub static ref REGISTRY: Arc<Registry> = Arc::new(Registry::new());

    // Request metrics
    pub static ref REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("quotagate_requests_total", "Total number of requests by outcome"),
        &["client_id", "status"]
    ).expect("Failed to create requests total metric");

    pub static ref REQUESTS_DROPPED_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new(
            "quotagate_requests_dropped_total",
            "Total number of rejected requests by limit",
        ),
        &["client_id", "reason"]
    ).expect("Failed to create requests dropped metric");

    pub static ref TOKENS_USED_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("quotagate_tokens_used_total", "Total weight of admitted requests"),
        &["client_id"]
    ).expect("Failed to create tokens used metric");

    // Quota metrics
    pub static ref RATE_LIMIT_REMAINING: IntGaugeVec = IntGaugeVec::new(
        prometheus::Opts::new(
            "quotagate_rate_limit_remaining",
            "Remaining quota in the current window",
        ),
        &["client_id", "limit_type"]
    ).expect("Failed to create rate limit remaining metric");

    pub static ref CONFIGURED_LIMIT: IntGaugeVec = IntGaugeVec::new(
        prometheus::Opts::new("quotagate_configured_limit", "Configured per-minute limit"),
        &["client_id", "limit_type"]
    ).expect("Failed to create configured limit metric");

    pub static ref CLIENT_ENABLED: IntGaugeVec = IntGaugeVec::new(
        prometheus::Opts::new(
            "quotagate_client_enabled",
            "Whether rate limiting is enabled for the client",
        ),
        &["client_id"]
    ).expect("Failed to create client enabled metric");

    pub static ref AVG_LATENCY_MILLISECONDS: GaugeVec = GaugeVec::new(
        prometheus::Opts::new(
            "quotagate_avg_latency_milliseconds",
            "Running average upstream latency",
        ),
        &["client_id"]
    ).expect("Failed to create average latency metric");

    // Exporter metrics
    pub static ref CLIENTS_TOTAL: IntGauge = IntGauge::new(
        "quotagate_clients",
        "Number of clients known to the admission manager"
    ).expect("Failed to create clients metric");

    pub static ref EXPORT_RUNS_TOTAL: IntCounter = IntCounter::new(
        "quotagate_export_runs_total",
        "Total number of metrics export passes"
    ).expect("Failed to create export runs metric");
}

/// Initialize metrics registry
///
/// Safe to call more than once; already registered collectors are skipped.
pub fn init() -> prometheus::Result<()> {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(REQUESTS_TOTAL.clone()),
        Box::new(REQUESTS_DROPPED_TOTAL.clone()),
        Box::new(TOKENS_USED_TOTAL.clone()),
        Box::new(RATE_LIMIT_REMAINING.clone()),
        Box::new(CONFIGURED_LIMIT.clone()),
        Box::new(CLIENT_ENABLED.clone()),
        Box::new(AVG_LATENCY_MILLISECONDS.clone()),
        Box::new(CLIENTS_TOTAL.clone()),
        Box::new(EXPORT_RUNS_TOTAL.clone()),
    ];

    for collector in collectors {
        match REGISTRY.register(collector) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Gather all metrics in Prometheus text format
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {}", e))?;
    String::from_utf8(buffer).map_err(|e| anyhow::anyhow!("Invalid UTF-8 in metrics: {}", e))
}

/// Counter values seen at the previous export
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct CounterSnapshot {
    success: u64,
    dropped: u64,
    rpm_dropped: u64,
    tpm_dropped: u64,
    tokens_used: u64,
}

impl From<&ClientStats> for CounterSnapshot {
    fn from(stats: &ClientStats) -> Self {
        Self {
            success: stats.success_requests,
            dropped: stats.dropped_requests,
            rpm_dropped: stats.rpm_dropped,
            tpm_dropped: stats.tpm_dropped,
            tokens_used: stats.tokens_used,
        }
    }
}

/// Amount to advance a counter by; a value below the previous one means the
/// client was recreated and counts from zero again.
fn delta(current: u64, previous: u64) -> u64 {
    if current >= previous {
        current - previous
    } else {
        current
    }
}

/// Periodically publishes admission statistics to the Prometheus registry
pub struct MetricsExporter {
    manager: AdmissionManager,
    interval: Duration,
    last: HashMap<String, CounterSnapshot>,
}

impl MetricsExporter {
    pub fn new(manager: AdmissionManager, interval: Duration) -> Self {
        Self {
            manager,
            interval,
            last: HashMap::new(),
        }
    }

    /// Publish one snapshot of every client
    pub fn export_once(&mut self) {
        let stats = self.manager.list_stats();
        let configs = self.manager.list_configs();

        for (client_id, stat) in &stats {
            self.export_counters(client_id, stat);
            export_quota(client_id, stat, configs.get(client_id));
        }

        let current: HashSet<&String> = stats.keys().collect();
        let removed: Vec<String> = self
            .last
            .keys()
            .filter(|id| !current.contains(id))
            .cloned()
            .collect();
        for client_id in removed {
            self.last.remove(&client_id);
            remove_client(&client_id);
        }

        CLIENTS_TOTAL.set(stats.len() as i64);
        EXPORT_RUNS_TOTAL.inc();
        debug!(clients = stats.len(), "Exported admission metrics");
    }

    fn export_counters(&mut self, client_id: &str, stats: &ClientStats) {
        let current = CounterSnapshot::from(stats);
        let previous = self.last.get(client_id).copied().unwrap_or_default();

        REQUESTS_TOTAL
            .with_label_values(&[client_id, "success"])
            .inc_by(delta(current.success, previous.success));
        REQUESTS_TOTAL
            .with_label_values(&[client_id, "dropped"])
            .inc_by(delta(current.dropped, previous.dropped));
        REQUESTS_DROPPED_TOTAL
            .with_label_values(&[client_id, Dimension::Request.label()])
            .inc_by(delta(current.rpm_dropped, previous.rpm_dropped));
        REQUESTS_DROPPED_TOTAL
            .with_label_values(&[client_id, Dimension::Weight.label()])
            .inc_by(delta(current.tpm_dropped, previous.tpm_dropped));
        TOKENS_USED_TOTAL
            .with_label_values(&[client_id])
            .inc_by(delta(current.tokens_used, previous.tokens_used));

        self.last.insert(client_id.to_string(), current);
    }

    /// Run the exporter until the shutdown signal fires
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("Metrics exporter running every {:?}", self.interval);

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.export_once(),
                _ = shutdown.changed() => break,
            }
        }

        // Final pass so the last interval is not lost
        self.export_once();
        info!("Metrics exporter stopped");
    }
}

fn export_quota(client_id: &str, stats: &ClientStats, config: Option<&ClientConfig>) {
    set_or_remove(&RATE_LIMIT_REMAINING, client_id, Dimension::Request, stats.rpm_remaining);
    set_or_remove(&RATE_LIMIT_REMAINING, client_id, Dimension::Weight, stats.tpm_remaining);

    if let Some(config) = config {
        set_or_remove(&CONFIGURED_LIMIT, client_id, Dimension::Request, config.request_limit);
        set_or_remove(&CONFIGURED_LIMIT, client_id, Dimension::Weight, config.weight_limit);
        CLIENT_ENABLED
            .with_label_values(&[client_id])
            .set(i64::from(config.enabled));
    }

    if let Some(latency) = stats.avg_latency_ms {
        AVG_LATENCY_MILLISECONDS
            .with_label_values(&[client_id])
            .set(latency);
    }
}

fn set_or_remove(gauge: &IntGaugeVec, client_id: &str, dimension: Dimension, value: Option<u64>) {
    match value {
        Some(value) => gauge
            .with_label_values(&[client_id, dimension.label()])
            .set(i64::try_from(value).unwrap_or(i64::MAX)),
        None => {
            let _ = gauge.remove_label_values(&[client_id, dimension.label()]);
        }
    }
}

/// Drop every label set of a deleted client
fn remove_client(client_id: &str) {
    for status in ["success", "dropped"] {
        let _ = REQUESTS_TOTAL.remove_label_values(&[client_id, status]);
    }
    for dimension in Dimension::ALL {
        let limit_type = dimension.label();
        let _ = REQUESTS_DROPPED_TOTAL.remove_label_values(&[client_id, limit_type]);
        let _ = RATE_LIMIT_REMAINING.remove_label_values(&[client_id, limit_type]);
        let _ = CONFIGURED_LIMIT.remove_label_values(&[client_id, limit_type]);
    }
    let _ = TOKENS_USED_TOTAL.remove_label_values(&[client_id]);
    let _ = CLIENT_ENABLED.remove_label_values(&[client_id]);
    let _ = AVG_LATENCY_MILLISECONDS.remove_label_values(&[client_id]);
    debug!(client_id, "Removed metrics of deleted client");
}
