//! Quotagate Library
//!
//! This library provides the core functionality for the quotagate reverse
//! proxy: per-client request and weight quotas, the proxy forwarding layer,
//! the REST and JSON-RPC control planes and the Prometheus exporter.

pub mod api;
pub mod config;
pub mod daemon;
pub mod error;
pub mod metrics;
pub mod metrics_server;
pub mod proxy;
pub mod rate_limit;
pub mod rpc;

pub use config::Config;
pub use error::GatewayError;
pub use rate_limit::{AdmissionManager, ClientConfig, ClientStats, RejectReason, Verdict};
