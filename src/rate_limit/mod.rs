//! Quota Admission Engine
//!
//! This module decides, for every proxied request, whether the calling client
//! still has quota on two independent dimensions: request count per minute and
//! declared weight per minute.
//!
//! # Features
//!
//! - Refill-on-access token buckets, one per limited dimension
//! - Lazy provisioning of unknown clients as unlimited
//! - Live configuration replacement without stopping traffic
//! - Per-client statistics with refreshed remaining quota
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Admission Manager                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  decide / set_config / get_* / list_* / delete / latency    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────┐   │
//! │  │   Client Registry (RwLock<HashMap<id, entry>>)       │   │
//! │  │   entry = Mutex<ClientQuota> + Mutex<ClientStats>    │   │
//! │  └─────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod dashboard;
pub mod manager;
pub mod quota;
pub mod stats;
pub mod store;

pub use config::{ClientConfig, ClientConfigError};
pub use dashboard::{DashboardBuilder, DashboardData, QuotaSummary};
pub use manager::{AdmissionManager, RejectReason, Rejection, Verdict};
pub use quota::{ClientQuota, QuotaBucket};
pub use stats::{ClientStats, Dimension};
pub use store::ClientRegistry;

#[cfg(test)]
mod proptests;
