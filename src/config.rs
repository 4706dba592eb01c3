// Configuration File Support
//
// This module provides configuration file parsing for the quotagate daemon.
// Supports TOML format with environment variable overrides; CLI flags are
// applied on top by the binary.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::rate_limit::ClientConfig;

/// Default configuration file, looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "quotagate.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Proxy listener and upstream
    pub proxy: ProxyConfig,

    /// Control plane listeners
    pub control: ControlConfig,

    /// Metrics configuration
    pub metrics: MetricsConfig,

    /// Clients configured at startup
    pub clients: Vec<ClientConfig>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

/// Proxy configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProxyConfig {
    /// Port the proxy listens on
    pub port: u16,

    /// Upstream base URL every admitted request is forwarded to
    pub upstream_url: String,

    /// Header carrying the client identifier
    pub client_header: String,

    /// Header carrying the request weight estimate
    pub weight_header: String,

    /// Upstream request timeout in seconds
    pub timeout_secs: u64,

    /// Largest request body buffered for forwarding
    pub max_body_bytes: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            upstream_url: "http://127.0.0.1:8000".to_string(),
            client_header: "x-client-id".to_string(),
            weight_header: "x-token-estimate".to_string(),
            timeout_secs: 30,
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Control plane configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ControlConfig {
    /// REST API port
    pub rest_port: u16,

    /// JSON-RPC API port
    pub rpc_port: u16,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            rest_port: 9091,
            rpc_port: 9092,
        }
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    /// Whether to serve and export metrics
    pub enabled: bool,

    /// Port for metrics server
    pub port: u16,

    /// Metrics export interval in seconds
    pub export_interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 9090,
            export_interval_secs: 5,
        }
    }
}

impl Config {
    /// Load configuration from a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed. A
    /// missing file yields the defaults (with environment overrides applied).
    /// The result is not validated: command-line flags may still override it,
    /// so callers run [`Config::validate`] once every layer is applied.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file from {:?}", path))?;

            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file from {:?}", path))?;

            tracing::info!("Loaded configuration from {:?}", path);
            config
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            Self::default()
        };

        Ok(config.apply_env_overrides())
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Environment variables take precedence over config file values:
    /// - QUOTAGATE_LOG_LEVEL
    /// - QUOTAGATE_LOG_FORMAT
    /// - QUOTAGATE_UPSTREAM_URL
    /// - QUOTAGATE_PROXY_PORT
    /// - QUOTAGATE_CONFIG_PORT
    /// - QUOTAGATE_RPC_PORT
    /// - QUOTAGATE_METRICS_ENABLED
    /// - QUOTAGATE_METRICS_PORT
    /// - QUOTAGATE_EXPORT_INTERVAL_SECS
    pub fn apply_env_overrides(mut self) -> Self {
        // Logging overrides
        if let Ok(level) = std::env::var("QUOTAGATE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("QUOTAGATE_LOG_FORMAT") {
            self.logging.format = format;
        }

        // Proxy overrides
        if let Ok(url) = std::env::var("QUOTAGATE_UPSTREAM_URL") {
            if !url.is_empty() {
                self.proxy.upstream_url = url;
            }
        }
        if let Some(port) = env_port("QUOTAGATE_PROXY_PORT") {
            self.proxy.port = port;
        }

        // Control plane overrides
        if let Some(port) = env_port("QUOTAGATE_CONFIG_PORT") {
            self.control.rest_port = port;
        }
        if let Some(port) = env_port("QUOTAGATE_RPC_PORT") {
            self.control.rpc_port = port;
        }

        // Metrics overrides
        if let Ok(enabled) = std::env::var("QUOTAGATE_METRICS_ENABLED") {
            self.metrics.enabled = enabled.parse().unwrap_or(self.metrics.enabled);
        }
        if let Some(port) = env_port("QUOTAGATE_METRICS_PORT") {
            self.metrics.port = port;
        }
        if let Ok(interval) = std::env::var("QUOTAGATE_EXPORT_INTERVAL_SECS") {
            if let Ok(interval) = interval.parse::<u64>() {
                if interval > 0 {
                    self.metrics.export_interval_secs = interval;
                }
            }
        }

        self
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        // Validate logging level
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                self.logging.level
            ),
        }

        // Validate logging format
        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" | "compact" => {}
            _ => anyhow::bail!(
                "Invalid log format: {}. Must be one of: json, pretty, compact",
                self.logging.format
            ),
        }

        // Validate upstream
        let upstream = reqwest::Url::parse(&self.proxy.upstream_url)
            .with_context(|| format!("Invalid upstream URL: {}", self.proxy.upstream_url))?;
        if !matches!(upstream.scheme(), "http" | "https") {
            anyhow::bail!("Upstream URL must use http or https: {}", self.proxy.upstream_url);
        }
        if self.proxy.client_header.is_empty() || self.proxy.weight_header.is_empty() {
            anyhow::bail!("Client and weight header names must be non-empty");
        }
        for name in [&self.proxy.client_header, &self.proxy.weight_header] {
            axum::http::HeaderName::from_bytes(name.as_bytes())
                .with_context(|| format!("Invalid header name: {}", name))?;
        }
        if self.proxy.timeout_secs == 0 {
            anyhow::bail!("Upstream timeout must be at least 1 second");
        }
        if self.proxy.max_body_bytes == 0 {
            anyhow::bail!("Maximum body size must be > 0");
        }

        // Validate ports
        let mut ports = vec![
            ("proxy", self.proxy.port),
            ("rest", self.control.rest_port),
            ("rpc", self.control.rpc_port),
        ];
        if self.metrics.enabled {
            ports.push(("metrics", self.metrics.port));
        }
        let mut seen = HashSet::new();
        for (name, port) in &ports {
            if *port == 0 {
                anyhow::bail!("{} port must be > 0", name);
            }
            if !seen.insert(*port) {
                anyhow::bail!("{} port {} is already used by another listener", name, port);
            }
        }

        // Validate metrics export
        if self.metrics.export_interval_secs == 0 {
            anyhow::bail!("Metrics export interval must be at least 1 second");
        }

        // Validate seed clients
        let mut client_ids = HashSet::new();
        for client in &self.clients {
            client
                .validate()
                .with_context(|| format!("Invalid client entry '{}'", client.client_id))?;
            if !client_ids.insert(client.client_id.as_str()) {
                anyhow::bail!("Client '{}' is configured more than once", client.client_id);
            }
        }

        Ok(())
    }

    /// Convert log level string to tracing::Level
    pub fn log_level(&self) -> Result<tracing::Level> {
        self.logging
            .level
            .to_lowercase()
            .parse()
            .map_err(|e| anyhow::anyhow!("Failed to parse log level: {}", e))
    }

    /// Render the configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }
}

fn env_port(key: &str) -> Option<u16> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u16>().ok())
        .filter(|port| *port > 0)
}
