//! Client Quota Configuration
//!
//! Per-client limits as accepted by the control plane and stored by the
//! admission manager.

use serde::{Deserialize, Serialize};

/// Rate limit configuration for a single client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Client identifier
    pub client_id: String,

    /// Whether rate limiting is enforced for this client
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Requests per minute (`None` means no limit)
    #[serde(
        rename = "rpm",
        alias = "request_limit",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub request_limit: Option<u64>,

    /// Weight units per minute (`None` means no limit)
    #[serde(
        rename = "tpm",
        alias = "weight_limit",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub weight_limit: Option<u64>,
}

fn default_enabled() -> bool {
    true
}

/// Validation failures for a client configuration
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientConfigError {
    /// Client identifier is empty
    #[error("client_id is required")]
    MissingClientId,

    /// A configured limit is zero
    #[error("{0} must be a positive integer when set")]
    ZeroLimit(&'static str),
}

impl ClientConfig {
    /// Create a configuration with explicit limits
    pub fn new(
        client_id: impl Into<String>,
        request_limit: Option<u64>,
        weight_limit: Option<u64>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            enabled: true,
            request_limit,
            weight_limit,
        }
    }

    /// Enabled configuration with no limits on either dimension.
    ///
    /// This is what an unknown client is provisioned with on first sight.
    pub fn unlimited(client_id: impl Into<String>) -> Self {
        Self::new(client_id, None, None)
    }

    /// Builder-style toggle for the enabled flag
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Check the configuration at the control-plane boundary
    pub fn validate(&self) -> Result<(), ClientConfigError> {
        if self.client_id.trim().is_empty() {
            return Err(ClientConfigError::MissingClientId);
        }
        if self.request_limit == Some(0) {
            return Err(ClientConfigError::ZeroLimit("rpm"));
        }
        if self.weight_limit == Some(0) {
            return Err(ClientConfigError::ZeroLimit("tpm"));
        }
        Ok(())
    }

    /// Whether any dimension carries a limit
    pub fn is_limited(&self) -> bool {
        self.request_limit.is_some_and(|l| l > 0) || self.weight_limit.is_some_and(|l| l > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlimited_config() {
        let config = ClientConfig::unlimited("carol");
        assert!(config.enabled);
        assert_eq!(config.request_limit, None);
        assert_eq!(config.weight_limit, None);
        assert!(!config.is_limited());
    }

    #[test]
    fn test_validate() {
        assert!(ClientConfig::new("alice", Some(2), None).validate().is_ok());
        assert_eq!(
            ClientConfig::new("  ", None, None).validate(),
            Err(ClientConfigError::MissingClientId)
        );
        assert_eq!(
            ClientConfig::new("alice", Some(0), None).validate(),
            Err(ClientConfigError::ZeroLimit("rpm"))
        );
        assert_eq!(
            ClientConfig::new("alice", None, Some(0)).validate(),
            Err(ClientConfigError::ZeroLimit("tpm"))
        );
    }

    #[test]
    fn test_wire_names() {
        let json = serde_json::to_value(ClientConfig::new("bob", None, Some(100))).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"client_id": "bob", "enabled": true, "tpm": 100})
        );
    }

    #[test]
    fn test_deserialize_defaults_and_aliases() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"client_id": "alice", "request_limit": 5}"#).unwrap();
        assert!(config.enabled);
        assert_eq!(config.request_limit, Some(5));
        assert_eq!(config.weight_limit, None);

        let config: ClientConfig =
            serde_json::from_str(r#"{"client_id": "alice", "enabled": false, "tpm": 7}"#)
                .unwrap();
        assert!(!config.enabled);
        assert_eq!(config.weight_limit, Some(7));
    }
}
