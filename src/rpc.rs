//! JSON-RPC Control Plane
//!
//! Client configuration over JSON-RPC 2.0, served as `POST /rpc` on its own
//! listener. Methods mirror the configuration service:
//!
//! | Method            | Params                  | Result                    |
//! |-------------------|-------------------------|---------------------------|
//! | `SetClientConfig` | `{config}`              | `{success, message}`      |
//! | `GetClientConfig` | `{client_id}`           | `{found, config?}`        |
//! | `GetClientStats`  | `{client_id}`           | `{found, stats?}`         |
//! | `ListClients`     | `{}`                    | `{clients, stats}`        |
//! | `DeleteClient`    | `{client_id}`           | `{success, message}`      |
//!
//! # Example
//!
//! ```json
//! {
//!   "jsonrpc": "2.0",
//!   "id": 1,
//!   "method": "GetClientConfig",
//!   "params": {"client_id": "demo-client"}
//! }
//! ```

use axum::body::Bytes;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::rate_limit::{AdmissionManager, ClientConfig, ClientStats};

/// JSON-RPC 2.0 version constant
pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC 2.0 Request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcRequest {
    /// JSON-RPC version (must be "2.0")
    pub jsonrpc: String,

    /// Request ID (echoed in the response)
    #[serde(default)]
    pub id: serde_json::Value,

    /// Method name
    pub method: String,

    /// Method parameters (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl RpcRequest {
    pub fn new(
        id: impl Into<serde_json::Value>,
        method: impl Into<String>,
        params: Option<serde_json::Value>,
    ) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 Response
///
/// A response either contains a `result` or an `error`, but never both.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcResponse {
    /// JSON-RPC version
    pub jsonrpc: String,

    /// Result (if successful)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    /// Error (if failed)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,

    /// Request ID (matches the request)
    pub id: serde_json::Value,
}

impl RpcResponse {
    /// Create a successful response
    pub fn ok(id: serde_json::Value, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    /// Create an error response
    pub fn err(id: serde_json::Value, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(error),
            id,
        }
    }
}

/// JSON-RPC 2.0 Error
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RpcError {
    /// Error code
    pub code: i32,

    /// Human-readable error message
    pub message: String,
}

impl RpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Parse error (-32700): Invalid JSON was received
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(-32700, format!("Parse error: {}", message.into()))
    }

    /// Invalid request (-32600): The JSON sent is not a valid Request object
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(-32600, format!("Invalid request: {}", message.into()))
    }

    /// Method not found (-32601)
    pub fn method_not_found(method: &str) -> Self {
        Self::new(-32601, format!("Method not found: {}", method))
    }

    /// Invalid params (-32602)
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(-32602, format!("Invalid params: {}", message.into()))
    }

    /// Internal error (-32603)
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(-32603, format!("Internal error: {}", message.into()))
    }
}

/// Client configuration as carried in `SetClientConfig`
///
/// The identifier is optional on the wire so that an empty one can be
/// reported through `success = false` rather than a protocol error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigMessage {
    #[serde(default)]
    pub client_id: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, alias = "request_limit", skip_serializing_if = "Option::is_none")]
    pub rpm: Option<u64>,
    #[serde(default, alias = "weight_limit", skip_serializing_if = "Option::is_none")]
    pub tpm: Option<u64>,
}

fn default_enabled() -> bool {
    true
}

impl From<ConfigMessage> for ClientConfig {
    fn from(message: ConfigMessage) -> Self {
        ClientConfig::new(message.client_id, message.rpm, message.tpm)
            .with_enabled(message.enabled)
    }
}

#[derive(Debug, Default, Deserialize)]
struct SetClientConfigParams {
    #[serde(default)]
    config: Option<ConfigMessage>,
}

#[derive(Debug, Default, Deserialize)]
struct ClientIdParams {
    #[serde(default)]
    client_id: String,
}

/// Result of `SetClientConfig` and `DeleteClient`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ack {
    pub success: bool,
    pub message: String,
}

impl Ack {
    fn new(success: bool, message: impl Into<String>) -> Self {
        Self {
            success,
            message: message.into(),
        }
    }
}

/// Result of `GetClientConfig`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfigLookup {
    pub found: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ClientConfig>,
}

/// Result of `GetClientStats`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatsLookup {
    pub found: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<ClientStats>,
}

/// Result of `ListClients`, both lists ordered by client identifier
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientListing {
    pub clients: Vec<ClientConfig>,
    pub stats: Vec<ClientStats>,
}

/// Handle one raw JSON-RPC message
pub fn handle_message(manager: &AdmissionManager, body: &[u8]) -> RpcResponse {
    let value: serde_json::Value = match serde_json::from_slice(body) {
        Ok(value) => value,
        Err(e) => {
            warn!("Failed to parse JSON-RPC message: {}", e);
            return RpcResponse::err(
                serde_json::Value::Null,
                RpcError::parse_error(e.to_string()),
            );
        }
    };

    let id = value.get("id").cloned().unwrap_or(serde_json::Value::Null);
    let request: RpcRequest = match serde_json::from_value(value) {
        Ok(request) => request,
        Err(e) => return RpcResponse::err(id, RpcError::invalid_request(e.to_string())),
    };

    dispatch(manager, request)
}

/// Route a parsed request to its method
pub fn dispatch(manager: &AdmissionManager, request: RpcRequest) -> RpcResponse {
    if request.jsonrpc != JSONRPC_VERSION {
        warn!("Unsupported JSON-RPC version: {}", request.jsonrpc);
        return RpcResponse::err(
            request.id,
            RpcError::invalid_request("Unsupported JSON-RPC version"),
        );
    }

    debug!(method = %request.method, "JSON-RPC call");

    let result = match request.method.as_str() {
        "SetClientConfig" => {
            params(request.params).map(|p| to_value(set_client_config(manager, p)))
        }
        "GetClientConfig" => {
            params(request.params).map(|p| to_value(get_client_config(manager, p)))
        }
        "GetClientStats" => {
            params(request.params).map(|p| to_value(get_client_stats(manager, p)))
        }
        "ListClients" => Ok(to_value(list_clients(manager))),
        "DeleteClient" => params(request.params).map(|p| to_value(delete_client(manager, p))),
        other => Err(RpcError::method_not_found(other)),
    };

    match result.and_then(|r| r) {
        Ok(value) => RpcResponse::ok(request.id, value),
        Err(error) => RpcResponse::err(request.id, error),
    }
}

fn params<T: DeserializeOwned + Default>(params: Option<serde_json::Value>) -> Result<T, RpcError> {
    match params {
        None | Some(serde_json::Value::Null) => Ok(T::default()),
        Some(value) => {
            serde_json::from_value(value).map_err(|e| RpcError::invalid_params(e.to_string()))
        }
    }
}

fn to_value<T: Serialize>(result: T) -> Result<serde_json::Value, RpcError> {
    serde_json::to_value(result).map_err(|e| RpcError::internal_error(e.to_string()))
}

fn set_client_config(manager: &AdmissionManager, params: SetClientConfigParams) -> Ack {
    let Some(message) = params.config else {
        return Ack::new(false, "Configuration is required");
    };
    if message.client_id.is_empty() {
        return Ack::new(false, "Client ID is required");
    }

    let config = ClientConfig::from(message);
    if let Err(e) = config.validate() {
        return Ack::new(false, e.to_string());
    }

    info!(client_id = %config.client_id, "Setting client configuration over RPC");
    manager.set_config(config);
    Ack::new(true, "Client configuration updated successfully")
}

fn get_client_config(manager: &AdmissionManager, params: ClientIdParams) -> ConfigLookup {
    let config = manager.get_config(&params.client_id);
    ConfigLookup {
        found: config.is_some(),
        config,
    }
}

fn get_client_stats(manager: &AdmissionManager, params: ClientIdParams) -> StatsLookup {
    let stats = manager.get_stats(&params.client_id);
    StatsLookup {
        found: stats.is_some(),
        stats,
    }
}

fn list_clients(manager: &AdmissionManager) -> ClientListing {
    let mut clients: Vec<ClientConfig> = manager.list_configs().into_values().collect();
    clients.sort_by(|a, b| a.client_id.cmp(&b.client_id));

    let mut stats: Vec<ClientStats> = manager.list_stats().into_values().collect();
    stats.sort_by(|a, b| a.client_id.cmp(&b.client_id));

    ClientListing { clients, stats }
}

fn delete_client(manager: &AdmissionManager, params: ClientIdParams) -> Ack {
    if params.client_id.is_empty() {
        return Ack::new(false, "Client ID is required");
    }
    if !manager.delete_client(&params.client_id) {
        return Ack::new(false, "Client not found");
    }

    info!(client_id = %params.client_id, "Deleted client over RPC");
    Ack::new(true, "Client configuration deleted successfully")
}

async fn rpc_handler(State(manager): State<AdmissionManager>, body: Bytes) -> Json<RpcResponse> {
    Json(handle_message(&manager, &body))
}

/// Build the JSON-RPC router
pub fn router(manager: AdmissionManager) -> Router {
    Router::new()
        .route("/rpc", post(rpc_handler))
        .with_state(manager)
        .layer(TraceLayer::new_for_http())
}
