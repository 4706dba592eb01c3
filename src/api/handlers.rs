//! HTTP request handlers and shared application state.

use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::GatewayError;
use crate::rate_limit::{
    AdmissionManager, ClientConfig, ClientStats, DashboardBuilder, DashboardData,
};

/// Shared application state passed to every handler via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub manager: AdmissionManager,
}

impl AppState {
    pub fn new(manager: AdmissionManager) -> Self {
        Self { manager }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClientListResponse {
    pub clients: HashMap<String, ClientConfig>,
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatsListResponse {
    pub stats: HashMap<String, ClientStats>,
    pub count: usize,
}

/// Acknowledgement for mutating calls
#[derive(Debug, Serialize, Deserialize)]
pub struct MutationResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<ClientConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Body of a PUT: the identifier comes from the path
#[derive(Debug, Deserialize)]
struct ClientUpdate {
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default, alias = "request_limit")]
    rpm: Option<u64>,
    #[serde(default, alias = "weight_limit")]
    tpm: Option<u64>,
}

fn default_enabled() -> bool {
    true
}

fn parse_json<T: serde::de::DeserializeOwned>(body: &Bytes) -> Result<T, GatewayError> {
    serde_json::from_slice(body).map_err(|e| GatewayError::InvalidJson(e.to_string()))
}

pub async fn list_clients(State(state): State<AppState>) -> Json<ClientListResponse> {
    let clients = state.manager.list_configs();
    Json(ClientListResponse {
        count: clients.len(),
        clients,
    })
}

pub async fn create_client(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<MutationResponse>), GatewayError> {
    let config: ClientConfig = parse_json(&body)?;
    config.validate()?;

    info!(client_id = %config.client_id, "Creating client configuration");
    state.manager.set_config(config.clone());

    Ok((
        StatusCode::CREATED,
        Json(MutationResponse {
            success: true,
            message: "Client configuration created successfully".to_string(),
            config: Some(config),
        }),
    ))
}

pub async fn get_client(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
) -> Result<Json<ClientConfig>, GatewayError> {
    state
        .manager
        .get_config(&client_id)
        .map(Json)
        .ok_or(GatewayError::ClientNotFound(client_id))
}

pub async fn update_client(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
    body: Bytes,
) -> Result<Json<MutationResponse>, GatewayError> {
    let update: ClientUpdate = parse_json(&body)?;
    let config = ClientConfig::new(client_id, update.rpm, update.tpm).with_enabled(update.enabled);
    config.validate()?;

    info!(client_id = %config.client_id, "Updating client configuration");
    state.manager.set_config(config.clone());

    Ok(Json(MutationResponse {
        success: true,
        message: "Client configuration updated successfully".to_string(),
        config: Some(config),
    }))
}

pub async fn delete_client(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
) -> Result<Json<MutationResponse>, GatewayError> {
    if !state.manager.delete_client(&client_id) {
        return Err(GatewayError::ClientNotFound(client_id));
    }

    info!(client_id = %client_id, "Deleted client configuration");
    Ok(Json(MutationResponse {
        success: true,
        message: "Client configuration deleted successfully".to_string(),
        config: None,
    }))
}

pub async fn get_client_stats(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
) -> Result<Json<ClientStats>, GatewayError> {
    state
        .manager
        .get_stats(&client_id)
        .map(Json)
        .ok_or(GatewayError::ClientNotFound(client_id))
}

pub async fn list_stats(State(state): State<AppState>) -> Json<StatsListResponse> {
    let stats = state.manager.list_stats();
    Json(StatsListResponse {
        count: stats.len(),
        stats,
    })
}

pub async fn summary(State(state): State<AppState>) -> Json<DashboardData> {
    Json(DashboardBuilder::new(state.manager.clone()).build())
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
