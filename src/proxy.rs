//! Proxy Forwarding Layer
//!
//! Every request arriving on the proxy listener is admitted or rejected by the
//! [`AdmissionManager`] before it reaches the upstream service:
//!
//! 1. The client identifier and weight estimate are read from headers
//!    (`x-client-id` and `x-token-estimate` unless configured otherwise).
//! 2. A rejected request is answered with 429 and never forwarded.
//! 3. An admitted request is forwarded unchanged (minus hop-by-hop headers)
//!    and the upstream response is streamed back to the caller.
//! 4. The time until the upstream answered is folded into the client's
//!    average latency, including when forwarding failed.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue};
use axum::response::Response;
use axum::Router;
use tracing::{debug, warn};

use crate::config::ProxyConfig;
use crate::error::GatewayError;
use crate::rate_limit::{AdmissionManager, Verdict};

/// Headers that apply to a single connection and must not be forwarded
const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Shared state of the proxy listener
#[derive(Clone)]
pub struct ProxyState {
    manager: AdmissionManager,
    client: reqwest::Client,
    upstream: String,
    client_header: HeaderName,
    weight_header: HeaderName,
    max_body_bytes: usize,
}

impl ProxyState {
    /// Build proxy state for the given upstream settings
    ///
    /// # Errors
    ///
    /// Returns an error if a header name is invalid or the HTTP client cannot
    /// be constructed.
    pub fn new(manager: AdmissionManager, config: &ProxyConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("Failed to build upstream HTTP client")?;

        let client_header = HeaderName::from_bytes(config.client_header.as_bytes())
            .with_context(|| format!("Invalid client header name: {}", config.client_header))?;
        let weight_header = HeaderName::from_bytes(config.weight_header.as_bytes())
            .with_context(|| format!("Invalid weight header name: {}", config.weight_header))?;

        Ok(Self {
            manager,
            client,
            upstream: config.upstream_url.trim_end_matches('/').to_string(),
            client_header,
            weight_header,
            max_body_bytes: config.max_body_bytes,
        })
    }

    /// Upstream base URL requests are forwarded to
    pub fn upstream(&self) -> &str {
        &self.upstream
    }
}

/// Build the proxy router: every path and method goes through admission
pub fn router(state: ProxyState) -> Router {
    Router::new().fallback(proxy_handler).with_state(state)
}

async fn proxy_handler(
    State(state): State<ProxyState>,
    request: Request,
) -> Result<Response, GatewayError> {
    let (parts, body) = request.into_parts();

    let client_id = client_id(&parts.headers, &state.client_header)?;
    let weight = weight(&parts.headers, &state.weight_header)?;

    if let Some(length) = content_length(&parts.headers) {
        if length > state.max_body_bytes {
            return Err(GatewayError::PayloadTooLarge(state.max_body_bytes));
        }
    }

    // Buffered before admission so an oversized body never spends quota
    let body = axum::body::to_bytes(body, state.max_body_bytes)
        .await
        .map_err(|_| GatewayError::PayloadTooLarge(state.max_body_bytes))?;

    if let Verdict::Rejected(rejection) = state.manager.decide(&client_id, weight) {
        warn!(
            client_id = %client_id,
            weight,
            reason = %rejection.reason,
            "Request rate limited"
        );
        return Err(GatewayError::RateLimited(rejection));
    }

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = format!("{}{}", state.upstream, path_and_query);

    let started = Instant::now();
    let result = state
        .client
        .request(parts.method.clone(), &url)
        .headers(forwarded_headers(&parts.headers))
        .body(body)
        .send()
        .await;
    let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
    state.manager.record_latency(&client_id, latency_ms);

    let upstream_response = result.map_err(|e| {
        warn!(client_id = %client_id, url = %url, error = %e, "Upstream request failed");
        GatewayError::Upstream(e.to_string())
    })?;

    debug!(
        client_id = %client_id,
        method = %parts.method,
        url = %url,
        status = upstream_response.status().as_u16(),
        latency_ms,
        "Request forwarded"
    );

    Ok(into_response(upstream_response))
}

/// Client identifier from the request headers
fn client_id(headers: &HeaderMap, name: &HeaderName) -> Result<String, GatewayError> {
    let value = headers
        .get(name)
        .ok_or_else(|| GatewayError::MissingHeader(name.to_string()))?;

    let value = value
        .to_str()
        .map_err(|_| GatewayError::InvalidHeader(format!("{} must be valid ASCII", name)))?
        .trim();

    if value.is_empty() {
        return Err(GatewayError::MissingHeader(name.to_string()));
    }

    Ok(value.to_string())
}

/// Declared request weight from the request headers
fn weight(headers: &HeaderMap, name: &HeaderName) -> Result<u64, GatewayError> {
    let value = headers
        .get(name)
        .ok_or_else(|| GatewayError::MissingHeader(name.to_string()))?;

    value
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .ok_or_else(|| {
            GatewayError::InvalidHeader(format!("{} must be a non-negative integer", name))
        })
}

fn content_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name.as_str())
}

/// Request headers to send upstream
fn forwarded_headers(headers: &HeaderMap) -> HeaderMap {
    headers
        .iter()
        .filter(|(name, _)| {
            !is_hop_by_hop(name) && **name != header::HOST && **name != header::CONTENT_LENGTH
        })
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

/// Convert the upstream response into the response sent to the caller
fn into_response(upstream: reqwest::Response) -> Response {
    let status = upstream.status();
    let mut headers: HeaderMap = upstream
        .headers()
        .iter()
        .filter(|(name, _)| !is_hop_by_hop(name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );

    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}
