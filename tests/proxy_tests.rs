use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::Request;
use axum::http::StatusCode as AxumStatus;
use axum::routing::any;
use axum::{Json, Router};
use quotagate::config::ProxyConfig;
use quotagate::proxy::{self, ProxyState};
use quotagate::rate_limit::{AdmissionManager, ClientConfig};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

/// Upstream that echoes what it received
async fn spawn_upstream() -> SocketAddr {
    async fn echo(request: Request) -> (AxumStatus, Json<Value>) {
        let (parts, body) = request.into_parts();
        let body = axum::body::to_bytes(body, usize::MAX).await.unwrap();
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        (
            AxumStatus::OK,
            Json(json!({
                "method": parts.method.as_str(),
                "uri": parts.uri.to_string(),
                "body": String::from_utf8_lossy(&body),
                "client_id": header("x-client-id"),
                "host": header("host"),
            })),
        )
    }

    async fn teapot() -> AxumStatus {
        AxumStatus::IM_A_TEAPOT
    }

    let app = Router::new()
        .route("/teapot", any(teapot))
        .fallback(echo);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn spawn_proxy(upstream_url: String) -> (String, AdmissionManager) {
    spawn_proxy_with(ProxyConfig {
        upstream_url,
        timeout_secs: 5,
        ..ProxyConfig::default()
    })
    .await
}

async fn spawn_proxy_with(config: ProxyConfig) -> (String, AdmissionManager) {
    let manager = AdmissionManager::new();
    let app = proxy::router(ProxyState::new(manager.clone(), &config).unwrap());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), manager)
}

async fn send(base_url: &str, path: &str, client_id: &str, weight: &str) -> reqwest::Response {
    Client::new()
        .post(format!("{}{}", base_url, path))
        .header("X-Client-ID", client_id)
        .header("X-Token-Estimate", weight)
        .body("hello upstream")
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_admitted_request_is_forwarded() {
    let upstream = spawn_upstream().await;
    let (base_url, manager) = spawn_proxy(format!("http://{}", upstream)).await;

    let resp = send(&base_url, "/v1/chat?stream=false", "alice", "42").await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["access-control-allow-origin"], "*");

    let echoed: Value = resp.json().await.unwrap();
    assert_eq!(echoed["method"], "POST");
    assert_eq!(echoed["uri"], "/v1/chat?stream=false");
    assert_eq!(echoed["body"], "hello upstream");
    assert_eq!(echoed["client_id"], "alice");
    assert_eq!(echoed["host"], upstream.to_string());

    let stats = manager.get_stats("alice").unwrap();
    assert_eq!(stats.success_requests, 1);
    assert_eq!(stats.tokens_used, 42);
    assert!(stats.avg_latency_ms.is_some());
}

#[tokio::test]
async fn test_upstream_status_passes_through() {
    let upstream = spawn_upstream().await;
    let (base_url, _) = spawn_proxy(format!("http://{}", upstream)).await;

    let resp = send(&base_url, "/teapot", "alice", "1").await;
    assert_eq!(resp.status(), StatusCode::IM_A_TEAPOT);
}

#[tokio::test]
async fn test_missing_and_invalid_headers() {
    let upstream = spawn_upstream().await;
    let (base_url, manager) = spawn_proxy(format!("http://{}", upstream)).await;

    let resp = Client::new()
        .get(format!("{}/anything", base_url))
        .header("X-Token-Estimate", "1")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "missing_header");

    let resp = Client::new()
        .get(format!("{}/anything", base_url))
        .header("X-Client-ID", "alice")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = send(&base_url, "/anything", "alice", "-3").await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "invalid_header");

    // Validation failures never reach admission
    assert_eq!(manager.client_count(), 0);
}

#[tokio::test]
async fn test_rejected_request_gets_429() {
    let upstream = spawn_upstream().await;
    let (base_url, manager) = spawn_proxy(format!("http://{}", upstream)).await;
    manager.set_config(ClientConfig::new("alice", Some(1), None));
    manager.set_config(ClientConfig::new("bob", None, Some(10)));

    assert_eq!(send(&base_url, "/", "alice", "1").await.status(), StatusCode::OK);

    let resp = send(&base_url, "/", "alice", "1").await;
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(resp.headers().contains_key("retry-after"));
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "request-rate-exceeded");
    assert_eq!(body["message"], "Request rate limit exceeded");

    let resp = send(&base_url, "/", "bob", "11").await;
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    // Never satisfiable, so no retry hint
    assert!(!resp.headers().contains_key("retry-after"));
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "weight-rate-exceeded");
    assert_eq!(body["message"], "Weight rate limit exceeded");

    let alice = manager.get_stats("alice").unwrap();
    assert_eq!(alice.rpm_dropped, 1);
    assert_eq!(manager.get_stats("bob").unwrap().tpm_dropped, 1);
}

#[tokio::test]
async fn test_upstream_down_is_bad_gateway() {
    // Bind then release a port so nothing listens on it
    let dead = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let (base_url, manager) = spawn_proxy(format!("http://{}", dead)).await;

    let resp = tokio::time::timeout(
        Duration::from_secs(10),
        send(&base_url, "/", "alice", "5"),
    )
    .await
    .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "bad_gateway");

    // Admission already happened; latency is still recorded
    let stats = manager.get_stats("alice").unwrap();
    assert_eq!(stats.success_requests, 1);
    assert!(stats.avg_latency_ms.is_some());
}

#[tokio::test]
async fn test_oversized_streamed_body_spends_no_quota() {
    let upstream = spawn_upstream().await;
    let (base_url, manager) = spawn_proxy_with(ProxyConfig {
        upstream_url: format!("http://{}", upstream),
        timeout_secs: 5,
        max_body_bytes: 8,
        ..ProxyConfig::default()
    })
    .await;
    manager.set_config(ClientConfig::new("alice", Some(1), Some(100)));

    // No Content-Length: the limit is only discovered while reading
    let chunks = futures::stream::iter((0..4).map(|_| Ok::<_, std::io::Error>(vec![b'x'; 16])));
    let resp = Client::new()
        .post(format!("{}/upload", base_url))
        .header("X-Client-ID", "alice")
        .header("X-Token-Estimate", "10")
        .body(reqwest::Body::wrap_stream(chunks))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);

    let stats = manager.get_stats("alice").unwrap();
    assert_eq!(stats.total_requests, 0);
    assert_eq!(stats.success_requests, 0);
    assert_eq!(stats.tokens_used, 0);
    assert_eq!(stats.rpm_remaining, Some(1));
    assert!(stats.avg_latency_ms.is_none());

    // The single request unit is still available
    let resp = Client::new()
        .post(format!("{}/upload", base_url))
        .header("X-Client-ID", "alice")
        .header("X-Token-Estimate", "10")
        .body("small")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}
