//! REST Control Plane
//!
//! Client configuration and statistics over HTTP, mounted under `/api/v1`.
//! Every route is a thin adapter over the [`AdmissionManager`] API.
//!
//! [`AdmissionManager`]: crate::rate_limit::AdmissionManager

/// HTTP request handlers and application state.
pub mod handlers;

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::Instrument;

use handlers::AppState;

async fn request_id_middleware(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let span = tracing::info_span!("request", request_id = %request_id);
    async move {
        let mut response = next.run(req).await;
        if let Ok(value) = axum::http::HeaderValue::from_str(&request_id) {
            response.headers_mut().insert(
                axum::http::HeaderName::from_static("x-request-id"),
                value,
            );
        }
        response
    }
    .instrument(span)
    .await
}

/// Build the REST router
pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .route(
            "/clients",
            get(handlers::list_clients).post(handlers::create_client),
        )
        .route(
            "/clients/{client_id}",
            get(handlers::get_client)
                .put(handlers::update_client)
                .delete(handlers::delete_client),
        )
        .route("/clients/{client_id}/stats", get(handlers::get_client_stats))
        .route("/stats", get(handlers::list_stats))
        .route("/summary", get(handlers::summary));

    Router::new()
        .nest("/api/v1", api)
        .route("/health", get(handlers::health))
        .with_state(state)
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
