use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post, IntoMakeService};
use axum::{middleware, Json, Router};
use http::{HeaderValue, Method, StatusCode, Uri};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

use crate::config::settings::SETTINGS;
use crate::edge::handler::{
    proxy_challenge, proxy_health, proxy_liveness_detect, proxy_liveness_verify, proxy_verify,
    verify_enduser, EdgeState,
};
use crate::middleware::request_id_mw::generate_request_id_mw;

#[derive(Clone, Serialize)]
struct FallbackResponse {
    message: String,
}

pub fn edge_routes(state: EdgeState) -> IntoMakeService<Router> {
    let request_timeout = SETTINGS.server.request_timeout.unwrap_or(60);
    let body_limit = SETTINGS.upload.max_upload_bytes() * 8;

    Router::new()
        .route("/health", get(proxy_health))
        .route("/api/v1/health", get(proxy_health))
        .route("/api/v1/kyc/verify", post(proxy_verify))
        .route("/api/v1/liveness/challenge", get(proxy_challenge))
        .route("/api/v1/liveness/verify", post(proxy_liveness_verify))
        .route("/api/v1/liveness/detect", post(proxy_liveness_detect))
        .route("/v2/enduser/verify", post(verify_enduser))
        .with_state(state)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(cors_layer())
        .layer(middleware::from_fn(generate_request_id_mw))
        .layer(TimeoutLayer::new(Duration::from_secs(request_timeout + 5)))
        .fallback(fallback)
        .into_make_service()
}

fn cors_layer() -> CorsLayer {
    let origins = &SETTINGS.cors.allowed_origins;
    let methods = [Method::GET, Method::POST, Method::HEAD, Method::OPTIONS];

    if origins.iter().any(|origin| origin == "*") {
        return CorsLayer::new().allow_origin(Any).allow_headers(Any).allow_methods(methods);
    }

    let parsed: Vec<HeaderValue> =
        origins.iter().filter_map(|origin| origin.parse().ok()).collect();
    CorsLayer::new().allow_origin(parsed).allow_headers(Any).allow_methods(methods)
}

async fn fallback(uri: Uri) -> (StatusCode, Json<FallbackResponse>) {
    (StatusCode::NOT_FOUND, Json(FallbackResponse {
        message: format!("No route for {uri}"),
    }))
}
