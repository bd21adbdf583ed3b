use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::header;
use axum::routing::{get, IntoMakeService};
use axum::{middleware, Json, Router};
use http::{HeaderValue, Method, StatusCode, Uri};
use serde::{Deserialize, Serialize};
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::propagate_header::PropagateHeaderLayer;
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::timeout::TimeoutLayer;

use crate::challenge::store::ChallengeStore;
use crate::config::settings::SETTINGS;
use crate::middleware::request_id_mw::generate_request_id_mw;
use crate::models::health::HealthResponse;
use crate::models::utc_timestamp;
use crate::routes::v1::kyc::new_kyc_routes;
use crate::routes::v1::liveness::new_liveness_routes;
use crate::service::liveness_service::LivenessService;
use crate::service::verification_service::{ScoringPolicy, VerificationService};
use crate::stage::registry::StageRegistry;
use crate::state::kyc_state::KycState;
use crate::state::liveness_state::LivenessState;

#[derive(Clone, Serialize, Deserialize)]
struct FallbackResponse {
    message: String,
}

#[derive(Clone)]
pub struct RouterState {
    registry: Arc<StageRegistry>,
    store: Arc<ChallengeStore>,
}

impl RouterState {
    pub fn new(registry: Arc<StageRegistry>, store: Arc<ChallengeStore>) -> Self {
        RouterState { registry, store }
    }
}

pub fn root_routes(router_state: RouterState) -> IntoMakeService<Router> {
    let request_timeout = SETTINGS.server.request_timeout.unwrap_or(60);

    let verification_service = VerificationService::new(
        &router_state.registry,
        ScoringPolicy {
            similarity_threshold: SETTINGS.verification.similarity_threshold,
            pending_face_floor: SETTINGS.verification.pending_face_floor,
            pending_ocr_floor: SETTINGS.verification.pending_ocr_floor,
        },
        Duration::from_secs(request_timeout),
    );
    let liveness_service = LivenessService::new(
        &router_state.registry,
        &router_state.store,
        SETTINGS.liveness.min_frames,
        SETTINGS.liveness.face_ratio_floor,
        SETTINGS.upload.max_upload_bytes(),
    );

    let v1_router = {
        let kyc_state = KycState::new(verification_service, SETTINGS.upload.max_upload_bytes());
        let kyc_routes = new_kyc_routes().with_state(kyc_state);

        let liveness_state = LivenessState::new(liveness_service);
        let liveness_routes = new_liveness_routes().with_state(liveness_state);

        let health_route = Router::new()
            .route("/health", get(healthcheck))
            .with_state(Arc::clone(&router_state.registry));

        Router::new().nest(
            "/v1",
            Router::new()
                .merge(kyc_routes)
                .merge(liveness_routes)
                .merge(health_route),
        )
    };

    let app_router = Router::new()
        .nest("/api", v1_router)
        .layer(CompressionLayer::new())
        .layer(PropagateHeaderLayer::new(header::HeaderName::from_static("x-request-id")))
        .layer(cors_layer())
        .layer(middleware::from_fn(generate_request_id_mw))
        .layer(TimeoutLayer::new(Duration::from_secs(request_timeout + 5)))
        .layer(SetSensitiveHeadersLayer::new(std::iter::once(header::AUTHORIZATION)))
        .fallback(fallback)
        .into_make_service();
    app_router
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

/// Readiness is the source of truth: healthy iff all four stages loaded.
async fn healthcheck(
    State(registry): State<Arc<StageRegistry>>,
) -> (StatusCode, Json<HealthResponse>) {
    let health = HealthResponse::from_readiness(registry.readiness(), utc_timestamp());

    let status_code = if health.status == "healthy" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(health))
}
