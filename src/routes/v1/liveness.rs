use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;

use crate::config::settings::SETTINGS;
use crate::handler::liveness_handler::{detect_liveness, get_challenge, verify_liveness};
use crate::state::liveness_state::LivenessState;

pub fn new_liveness_routes() -> Router<LivenessState> {
    // Frame batches arrive base64-encoded, so the JSON body runs larger
    // than the raw frames.
    let body_limit = SETTINGS.upload.max_upload_bytes() * 8;

    Router::new()
        .route("/liveness/challenge", get(get_challenge))
        .route("/liveness/verify", post(verify_liveness))
        .route("/liveness/detect", post(detect_liveness))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
}
