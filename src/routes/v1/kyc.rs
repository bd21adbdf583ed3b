use axum::extract::DefaultBodyLimit;
use axum::routing::post;
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;

use crate::config::settings::SETTINGS;
use crate::handler::kyc_handler::{extract_ocr, verify_kyc};
use crate::state::kyc_state::KycState;

pub fn new_kyc_routes() -> Router<KycState> {
    // Per-image caps are enforced at decode time; the body limit only has
    // to cover the multipart envelope around them.
    let body_limit = SETTINGS.upload.max_upload_bytes() * 4;

    Router::new()
        .route("/kyc/verify", post(verify_kyc))
        .route("/kyc/ocr", post(extract_ocr))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
}
