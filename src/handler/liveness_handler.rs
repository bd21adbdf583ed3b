use axum::extract::State;
use axum::Json;
use log::info;

use crate::error::errors::KycError;
use crate::models::challenge::ChallengeResponse;
use crate::models::liveness::{
    LivenessBatchRequest, LivenessBatchResponse, LivenessVerdictResponse, LivenessVerifyRequest,
};
use crate::state::liveness_state::LivenessState;

pub async fn get_challenge(
    State(state): State<LivenessState>,
) -> Result<Json<ChallengeResponse>, KycError> {
    Ok(Json(state.liveness_service.issue_challenge()))
}

pub async fn verify_liveness(
    State(state): State<LivenessState>,
    Json(request): Json<LivenessVerifyRequest>,
) -> Result<Json<LivenessVerdictResponse>, KycError> {
    if request.frames.is_empty() {
        return Err(KycError::BadInput("No frames provided".to_string()));
    }

    info!(
        "verifying challenge {} with {} frames",
        request.challenge_id,
        request.frames.len()
    );

    let verdict = state
        .liveness_service
        .verify_challenge(request.challenge_id, request.frames)
        .await?;
    Ok(Json(verdict))
}

pub async fn detect_liveness(
    State(state): State<LivenessState>,
    Json(request): Json<LivenessBatchRequest>,
) -> Result<Json<LivenessBatchResponse>, KycError> {
    let response = state
        .liveness_service
        .detect_batch(request.frames, request.initial_blink_count)
        .await?;
    Ok(Json(response))
}
