use axum::Json;
use axum::response::{IntoResponse, Response};
use chrono::{SecondsFormat, Utc};
use http::StatusCode;
use serde_json::json;

/// Domain error taxonomy. Soft outcomes (rejected, pending, low confidence)
/// and challenge-flow conditions (unknown, expired, or already-consumed
/// challenges) are verdicts, not errors; only the conditions below become
/// non-2xx.
#[derive(thiserror::Error, Debug)]
pub enum KycError {
    #[error("{0}")]
    BadInput(String),

    #[error("file too large")]
    PayloadTooLarge,

    #[error("No face detected in ID document")]
    NoFaceInId,

    #[error("No face detected in selfie image")]
    NoFaceInSelfie,

    #[error("Service not ready: {0}")]
    NotReady(String),

    #[error("verification deadline exceeded")]
    Timeout,

    #[error("{stage} stage failed")]
    BackendFailure { stage: &'static str },

    #[error("An unexpected error occurred")]
    Internal,
}

impl KycError {
    pub fn kind(&self) -> &'static str {
        match self {
            KycError::BadInput(_) => "BAD_INPUT",
            KycError::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            KycError::NoFaceInId => "NO_FACE_IN_ID",
            KycError::NoFaceInSelfie => "NO_FACE_IN_SELFIE",
            KycError::NotReady(_) => "NOT_READY",
            KycError::Timeout => "TIMEOUT",
            KycError::BackendFailure { .. } => "BACKEND_FAILURE",
            KycError::Internal => "INTERNAL",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            KycError::BadInput(_) => StatusCode::BAD_REQUEST,
            KycError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            KycError::NoFaceInId => StatusCode::BAD_REQUEST,
            KycError::NoFaceInSelfie => StatusCode::BAD_REQUEST,
            KycError::NotReady(_) => StatusCode::SERVICE_UNAVAILABLE,
            KycError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            KycError::BackendFailure { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            KycError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    // Client-facing text. Stack traces and internal identifiers stay in the
    // logs; backend faults surface as a generic message.
    fn public_message(&self) -> String {
        match self {
            KycError::BackendFailure { .. } | KycError::Internal => {
                "An unexpected error occurred".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for KycError {
    fn into_response(self) -> Response {
        let status_code = self.status_code();
        let body = Json(json!({
            "error": self.kind(),
            "message": self.public_message(),
            "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }));

        (status_code, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(KycError::BadInput("x".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(KycError::PayloadTooLarge.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(KycError::NoFaceInId.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            KycError::NotReady("detector".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(KycError::Timeout.status_code(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            KycError::BackendFailure { stage: "ocr" }.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_backend_message_is_generic() {
        let err = KycError::BackendFailure { stage: "face_matcher" };
        assert_eq!(err.public_message(), "An unexpected error occurred");
        assert_eq!(err.kind(), "BACKEND_FAILURE");
    }
}
