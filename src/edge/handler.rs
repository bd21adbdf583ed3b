use axum::extract::{Multipart, State};
use axum::Json;
use bytes::Bytes;
use http::StatusCode;
use log::{error, info, warn};
use reqwest::multipart::{Form, Part};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::edge::payload::{
    normalize, select_documents, EnduserVerifyRequest, EnduserVerifyResponse,
};
use crate::error::errors::KycError;

#[derive(Clone)]
pub struct EdgeState {
    pub client: reqwest::Client,
    pub inference_url: String,
    pub max_upload_bytes: usize,
}

impl EdgeState {
    pub fn new(client: reqwest::Client, inference_url: String, max_upload_bytes: usize) -> Self {
        EdgeState { client, inference_url, max_upload_bytes }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.inference_url.trim_end_matches('/'), path)
    }
}

/// Legacy browser-SDK endpoint. Base64 documents are normalized into the
/// canonical multipart form and forwarded; every terminal verdict comes
/// back as HTTP 200 with a status string, including the NO_FACE rejections
/// the inference gateway reports as 400.
pub async fn verify_enduser(
    State(state): State<EdgeState>,
    Json(request): Json<EnduserVerifyRequest>,
) -> Result<Json<EnduserVerifyResponse>, KycError> {
    let (front, selfie) = select_documents(&request)?;

    let id_bytes = normalize(front)?;
    let selfie_bytes = normalize(selfie)?;
    for bytes in [&id_bytes, &selfie_bytes] {
        if bytes.len() > state.max_upload_bytes {
            return Err(KycError::PayloadTooLarge);
        }
    }

    info!("forwarding legacy verification ({} byte id document)", id_bytes.len());

    let form = Form::new()
        .part("id_document", image_part(&id_bytes, "id_document")?)
        .part("selfie_image", image_part(&selfie_bytes, "selfie_image")?);

    let (status, body) = forward_multipart(&state, form).await?;
    let verification_id = Uuid::new_v4().to_string();

    if status == StatusCode::OK {
        let verdict_status = body["verification_status"].as_str().unwrap_or("error");
        let (edge_status, message) = match verdict_status {
            "approved" => ("approved", verdict_message(&body)),
            "rejected" => ("rejected", verdict_message(&body)),
            // Pending verdicts hand the user over to the liveness flow.
            "pending" => ("pending-for-liveness", verdict_message(&body)),
            _ => return Err(KycError::BackendFailure { stage: "inference_gateway" }),
        };

        return Ok(Json(EnduserVerifyResponse {
            verification_id,
            status: edge_status.to_string(),
            message,
            result: body,
        }));
    }

    if status == StatusCode::BAD_REQUEST && is_no_face(&body) {
        // The canonical contract reports missing faces as 400 so clients
        // retry with a different image; the browser SDK expects a 200
        // rejection instead.
        let message = body["message"].as_str().unwrap_or("No face detected").to_string();
        return Ok(Json(EnduserVerifyResponse {
            verification_id,
            status: "rejected".to_string(),
            message,
            result: json!({ "verification_status": "rejected" }),
        }));
    }

    Err(translate_error(status, &body))
}

/// Canonical multipart passthrough: fields are re-formed and forwarded,
/// and the upstream verdict comes back unchanged.
pub async fn proxy_verify(
    State(state): State<EdgeState>,
    mut payload: Multipart,
) -> Result<(StatusCode, Json<Value>), KycError> {
    let mut form = Form::new();
    let mut seen_any = false;

    while let Some(field) = payload.next_field().await.map_err(|e| {
        error!("failed to read multipart body: {e}");
        KycError::BadInput("failed to read multipart body".to_string())
    })? {
        let name = field.name().unwrap_or_default().to_string();
        if name.is_empty() {
            continue;
        }

        let data = field.bytes().await.map_err(|e| {
            error!("failed to read multipart field {name}: {e}");
            KycError::BadInput("failed to process image".to_string())
        })?;

        if data.len() > state.max_upload_bytes {
            return Err(KycError::PayloadTooLarge);
        }

        form = form.part(name.clone(), image_part(&data, &name)?);
        seen_any = true;
    }

    if !seen_any {
        return Err(KycError::BadInput("multipart body is empty".to_string()));
    }

    let (status, body) = forward_multipart(&state, form).await?;
    Ok((status, Json(body)))
}

pub async fn proxy_health(
    State(state): State<EdgeState>,
) -> Result<(StatusCode, Json<Value>), KycError> {
    let response = state
        .client
        .get(state.url("/api/v1/health"))
        .send()
        .await
        .map_err(|e| {
            error!("health probe failed: {e}");
            KycError::BackendFailure { stage: "inference_gateway" }
        })?;

    let status = response.status();
    let body: Value = response.json().await.unwrap_or_else(|_| json!({ "status": "unknown" }));
    Ok((StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY), Json(body)))
}

pub async fn proxy_challenge(
    State(state): State<EdgeState>,
) -> Result<(StatusCode, Json<Value>), KycError> {
    forward_json(&state, reqwest::Method::GET, "/api/v1/liveness/challenge", None).await
}

pub async fn proxy_liveness_verify(
    State(state): State<EdgeState>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<Value>), KycError> {
    forward_json(&state, reqwest::Method::POST, "/api/v1/liveness/verify", Some(body)).await
}

pub async fn proxy_liveness_detect(
    State(state): State<EdgeState>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<Value>), KycError> {
    forward_json(&state, reqwest::Method::POST, "/api/v1/liveness/detect", Some(body)).await
}

async fn forward_json(
    state: &EdgeState,
    method: reqwest::Method,
    path: &str,
    body: Option<Value>,
) -> Result<(StatusCode, Json<Value>), KycError> {
    let mut request = state.client.request(method, state.url(path));
    if let Some(body) = body {
        request = request.json(&body);
    }

    let response = request.send().await.map_err(|e| {
        error!("forwarding {path} failed: {e}");
        KycError::BackendFailure { stage: "inference_gateway" }
    })?;

    let status = StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let body: Value = response.json().await.map_err(|e| {
        error!("unreadable response from {path}: {e}");
        KycError::BackendFailure { stage: "inference_gateway" }
    })?;

    Ok((status, Json(body)))
}

async fn forward_multipart(state: &EdgeState, form: Form) -> Result<(StatusCode, Value), KycError> {
    let response = state
        .client
        .post(state.url("/api/v1/kyc/verify"))
        .multipart(form)
        .send()
        .await
        .map_err(|e| {
            error!("forwarding verification failed: {e}");
            KycError::BackendFailure { stage: "inference_gateway" }
        })?;

    let status = StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let body: Value = response.json().await.map_err(|e| {
        error!("unreadable verdict from inference gateway: {e}");
        KycError::BackendFailure { stage: "inference_gateway" }
    })?;

    Ok((status, body))
}

fn image_part(bytes: &Bytes, name: &str) -> Result<Part, KycError> {
    let (mime, extension) = match image::guess_format(bytes) {
        Ok(image::ImageFormat::Png) => ("image/png", "png"),
        _ => ("image/jpeg", "jpg"),
    };

    Part::bytes(bytes.to_vec())
        .file_name(format!("{name}.{extension}"))
        .mime_str(mime)
        .map_err(|e| {
            error!("failed to build multipart part: {e}");
            KycError::Internal
        })
}

fn verdict_message(body: &Value) -> String {
    body["face_verification_details"]["message"]
        .as_str()
        .unwrap_or("Verification complete")
        .to_string()
}

fn is_no_face(body: &Value) -> bool {
    body["error"]
        .as_str()
        .map(|kind| kind.starts_with("NO_FACE"))
        .unwrap_or(false)
}

fn translate_error(status: StatusCode, body: &Value) -> KycError {
    let message = body["message"].as_str().unwrap_or("verification failed").to_string();

    match status {
        StatusCode::BAD_REQUEST => KycError::BadInput(message),
        StatusCode::PAYLOAD_TOO_LARGE => KycError::PayloadTooLarge,
        StatusCode::SERVICE_UNAVAILABLE => KycError::NotReady(message),
        StatusCode::GATEWAY_TIMEOUT => KycError::Timeout,
        other => {
            warn!("inference gateway returned {other}: {message}");
            KycError::BackendFailure { stage: "inference_gateway" }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_no_face() {
        assert!(is_no_face(&json!({ "error": "NO_FACE_IN_ID" })));
        assert!(is_no_face(&json!({ "error": "NO_FACE_IN_SELFIE" })));
        assert!(!is_no_face(&json!({ "error": "BAD_INPUT" })));
        assert!(!is_no_face(&json!({})));
    }

    #[test]
    fn test_translate_error() {
        let err = translate_error(StatusCode::PAYLOAD_TOO_LARGE, &json!({}));
        assert!(matches!(err, KycError::PayloadTooLarge));

        let err = translate_error(StatusCode::SERVICE_UNAVAILABLE, &json!({ "message": "loading" }));
        assert!(matches!(err, KycError::NotReady(_)));

        let err = translate_error(StatusCode::INTERNAL_SERVER_ERROR, &json!({}));
        assert!(matches!(err, KycError::BackendFailure { .. }));
    }

    #[test]
    fn test_verdict_message_fallback() {
        assert_eq!(verdict_message(&json!({})), "Verification complete");
        assert_eq!(
            verdict_message(&json!({
                "face_verification_details": { "message": "Faces match (85.0% similarity)" }
            })),
            "Faces match (85.0% similarity)"
        );
    }
}
