use axum::extract::multipart::Field;
use axum::extract::{Multipart, State};
use axum::Json;
use bytes::Bytes;
use ecs_logger::extra_fields;
use http::HeaderMap;
use log::{error, info};
use tokio::task;

use crate::error::errors::KycError;
use crate::imaging::raster::{decode_image, DecodedImage};
use crate::logger::logger::LoggerExtraFields;
use crate::models::verdict::{OcrOnlyResponse, VerificationVerdict};
use crate::state::kyc_state::KycState;

pub async fn verify_kyc(
    headers: HeaderMap,
    State(state): State<KycState>,
    mut payload: Multipart,
) -> Result<Json<VerificationVerdict>, KycError> {
    bind_request_id(&headers);
    info!("received kyc verification request");

    let mut id_document: Option<Bytes> = None;
    let mut id_document_back: Option<Bytes> = None;
    let mut selfie_image: Option<Bytes> = None;

    while let Some(field) = next_field(&mut payload).await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "id_document" => id_document = Some(field_bytes(field).await?),
            "id_document_back" => id_document_back = Some(field_bytes(field).await?),
            "selfie_image" => selfie_image = Some(field_bytes(field).await?),
            _ => {}
        }
    }

    let id_bytes = id_document
        .ok_or_else(|| KycError::BadInput("id_document is required".to_string()))?;
    let selfie_bytes = selfie_image
        .ok_or_else(|| KycError::BadInput("selfie_image is required".to_string()))?;

    let cap = state.max_upload_bytes;
    let id_image = decode_on_worker(id_bytes, cap).await?;
    let selfie = decode_on_worker(selfie_bytes, cap).await?;

    // The back side is validated when present; scoring only reads the front.
    if let Some(back_bytes) = id_document_back {
        decode_on_worker(back_bytes, cap).await?;
    }

    let verdict = state.verification_service.verify(id_image, selfie).await?;
    info!("completed kyc verification");

    extra_fields::clear_extra_fields();
    Ok(Json(verdict))
}

pub async fn extract_ocr(
    headers: HeaderMap,
    State(state): State<KycState>,
    mut payload: Multipart,
) -> Result<Json<OcrOnlyResponse>, KycError> {
    bind_request_id(&headers);
    info!("received ocr extraction request");

    let mut document: Option<Bytes> = None;

    while let Some(field) = next_field(&mut payload).await? {
        if field.name().unwrap_or_default() == "document" {
            document = Some(field_bytes(field).await?);
        }
    }

    let document_bytes =
        document.ok_or_else(|| KycError::BadInput("document is required".to_string()))?;
    let document_image = decode_on_worker(document_bytes, state.max_upload_bytes).await?;

    let response = state.verification_service.extract_document(document_image).await?;
    info!("completed ocr extraction ({}ms)", response.processing_time_ms);

    extra_fields::clear_extra_fields();
    Ok(Json(response))
}

fn bind_request_id(headers: &HeaderMap) {
    let request_id = headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let _ = extra_fields::set_extra_fields(LoggerExtraFields { request_id });
}

// Decodes stay off the I/O loop; a caller disconnect just discards the
// finished raster.
async fn decode_on_worker(im_bytes: Bytes, cap: usize) -> Result<DecodedImage, KycError> {
    match task::spawn_blocking(move || decode_image(im_bytes, cap)).await {
        Ok(result) => result,
        Err(e) => {
            error!("decode task failed to join: {e}");
            Err(KycError::Internal)
        }
    }
}

async fn next_field(payload: &mut Multipart) -> Result<Option<Field<'_>>, KycError> {
    payload.next_field().await.map_err(|e| {
        error!("failed to read multipart body: {e}");
        KycError::BadInput("failed to read multipart body".to_string())
    })
}

async fn field_bytes(field: Field<'_>) -> Result<Bytes, KycError> {
    match field.bytes().await {
        Ok(data) => Ok(data),
        Err(e) => {
            error!("failed to retrieve file from request: {e}");
            Err(KycError::BadInput("failed to process image".to_string()))
        }
    }
}
