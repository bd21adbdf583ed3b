use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use log::error;
use serde::{Deserialize, Serialize};

use crate::error::errors::KycError;
use crate::imaging::raster::strip_base64_prefix;

// Front-ID document types accepted by the legacy endpoint.
const FRONT_ID_TYPES: [&str; 4] = ["id_card", "passport", "drivers_license", "id-card"];
const SELFIE_TYPES: [&str; 2] = ["selfie", "face"];

#[derive(Debug, Clone, Deserialize)]
pub struct EnduserVerifyRequest {
    #[serde(default)]
    pub documents: Vec<DocumentEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DocumentEntry {
    #[serde(rename = "type")]
    pub doc_type: Option<String>,
    #[serde(default)]
    pub pages: Vec<DocumentPage>,
    pub base64: Option<String>,
    pub data: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DocumentPage {
    pub base64: Option<String>,
    pub data: Option<String>,
}

/// The historical payload locations, modeled once instead of scattering
/// fallback lookups across handlers.
#[derive(Debug, Clone)]
pub enum DocumentPayload {
    /// Raw bytes from a canonical multipart upload.
    Multipart(Bytes),
    /// `documents[i].pages[0].base64` (or `.data`).
    Base64Nested(String),
    /// `documents[i].base64` or `documents[i].data`.
    Base64Flat(String),
}

impl DocumentEntry {
    pub fn payload(&self) -> Option<DocumentPayload> {
        if let Some(page) = self.pages.first() {
            if let Some(encoded) = page.base64.as_ref().or(page.data.as_ref()) {
                return Some(DocumentPayload::Base64Nested(encoded.clone()));
            }
        }

        self.base64
            .as_ref()
            .or(self.data.as_ref())
            .map(|encoded| DocumentPayload::Base64Flat(encoded.clone()))
    }

    fn kind_matches(&self, kinds: &[&str]) -> bool {
        self.doc_type
            .as_deref()
            .map(|t| kinds.contains(&t.to_lowercase().as_str()))
            .unwrap_or(false)
    }

    pub fn is_front_id(&self) -> bool {
        self.kind_matches(&FRONT_ID_TYPES)
    }

    pub fn is_selfie(&self) -> bool {
        self.kind_matches(&SELFIE_TYPES)
    }
}

/// Single normalization point from any payload shape to raw image bytes.
pub fn normalize(payload: DocumentPayload) -> Result<Bytes, KycError> {
    match payload {
        DocumentPayload::Multipart(bytes) => Ok(bytes),
        DocumentPayload::Base64Nested(encoded) | DocumentPayload::Base64Flat(encoded) => {
            match BASE64.decode(strip_base64_prefix(encoded.trim())) {
                Ok(data) => Ok(Bytes::from(data)),
                Err(e) => {
                    error!("document base64 decode error: {e}");
                    Err(KycError::BadInput("Failed to decode base64 image".to_string()))
                }
            }
        }
    }
}

pub fn select_documents(
    request: &EnduserVerifyRequest,
) -> Result<(DocumentPayload, DocumentPayload), KycError> {
    let front = request
        .documents
        .iter()
        .filter(|d| d.is_front_id())
        .find_map(DocumentEntry::payload)
        .ok_or_else(|| KycError::BadInput("missing front ID document".to_string()))?;

    let selfie = request
        .documents
        .iter()
        .filter(|d| d.is_selfie())
        .find_map(DocumentEntry::payload)
        .ok_or_else(|| KycError::BadInput("missing selfie document".to_string()))?;

    Ok((front, selfie))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnduserVerifyResponse {
    pub verification_id: String,
    pub status: String,
    pub message: String,
    pub result: serde_json::Value,
}
