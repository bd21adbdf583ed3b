use serde::{Deserialize, Serialize};

use crate::stage::ocr::{DocumentKind, OcrFields, OcrOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Approved,
    Rejected,
    Pending,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityMetrics {
    pub cosine_similarity: f64,
    pub euclidean_distance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceMatchData {
    pub verified: bool,
    pub confidence: f64,
    pub similarity_metrics: SimilarityMetrics,
    pub threshold_used: f64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrData {
    pub document_type: DocumentKind,
    pub confidence: f64,
    pub extracted_text: String,
    pub fields: OcrFields,
}

impl From<OcrOutcome> for OcrData {
    fn from(outcome: OcrOutcome) -> Self {
        OcrData {
            document_type: outcome.document_type,
            confidence: round4(outcome.confidence as f64),
            extracted_text: outcome.extracted_text,
            fields: outcome.fields,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationVerdict {
    pub verification_status: VerificationStatus,
    pub confidence_score: f64,
    pub face_match_score: f64,
    pub ocr_data: OcrData,
    pub processing_time_ms: u64,
    pub timestamp: String,
    pub face_verification_details: FaceMatchData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrOnlyResponse {
    pub ocr_data: OcrData,
    pub processing_time_ms: u64,
    pub timestamp: String,
}

pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}
