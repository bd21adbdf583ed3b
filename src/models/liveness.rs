use serde::{Deserialize, Serialize};

use crate::stage::liveness::Orientation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LivenessStatus {
    Pass,
    Fail,
    Expired,
    Invalid,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectionResults {
    pub blinks: u32,
    pub orientation: Option<Orientation>,
    pub orientations: Vec<Option<Orientation>>,
    pub face_detected: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LivenessVerifyRequest {
    pub challenge_id: String,
    pub frames: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessVerdictResponse {
    pub challenge_id: String,
    pub status: LivenessStatus,
    pub message: String,
    pub detection_results: DetectionResults,
    pub processing_time_ms: u64,
    pub timestamp: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LivenessBatchRequest {
    pub frames: Vec<String>,
    #[serde(default)]
    pub initial_blink_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessBatchResponse {
    pub total_blinks: u32,
    pub final_blink_count: u32,
    pub orientations: Vec<Option<Orientation>>,
    pub face_detection_ratio: f64,
    pub frame_count: usize,
    pub processing_time_ms: u64,
    pub timestamp: String,
}
