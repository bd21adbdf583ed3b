pub mod detector;
pub mod liveness;
pub mod matcher;
pub mod ocr;
pub mod registry;

#[cfg(test)]
pub mod testsupport;

use ndarray::Array1;

use crate::imaging::raster::DecodedImage;
use crate::stage::liveness::Orientation;
use crate::stage::ocr::OcrOutcome;

/// A stage invocation failed in the underlying backend. Soft outcomes
/// (no face, low confidence) are not errors and never take this path.
#[derive(thiserror::Error, Debug)]
#[error("{stage} backend failure: {message}")]
pub struct StageError {
    pub stage: &'static str,
    pub message: String,
}

impl StageError {
    pub fn new(stage: &'static str, message: impl Into<String>) -> Self {
        StageError { stage, message: message.into() }
    }
}

/// Axis-aligned face rectangle within an image, plus detector confidence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub confidence: f32,
}

pub type Embedding = Array1<f32>;

#[derive(Debug, Clone, Copy)]
pub struct FaceComparison {
    pub cosine_similarity: f32,
    pub euclidean_distance: f32,
    pub verified: bool,
    pub threshold: f32,
}

#[derive(Debug, Clone)]
pub struct LivenessObservation {
    pub blinks: u32,
    pub orientations: Vec<Option<Orientation>>,
    pub face_detection_ratio: f32,
}

pub trait FaceDetect: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns the highest-confidence face above the backend threshold, or
    /// `None`. Must be safe for concurrent calls with differing dimensions.
    fn detect(&self, image: &DecodedImage) -> Result<Option<FaceBox>, StageError>;
}

pub trait FaceMatch: Send + Sync {
    fn name(&self) -> &'static str;

    fn embed(&self, image: &DecodedImage, face: &FaceBox) -> Result<Embedding, StageError>;

    fn compare(&self, a: &Embedding, b: &Embedding) -> FaceComparison;
}

pub trait OcrExtract: Send + Sync {
    fn name(&self) -> &'static str;

    /// Best-effort extraction; low confidence is reported, never an error.
    fn extract(&self, image: &DecodedImage) -> Result<OcrOutcome, StageError>;
}

pub trait LivenessEvaluate: Send + Sync {
    fn name(&self) -> &'static str;

    /// Consumes frames in order. State (blink hysteresis) lives only within
    /// a single call.
    fn evaluate(
        &self,
        frames: &mut dyn Iterator<Item = DecodedImage>,
    ) -> Result<LivenessObservation, StageError>;
}
