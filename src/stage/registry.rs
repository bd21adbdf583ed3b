use std::sync::Arc;

use log::{error, info};
use once_cell::sync::OnceCell;
use serde::Serialize;

use crate::error::errors::KycError;
use crate::stage::detector::GradientFaceDetector;
use crate::stage::liveness::FrameSignalEvaluator;
use crate::stage::matcher::BlockEmbeddingMatcher;
use crate::stage::ocr::{DocumentOcrStage, NullRecognizer};
use crate::stage::{FaceDetect, FaceMatch, LivenessEvaluate, OcrExtract};

type StageSlot<T> = OnceCell<Result<Arc<T>, String>>;

#[derive(Debug, Clone, Serialize)]
pub struct StageStatus {
    pub loaded: bool,
    pub name: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageReadiness {
    pub face_detector: StageStatus,
    pub face_matcher: StageStatus,
    pub ocr_extractor: StageStatus,
    pub liveness_evaluator: StageStatus,
}

impl StageReadiness {
    pub fn all_loaded(&self) -> bool {
        self.face_detector.loaded
            && self.face_matcher.loaded
            && self.ocr_extractor.loaded
            && self.liveness_evaluator.loaded
    }
}

/// Owns the four inference stages. Each stage is constructed lazily on
/// first use behind a per-stage latch, so concurrent first callers share a
/// single construction; a stage whose construction fails stays not-loaded
/// with its error while the rest of the registry keeps working.
pub struct StageRegistry {
    similarity_threshold: f32,
    detector: StageSlot<dyn FaceDetect>,
    matcher: StageSlot<dyn FaceMatch>,
    ocr: StageSlot<dyn OcrExtract>,
    liveness: StageSlot<dyn LivenessEvaluate>,
}

impl StageRegistry {
    pub fn new(similarity_threshold: f32) -> Self {
        StageRegistry {
            similarity_threshold,
            detector: OnceCell::new(),
            matcher: OnceCell::new(),
            ocr: OnceCell::new(),
            liveness: OnceCell::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_stages(
        detector: Arc<dyn FaceDetect>,
        matcher: Arc<dyn FaceMatch>,
        ocr: Arc<dyn OcrExtract>,
        liveness: Arc<dyn LivenessEvaluate>,
    ) -> Self {
        StageRegistry {
            similarity_threshold: 0.30,
            detector: OnceCell::with_value(Ok(detector)),
            matcher: OnceCell::with_value(Ok(matcher)),
            ocr: OnceCell::with_value(Ok(ocr)),
            liveness: OnceCell::with_value(Ok(liveness)),
        }
    }

    pub fn detector(&self) -> Result<Arc<dyn FaceDetect>, KycError> {
        self.detector
            .get_or_init(|| {
                info!("loading face detector stage");
                Ok(Arc::new(GradientFaceDetector::new()) as Arc<dyn FaceDetect>)
            })
            .clone()
            .map_err(KycError::NotReady)
    }

    pub fn matcher(&self) -> Result<Arc<dyn FaceMatch>, KycError> {
        let threshold = self.similarity_threshold;
        self.matcher
            .get_or_init(|| {
                info!("loading face matcher stage");
                Ok(Arc::new(BlockEmbeddingMatcher::new(threshold)) as Arc<dyn FaceMatch>)
            })
            .clone()
            .map_err(KycError::NotReady)
    }

    pub fn ocr(&self) -> Result<Arc<dyn OcrExtract>, KycError> {
        self.ocr
            .get_or_init(|| {
                info!("loading ocr extractor stage");
                Ok(Arc::new(DocumentOcrStage::new(Box::new(NullRecognizer)))
                    as Arc<dyn OcrExtract>)
            })
            .clone()
            .map_err(KycError::NotReady)
    }

    pub fn liveness(&self) -> Result<Arc<dyn LivenessEvaluate>, KycError> {
        self.liveness
            .get_or_init(|| {
                info!("loading liveness evaluator stage");
                Ok(Arc::new(FrameSignalEvaluator::new()) as Arc<dyn LivenessEvaluate>)
            })
            .clone()
            .map_err(KycError::NotReady)
    }

    /// Eagerly constructs every stage. Failures are logged and recorded in
    /// readiness; the process still serves the stages that did load.
    pub fn warm_up(&self) {
        if let Err(e) = self.detector() {
            error!("face detector failed to load: {e}");
        }
        if let Err(e) = self.matcher() {
            error!("face matcher failed to load: {e}");
        }
        if let Err(e) = self.ocr() {
            error!("ocr extractor failed to load: {e}");
        }
        if let Err(e) = self.liveness() {
            error!("liveness evaluator failed to load: {e}");
        }
    }

    pub fn readiness(&self) -> StageReadiness {
        StageReadiness {
            face_detector: status_of(&self.detector, "face_detector"),
            face_matcher: status_of(&self.matcher, "face_matcher"),
            ocr_extractor: status_of(&self.ocr, "ocr_extractor"),
            liveness_evaluator: status_of(&self.liveness, "liveness_evaluator"),
        }
    }
}

fn status_of<T: ?Sized>(slot: &StageSlot<T>, fallback_name: &str) -> StageStatus
where
    T: StageName,
{
    match slot.get() {
        Some(Ok(stage)) => StageStatus {
            loaded: true,
            name: stage.stage_name().to_string(),
            error: None,
        },
        Some(Err(e)) => StageStatus {
            loaded: false,
            name: fallback_name.to_string(),
            error: Some(e.clone()),
        },
        None => StageStatus {
            loaded: false,
            name: fallback_name.to_string(),
            error: None,
        },
    }
}

// Lets readiness read a stage's advertised name through any of the four
// trait objects.
trait StageName {
    fn stage_name(&self) -> &'static str;
}

impl StageName for dyn FaceDetect {
    fn stage_name(&self) -> &'static str {
        self.name()
    }
}

impl StageName for dyn FaceMatch {
    fn stage_name(&self) -> &'static str {
        self.name()
    }
}

impl StageName for dyn OcrExtract {
    fn stage_name(&self) -> &'static str {
        self.name()
    }
}

impl StageName for dyn LivenessEvaluate {
    fn stage_name(&self) -> &'static str {
        self.name()
    }
}
