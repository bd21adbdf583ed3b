use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{error, info, warn};
use tokio::task;

use crate::error::errors::KycError;
use crate::imaging::raster::DecodedImage;
use crate::models::utc_timestamp;
use crate::models::verdict::{
    round4, FaceMatchData, OcrOnlyResponse, SimilarityMetrics, VerificationStatus,
    VerificationVerdict,
};
use crate::stage::registry::StageRegistry;
use crate::stage::{FaceComparison, StageError};

/// Pure scoring policy. Identical inputs always yield the identical status
/// and confidence.
#[derive(Debug, Clone, Copy)]
pub struct ScoringPolicy {
    pub similarity_threshold: f32,
    pub pending_face_floor: f32,
    pub pending_ocr_floor: f32,
}

impl ScoringPolicy {
    pub fn score(&self, cosine: f32, ocr_confidence: f32) -> (VerificationStatus, f64) {
        let verified = cosine >= self.similarity_threshold;
        let confidence = (0.6 * cosine as f64 + 0.4 * ocr_confidence as f64).clamp(0.0, 1.0);

        let status = if verified
            && (cosine >= self.pending_face_floor || ocr_confidence >= self.pending_ocr_floor)
        {
            VerificationStatus::Approved
        } else if verified {
            // Match passes the threshold but both confidences are low.
            VerificationStatus::Pending
        } else {
            VerificationStatus::Rejected
        };

        (status, confidence)
    }
}

#[derive(Clone)]
pub struct VerificationService {
    registry: Arc<StageRegistry>,
    policy: ScoringPolicy,
    deadline: Duration,
}

impl VerificationService {
    pub fn new(registry: &Arc<StageRegistry>, policy: ScoringPolicy, deadline: Duration) -> Self {
        VerificationService { registry: Arc::clone(registry), policy, deadline }
    }

    /// Full KYC pipeline: detect both faces in parallel, then fan out face
    /// matching and OCR, then apply the scoring policy.
    pub async fn verify(
        &self,
        id_doc: DecodedImage,
        selfie: DecodedImage,
    ) -> Result<VerificationVerdict, KycError> {
        let started = Instant::now();

        match tokio::time::timeout(self.deadline, self.run_pipeline(id_doc, selfie, started)).await
        {
            Ok(result) => result,
            Err(_) => {
                warn!("verification exceeded the {}s deadline", self.deadline.as_secs());
                Err(KycError::Timeout)
            }
        }
    }

    async fn run_pipeline(
        &self,
        id_doc: DecodedImage,
        selfie: DecodedImage,
        started: Instant,
    ) -> Result<VerificationVerdict, KycError> {
        let detector = self.registry.detector()?;
        let matcher = self.registry.matcher()?;
        let ocr = self.registry.ocr()?;

        let id_doc = Arc::new(id_doc);
        let selfie = Arc::new(selfie);

        let id_task = {
            let detector = Arc::clone(&detector);
            let image = Arc::clone(&id_doc);
            task::spawn_blocking(move || detector.detect(&image))
        };
        let selfie_task = {
            let image = Arc::clone(&selfie);
            task::spawn_blocking(move || detector.detect(&image))
        };

        let (id_face, selfie_face) = tokio::try_join!(run_stage(id_task), run_stage(selfie_task))?;
        let id_face = id_face.ok_or(KycError::NoFaceInId)?;
        let selfie_face = selfie_face.ok_or(KycError::NoFaceInSelfie)?;

        info!("faces detected, running face match and ocr in parallel");

        // The first backend failure wins the join; the other task keeps its
        // Arc until it finishes in the background, then the buffers drop.
        let match_task = {
            let id_image = Arc::clone(&id_doc);
            let selfie_image = Arc::clone(&selfie);
            task::spawn_blocking(move || -> Result<FaceComparison, StageError> {
                let id_embedding = matcher.embed(&id_image, &id_face)?;
                let selfie_embedding = matcher.embed(&selfie_image, &selfie_face)?;
                Ok(matcher.compare(&id_embedding, &selfie_embedding))
            })
        };
        let ocr_task = {
            let image = Arc::clone(&id_doc);
            task::spawn_blocking(move || ocr.extract(&image))
        };

        let (comparison, ocr_outcome) =
            tokio::try_join!(run_stage(match_task), run_stage(ocr_task))?;

        let (status, confidence) =
            self.policy.score(comparison.cosine_similarity, ocr_outcome.confidence);

        info!(
            "verification complete: {:?} (confidence: {:.2})",
            status, confidence
        );

        Ok(VerificationVerdict {
            verification_status: status,
            confidence_score: round4(confidence),
            face_match_score: round4((comparison.cosine_similarity as f64).clamp(0.0, 1.0)),
            ocr_data: ocr_outcome.into(),
            processing_time_ms: started.elapsed().as_millis() as u64,
            timestamp: utc_timestamp(),
            face_verification_details: face_match_data(&comparison),
        })
    }

    /// OCR-only path for the document endpoint.
    pub async fn extract_document(
        &self,
        document: DecodedImage,
    ) -> Result<OcrOnlyResponse, KycError> {
        let started = Instant::now();
        let ocr = self.registry.ocr()?;

        let image = Arc::new(document);
        let outcome = run_stage(task::spawn_blocking(move || ocr.extract(&image))).await?;

        Ok(OcrOnlyResponse {
            ocr_data: outcome.into(),
            processing_time_ms: started.elapsed().as_millis() as u64,
            timestamp: utc_timestamp(),
        })
    }
}

fn face_match_data(comparison: &FaceComparison) -> FaceMatchData {
    let similarity_pct = comparison.cosine_similarity * 100.0;

    let message = if comparison.verified {
        format!("Faces match ({similarity_pct:.1}% similarity)")
    } else {
        format!(
            "Faces do not match ({similarity_pct:.1}% similarity, threshold: {:.1}%)",
            comparison.threshold * 100.0
        )
    };

    FaceMatchData {
        verified: comparison.verified,
        confidence: round4(comparison.normalized_confidence() as f64),
        similarity_metrics: SimilarityMetrics {
            cosine_similarity: round4(comparison.cosine_similarity as f64),
            euclidean_distance: round4(comparison.euclidean_distance as f64),
        },
        threshold_used: comparison.threshold as f64,
        message,
    }
}

pub(crate) async fn run_stage<T>(
    handle: task::JoinHandle<Result<T, StageError>>,
) -> Result<T, KycError> {
    match handle.await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            error!("stage failure: {e}");
            Err(KycError::BackendFailure { stage: e.stage })
        }
        Err(e) => {
            error!("stage task failed to join: {e}");
            Err(KycError::Internal)
        }
    }
}
