use std::sync::Arc;
use std::time::Instant;

use log::{info, warn};
use tokio::task;

use crate::challenge::store::{ChallengeKind, ChallengeStore, ConsumeOutcome};
use crate::error::errors::KycError;
use crate::imaging::frames::FrameDecoder;
use crate::models::challenge::ChallengeResponse;
use crate::models::liveness::{
    DetectionResults, LivenessBatchResponse, LivenessStatus, LivenessVerdictResponse,
};
use crate::models::utc_timestamp;
use crate::stage::liveness::Orientation;
use crate::stage::registry::StageRegistry;
use crate::stage::LivenessObservation;

#[derive(Clone)]
pub struct LivenessService {
    registry: Arc<StageRegistry>,
    store: Arc<ChallengeStore>,
    min_frames: usize,
    face_ratio_floor: f32,
    frame_byte_cap: usize,
}

impl LivenessService {
    pub fn new(
        registry: &Arc<StageRegistry>,
        store: &Arc<ChallengeStore>,
        min_frames: usize,
        face_ratio_floor: f32,
        frame_byte_cap: usize,
    ) -> Self {
        LivenessService {
            registry: Arc::clone(registry),
            store: Arc::clone(store),
            min_frames,
            face_ratio_floor,
            frame_byte_cap,
        }
    }

    pub fn issue_challenge(&self) -> ChallengeResponse {
        let record = self.store.issue();
        info!("generated challenge {} ({} predicates)", record.id, record.kinds.len());
        ChallengeResponse::from(record.as_ref())
    }

    /// Verifies a frame batch against a previously issued challenge.
    /// Missing/expired challenges, short batches, and unmet predicates are
    /// verdicts, not transport errors.
    pub async fn verify_challenge(
        &self,
        challenge_id: String,
        frames: Vec<String>,
    ) -> Result<LivenessVerdictResponse, KycError> {
        let started = Instant::now();

        let record = match self.store.lookup(&challenge_id) {
            Some(record) => record,
            None => {
                warn!("challenge {challenge_id} not found or expired");
                return Ok(verdict(
                    challenge_id,
                    LivenessStatus::Invalid,
                    "Challenge not found or expired".to_string(),
                    DetectionResults::default(),
                    started,
                ));
            }
        };

        if frames.len() < self.min_frames {
            return Ok(verdict(
                challenge_id,
                LivenessStatus::Fail,
                "not enough frames".to_string(),
                DetectionResults::default(),
                started,
            ));
        }

        let (observation, decoded) = self.evaluate_frames(frames).await?;

        let face_detected = observation.face_detection_ratio >= self.face_ratio_floor;
        let detection_results = DetectionResults {
            blinks: observation.blinks,
            orientation: primary_orientation(&observation.orientations),
            orientations: observation.orientations.clone(),
            face_detected,
        };

        if !face_detected {
            info!(
                "challenge {challenge_id}: face visible in only {:.0}% of {decoded} frames",
                observation.face_detection_ratio * 100.0
            );
            return Ok(verdict(
                challenge_id,
                LivenessStatus::Fail,
                "face not consistently visible".to_string(),
                detection_results,
                started,
            ));
        }

        let mut completed = Vec::new();
        let mut failed = Vec::new();
        for kind in &record.kinds {
            if predicate_satisfied(kind, &observation) {
                completed.push(kind.label().to_string());
            } else {
                failed.push(format!("{} ({})", kind.label(), failure_reason(kind)));
            }
        }

        if failed.is_empty() {
            // A pass that cannot consume its challenge (racing duplicate)
            // must not be reported as a pass.
            return Ok(match self.store.consume(&record.id, &record.signature) {
                ConsumeOutcome::Ok => verdict(
                    challenge_id,
                    LivenessStatus::Pass,
                    format!("All challenges completed: {}", completed.join(", ")),
                    detection_results,
                    started,
                ),
                other => {
                    warn!("challenge {challenge_id} passed but consume returned {other:?}");
                    verdict(
                        challenge_id,
                        LivenessStatus::Invalid,
                        "Challenge already consumed".to_string(),
                        detection_results,
                        started,
                    )
                }
            });
        }

        let completed_text =
            if completed.is_empty() { "none".to_string() } else { completed.join(", ") };
        Ok(verdict(
            challenge_id,
            LivenessStatus::Fail,
            format!("Completed: {}. Failed: {}", completed_text, failed.join(", ")),
            detection_results,
            started,
        ))
    }

    /// Challenge-free batch detection.
    pub async fn detect_batch(
        &self,
        frames: Vec<String>,
        initial_blink_count: u32,
    ) -> Result<LivenessBatchResponse, KycError> {
        let started = Instant::now();

        if frames.is_empty() {
            return Err(KycError::BadInput("No frames provided".to_string()));
        }

        let (observation, decoded) = self.evaluate_frames(frames).await?;

        Ok(LivenessBatchResponse {
            total_blinks: observation.blinks,
            final_blink_count: initial_blink_count + observation.blinks,
            orientations: observation.orientations,
            face_detection_ratio: observation.face_detection_ratio as f64,
            frame_count: decoded,
            processing_time_ms: started.elapsed().as_millis() as u64,
            timestamp: utc_timestamp(),
        })
    }

    // Decodes lazily on a blocking worker; only one raster is alive at a
    // time. Frames that fail to decode are skipped.
    async fn evaluate_frames(
        &self,
        frames: Vec<String>,
    ) -> Result<(LivenessObservation, usize), KycError> {
        let evaluator = self.registry.liveness()?;
        let frame_byte_cap = self.frame_byte_cap;

        let handle = task::spawn_blocking(move || {
            let mut decoder = FrameDecoder::new(&frames, frame_byte_cap);
            let observation = evaluator.evaluate(&mut decoder)?;
            Ok((observation, decoder.decoded()))
        });

        let (observation, decoded) = super::verification_service::run_stage(handle).await?;

        if decoded == 0 {
            return Err(KycError::BadInput("Failed to decode any frames".to_string()));
        }

        Ok((observation, decoded))
    }
}

fn predicate_satisfied(kind: &ChallengeKind, observation: &LivenessObservation) -> bool {
    match kind {
        ChallengeKind::Blink => observation.blinks >= 1,
        ChallengeKind::TurnLeft => {
            observation.orientations.iter().any(|o| *o == Some(Orientation::Left))
        }
        ChallengeKind::TurnRight => {
            observation.orientations.iter().any(|o| *o == Some(Orientation::Right))
        }
    }
}

fn failure_reason(kind: &ChallengeKind) -> &'static str {
    match kind {
        ChallengeKind::Blink => "no blink detected",
        ChallengeKind::TurnLeft | ChallengeKind::TurnRight => "not detected",
    }
}

// Most frequent non-null orientation; ties go to the first seen.
fn primary_orientation(orientations: &[Option<Orientation>]) -> Option<Orientation> {
    let lefts = orientations.iter().filter(|o| **o == Some(Orientation::Left)).count();
    let rights = orientations.iter().filter(|o| **o == Some(Orientation::Right)).count();

    if lefts == 0 && rights == 0 {
        None
    } else if lefts > rights {
        Some(Orientation::Left)
    } else if rights > lefts {
        Some(Orientation::Right)
    } else {
        orientations.iter().flatten().next().copied()
    }
}

fn verdict(
    challenge_id: String,
    status: LivenessStatus,
    message: String,
    detection_results: DetectionResults,
    started: Instant,
) -> LivenessVerdictResponse {
    LivenessVerdictResponse {
        challenge_id,
        status,
        message,
        detection_results,
        processing_time_ms: started.elapsed().as_millis() as u64,
        timestamp: utc_timestamp(),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::time::Duration;

    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;

    use super::*;
    use crate::stage::testsupport::{FixedDetector, FixedLiveness, FixedMatcher, FixedOcr};

    const SECRET: &[u8] = b"dev-only-secret-0123456789abcdef0123456789abcdef";

    fn frame_strings(count: usize) -> Vec<String> {
        let raster = image::RgbImage::from_pixel(4, 4, image::Rgb([90u8, 90, 90]));
        let mut out = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(raster)
            .write_to(&mut out, image::ImageFormat::Png)
            .unwrap();
        let encoded = BASE64.encode(out.into_inner());
        vec![encoded; count]
    }

    fn service_with(
        observation: FixedLiveness,
        store: &Arc<ChallengeStore>,
    ) -> LivenessService {
        let registry = Arc::new(StageRegistry::with_stages(
            Arc::new(FixedDetector::found()),
            Arc::new(FixedMatcher::with_cosine(0.8, 0.3)),
            Arc::new(FixedOcr { confidence: 0.8, fail: false }),
            Arc::new(observation),
        ));
        LivenessService::new(&registry, store, 10, 0.5, 10 * 1024 * 1024)
    }

    fn store() -> Arc<ChallengeStore> {
        Arc::new(ChallengeStore::new(SECRET, Duration::from_secs(120), 2))
    }

    #[tokio::test]
    async fn test_pass_lists_completed_predicates() {
        let store = store();
        let record = store
            .issue_with(vec![ChallengeKind::Blink, ChallengeKind::TurnLeft]);

        let mut orientations = vec![None; 15];
        orientations[4] = Some(Orientation::Left);
        orientations[5] = Some(Orientation::Left);
        orientations[6] = Some(Orientation::Left);

        let service = service_with(FixedLiveness::observing(1, orientations, 1.0), &store);
        let response = service
            .verify_challenge(record.id.clone(), frame_strings(15))
            .await
            .unwrap();

        assert_eq!(response.status, LivenessStatus::Pass);
        assert!(response.message.contains("blink"));
        assert!(response.message.contains("turn left"));
        assert_eq!(response.detection_results.blinks, 1);
        assert_eq!(response.detection_results.orientation, Some(Orientation::Left));
        assert!(response.detection_results.face_detected);

        // The pass consumed the challenge: a duplicate submission is not a
        // second pass.
        let again = service
            .verify_challenge(record.id.clone(), frame_strings(15))
            .await
            .unwrap();
        assert_ne!(again.status, LivenessStatus::Pass);
    }

    #[tokio::test]
    async fn test_fail_enumerates_completed_and_failed() {
        let store = store();
        let record = store
            .issue_with(vec![ChallengeKind::Blink, ChallengeKind::TurnLeft]);

        let mut orientations = vec![None; 12];
        orientations[0] = Some(Orientation::Left);

        let service = service_with(FixedLiveness::observing(0, orientations, 1.0), &store);
        let response = service
            .verify_challenge(record.id.clone(), frame_strings(12))
            .await
            .unwrap();

        assert_eq!(response.status, LivenessStatus::Fail);
        assert!(response.message.contains("Completed: turn left"), "{}", response.message);
        assert!(response.message.contains("blink (no blink detected)"), "{}", response.message);

        // Challenge survives a failed attempt.
        assert!(store.lookup(&record.id).is_some());
    }

    #[tokio::test]
    async fn test_unknown_challenge_is_invalid() {
        let store = store();
        let service = service_with(FixedLiveness::observing(1, vec![None; 12], 1.0), &store);

        let response = service
            .verify_challenge("b0b1c2d3-missing".to_string(), frame_strings(12))
            .await
            .unwrap();
        assert_eq!(response.status, LivenessStatus::Invalid);
        assert_eq!(response.message, "Challenge not found or expired");
    }

    #[tokio::test]
    async fn test_too_few_frames_fails_before_evaluation() {
        let store = store();
        let record = store.issue_with(vec![ChallengeKind::Blink]);

        let service = service_with(FixedLiveness::observing(1, vec![None; 9], 1.0), &store);
        let response = service
            .verify_challenge(record.id.clone(), frame_strings(9))
            .await
            .unwrap();

        assert_eq!(response.status, LivenessStatus::Fail);
        assert_eq!(response.message, "not enough frames");
    }

    #[tokio::test]
    async fn test_exactly_min_frames_is_accepted() {
        let store = store();
        let record = store.issue_with(vec![ChallengeKind::Blink]);

        let service = service_with(FixedLiveness::observing(1, vec![None; 10], 1.0), &store);
        let response = service
            .verify_challenge(record.id.clone(), frame_strings(10))
            .await
            .unwrap();
        assert_eq!(response.status, LivenessStatus::Pass);
    }

    #[tokio::test]
    async fn test_low_face_ratio_fails() {
        let store = store();
        let record = store.issue_with(vec![ChallengeKind::Blink]);

        let service = service_with(FixedLiveness::observing(1, vec![None; 12], 0.2), &store);
        let response = service
            .verify_challenge(record.id.clone(), frame_strings(12))
            .await
            .unwrap();

        assert_eq!(response.status, LivenessStatus::Fail);
        assert_eq!(response.message, "face not consistently visible");
        assert!(!response.detection_results.face_detected);
    }

    #[tokio::test]
    async fn test_expired_challenge_is_invalid_without_consumption() {
        let store = Arc::new(ChallengeStore::new(SECRET, Duration::from_millis(20), 1));
        let record = store.issue_with(vec![ChallengeKind::Blink]);

        tokio::time::sleep(Duration::from_millis(40)).await;

        let service = service_with(FixedLiveness::observing(1, vec![None; 12], 1.0), &store);
        let response = service
            .verify_challenge(record.id.clone(), frame_strings(12))
            .await
            .unwrap();
        assert_eq!(response.status, LivenessStatus::Invalid);
    }

    #[tokio::test]
    async fn test_undecodable_frames_are_bad_input() {
        let store = store();
        let record = store.issue_with(vec![ChallengeKind::Blink]);

        let frames = vec!["!!garbage!!".to_string(); 12];
        let service = service_with(FixedLiveness::observing(1, vec![], 1.0), &store);
        let err = service.verify_challenge(record.id.clone(), frames).await.unwrap_err();
        assert!(matches!(err, KycError::BadInput(_)));
    }

    #[tokio::test]
    async fn test_detect_batch_accumulates_initial_count() {
        let store = store();
        let mut orientations = vec![None; 5];
        orientations[1] = Some(Orientation::Right);

        let service = service_with(FixedLiveness::observing(2, orientations, 0.8), &store);
        let response = service.detect_batch(frame_strings(5), 3).await.unwrap();

        assert_eq!(response.total_blinks, 2);
        assert_eq!(response.final_blink_count, 5);
        assert_eq!(response.frame_count, 5);
        assert_eq!(response.orientations.len(), 5);
    }

    #[tokio::test]
    async fn test_detect_batch_rejects_empty() {
        let store = store();
        let service = service_with(FixedLiveness::observing(0, vec![], 0.0), &store);
        let err = service.detect_batch(vec![], 0).await.unwrap_err();
        assert!(matches!(err, KycError::BadInput(_)));
    }

    #[test]
    fn test_primary_orientation_prefers_majority() {
        let orientations = vec![
            Some(Orientation::Left),
            Some(Orientation::Right),
            Some(Orientation::Right),
            None,
        ];
        assert_eq!(primary_orientation(&orientations), Some(Orientation::Right));
        assert_eq!(primary_orientation(&[None, None]), None);
        assert_eq!(
            primary_orientation(&[Some(Orientation::Left), Some(Orientation::Right)]),
            Some(Orientation::Left)
        );
    }
}
