use serde::{Deserialize, Serialize};

use crate::imaging::raster::DecodedImage;
use crate::stage::{LivenessEvaluate, LivenessObservation, StageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Left,
    Right,
}

const DEFAULT_EAR_THRESHOLD: f32 = 0.23;
const DEFAULT_CONSECUTIVE_FRAMES: u32 = 1;
const DEFAULT_TURN_MARGIN: f32 = 0.08;

// Luma below this counts as pupil-dark inside the eye band.
const DARK_LUMA: f32 = 80.0;
// Minimum luma standard deviation for a frame to count as showing a face.
const CONTRAST_FLOOR: f32 = 8.0;

#[derive(Debug, Clone, Copy)]
struct FrameSignals {
    openness: f32,
    offset: f32,
    face_detected: bool,
}

/// Frame-sequence evaluator. Eye openness is a pupil-visibility proxy
/// standing in for a landmark eye-aspect-ratio; a blink is counted on the
/// closed-to-open transition, with hysteresis carried between consecutive
/// frames. Orientation is judged per frame from the horizontal shift of
/// gradient mass. All state lives within a single call.
pub struct FrameSignalEvaluator {
    ear_threshold: f32,
    consecutive_frames: u32,
    turn_margin: f32,
}

impl FrameSignalEvaluator {
    pub fn new() -> Self {
        FrameSignalEvaluator {
            ear_threshold: DEFAULT_EAR_THRESHOLD,
            consecutive_frames: DEFAULT_CONSECUTIVE_FRAMES,
            turn_margin: DEFAULT_TURN_MARGIN,
        }
    }

    fn frame_signals(&self, frame: &DecodedImage) -> FrameSignals {
        let luma = frame.to_luma();
        let (w, h) = luma.dimensions();
        let pixel_count = (w * h) as f32;

        let mut sum = 0.0f64;
        let mut sum_sq = 0.0f64;
        let mut grad_mass = 0.0f64;
        let mut grad_moment_x = 0.0f64;

        for y in 0..h {
            for x in 0..w {
                let v = luma.get_pixel(x, y)[0] as f64;
                sum += v;
                sum_sq += v * v;

                if x + 1 < w {
                    let g = (luma.get_pixel(x + 1, y)[0] as f64 - v).abs();
                    grad_mass += g;
                    grad_moment_x += g * x as f64;
                }
            }
        }

        let mean = sum / pixel_count as f64;
        let variance = (sum_sq / pixel_count as f64 - mean * mean).max(0.0);
        let face_detected = (variance.sqrt() as f32) > CONTRAST_FLOOR;

        let offset = if grad_mass > f64::EPSILON && w > 1 {
            let centroid = grad_moment_x / grad_mass;
            ((centroid / (w - 1) as f64) - 0.5) as f32 * 2.0
        } else {
            0.0
        };

        // Pupil-visibility band across the upper middle of the frame.
        let band_y0 = h * 3 / 10;
        let band_y1 = (h / 2).max(band_y0 + 1);
        let band_x0 = w / 4;
        let band_x1 = (w * 3 / 4).max(band_x0 + 1);

        let mut dark = 0u32;
        let mut band_total = 0u32;
        for y in band_y0..band_y1.min(h) {
            for x in band_x0..band_x1.min(w) {
                if (luma.get_pixel(x, y)[0] as f32) < DARK_LUMA {
                    dark += 1;
                }
                band_total += 1;
            }
        }

        let dark_fraction = if band_total == 0 { 0.0 } else { dark as f32 / band_total as f32 };
        let openness = (dark_fraction * 4.0).min(1.0);

        FrameSignals { openness, offset, face_detected }
    }
}

impl Default for FrameSignalEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl LivenessEvaluate for FrameSignalEvaluator {
    fn name(&self) -> &'static str {
        "frame-signal"
    }

    fn evaluate(
        &self,
        frames: &mut dyn Iterator<Item = DecodedImage>,
    ) -> Result<LivenessObservation, StageError> {
        let mut blinks = 0u32;
        let mut closed_streak = 0u32;
        let mut orientations = Vec::new();
        let mut detected_frames = 0u32;

        for frame in frames {
            let signals = self.frame_signals(&frame);

            if signals.face_detected {
                detected_frames += 1;

                if signals.openness < self.ear_threshold {
                    closed_streak += 1;
                } else {
                    if closed_streak >= self.consecutive_frames {
                        blinks += 1;
                    }
                    closed_streak = 0;
                }
            }

            let orientation = if !signals.face_detected {
                None
            } else if signals.offset <= -self.turn_margin {
                Some(Orientation::Left)
            } else if signals.offset >= self.turn_margin {
                Some(Orientation::Right)
            } else {
                None
            };
            orientations.push(orientation);
        }

        let total = orientations.len() as f32;
        let face_detection_ratio = if total > 0.0 { detected_frames as f32 / total } else { 0.0 };

        Ok(LivenessObservation { blinks, orientations, face_detection_ratio })
    }
}
