//! Synthetic rasters and fixed-outcome stages shared by unit tests.

use std::io::Cursor;

use bytes::Bytes;
use image::{GrayImage, ImageFormat};
use ndarray::Array1;

use crate::imaging::raster::{decode_image, DecodedImage};
use crate::stage::liveness::Orientation;
use crate::stage::ocr::{DocumentKind, OcrFields, OcrOutcome};
use crate::stage::{
    Embedding, FaceBox, FaceComparison, FaceDetect, FaceMatch, LivenessEvaluate,
    LivenessObservation, OcrExtract, StageError,
};

pub fn to_decoded(luma: GrayImage) -> DecodedImage {
    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageLuma8(luma)
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    decode_image(Bytes::from(out.into_inner()), usize::MAX).unwrap()
}

pub fn blank_image(width: u32, height: u32) -> DecodedImage {
    to_decoded(GrayImage::from_pixel(width, height, image::Luma([200u8])))
}

/// Light background with a textured dark ellipse in the center.
pub fn portrait(width: u32, height: u32) -> DecodedImage {
    let mut luma = GrayImage::from_pixel(width, height, image::Luma([200u8]));
    let (cx, cy) = (width as f32 / 2.0, height as f32 / 2.0);
    let (rx, ry) = (width as f32 / 4.0, height as f32 / 3.0);

    for y in 0..height {
        for x in 0..width {
            let dx = (x as f32 - cx) / rx;
            let dy = (y as f32 - cy) / ry;
            if dx * dx + dy * dy <= 1.0 {
                let texture = ((x * 7 + y * 13) % 17) as u8 * 3;
                luma.put_pixel(x, y, image::Luma([40 + texture]));
            }
        }
    }

    to_decoded(luma)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tilt {
    None,
    Left,
    Right,
}

/// 120x120 liveness frame: a dark pupil strip in the eye band when the
/// eyes are open, and a lower face blob whose horizontal position encodes
/// the head turn.
pub fn liveness_frame(eyes_open: bool, tilt: Tilt) -> DecodedImage {
    let (width, height) = (120u32, 120u32);
    let mut luma = GrayImage::from_pixel(width, height, image::Luma([200u8]));

    let paint = |luma: &mut GrayImage, x: u32, y: u32| {
        let texture = ((x * 7 + y * 13) % 17) as u8 * 2;
        luma.put_pixel(x, y, image::Luma([20 + texture]));
    };

    if eyes_open {
        for y in 42..50 {
            for x in 36..84 {
                luma.put_pixel(x, y, image::Luma([20u8]));
            }
        }
    }

    // Lower face blob, kept below the eye band.
    let blob_cx: i32 = match tilt {
        Tilt::None => 60,
        Tilt::Left => 32,
        Tilt::Right => 88,
    };
    for y in 0..height as i32 {
        for x in 0..width as i32 {
            let dx = x - blob_cx;
            let dy = y - 90;
            if dx * dx + dy * dy <= 20 * 20 {
                paint(&mut luma, x as u32, y as u32);
            }
        }
    }

    // Chin marker so closed-eye frames still read as a visible face.
    for y in 0..height as i32 {
        for x in 0..width as i32 {
            let dx = x - 60;
            let dy = y - 108;
            if dx * dx + dy * dy <= 8 * 8 {
                paint(&mut luma, x as u32, y as u32);
            }
        }
    }

    to_decoded(luma)
}

pub struct FixedDetector {
    pub face: Option<FaceBox>,
    pub fail: bool,
}

impl FixedDetector {
    pub fn found() -> Self {
        FixedDetector {
            face: Some(FaceBox { x: 10, y: 10, width: 40, height: 40, confidence: 0.92 }),
            fail: false,
        }
    }

    pub fn missing() -> Self {
        FixedDetector { face: None, fail: false }
    }
}

impl FaceDetect for FixedDetector {
    fn name(&self) -> &'static str {
        "fixed-detector"
    }

    fn detect(&self, _image: &DecodedImage) -> Result<Option<FaceBox>, StageError> {
        if self.fail {
            return Err(StageError::new("face_detector", "induced failure"));
        }
        Ok(self.face)
    }
}

pub struct FixedMatcher {
    pub comparison: FaceComparison,
}

impl FixedMatcher {
    pub fn with_cosine(cosine: f32, threshold: f32) -> Self {
        FixedMatcher {
            comparison: FaceComparison {
                cosine_similarity: cosine,
                euclidean_distance: (2.0 - 2.0 * cosine).max(0.0).sqrt(),
                verified: cosine >= threshold,
                threshold,
            },
        }
    }
}

impl FaceMatch for FixedMatcher {
    fn name(&self) -> &'static str {
        "fixed-matcher"
    }

    fn embed(&self, _image: &DecodedImage, _face: &FaceBox) -> Result<Embedding, StageError> {
        Ok(Array1::from(vec![1.0f32, 0.0, 0.0]))
    }

    fn compare(&self, _a: &Embedding, _b: &Embedding) -> FaceComparison {
        self.comparison
    }
}

pub struct FixedOcr {
    pub confidence: f32,
    pub fail: bool,
}

impl OcrExtract for FixedOcr {
    fn name(&self) -> &'static str {
        "fixed-ocr"
    }

    fn extract(&self, _image: &DecodedImage) -> Result<OcrOutcome, StageError> {
        if self.fail {
            return Err(StageError::new("ocr_extractor", "induced failure"));
        }
        Ok(OcrOutcome {
            document_type: DocumentKind::Passport,
            extracted_text: "PASSPORT\nName: Jane Smith".to_string(),
            confidence: self.confidence,
            fields: OcrFields {
                full_name: Some("Jane Smith".to_string()),
                ..OcrFields::default()
            },
        })
    }
}

pub struct FixedLiveness {
    pub observation: LivenessObservation,
}

impl FixedLiveness {
    pub fn observing(blinks: u32, orientations: Vec<Option<Orientation>>, ratio: f32) -> Self {
        FixedLiveness {
            observation: LivenessObservation {
                blinks,
                orientations,
                face_detection_ratio: ratio,
            },
        }
    }
}

impl LivenessEvaluate for FixedLiveness {
    fn name(&self) -> &'static str {
        "fixed-liveness"
    }

    fn evaluate(
        &self,
        frames: &mut dyn Iterator<Item = DecodedImage>,
    ) -> Result<LivenessObservation, StageError> {
        // Drain so lazy decoding runs like it would in production.
        for _ in &mut *frames {}
        Ok(self.observation.clone())
    }
}
