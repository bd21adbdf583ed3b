use ndarray::Array1;

use crate::imaging::raster::DecodedImage;
use crate::stage::{Embedding, FaceBox, FaceComparison, FaceMatch, StageError};

const GRID: usize = 8;
const EMBEDDING_DIM: usize = GRID * GRID * 2;

/// Deterministic appearance embedding: per-block luminance means plus
/// per-block horizontal gradient means over the face crop, mean-centered
/// and unit-normalized. Comparable via cosine similarity.
pub struct BlockEmbeddingMatcher {
    threshold: f32,
}

impl BlockEmbeddingMatcher {
    pub fn new(threshold: f32) -> Self {
        BlockEmbeddingMatcher { threshold }
    }
}

impl FaceComparison {
    // Original contract: normalized match confidence blending both metrics.
    pub fn normalized_confidence(&self) -> f32 {
        let euclid_term = 1.0 - (self.euclidean_distance / 2.0).min(1.0);
        ((self.cosine_similarity + euclid_term) / 2.0).clamp(0.0, 1.0)
    }
}

impl FaceMatch for BlockEmbeddingMatcher {
    fn name(&self) -> &'static str {
        "block-embedding"
    }

    fn embed(&self, image: &DecodedImage, face: &FaceBox) -> Result<Embedding, StageError> {
        let luma = image.to_luma();
        let (img_w, img_h) = luma.dimensions();

        // Clamp the crop to the raster; the detector already bounds it, but
        // the embedding must never index out of the image.
        let x0 = face.x.min(img_w.saturating_sub(1));
        let y0 = face.y.min(img_h.saturating_sub(1));
        let w = face.width.max(1).min(img_w - x0);
        let h = face.height.max(1).min(img_h - y0);

        let mut features = vec![0.0f32; EMBEDDING_DIM];

        for by in 0..GRID {
            for bx in 0..GRID {
                let cell_x0 = x0 + (bx as u32 * w) / GRID as u32;
                let cell_x1 = x0 + ((bx as u32 + 1) * w) / GRID as u32;
                let cell_y0 = y0 + (by as u32 * h) / GRID as u32;
                let cell_y1 = y0 + ((by as u32 + 1) * h) / GRID as u32;

                let mut sum = 0.0f32;
                let mut grad_sum = 0.0f32;
                let mut count = 0u32;

                for y in cell_y0..cell_y1.max(cell_y0 + 1) {
                    for x in cell_x0..cell_x1.max(cell_x0 + 1) {
                        let px = x.min(img_w - 1);
                        let py = y.min(img_h - 1);
                        let v = luma.get_pixel(px, py)[0] as f32;
                        let next = luma.get_pixel((px + 1).min(img_w - 1), py)[0] as f32;
                        sum += v;
                        grad_sum += (next - v).abs();
                        count += 1;
                    }
                }

                let count = count.max(1) as f32;
                features[by * GRID + bx] = sum / count;
                features[GRID * GRID + by * GRID + bx] = grad_sum / count;
            }
        }

        let mean = features.iter().sum::<f32>() / EMBEDDING_DIM as f32;
        for v in features.iter_mut() {
            *v -= mean;
        }

        let norm = features.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in features.iter_mut() {
                *v /= norm;
            }
        } else {
            // Flat crop: fall back to a fixed unit vector so the embedding
            // stays well-formed and comparable.
            let fill = 1.0 / (EMBEDDING_DIM as f32).sqrt();
            for v in features.iter_mut() {
                *v = fill;
            }
        }

        Ok(Array1::from(features))
    }

    fn compare(&self, a: &Embedding, b: &Embedding) -> FaceComparison {
        let cosine_similarity = a.dot(b);
        let euclidean_distance = (a - b).mapv(|v| v * v).sum().sqrt();

        FaceComparison {
            cosine_similarity,
            euclidean_distance,
            verified: cosine_similarity >= self.threshold,
            threshold: self.threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::testsupport::portrait;

    fn face_box(image: &DecodedImage) -> FaceBox {
        FaceBox {
            x: image.width() / 4,
            y: image.height() / 4,
            width: image.width() / 2,
            height: image.height() / 2,
            confidence: 0.9,
        }
    }

    #[test]
    fn test_embedding_is_deterministic_and_unit_norm() {
        let matcher = BlockEmbeddingMatcher::new(0.30);
        let image = portrait(240, 300);
        let face = face_box(&image);

        let a = matcher.embed(&image, &face).unwrap();
        let b = matcher.embed(&image, &face).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), EMBEDDING_DIM);

        let norm = a.dot(&a).sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_same_face_matches_itself() {
        let matcher = BlockEmbeddingMatcher::new(0.30);
        let image = portrait(240, 300);
        let face = face_box(&image);

        let emb = matcher.embed(&image, &face).unwrap();
        let cmp = matcher.compare(&emb, &emb);
        assert!(cmp.verified);
        assert!((cmp.cosine_similarity - 1.0).abs() < 1e-4);
        assert!(cmp.euclidean_distance < 1e-3);
    }

    #[test]
    fn test_cosine_equal_to_threshold_verifies() {
        let matcher = BlockEmbeddingMatcher::new(0.30);
        let a = Array1::from(vec![1.0f32, 0.0]);
        let b = Array1::from(vec![0.30f32, (1.0f32 - 0.09).sqrt()]);

        let cmp = matcher.compare(&a, &b);
        assert_eq!(cmp.cosine_similarity, 0.30);
        assert!(cmp.verified);
    }

    #[test]
    fn test_normalized_confidence_bounds() {
        let cmp = FaceComparison {
            cosine_similarity: 0.85,
            euclidean_distance: 0.42,
            verified: true,
            threshold: 0.30,
        };
        let confidence = cmp.normalized_confidence();
        assert!(confidence > 0.0 && confidence <= 1.0);

        let far = FaceComparison {
            cosine_similarity: -1.0,
            euclidean_distance: 2.0,
            verified: false,
            threshold: 0.30,
        };
        assert_eq!(far.normalized_confidence(), 0.0);
    }
}
