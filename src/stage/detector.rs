use std::sync::Mutex;

use image::GrayImage;
use log::debug;

use crate::imaging::raster::DecodedImage;
use crate::stage::{FaceBox, FaceDetect, StageError};

// Long side of the downsampled analysis grid.
const ANALYSIS_LONG_SIDE: u32 = 96;
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.6;

/// Scan geometry derived from the input dimensions. The backend caches the
/// parameters of the last-used input size; refreshing them is the only
/// state mutation in the stage.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ScanParams {
    input_size: (u32, u32),
    analysis: (u32, u32),
    window: u32,
    stride: u32,
}

impl ScanParams {
    fn for_input(width: u32, height: u32) -> Self {
        let (aw, ah) = if width >= height {
            let aw = ANALYSIS_LONG_SIDE.min(width);
            let ah = ((height as f32 / width as f32) * aw as f32).round().max(1.0) as u32;
            (aw.max(1), ah)
        } else {
            let ah = ANALYSIS_LONG_SIDE.min(height);
            let aw = ((width as f32 / height as f32) * ah as f32).round().max(1.0) as u32;
            (aw, ah.max(1))
        };

        let side = aw.min(ah);
        let window = (side / 2).max(1).min(side);
        let stride = (window / 4).max(1);

        ScanParams { input_size: (width, height), analysis: (aw, ah), window, stride }
    }
}

/// Contrast-blob face locator. The scan itself is pure and reentrant; only
/// the cached input-size parameters are shared, and refreshing them for a
/// new image size happens in a short critical section before the scan so
/// concurrent calls with differing dimensions never trample each other.
pub struct GradientFaceDetector {
    confidence_threshold: f32,
    params: Mutex<ScanParams>,
}

impl GradientFaceDetector {
    pub fn new() -> Self {
        Self::with_threshold(DEFAULT_CONFIDENCE_THRESHOLD)
    }

    pub fn with_threshold(confidence_threshold: f32) -> Self {
        GradientFaceDetector {
            confidence_threshold,
            params: Mutex::new(ScanParams::for_input(1, 1)),
        }
    }

    fn scan_params(&self, width: u32, height: u32) -> ScanParams {
        // Size reconfiguration only; the scan runs outside the lock.
        let mut guard = self.params.lock().unwrap_or_else(|e| e.into_inner());
        if guard.input_size != (width, height) {
            *guard = ScanParams::for_input(width, height);
            debug!("detector reconfigured for input size {width}x{height}");
        }
        *guard
    }
}

impl Default for GradientFaceDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl FaceDetect for GradientFaceDetector {
    fn name(&self) -> &'static str {
        "gradient-scan"
    }

    fn detect(&self, image: &DecodedImage) -> Result<Option<FaceBox>, StageError> {
        let params = self.scan_params(image.width(), image.height());
        let (aw, ah) = params.analysis;

        let luma = image.to_luma();
        let grid = downsample(&luma, aw, ah);
        let grad = gradient_magnitude(&grid, aw as usize, ah as usize);

        let total: f32 = grad.iter().sum();
        let global_mean = total / grad.len() as f32;
        if global_mean <= f32::EPSILON {
            return Ok(None);
        }

        let integral = integral_image(&grad, aw as usize, ah as usize);

        let mut best_score = 0.0f32;
        let mut best_origin = (0u32, 0u32);
        let window = params.window.min(aw).min(ah);

        let mut wy = 0;
        while wy + window <= ah {
            let mut wx = 0;
            while wx + window <= aw {
                let sum = window_sum(&integral, aw as usize, wx as usize, wy as usize, window as usize);
                let mean = sum / (window * window) as f32;

                let cx = wx as f32 + window as f32 / 2.0;
                let cy = wy as f32 + window as f32 / 2.0;
                let dx = (cx - aw as f32 / 2.0) / (aw as f32 / 2.0);
                let dy = (cy - ah as f32 / 2.0) / (ah as f32 / 2.0);
                let dist = (dx * dx + dy * dy).sqrt().min(1.0);
                let score = mean * (1.0 - 0.4 * dist);

                if score > best_score {
                    best_score = score;
                    best_origin = (wx, wy);
                }
                wx += params.stride;
            }
            wy += params.stride;
        }

        let confidence = (best_score / (best_score + global_mean)).clamp(0.0, 1.0);
        if confidence < self.confidence_threshold {
            return Ok(None);
        }

        // Map the winning window back to full-resolution coordinates.
        let scale_x = image.width() as f32 / aw as f32;
        let scale_y = image.height() as f32 / ah as f32;
        let x = (best_origin.0 as f32 * scale_x) as u32;
        let y = (best_origin.1 as f32 * scale_y) as u32;
        let w = ((window as f32 * scale_x) as u32).max(1).min(image.width() - x);
        let h = ((window as f32 * scale_y) as u32).max(1).min(image.height() - y);

        Ok(Some(FaceBox { x, y, width: w, height: h, confidence }))
    }
}

fn downsample(luma: &GrayImage, aw: u32, ah: u32) -> Vec<f32> {
    let (w, h) = luma.dimensions();
    let mut grid = Vec::with_capacity((aw * ah) as usize);

    for y in 0..ah {
        let sy = (y as u64 * h as u64 / ah as u64) as u32;
        for x in 0..aw {
            let sx = (x as u64 * w as u64 / aw as u64) as u32;
            grid.push(luma.get_pixel(sx, sy)[0] as f32);
        }
    }

    grid
}

fn gradient_magnitude(grid: &[f32], aw: usize, ah: usize) -> Vec<f32> {
    let mut grad = vec![0.0f32; aw * ah];

    for y in 0..ah {
        for x in 0..aw {
            let v = grid[y * aw + x];
            let right = if x + 1 < aw { grid[y * aw + x + 1] } else { v };
            let down = if y + 1 < ah { grid[(y + 1) * aw + x] } else { v };
            grad[y * aw + x] = (right - v).abs() + (down - v).abs();
        }
    }

    grad
}

// Summed-area table with a zero row/column prefix.
fn integral_image(values: &[f32], aw: usize, ah: usize) -> Vec<f32> {
    let stride = aw + 1;
    let mut integral = vec![0.0f32; stride * (ah + 1)];

    for y in 0..ah {
        let mut row_sum = 0.0f32;
        for x in 0..aw {
            row_sum += values[y * aw + x];
            integral[(y + 1) * stride + x + 1] = integral[y * stride + x + 1] + row_sum;
        }
    }

    integral
}

fn window_sum(integral: &[f32], aw: usize, x: usize, y: usize, side: usize) -> f32 {
    let stride = aw + 1;
    let (x2, y2) = (x + side, y + side);
    integral[y2 * stride + x2] - integral[y * stride + x2] - integral[y2 * stride + x]
        + integral[y * stride + x]
}
