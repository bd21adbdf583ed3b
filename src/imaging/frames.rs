use log::warn;

use crate::imaging::raster::{decode_base64_image, DecodedImage};

/// Lazily decodes a base64 frame sequence in order. Frames that fail to
/// decode are skipped and counted; at most one raster is alive at a time.
pub struct FrameDecoder<'a> {
    frames: &'a [String],
    index: usize,
    max_bytes: usize,
    skipped: usize,
}

impl<'a> FrameDecoder<'a> {
    pub fn new(frames: &'a [String], max_bytes: usize) -> Self {
        FrameDecoder { frames, index: 0, max_bytes, skipped: 0 }
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn decoded(&self) -> usize {
        self.index - self.skipped
    }
}

impl Iterator for FrameDecoder<'_> {
    type Item = DecodedImage;

    fn next(&mut self) -> Option<DecodedImage> {
        while self.index < self.frames.len() {
            let idx = self.index;
            self.index += 1;

            match decode_base64_image(&self.frames[idx], self.max_bytes) {
                Ok(frame) => return Some(frame),
                Err(e) => {
                    warn!("failed to decode frame {idx}: {e}");
                    self.skipped += 1;
                }
            }
        }

        None
    }
}
