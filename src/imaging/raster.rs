use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use image::{GrayImage, ImageFormat, RgbImage};
use log::error;

use crate::error::errors::KycError;

// Rasters above this edge length are rejected before decode work is wasted.
pub const MAX_IMAGE_DIMENSION: u32 = 4096;

/// Decoded request image: the raster plus the bytes it came from and the
/// content type they declared. Owned by the request; stages only borrow it.
#[derive(Debug)]
pub struct DecodedImage {
    raster: RgbImage,
    bytes: Bytes,
    content_type: &'static str,
}

impl DecodedImage {
    pub fn raster(&self) -> &RgbImage {
        &self.raster
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn content_type(&self) -> &'static str {
        self.content_type
    }

    pub fn width(&self) -> u32 {
        self.raster.width()
    }

    pub fn height(&self) -> u32 {
        self.raster.height()
    }

    pub fn to_luma(&self) -> GrayImage {
        image::DynamicImage::ImageRgb8(self.raster.clone()).to_luma8()
    }
}

pub fn decode_image(im_bytes: Bytes, max_bytes: usize) -> Result<DecodedImage, KycError> {
    if im_bytes.is_empty() {
        return Err(KycError::BadInput("image is empty".to_string()));
    }

    if im_bytes.len() > max_bytes {
        return Err(KycError::PayloadTooLarge);
    }

    let format = match image::guess_format(&im_bytes) {
        Ok(format) => format,
        Err(_) => {
            return Err(KycError::BadInput(
                "Invalid image format. Supported: JPG, PNG".to_string(),
            ))
        }
    };

    let content_type = match format {
        ImageFormat::Jpeg => "image/jpeg",
        ImageFormat::Png => "image/png",
        _ => {
            return Err(KycError::BadInput(
                "Invalid image format. Supported: JPG, PNG".to_string(),
            ))
        }
    };

    let raster = match image::load_from_memory_with_format(&im_bytes, format) {
        Ok(decoded) => decoded.to_rgb8(),
        Err(e) => {
            error!("image decode error: {e}");
            return Err(KycError::BadInput("Failed to decode image".to_string()));
        }
    };

    if raster.width() == 0 || raster.height() == 0 {
        return Err(KycError::BadInput("Failed to decode image".to_string()));
    }

    if raster.width() > MAX_IMAGE_DIMENSION || raster.height() > MAX_IMAGE_DIMENSION {
        return Err(KycError::BadInput(format!(
            "Image too large. Max dimension: {MAX_IMAGE_DIMENSION}px"
        )));
    }

    Ok(DecodedImage { raster, bytes: im_bytes, content_type })
}

// Browser captures arrive as data URIs; anything before the first comma is
// the `data:image/...;base64` preamble.
pub fn strip_base64_prefix(encoded: &str) -> &str {
    match encoded.find(',') {
        Some(idx) => &encoded[idx + 1..],
        None => encoded,
    }
}

pub fn decode_base64_image(encoded: &str, max_bytes: usize) -> Result<DecodedImage, KycError> {
    let stripped = strip_base64_prefix(encoded.trim());

    let data = match BASE64.decode(stripped) {
        Ok(data) => data,
        Err(e) => {
            error!("base64 decode error: {e}");
            return Err(KycError::BadInput("Failed to decode base64 image".to_string()));
        }
    };

    decode_image(Bytes::from(data), max_bytes)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let raster = RgbImage::from_pixel(width, height, image::Rgb([120u8, 120, 120]));
        let mut out = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(raster)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn test_decode_png() {
        let bytes = png_bytes(4, 3);
        let image = decode_image(Bytes::from(bytes), 1024 * 1024).unwrap();
        assert_eq!(image.width(), 4);
        assert_eq!(image.height(), 3);
        assert_eq!(image.content_type(), "image/png");
    }

    #[test]
    fn test_rejects_oversize_payload() {
        let bytes = png_bytes(4, 4);
        let cap = bytes.len() - 1;
        let err = decode_image(Bytes::from(bytes), cap).unwrap_err();
        assert!(matches!(err, KycError::PayloadTooLarge));
    }

    #[test]
    fn test_cap_boundary_is_inclusive() {
        let bytes = png_bytes(4, 4);
        let cap = bytes.len();
        assert!(decode_image(Bytes::from(bytes), cap).is_ok());
    }

    #[test]
    fn test_rejects_garbage() {
        let err = decode_image(Bytes::from_static(b"not an image"), 1024).unwrap_err();
        assert!(matches!(err, KycError::BadInput(_)));
    }

    #[test]
    fn test_strip_base64_prefix() {
        assert_eq!(strip_base64_prefix("data:image/png;base64,AAAA"), "AAAA");
        assert_eq!(strip_base64_prefix("AAAA"), "AAAA");
    }

    #[test]
    fn test_decode_base64_with_prefix() {
        let bytes = png_bytes(2, 2);
        let encoded = format!("data:image/png;base64,{}", BASE64.encode(&bytes));
        let image = decode_base64_image(&encoded, 1024 * 1024).unwrap();
        assert_eq!(image.width(), 2);
    }
}
