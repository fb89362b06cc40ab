//! JPEG preview encoder.
//!
//! Windowed grayscale grids are encoded as 8-bit grayscale JPEG. Encoding is
//! deterministic: the same grid and quality always produce the same bytes,
//! which is what makes preview conversion idempotent.

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{GrayImage, ImageReader};
use std::io::Cursor;

use crate::error::StudyError;

/// Default JPEG quality (1-100).
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// Minimum allowed JPEG quality.
pub const MIN_JPEG_QUALITY: u8 = 1;

/// Maximum allowed JPEG quality.
pub const MAX_JPEG_QUALITY: u8 = 100;

/// MIME type of encoded previews and reconstructed slices.
pub const PREVIEW_CONTENT_TYPE: &str = "image/jpeg";

/// File extension of preview artifacts.
pub const PREVIEW_EXTENSION: &str = "jpg";

// =============================================================================
// JPEG Encoder
// =============================================================================

/// Encodes windowed grayscale images to JPEG at a fixed quality.
#[derive(Debug, Clone, Copy)]
pub struct JpegPreviewEncoder {
    quality: u8,
}

impl JpegPreviewEncoder {
    /// Create an encoder; quality is clamped to 1-100.
    pub fn new(quality: u8) -> Self {
        Self {
            quality: clamp_quality(quality),
        }
    }

    /// The quality used for encoding.
    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Encode a grayscale image.
    pub fn encode(&self, image: &GrayImage) -> Result<Bytes, StudyError> {
        let mut output = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut output, self.quality);

        encoder.encode_image(image).map_err(StudyError::encode)?;

        Ok(Bytes::from(output))
    }

    /// Decode a previously encoded preview back into a grayscale image.
    ///
    /// Used when assembling frame sequences from stored previews.
    pub fn decode(&self, source: &[u8]) -> Result<GrayImage, StudyError> {
        let cursor = Cursor::new(source);
        let reader = ImageReader::with_format(cursor, image::ImageFormat::Jpeg);

        let img = reader.decode().map_err(StudyError::encode)?;

        Ok(img.into_luma8())
    }
}

impl Default for JpegPreviewEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_JPEG_QUALITY)
    }
}

// =============================================================================
// Utility Functions
// =============================================================================

/// Returns `true` if quality is in the valid range (1-100).
#[inline]
pub fn is_valid_quality(quality: u8) -> bool {
    (MIN_JPEG_QUALITY..=MAX_JPEG_QUALITY).contains(&quality)
}

/// Clamp quality to valid range.
#[inline]
pub fn clamp_quality(quality: u8) -> u8 {
    quality.clamp(MIN_JPEG_QUALITY, MAX_JPEG_QUALITY)
}

/// Returns `true` if `data` starts with a JPEG SOI marker.
#[inline]
pub fn is_jpeg(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] == 0xFF && data[1] == 0xD8
}
