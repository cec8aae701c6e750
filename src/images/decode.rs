// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Decoding downloaded bytes into the canonical RGB image

use image::{DynamicImage, ImageDecoder, ImageError, ImageFormat, ImageReader, Limits, RgbImage};
use std::io::Cursor;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Image data is empty")]
    EmptyData,

    #[error("Unsupported image format")]
    UnsupportedFormat,

    #[error("Failed to decode {format:?} image: {reason}")]
    DecodeFailed { format: ImageFormat, reason: String },

    #[error("Image exceeds decode limits: {0}")]
    LimitsExceeded(String),

    #[error("Decode task failed: {0}")]
    TaskFailed(String),
}

/// Bounds on the decoded image, independent of the compressed size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeLimits {
    /// Largest accepted width and height in pixels
    pub max_dimension: u32,
    /// Largest buffer the decoder may allocate
    pub max_alloc: u64,
}

impl Default for DecodeLimits {
    fn default() -> Self {
        Self {
            max_dimension: 8192,
            max_alloc: 256 * 1024 * 1024,
        }
    }
}

impl DecodeLimits {
    fn to_image_limits(self) -> Limits {
        let mut limits = Limits::default();
        limits.max_image_width = Some(self.max_dimension);
        limits.max_image_height = Some(self.max_dimension);
        limits.max_alloc = Some(self.max_alloc);
        limits
    }
}

/// Decode raw bytes into a 3-channel RGB buffer, dropping any alpha channel.
///
/// CPU bound; async callers should run it on the blocking pool.
pub fn decode_rgb(bytes: &[u8], limits: DecodeLimits) -> Result<RgbImage, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::EmptyData);
    }

    let format = detect_format(bytes)?;
    let decode_error = |e: ImageError| match e {
        ImageError::Limits(limit) => DecodeError::LimitsExceeded(limit.to_string()),
        other => DecodeError::DecodeFailed {
            format,
            reason: other.to_string(),
        },
    };

    let mut reader = ImageReader::with_format(Cursor::new(bytes), format);
    reader.limits(limits.to_image_limits());

    // Header only; dimensions are checked against the limits here
    let decoder = reader.into_decoder().map_err(decode_error)?;
    let (width, height) = decoder.dimensions();
    if width > limits.max_dimension || height > limits.max_dimension {
        return Err(DecodeError::LimitsExceeded(format!(
            "{width}x{height} image exceeds {} pixels per side",
            limits.max_dimension
        )));
    }
    let decoded_bytes = decoder.total_bytes();
    if decoded_bytes > limits.max_alloc {
        return Err(DecodeError::LimitsExceeded(format!(
            "{width}x{height} image needs {decoded_bytes} bytes (limit {})",
            limits.max_alloc
        )));
    }

    let image = DynamicImage::from_decoder(decoder).map_err(decode_error)?;
    Ok(image.to_rgb8())
}

/// Detect image format from magic bytes
pub fn detect_format(bytes: &[u8]) -> Result<ImageFormat, DecodeError> {
    if bytes.len() < 4 {
        return Err(DecodeError::UnsupportedFormat);
    }

    match bytes {
        // PNG: 89 50 4E 47
        [0x89, 0x50, 0x4E, 0x47, ..] => Ok(ImageFormat::Png),

        // JPEG: FF D8 FF
        [0xFF, 0xD8, 0xFF, ..] => Ok(ImageFormat::Jpeg),

        // WebP: RIFF .... WEBP
        [0x52, 0x49, 0x46, 0x46, _, _, _, _, 0x57, 0x45, 0x42, 0x50, ..] => Ok(ImageFormat::WebP),

        // GIF87a / GIF89a
        [0x47, 0x49, 0x46, 0x38, x, ..] if *x == 0x37 || *x == 0x39 => Ok(ImageFormat::Gif),

        [0x42, 0x4D, ..] => Ok(ImageFormat::Bmp),

        [0x49, 0x49, 0x2A, 0x00, ..] | [0x4D, 0x4D, 0x00, 0x2A, ..] => Ok(ImageFormat::Tiff),

        _ => Err(DecodeError::UnsupportedFormat),
    }
}
