// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Image preprocessing for the CLIP visual encoder

use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;

/// Input resolution of CLIP ViT-B/32
pub const CLIP_INPUT_SIZE: u32 = 224;

/// CLIP normalization mean values
pub const CLIP_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];

/// CLIP normalization std values
pub const CLIP_STD: [f32; 3] = [0.268_629_54, 0.261_302_58, 0.275_777_11];

/// Preprocess an image for the CLIP encoder
///
/// Steps:
/// 1. Resize so the shorter side equals `size` (bicubic)
/// 2. Center crop to `size` x `size`
/// 3. Normalize: (pixel/255 - mean) / std
/// 4. Convert to NCHW tensor format [1, 3, size, size]
pub fn preprocess_for_clip(image: &RgbImage, size: u32) -> Array4<f32> {
    let cropped = resize_and_center_crop(image, size);

    let side = size as usize;
    let mut tensor = Array4::zeros((1, 3, side, side));

    for (x, y, pixel) in cropped.enumerate_pixels() {
        for c in 0..3 {
            let normalized = (pixel[c] as f32 / 255.0 - CLIP_MEAN[c]) / CLIP_STD[c];
            tensor[[0, c, y as usize, x as usize]] = normalized;
        }
    }

    tensor
}

/// Shorter-side resize followed by a center crop
pub fn resize_and_center_crop(image: &RgbImage, size: u32) -> RgbImage {
    let (width, height) = image.dimensions();

    if width == 0 || height == 0 {
        return RgbImage::from_pixel(size, size, image::Rgb([0, 0, 0]));
    }

    let scale = size as f32 / width.min(height) as f32;
    let new_width = ((width as f32 * scale).round() as u32).max(size);
    let new_height = ((height as f32 * scale).round() as u32).max(size);

    let resized = imageops::resize(image, new_width, new_height, FilterType::CatmullRom);

    let left = (new_width - size) / 2;
    let top = (new_height - size) / 2;
    imageops::crop_imm(&resized, left, top, size, size).to_image()
}
