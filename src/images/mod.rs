// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Post image download and decoding

pub mod decode;
pub mod fetcher;

pub use decode::{decode_rgb, detect_format, DecodeError, DecodeLimits};
pub use fetcher::{FetchError, ImageFetcher};
