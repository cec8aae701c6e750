// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Image embedding providers
//!
//! The worker only depends on [`EmbeddingProvider`]. Two implementations
//! ship with the crate:
//! - [`ClipImageEmbedder`]: CLIP visual encoder exported to ONNX
//! - [`DeterministicEmbedder`]: pixel-hash vectors for local runs and tests

pub mod clip;
pub mod deterministic;
pub mod preprocessing;

use image::RgbImage;
use thiserror::Error;

pub use clip::{ClipImageEmbedder, ClipModelConfig};
pub use deterministic::DeterministicEmbedder;

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("Failed to load embedding model: {0}")]
    Load(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Unexpected embedding dimension: {actual} (expected {expected})")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Embedding contains non-finite values")]
    NonFinite,

    #[error("Embedding task panicked: {0}")]
    Panicked(String),
}

/// Computes a fixed-length vector for an image
///
/// Calls are synchronous and may block on CPU or accelerator work, so the
/// worker runs them on the blocking thread pool. Implementations are shared
/// between concurrent calls and must do their own synchronization.
#[cfg_attr(test, mockall::automock)]
pub trait EmbeddingProvider: Send + Sync {
    /// Length of every vector returned by [`embed_image`](Self::embed_image)
    fn dimension(&self) -> usize;

    fn embed_image(&self, image: &RgbImage) -> Result<Vec<f32>, EmbedError>;
}

/// Check a provider result before it is published
pub fn validate_embedding(vector: &[f32], expected: usize) -> Result<(), EmbedError> {
    if vector.len() != expected {
        return Err(EmbedError::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    if vector.iter().any(|v| !v.is_finite()) {
        return Err(EmbedError::NonFinite);
    }
    Ok(())
}
