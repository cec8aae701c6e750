// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use image::RgbImage;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use super::{EmbedError, EmbeddingProvider};

/// Pseudo-embeddings derived from a hash of the pixels
///
/// Identical images always map to the same unit-length vector. Has no
/// semantic meaning; used when no model is configured.
#[derive(Debug, Clone)]
pub struct DeterministicEmbedder {
    dimension: usize,
}

impl DeterministicEmbedder {
    pub fn new(dimension: usize) -> Result<Self, EmbedError> {
        if dimension == 0 {
            return Err(EmbedError::Load(
                "Embedding dimension must be greater than 0".to_string(),
            ));
        }
        Ok(Self { dimension })
    }
}

impl EmbeddingProvider for DeterministicEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_image(&self, image: &RgbImage) -> Result<Vec<f32>, EmbedError> {
        let mut hasher = DefaultHasher::new();
        image.dimensions().hash(&mut hasher);
        image.as_raw().hash(&mut hasher);
        let mut seed = hasher.finish();

        let mut embedding = Vec::with_capacity(self.dimension);
        for i in 0..self.dimension {
            // Linear congruential step, mixed with the position
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407) ^ i as u64;
            let value = (seed >> 11) as f64 / (1u64 << 53) as f64 * 2.0 - 1.0;
            embedding.push(value as f32);
        }

        let norm = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut embedding {
                *value /= norm;
            }
        }

        Ok(embedding)
    }
}
