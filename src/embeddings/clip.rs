// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! CLIP image encoder on ONNX Runtime
//!
//! Loads a CLIP visual encoder (e.g. ViT-B/32 exported with its projection
//! head) and produces one image embedding per call. The session is CPU-only
//! and guarded by a mutex, so concurrent callers are serialized here rather
//! than in the worker.

use image::RgbImage;
use ort::execution_providers::CPUExecutionProvider;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Value;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::info;

use super::preprocessing::{preprocess_for_clip, CLIP_INPUT_SIZE};
use super::{EmbedError, EmbeddingProvider};

/// Input tensor name used by Hugging Face CLIP vision exports
pub const DEFAULT_INPUT_NAME: &str = "pixel_values";

#[derive(Debug, Clone)]
pub struct ClipModelConfig {
    pub model_path: PathBuf,
    pub input_name: String,
    pub dimension: usize,
    pub intra_threads: usize,
}

impl ClipModelConfig {
    pub fn new(model_path: impl Into<PathBuf>, dimension: usize) -> Self {
        Self {
            model_path: model_path.into(),
            input_name: DEFAULT_INPUT_NAME.to_string(),
            dimension,
            intra_threads: 4,
        }
    }
}

pub struct ClipImageEmbedder {
    session: Mutex<Session>,
    input_name: String,
    dimension: usize,
}

impl std::fmt::Debug for ClipImageEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClipImageEmbedder")
            .field("input_name", &self.input_name)
            .field("dimension", &self.dimension)
            .finish_non_exhaustive()
    }
}

impl ClipImageEmbedder {
    /// Load the encoder and check its output size with one test inference
    pub fn load(config: &ClipModelConfig) -> Result<Self, EmbedError> {
        let model_path: &Path = &config.model_path;
        if !model_path.exists() {
            return Err(EmbedError::Load(format!(
                "ONNX model file not found: {}",
                model_path.display()
            )));
        }

        let load_error = |e: ort::Error| {
            EmbedError::Load(format!("{}: {}", model_path.display(), e))
        };

        let session = Session::builder()
            .map_err(load_error)?
            .with_execution_providers([CPUExecutionProvider::default().build()])
            .map_err(load_error)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(load_error)?
            .with_intra_threads(config.intra_threads)
            .map_err(load_error)?
            .commit_from_file(model_path)
            .map_err(load_error)?;

        let embedder = Self {
            session: Mutex::new(session),
            input_name: config.input_name.clone(),
            dimension: config.dimension,
        };

        let probe = RgbImage::new(CLIP_INPUT_SIZE, CLIP_INPUT_SIZE);
        let vector = embedder
            .run(&probe)
            .map_err(|e| EmbedError::Load(format!("validation inference failed: {e}")))?;
        if vector.len() != config.dimension {
            return Err(EmbedError::Load(format!(
                "model outputs {} values (expected {})",
                vector.len(),
                config.dimension
            )));
        }

        info!(
            "Loaded CLIP image encoder from {} ({} dimensions)",
            model_path.display(),
            config.dimension
        );
        Ok(embedder)
    }

    fn run(&self, image: &RgbImage) -> Result<Vec<f32>, EmbedError> {
        let tensor = preprocess_for_clip(image, CLIP_INPUT_SIZE);
        let input = Value::from_array(tensor).map_err(|e| EmbedError::Inference(e.to_string()))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| EmbedError::Inference("session lock poisoned".to_string()))?;
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => input])
            .map_err(|e| EmbedError::Inference(e.to_string()))?;

        // Output [1, dim]; index 0 since export names differ ("image_embeds", "output", ...)
        let output = outputs[0]
            .try_extract_array::<f32>()
            .map_err(|e| EmbedError::Inference(e.to_string()))?;

        Ok(output.iter().copied().collect())
    }
}

impl EmbeddingProvider for ClipImageEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_image(&self, image: &RgbImage) -> Result<Vec<f32>, EmbedError> {
        self.run(image)
    }
}
