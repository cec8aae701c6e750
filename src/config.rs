// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Worker configuration

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::events::{GENERATE_SUBJECT_PATTERN, STREAM_NAME, UPDATED_SUBJECT_PATTERN};
use crate::images::DecodeLimits;
use crate::stream::StreamDescriptor;

pub const DEFAULT_NATS_URL: &str = "nats://localhost:4222";
pub const DEFAULT_DURABLE: &str = "embedding_worker";
pub const DEFAULT_CONCURRENCY: usize = 4;

/// CLIP ViT-B/32 projection size
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 512;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be greater than 0")]
    Zero(&'static str),

    #[error("Invalid messaging backend address: {0}")]
    InvalidNatsUrl(String),

    #[error("Stream name must not be empty")]
    EmptyStreamName,

    #[error("Durable consumer name {0:?} must not be empty or contain '.', '*', '>' or whitespace")]
    InvalidDurable(String),
}

/// Settings for downloading post images
#[derive(Debug, Clone)]
pub struct ImageFetchConfig {
    /// Whole-request timeout for one image download
    pub timeout: Duration,
    /// Largest accepted response body
    pub max_bytes: usize,
    /// Bounds on the decoded pixels, which a small body can still exceed
    pub decode: DecodeLimits,
    pub user_agent: String,
}

impl Default for ImageFetchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_bytes: 20 * 1024 * 1024,
            decode: DecodeLimits::default(),
            user_agent: format!("inspire-embedding-worker/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Complete worker configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub nats_url: String,
    pub stream_name: String,
    pub durable_name: String,
    /// Maximum number of messages processed at the same time
    pub concurrency: usize,
    /// Number of pull loops sharing the concurrency limiter
    pub fetchers: usize,
    /// How long a single pull waits for a message
    pub fetch_timeout: Duration,
    /// Pause after a failed pull before trying again
    pub fetch_error_backoff: Duration,
    pub image: ImageFetchConfig,
    pub health_addr: SocketAddr,
    /// ONNX CLIP visual encoder; the deterministic embedder is used when unset
    pub clip_model_path: Option<PathBuf>,
    pub embedding_dimension: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            nats_url: DEFAULT_NATS_URL.to_string(),
            stream_name: STREAM_NAME.to_string(),
            durable_name: DEFAULT_DURABLE.to_string(),
            concurrency: DEFAULT_CONCURRENCY,
            fetchers: DEFAULT_CONCURRENCY,
            fetch_timeout: Duration::from_secs(1),
            fetch_error_backoff: Duration::from_millis(500),
            image: ImageFetchConfig::default(),
            health_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            clip_model_path: None,
            embedding_dimension: DEFAULT_EMBEDDING_DIMENSION,
        }
    }
}

impl WorkerConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::Zero("concurrency"));
        }
        if self.fetchers == 0 {
            return Err(ConfigError::Zero("fetchers"));
        }
        if self.fetch_timeout.is_zero() {
            return Err(ConfigError::Zero("fetch timeout"));
        }
        if self.image.timeout.is_zero() {
            return Err(ConfigError::Zero("image fetch timeout"));
        }
        if self.image.max_bytes == 0 {
            return Err(ConfigError::Zero("image size cap"));
        }
        if self.image.decode.max_dimension == 0 {
            return Err(ConfigError::Zero("image dimension cap"));
        }
        if self.image.decode.max_alloc == 0 {
            return Err(ConfigError::Zero("decoded image cap"));
        }
        if self.embedding_dimension == 0 {
            return Err(ConfigError::Zero("embedding dimension"));
        }
        if self.stream_name.trim().is_empty() {
            return Err(ConfigError::EmptyStreamName);
        }
        let durable_ok = !self.durable_name.is_empty()
            && !self
                .durable_name
                .chars()
                .any(|c| c == '.' || c == '*' || c == '>' || c.is_whitespace());
        if !durable_ok {
            return Err(ConfigError::InvalidDurable(self.durable_name.clone()));
        }
        let scheme_ok = url::Url::parse(&self.nats_url)
            .map(|u| matches!(u.scheme(), "nats" | "tls" | "ws" | "wss"))
            .unwrap_or(false);
        if !scheme_ok {
            return Err(ConfigError::InvalidNatsUrl(self.nats_url.clone()));
        }
        Ok(())
    }

    /// Stream accepting both the inbound and outbound subjects
    pub fn stream_descriptor(&self) -> StreamDescriptor {
        StreamDescriptor::persistent(
            &self.stream_name,
            [GENERATE_SUBJECT_PATTERN, UPDATED_SUBJECT_PATTERN],
        )
    }
}
