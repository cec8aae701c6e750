// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use anyhow::{Context, Result};
use clap::Args;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::api::serve_health;
use crate::config::{
    ImageFetchConfig, WorkerConfig, DEFAULT_CONCURRENCY, DEFAULT_DURABLE,
    DEFAULT_EMBEDDING_DIMENSION, DEFAULT_NATS_URL,
};
use crate::embeddings::{
    ClipImageEmbedder, ClipModelConfig, DeterministicEmbedder, EmbeddingProvider,
};
use crate::events::{GENERATE_SUBJECT_PATTERN, STREAM_NAME};
use crate::images::{DecodeLimits, ImageFetcher};
use crate::stream::{ensure_stream, NatsBackend, ProvisionOutcome};
use crate::worker::{MessageProcessor, PullLoopConfig, PullWorker, WorkerStats};

#[derive(Args, Debug, Clone)]
pub struct WorkerArgs {
    /// NATS server address
    #[arg(long, env = "NATS_URL", default_value = DEFAULT_NATS_URL)]
    pub nats_url: String,

    /// Stream holding inbound and outbound post events
    #[arg(long, env = "WORKER_STREAM", default_value = STREAM_NAME)]
    pub stream: String,

    /// Durable consumer name
    #[arg(long, env = "WORKER_DURABLE", default_value = DEFAULT_DURABLE)]
    pub durable: String,

    /// Maximum number of messages processed at once
    #[arg(long, env = "WORKER_CONCURRENCY", default_value_t = DEFAULT_CONCURRENCY)]
    pub concurrency: usize,

    /// Number of pull loops (defaults to the concurrency)
    #[arg(long, env = "WORKER_FETCHERS")]
    pub fetchers: Option<usize>,

    /// Single pull timeout in milliseconds
    #[arg(long, env = "WORKER_FETCH_TIMEOUT_MS", default_value_t = 1000)]
    pub fetch_timeout_ms: u64,

    /// Image download timeout in seconds
    #[arg(long, env = "IMAGE_FETCH_TIMEOUT_SECS", default_value_t = 30)]
    pub image_timeout_secs: u64,

    /// Largest accepted image body in bytes
    #[arg(long, env = "IMAGE_MAX_BYTES", default_value_t = 20 * 1024 * 1024)]
    pub image_max_bytes: usize,

    /// Largest accepted image width or height in pixels
    #[arg(long, env = "IMAGE_MAX_DIMENSION", default_value_t = 8192)]
    pub image_max_dimension: u32,

    /// Largest decoded image buffer in bytes
    #[arg(long, env = "IMAGE_MAX_DECODED_BYTES", default_value_t = 256 * 1024 * 1024)]
    pub image_max_decoded_bytes: u64,

    /// Health endpoint bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8000")]
    pub health_addr: SocketAddr,

    /// ONNX CLIP visual encoder
    #[arg(long, env = "CLIP_MODEL_PATH")]
    pub clip_model_path: Option<PathBuf>,

    /// Length of the produced embedding vectors
    #[arg(long, env = "EMBEDDING_DIMENSION", default_value_t = DEFAULT_EMBEDDING_DIMENSION)]
    pub embedding_dimension: usize,
}

impl WorkerArgs {
    pub fn into_config(self) -> WorkerConfig {
        WorkerConfig {
            nats_url: self.nats_url,
            stream_name: self.stream,
            durable_name: self.durable,
            concurrency: self.concurrency,
            fetchers: self.fetchers.unwrap_or(self.concurrency),
            fetch_timeout: Duration::from_millis(self.fetch_timeout_ms),
            image: ImageFetchConfig {
                timeout: Duration::from_secs(self.image_timeout_secs),
                max_bytes: self.image_max_bytes,
                decode: DecodeLimits {
                    max_dimension: self.image_max_dimension,
                    max_alloc: self.image_max_decoded_bytes,
                },
                ..Default::default()
            },
            health_addr: self.health_addr,
            clip_model_path: self.clip_model_path,
            embedding_dimension: self.embedding_dimension,
            ..Default::default()
        }
    }
}

/// Load the CLIP encoder when a model path is configured, otherwise fall
/// back to deterministic pseudo-embeddings.
pub async fn build_embedder(config: &WorkerConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match &config.clip_model_path {
        Some(path) => {
            let model_config = ClipModelConfig::new(path.clone(), config.embedding_dimension);
            let embedder = tokio::task::spawn_blocking(move || {
                ClipImageEmbedder::load(&model_config)
            })
            .await
            .context("CLIP loader task failed")?
            .with_context(|| format!("Failed to load CLIP model from {}", path.display()))?;
            Ok(Arc::new(embedder))
        }
        None => {
            warn!(
                "CLIP_MODEL_PATH not set, using deterministic {}-dim embeddings",
                config.embedding_dimension
            );
            Ok(Arc::new(DeterministicEmbedder::new(
                config.embedding_dimension,
            )?))
        }
    }
}

/// Provision the stream and exit
pub async fn provision_stream(config: WorkerConfig) -> Result<()> {
    config.validate()?;

    let backend = NatsBackend::connect(&config.nats_url).await?;
    let outcome = ensure_stream(&backend, &config.stream_descriptor())
        .await
        .context("Stream provisioning failed")?;

    match outcome {
        ProvisionOutcome::Created => println!("Created stream {}", config.stream_name),
        ProvisionOutcome::AlreadyExists => {
            println!("Stream {} already exists", config.stream_name)
        }
    }

    backend.close().await?;
    Ok(())
}

/// Provision the stream, then consume until SIGINT / SIGTERM
pub async fn run_worker(config: WorkerConfig) -> Result<()> {
    config.validate()?;
    info!(
        nats_url = %config.nats_url,
        stream = %config.stream_name,
        durable = %config.durable_name,
        concurrency = config.concurrency,
        "Starting embedding worker"
    );

    let embedder = build_embedder(&config).await?;
    let fetcher = ImageFetcher::new(&config.image).context("Failed to build HTTP client")?;

    let backend = NatsBackend::connect(&config.nats_url).await?;
    ensure_stream(&backend, &config.stream_descriptor())
        .await
        .context("Stream provisioning failed")?;
    let consumer = backend
        .pull_consumer(
            &config.stream_name,
            &config.durable_name,
            GENERATE_SUBJECT_PATTERN,
        )
        .await?;

    let stats = Arc::new(WorkerStats::new());
    let processor = Arc::new(MessageProcessor::new(
        Arc::new(backend.clone()),
        fetcher,
        embedder,
        Arc::clone(&stats),
    ));
    let worker = PullWorker::new(
        Arc::new(consumer),
        processor,
        PullLoopConfig::from(&config),
    );

    let shutdown = CancellationToken::new();
    let health = tokio::spawn(serve_health(
        config.health_addr,
        Arc::clone(&stats),
        shutdown.clone(),
    ));
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            info!("Shutdown requested, draining in-flight messages");
            shutdown.cancel();
        }
    });

    let result = worker.run(shutdown.clone()).await;
    shutdown.cancel();
    drop(worker);

    match health.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Health server failed: {}", e),
        Err(e) => error!("Health server task failed: {}", e),
    }

    backend.close().await?;
    info!(stats = ?stats.snapshot(), "Embedding worker stopped");
    result
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
