// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Per-message pipeline: decode → fetch → embed → publish → ack / nak

use bytes::Bytes;
use chrono::Utc;
use image::RgbImage;
use prost::Message;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{field, info, info_span, warn, Instrument, Span};

use super::stats::WorkerStats;
use crate::embeddings::{validate_embedding, EmbedError, EmbeddingProvider};
use crate::events::{
    post_id_from_subject, updated_subject, EventError, GeneratePostEmbeddingsEvent,
    PostEmbeddingsUpdatedEvent,
};
use crate::images::{FetchError, ImageFetcher};
use crate::stream::{Delivery, StreamBackend, StreamError};

/// Pipeline step at which a message failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Decode,
    Fetch,
    ImageDecode,
    Embed,
    Publish,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Decode => "decode",
            Stage::Fetch => "fetch",
            Stage::ImageDecode => "image_decode",
            Stage::Embed => "embed",
            Stage::Publish => "publish",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Failed to decode request: {0}")]
    Decode(#[from] EventError),

    #[error("Failed to fetch image: {0}")]
    Fetch(#[source] FetchError),

    #[error("Failed to decode image: {0}")]
    ImageDecode(#[source] FetchError),

    #[error("Failed to compute embedding: {0}")]
    Embed(#[from] EmbedError),

    #[error("Failed to publish embeddings: {0}")]
    Publish(#[from] StreamError),
}

impl From<FetchError> for ProcessError {
    fn from(err: FetchError) -> Self {
        if err.is_decode() {
            ProcessError::ImageDecode(err)
        } else {
            ProcessError::Fetch(err)
        }
    }
}

impl ProcessError {
    pub fn stage(&self) -> Stage {
        match self {
            ProcessError::Decode(_) => Stage::Decode,
            ProcessError::Fetch(_) => Stage::Fetch,
            ProcessError::ImageDecode(_) => Stage::ImageDecode,
            ProcessError::Embed(_) => Stage::Embed,
            ProcessError::Publish(_) => Stage::Publish,
        }
    }
}

/// How a delivered message is settled with the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Nak,
}

impl Disposition {
    /// Ack only when the outbound event was published
    pub fn of<T>(result: &Result<T, ProcessError>) -> Self {
        match result {
            Ok(_) => Disposition::Ack,
            Err(_) => Disposition::Nak,
        }
    }
}

/// Summary of a published `PostEmbeddingsUpdatedEvent`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub post_id: String,
    pub subject: String,
    pub dimension: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Published, then acknowledged
    Acknowledged { post_id: String },
    /// Failed at `stage` and negatively acknowledged
    Rejected { stage: Stage },
    /// The ack or nak could not be sent; the stream's ack wait redelivers
    Unsettled { disposition: Disposition },
}

/// Turns `generate_embeddings` requests into `embeddings_updated` events
///
/// All collaborators are shared: one stream connection, one HTTP client
/// and one embedding provider serve every concurrent call.
pub struct MessageProcessor {
    backend: Arc<dyn StreamBackend>,
    fetcher: ImageFetcher,
    embedder: Arc<dyn EmbeddingProvider>,
    stats: Arc<WorkerStats>,
}

impl MessageProcessor {
    pub fn new(
        backend: Arc<dyn StreamBackend>,
        fetcher: ImageFetcher,
        embedder: Arc<dyn EmbeddingProvider>,
        stats: Arc<WorkerStats>,
    ) -> Self {
        Self {
            backend,
            fetcher,
            embedder,
            stats,
        }
    }

    pub fn stats(&self) -> &Arc<WorkerStats> {
        &self.stats
    }

    /// Handle one delivery and settle it. Never fails: every error ends in a nak.
    pub async fn process(&self, delivery: Box<dyn Delivery>) -> ProcessOutcome {
        let span = info_span!(
            "process",
            subject = %delivery.subject(),
            post_id = field::Empty
        );
        // Decode failures still get the id from the subject
        if let Some(post_id) = post_id_from_subject(delivery.subject()) {
            span.record("post_id", post_id);
        }

        async move {
            self.stats.record_received();
            let _in_flight = self.stats.start_processing();

            let result = self.handle(delivery.payload()).await;
            if let Err(err) = &result {
                warn!(stage = %err.stage(), error = %err, "Rejecting message");
                self.stats.record_rejected(err.stage());
            }

            let disposition = Disposition::of(&result);
            let settled = match disposition {
                Disposition::Ack => delivery.ack().await,
                Disposition::Nak => delivery.nak().await,
            };
            if let Err(e) = settled {
                warn!(?disposition, error = %e, "Failed to settle message");
                return ProcessOutcome::Unsettled { disposition };
            }

            match result {
                Ok(published) => {
                    self.stats.record_acknowledged();
                    info!(
                        dimension = published.dimension,
                        "Published embeddings to {}", published.subject
                    );
                    ProcessOutcome::Acknowledged {
                        post_id: published.post_id,
                    }
                }
                Err(err) => ProcessOutcome::Rejected { stage: err.stage() },
            }
        }
        .instrument(span)
        .await
    }

    /// Run the pipeline for one payload without settling the message
    pub async fn handle(&self, payload: &[u8]) -> Result<Published, ProcessError> {
        let request = GeneratePostEmbeddingsEvent::decode_request(payload)?;
        Span::current().record("post_id", request.post_id.as_str());

        let image = self.fetcher.fetch(&request.image_url).await?;
        let vector = self.embed(image).await?;
        let dimension = vector.len();

        let event = PostEmbeddingsUpdatedEvent::new(request.post_id, Utc::now(), vector);
        let subject = updated_subject(&event.post_id);
        let payload = Bytes::from(event.encode_to_vec());

        self.backend.publish(subject.clone(), payload).await?;

        Ok(Published {
            post_id: event.post_id,
            subject,
            dimension,
        })
    }

    async fn embed(&self, image: RgbImage) -> Result<Vec<f32>, EmbedError> {
        let embedder = Arc::clone(&self.embedder);
        let vector = tokio::task::spawn_blocking(move || embedder.embed_image(&image))
            .await
            .map_err(|e| EmbedError::Panicked(e.to_string()))??;

        validate_embedding(&vector, self.embedder.dimension())?;
        Ok(vector)
    }
}
