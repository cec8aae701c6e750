// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
pub mod api;
pub mod cli;
pub mod config;
pub mod embeddings;
pub mod events;
pub mod images;
pub mod stream;
pub mod version;
pub mod worker;

// Re-export main types
pub use config::{ConfigError, ImageFetchConfig, WorkerConfig};
pub use embeddings::{
    ClipImageEmbedder, DeterministicEmbedder, EmbedError, EmbeddingProvider,
};
pub use events::{GeneratePostEmbeddingsEvent, PostEmbeddingsUpdatedEvent, STREAM_NAME};
pub use images::{FetchError, ImageFetcher};
pub use stream::{
    ensure_stream, Delivery, MemoryBroker, MessageSource, NatsBackend, ProvisionOutcome,
    StreamBackend, StreamDescriptor, StreamError,
};
pub use worker::{
    Disposition, MessageProcessor, ProcessError, ProcessOutcome, PullLoopConfig, PullWorker,
    Stage, WorkerStats,
};
