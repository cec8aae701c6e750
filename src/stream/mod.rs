// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Durable message stream access
//!
//! The worker talks to the stream through three small traits so the
//! pipeline can run against NATS JetStream in production and against the
//! in-memory broker in tests:
//! - [`StreamBackend`]: stream listing, creation and publishing
//! - [`MessageSource`]: single-message pulls from a durable consumer
//! - [`Delivery`]: one pulled message with ack / nak

pub mod memory;
pub mod nats;
pub mod provisioner;

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;

pub use memory::MemoryBroker;
pub use nats::{NatsBackend, NatsConsumer};
pub use provisioner::{ensure_stream, ProvisionOutcome};

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Messaging backend unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to list streams: {0}")]
    List(String),

    #[error("Failed to create stream {name}: {reason}")]
    Create { name: String, reason: String },

    #[error("Failed to create consumer {durable}: {reason}")]
    Consumer { durable: String, reason: String },

    #[error("Failed to fetch message: {0}")]
    Fetch(String),

    #[error("Failed to publish to {subject}: {reason}")]
    Publish { subject: String, reason: String },

    #[error("Failed to acknowledge message: {0}")]
    Ack(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionPolicy {
    /// Keep messages until stream limits are reached
    Limits,
    /// Keep messages until every consumer acknowledged them
    WorkQueue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    /// Persisted to disk, survives server restarts
    File,
    Memory,
}

/// Configuration of a durable stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescriptor {
    pub name: String,
    pub subjects: Vec<String>,
    pub retention: RetentionPolicy,
    pub storage: StorageType,
}

impl StreamDescriptor {
    /// Limits-retention stream persisted to file storage
    pub fn persistent<I, S>(name: &str, subjects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.to_string(),
            subjects: subjects.into_iter().map(Into::into).collect(),
            retention: RetentionPolicy::Limits,
            storage: StorageType::File,
        }
    }
}

/// Stream management and publishing
#[async_trait]
pub trait StreamBackend: Send + Sync {
    /// Names of all streams known to the backend
    async fn stream_names(&self) -> Result<Vec<String>, StreamError>;

    async fn create_stream(&self, descriptor: &StreamDescriptor) -> Result<(), StreamError>;

    /// Publish and wait for the stream to persist the message
    async fn publish(&self, subject: String, payload: Bytes) -> Result<(), StreamError>;
}

/// Pull side of a durable consumer
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Fetch at most one pending message, waiting up to `timeout`.
    ///
    /// Returns `Ok(None)` when nothing arrived in time.
    async fn fetch_one(&self, timeout: Duration) -> Result<Option<Box<dyn Delivery>>, StreamError>;
}

/// A message handed out by a [`MessageSource`]
#[async_trait]
pub trait Delivery: Send + Sync {
    fn subject(&self) -> &str;

    fn payload(&self) -> &[u8];

    /// Remove the message from the pending-redelivery set
    async fn ack(&self) -> Result<(), StreamError>;

    /// Ask the stream to redeliver according to its own policy
    async fn nak(&self) -> Result<(), StreamError>;
}
