// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! NATS JetStream implementation of the stream traits

use async_nats::jetstream::{self, consumer::pull, AckKind};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use std::time::Duration;
use tracing::{debug, info};

use super::{
    Delivery, MessageSource, RetentionPolicy, StorageType, StreamBackend, StreamDescriptor,
    StreamError,
};

/// Shared JetStream connection
///
/// One instance is created at startup and handed to the provisioner, the
/// processor (for publishing) and the consumer.
#[derive(Clone)]
pub struct NatsBackend {
    client: async_nats::Client,
    context: jetstream::Context,
}

impl NatsBackend {
    pub async fn connect(url: &str) -> Result<Self, StreamError> {
        let client = async_nats::ConnectOptions::new()
            .name("inspire-embedding-worker")
            .connect(url)
            .await
            .map_err(|e| StreamError::Unavailable(format!("{url}: {e}")))?;

        info!("Connected to NATS at {}", url);

        let context = jetstream::new(client.clone());
        Ok(Self { client, context })
    }

    /// Durable pull consumer filtered on `filter_subject`, created on first use
    pub async fn pull_consumer(
        &self,
        stream_name: &str,
        durable: &str,
        filter_subject: &str,
    ) -> Result<NatsConsumer, StreamError> {
        let consumer_error = |reason: String| StreamError::Consumer {
            durable: durable.to_string(),
            reason,
        };

        let stream = self
            .context
            .get_stream(stream_name)
            .await
            .map_err(|e| consumer_error(format!("stream {stream_name}: {e}")))?;

        let consumer = stream
            .get_or_create_consumer(
                durable,
                pull::Config {
                    durable_name: Some(durable.to_string()),
                    filter_subject: filter_subject.to_string(),
                    ack_policy: jetstream::consumer::AckPolicy::Explicit,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| consumer_error(e.to_string()))?;

        info!(durable, filter_subject, "Pull consumer ready");
        Ok(NatsConsumer { consumer })
    }

    /// Flush buffered publishes before the connection is dropped
    pub async fn close(self) -> Result<(), StreamError> {
        self.client
            .flush()
            .await
            .map_err(|e| StreamError::Unavailable(e.to_string()))
    }
}

#[async_trait]
impl StreamBackend for NatsBackend {
    async fn stream_names(&self) -> Result<Vec<String>, StreamError> {
        self.context
            .stream_names()
            .try_collect()
            .await
            .map_err(|e| StreamError::List(e.to_string()))
    }

    async fn create_stream(&self, descriptor: &StreamDescriptor) -> Result<(), StreamError> {
        let config = jetstream::stream::Config {
            name: descriptor.name.clone(),
            subjects: descriptor.subjects.clone(),
            retention: match descriptor.retention {
                RetentionPolicy::Limits => jetstream::stream::RetentionPolicy::Limits,
                RetentionPolicy::WorkQueue => jetstream::stream::RetentionPolicy::WorkQueue,
            },
            storage: match descriptor.storage {
                StorageType::File => jetstream::stream::StorageType::File,
                StorageType::Memory => jetstream::stream::StorageType::Memory,
            },
            ..Default::default()
        };

        self.context
            .create_stream(config)
            .await
            .map(|_| ())
            .map_err(|e| StreamError::Create {
                name: descriptor.name.clone(),
                reason: e.to_string(),
            })
    }

    async fn publish(&self, subject: String, payload: Bytes) -> Result<(), StreamError> {
        let publish_error = |subject: &str, reason: String| StreamError::Publish {
            subject: subject.to_string(),
            reason,
        };

        let ack = self
            .context
            .publish(subject.clone(), payload)
            .await
            .map_err(|e| publish_error(&subject, e.to_string()))?;
        ack.await
            .map_err(|e| publish_error(&subject, e.to_string()))?;

        Ok(())
    }
}

/// Durable pull consumer on the `POSTS` stream
pub struct NatsConsumer {
    consumer: jetstream::consumer::Consumer<pull::Config>,
}

#[async_trait]
impl MessageSource for NatsConsumer {
    async fn fetch_one(&self, timeout: Duration) -> Result<Option<Box<dyn Delivery>>, StreamError> {
        let mut batch = self
            .consumer
            .batch()
            .max_messages(1)
            .expires(timeout)
            .messages()
            .await
            .map_err(|e| StreamError::Fetch(e.to_string()))?;

        // The server ends the batch at `expires`; the outer bound covers a stalled connection
        let next = match tokio::time::timeout(timeout * 2, batch.next()).await {
            Ok(next) => next,
            Err(_) => return Ok(None),
        };

        match next {
            Some(Ok(message)) => {
                debug!(subject = %message.subject, "Pulled message");
                Ok(Some(Box::new(NatsDelivery {
                    subject: message.subject.to_string(),
                    message,
                })))
            }
            Some(Err(e)) => Err(StreamError::Fetch(e.to_string())),
            None => Ok(None),
        }
    }
}

struct NatsDelivery {
    subject: String,
    message: jetstream::Message,
}

#[async_trait]
impl Delivery for NatsDelivery {
    fn subject(&self) -> &str {
        &self.subject
    }

    fn payload(&self) -> &[u8] {
        &self.message.payload
    }

    async fn ack(&self) -> Result<(), StreamError> {
        self.message
            .ack()
            .await
            .map_err(|e| StreamError::Ack(e.to_string()))
    }

    async fn nak(&self) -> Result<(), StreamError> {
        self.message
            .ack_with(AckKind::Nak(None))
            .await
            .map_err(|e| StreamError::Ack(e.to_string()))
    }
}
