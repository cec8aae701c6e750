// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
// End-to-end message handling against the stub image server

use chrono::Utc;
use image::RgbImage;
use inspire_embedding_worker::embeddings::{
    DeterministicEmbedder, EmbedError, EmbeddingProvider,
};
use inspire_embedding_worker::events::PostEmbeddingsUpdatedEvent;
use inspire_embedding_worker::stream::{Delivery, MemoryBroker, MessageSource};
use inspire_embedding_worker::worker::{ProcessOutcome, Stage};
use mockall::mock;
use prost::Message;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

use crate::common::{self, ImageServer, DIMENSION};

mock! {
    pub Embedder {}

    impl EmbeddingProvider for Embedder {
        fn dimension(&self) -> usize;
        fn embed_image(&self, image: &RgbImage) -> Result<Vec<f32>, EmbedError>;
    }
}

async fn next_delivery(broker: &MemoryBroker) -> Box<dyn Delivery> {
    broker
        .fetch_one(Duration::from_millis(100))
        .await
        .unwrap()
        .expect("message should be queued")
}

fn deterministic() -> Arc<dyn EmbeddingProvider> {
    Arc::new(DeterministicEmbedder::new(DIMENSION).unwrap())
}

#[tokio::test]
async fn test_valid_request_publishes_and_acks() {
    let server = ImageServer::start().await;
    let broker = common::posts_broker();
    let processor = common::processor(&broker, deterministic());
    let sequence = common::enqueue_request(&broker, "42", &server.url("/image.png"));

    let before = Utc::now();
    let outcome = processor.process(next_delivery(&broker).await).await;
    let after = Utc::now();

    assert_eq!(
        outcome,
        ProcessOutcome::Acknowledged {
            post_id: "42".to_string()
        }
    );

    let published = broker.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].subject, "posts.42.embeddings_updated");

    let event = PostEmbeddingsUpdatedEvent::decode(published[0].payload.clone()).unwrap();
    assert_eq!(event.post_id, "42");
    assert_eq!(event.embedding_vector.len(), DIMENSION);

    let updated_at = event.updated_at_utc().expect("timestamp should be set");
    assert!(updated_at >= before - chrono::Duration::seconds(1));
    assert!(updated_at <= after + chrono::Duration::seconds(1));

    assert_eq!(broker.acked(), vec![sequence]);
    assert!(broker.nacked().is_empty());

    let stats = processor.stats().snapshot();
    assert_eq!(stats.received, 1);
    assert_eq!(stats.acknowledged, 1);
    assert_eq!(stats.in_flight, 0);
}

#[tokio::test]
async fn test_same_image_same_vector() {
    let server = ImageServer::start().await;
    let broker = common::posts_broker();
    let processor = common::processor(&broker, deterministic());

    let first = assert_ok!(processor.handle(&request_bytes("1", &server.url("/image.png"))).await);
    let second = assert_ok!(processor.handle(&request_bytes("2", &server.url("/image.png"))).await);
    assert_eq!(first.dimension, second.dimension);

    let published = broker.published();
    assert_eq!(published.len(), 2);
    let vectors: Vec<Vec<f32>> = published
        .iter()
        .map(|m| {
            PostEmbeddingsUpdatedEvent::decode(m.payload.clone())
                .unwrap()
                .embedding_vector
        })
        .collect();
    assert_eq!(vectors[0], vectors[1]);
}

#[tokio::test]
async fn test_undecodable_payload_is_nacked() {
    let broker = common::posts_broker();
    let mut embedder = MockEmbedder::new();
    embedder.expect_embed_image().never();
    embedder.expect_dimension().return_const(DIMENSION);
    let processor = common::processor(&broker, Arc::new(embedder));

    let sequence = broker.enqueue("posts.7.generate_embeddings", vec![0x13u8, 0x37, 0xff]);
    let outcome = processor.process(next_delivery(&broker).await).await;

    assert_eq!(outcome, ProcessOutcome::Rejected { stage: Stage::Decode });
    assert!(broker.published().is_empty());
    assert_eq!(broker.nacked(), vec![sequence]);
    assert!(broker.acked().is_empty());
}

#[tokio::test]
async fn test_random_three_byte_payloads_are_nacked() {
    let broker = common::posts_broker();
    let mut embedder = MockEmbedder::new();
    embedder.expect_embed_image().never();
    embedder.expect_dimension().return_const(DIMENSION);
    let processor = common::processor(&broker, Arc::new(embedder));
    let mut rng = StdRng::seed_from_u64(0x5eed);

    // Some payloads parse as protobuf and fail later at fetch; either way no publish
    for round in 1..=64 {
        let payload: [u8; 3] = rng.gen();
        broker.enqueue("posts.r.generate_embeddings", payload.to_vec());

        let outcome = processor.process(next_delivery(&broker).await).await;

        assert!(
            matches!(outcome, ProcessOutcome::Rejected { .. }),
            "payload {payload:02x?} gave {outcome:?}"
        );
        assert_eq!(broker.nacked().len(), round);
    }

    // A payload that parses: post id "A" with no image URL
    let sequence = broker.enqueue("posts.A.generate_embeddings", vec![0x0a, 0x01, 0x41]);
    let outcome = processor.process(next_delivery(&broker).await).await;
    assert_eq!(outcome, ProcessOutcome::Rejected { stage: Stage::Fetch });
    assert_eq!(broker.nacked().last(), Some(&sequence));

    assert!(broker.published().is_empty());
    assert!(broker.acked().is_empty());
}

#[tokio::test]
async fn test_unroutable_post_id_is_decode_failure() {
    let broker = common::posts_broker();
    let processor = common::processor(&broker, deterministic());

    let err = assert_err!(
        processor
            .handle(&request_bytes("posts.>", "http://127.0.0.1:1/image.png"))
            .await
    );

    assert_eq!(err.stage(), Stage::Decode);
    assert!(broker.published().is_empty());
}

#[tokio::test]
async fn test_missing_image_is_nacked() {
    let server = ImageServer::start().await;
    let broker = common::posts_broker();
    let processor = common::processor(&broker, deterministic());
    let sequence = common::enqueue_request(&broker, "404", &server.url("/missing.png"));

    let outcome = processor.process(next_delivery(&broker).await).await;

    assert_eq!(outcome, ProcessOutcome::Rejected { stage: Stage::Fetch });
    assert!(broker.published().is_empty());
    assert_eq!(broker.nacked(), vec![sequence]);
    assert_eq!(processor.stats().snapshot().rejected.fetch, 1);
}

#[tokio::test]
async fn test_unreachable_host_is_fetch_failure() {
    let broker = common::posts_broker();
    let processor = common::processor(&broker, deterministic());

    let err = assert_err!(
        processor
            .handle(&request_bytes("9", "http://127.0.0.1:1/image.png"))
            .await
    );

    assert_eq!(err.stage(), Stage::Fetch);
}

#[tokio::test]
async fn test_oversized_image_is_fetch_failure() {
    let server = ImageServer::start().await;
    let broker = common::posts_broker();
    let processor = common::processor(&broker, deterministic());
    common::enqueue_request(&broker, "5", &server.url("/huge.png"));

    let outcome = processor.process(next_delivery(&broker).await).await;

    assert_eq!(outcome, ProcessOutcome::Rejected { stage: Stage::Fetch });
    assert!(broker.published().is_empty());
}

#[tokio::test]
async fn test_non_image_body_is_image_decode_failure() {
    let server = ImageServer::start().await;
    let broker = common::posts_broker();
    let mut embedder = MockEmbedder::new();
    embedder.expect_embed_image().never();
    embedder.expect_dimension().return_const(DIMENSION);
    let processor = common::processor(&broker, Arc::new(embedder));
    let sequence = common::enqueue_request(&broker, "6", &server.url("/garbage.png"));

    let outcome = processor.process(next_delivery(&broker).await).await;

    assert_eq!(
        outcome,
        ProcessOutcome::Rejected {
            stage: Stage::ImageDecode
        }
    );
    assert_eq!(broker.nacked(), vec![sequence]);
    assert_eq!(processor.stats().snapshot().rejected.image_decode, 1);
}

#[tokio::test]
async fn test_oversized_dimensions_are_image_decode_failure() {
    let server = ImageServer::start().await;
    let broker = common::posts_broker();
    let mut embedder = MockEmbedder::new();
    embedder.expect_embed_image().never();
    embedder.expect_dimension().return_const(DIMENSION);
    let processor = common::processor(&broker, Arc::new(embedder));
    let sequence = common::enqueue_request(&broker, "13", &server.url("/wide.png"));

    let outcome = processor.process(next_delivery(&broker).await).await;

    assert_eq!(
        outcome,
        ProcessOutcome::Rejected {
            stage: Stage::ImageDecode
        }
    );
    assert!(broker.published().is_empty());
    assert_eq!(broker.nacked(), vec![sequence]);
}

#[tokio::test]
async fn test_embedding_failure_is_nacked() {
    let server = ImageServer::start().await;
    let broker = common::posts_broker();
    let mut embedder = MockEmbedder::new();
    embedder.expect_dimension().return_const(DIMENSION);
    embedder
        .expect_embed_image()
        .times(1)
        .returning(|_| Err(EmbedError::Inference("device lost".to_string())));
    let processor = common::processor(&broker, Arc::new(embedder));
    let sequence = common::enqueue_request(&broker, "8", &server.url("/image.png"));

    let outcome = processor.process(next_delivery(&broker).await).await;

    assert_eq!(outcome, ProcessOutcome::Rejected { stage: Stage::Embed });
    assert!(broker.published().is_empty());
    assert_eq!(broker.nacked(), vec![sequence]);
}

#[tokio::test]
async fn test_wrong_dimension_is_embed_failure() {
    let server = ImageServer::start().await;
    let broker = common::posts_broker();
    let mut embedder = MockEmbedder::new();
    embedder.expect_dimension().return_const(DIMENSION);
    embedder
        .expect_embed_image()
        .returning(|_| Ok(vec![0.1; DIMENSION - 1]));
    let processor = common::processor(&broker, Arc::new(embedder));

    let err = assert_err!(
        processor
            .handle(&request_bytes("10", &server.url("/image.png")))
            .await
    );

    assert_eq!(err.stage(), Stage::Embed);
    assert!(broker.published().is_empty());
}

#[tokio::test]
async fn test_publish_failure_is_nacked() {
    let server = ImageServer::start().await;
    let broker = common::posts_broker();
    broker.set_publish_failure(true);
    let processor = common::processor(&broker, deterministic());
    let sequence = common::enqueue_request(&broker, "11", &server.url("/image.png"));

    let outcome = processor.process(next_delivery(&broker).await).await;

    assert_eq!(outcome, ProcessOutcome::Rejected { stage: Stage::Publish });
    assert!(broker.acked().is_empty());
    assert_eq!(broker.nacked(), vec![sequence]);
    assert_eq!(processor.stats().snapshot().rejected.publish, 1);
}

#[tokio::test]
async fn test_nacked_message_is_redelivered_then_acked() {
    let server = ImageServer::start().await;
    let broker = common::posts_broker().with_max_deliver(2);
    broker.set_publish_failure(true);
    let processor = common::processor(&broker, deterministic());
    let sequence = common::enqueue_request(&broker, "12", &server.url("/image.png"));

    let first = processor.process(next_delivery(&broker).await).await;
    assert_eq!(first, ProcessOutcome::Rejected { stage: Stage::Publish });

    broker.set_publish_failure(false);
    let second = processor.process(next_delivery(&broker).await).await;

    assert_eq!(
        second,
        ProcessOutcome::Acknowledged {
            post_id: "12".to_string()
        }
    );
    assert_eq!(broker.nacked(), vec![sequence]);
    assert_eq!(broker.acked(), vec![sequence]);
    assert_eq!(broker.published().len(), 1);
}

fn request_bytes(post_id: &str, image_url: &str) -> Vec<u8> {
    inspire_embedding_worker::events::GeneratePostEmbeddingsEvent {
        post_id: post_id.to_string(),
        image_url: image_url.to_string(),
    }
    .encode_to_vec()
}
