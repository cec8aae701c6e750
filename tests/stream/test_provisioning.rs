// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
// Stream provisioning against the in-memory broker

use bytes::Bytes;
use inspire_embedding_worker::config::WorkerConfig;
use inspire_embedding_worker::stream::{
    ensure_stream, MemoryBroker, MessageSource, ProvisionOutcome, RetentionPolicy, StorageType,
    StreamBackend, StreamDescriptor, StreamError,
};
use std::time::Duration;
use tokio_test::assert_ok;

#[tokio::test]
async fn test_provisioning_is_idempotent() {
    let broker = MemoryBroker::new();
    let descriptor = WorkerConfig::default().stream_descriptor();

    let first = assert_ok!(ensure_stream(&broker, &descriptor).await);
    let second = assert_ok!(ensure_stream(&broker, &descriptor).await);

    assert_eq!(first, ProvisionOutcome::Created);
    assert_eq!(second, ProvisionOutcome::AlreadyExists);

    let streams = broker.streams();
    assert_eq!(streams.len(), 1);
    assert_eq!(streams[0].name, "POSTS");
    assert_eq!(streams[0].retention, RetentionPolicy::Limits);
    assert_eq!(streams[0].storage, StorageType::File);
}

#[tokio::test]
async fn test_existing_stream_is_not_reconciled() {
    let existing = StreamDescriptor::persistent("POSTS", ["posts.>"]);
    let broker = MemoryBroker::with_stream(existing.clone());

    let outcome = assert_ok!(
        ensure_stream(&broker, &WorkerConfig::default().stream_descriptor()).await
    );

    assert_eq!(outcome, ProvisionOutcome::AlreadyExists);
    assert_eq!(broker.streams(), vec![existing]);
}

#[tokio::test]
async fn test_unreachable_backend_is_reported() {
    let broker = MemoryBroker::new();
    broker.set_unavailable(true);

    let result = ensure_stream(&broker, &WorkerConfig::default().stream_descriptor()).await;

    assert!(matches!(result, Err(StreamError::Unavailable(_))));
    assert!(broker.streams().is_empty());
}

#[tokio::test]
async fn test_provisioned_stream_carries_both_directions() {
    let broker = MemoryBroker::new();
    ensure_stream(&broker, &WorkerConfig::default().stream_descriptor())
        .await
        .unwrap();

    broker
        .publish(
            "posts.1.embeddings_updated".to_string(),
            Bytes::from_static(b"vector"),
        )
        .await
        .unwrap();
    let unrouted = broker
        .publish("users.1.created".to_string(), Bytes::from_static(b"x"))
        .await;
    assert!(matches!(unrouted, Err(StreamError::Publish { .. })));

    broker.enqueue("posts.1.generate_embeddings", Bytes::from_static(b"request"));
    let delivery = broker
        .fetch_one(Duration::from_millis(50))
        .await
        .unwrap()
        .expect("request should be delivered");

    assert_eq!(delivery.subject(), "posts.1.generate_embeddings");
    assert_eq!(delivery.payload(), b"request");
    assert_eq!(broker.published().len(), 1);
}
