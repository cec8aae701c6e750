// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
// Image download and decoding over HTTP

use inspire_embedding_worker::images::{DecodeError, FetchError};

use crate::common::{self, ImageServer, TEST_MAX_BYTES};

#[tokio::test]
async fn test_fetch_decodes_rgb_image() {
    let server = ImageServer::start().await;
    let fetcher = common::fetcher();

    let image = fetcher.fetch(&server.url("/image.png")).await.unwrap();

    assert_eq!(image.dimensions(), (10, 10));
    assert_eq!(image.get_pixel(5, 5).0, [200, 30, 30]);
}

#[tokio::test]
async fn test_fetch_not_found() {
    let server = ImageServer::start().await;
    let fetcher = common::fetcher();

    let err = fetcher.fetch(&server.url("/missing.png")).await.unwrap_err();

    assert!(matches!(err, FetchError::Status { status: 404, .. }));
    assert!(!err.is_decode());
}

#[tokio::test]
async fn test_fetch_rejects_oversized_body() {
    let server = ImageServer::start().await;
    let fetcher = common::fetcher();

    let err = fetcher.fetch_bytes(&server.url("/huge.png")).await.unwrap_err();

    match err {
        FetchError::TooLarge { limit, .. } => assert_eq!(limit, TEST_MAX_BYTES),
        other => panic!("expected TooLarge, got {other:?}"),
    }
}

#[tokio::test]
async fn test_fetch_non_image_body_is_decode_error() {
    let server = ImageServer::start().await;
    let fetcher = common::fetcher();

    let err = fetcher.fetch(&server.url("/garbage.png")).await.unwrap_err();

    assert!(err.is_decode());
}

#[tokio::test]
async fn test_fetch_rejects_oversized_dimensions() {
    let server = ImageServer::start().await;
    let fetcher = common::fetcher();

    let body = fetcher.fetch_bytes(&server.url("/wide.png")).await.unwrap();
    assert!(body.len() < TEST_MAX_BYTES);

    let err = fetcher.fetch(&server.url("/wide.png")).await.unwrap_err();

    match err {
        FetchError::Decode {
            source: DecodeError::LimitsExceeded(_),
            ..
        } => {}
        other => panic!("expected decode limit error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_clones_share_client() {
    let server = ImageServer::start().await;
    let fetcher = common::fetcher();
    let clone = fetcher.clone();

    let url = server.url("/image.png");

    let (a, b) = tokio::join!(fetcher.fetch_bytes(&url), clone.fetch_bytes(&url));

    assert_eq!(a.unwrap(), common::solid_png());
    assert_eq!(b.unwrap(), common::solid_png());
}

#[tokio::test]
async fn test_rejects_non_http_scheme() {
    let fetcher = common::fetcher();

    let err = fetcher.fetch_bytes("file:///etc/passwd").await.unwrap_err();

    assert!(matches!(err, FetchError::InvalidUrl(_)));
}
