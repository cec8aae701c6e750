// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Post embedding events exchanged over the `POSTS` stream
//!
//! Payloads are protobuf-encoded and wire compatible with the
//! `embeddings.v1` contracts used by the posts and search services:
//! - `GeneratePostEmbeddingsEvent` arrives on `posts.<id>.generate_embeddings`
//! - `PostEmbeddingsUpdatedEvent` is published to `posts.<id>.embeddings_updated`

use chrono::{DateTime, Utc};
use prost::Message;
use thiserror::Error;

/// Name of the durable stream carrying post events
pub const STREAM_NAME: &str = "POSTS";

/// Subject pattern the worker consumes from
pub const GENERATE_SUBJECT_PATTERN: &str = "posts.*.generate_embeddings";

/// Subject pattern the worker publishes to
pub const UPDATED_SUBJECT_PATTERN: &str = "posts.*.embeddings_updated";

/// Request to compute the image embedding of a post
#[derive(Clone, PartialEq, Message)]
pub struct GeneratePostEmbeddingsEvent {
    #[prost(string, tag = "1")]
    pub post_id: String,
    #[prost(string, tag = "2")]
    pub image_url: String,
}

/// Result of a successful embedding computation
#[derive(Clone, PartialEq, Message)]
pub struct PostEmbeddingsUpdatedEvent {
    #[prost(string, tag = "1")]
    pub post_id: String,
    #[prost(message, optional, tag = "2")]
    pub updated_at: Option<prost_types::Timestamp>,
    #[prost(float, repeated, tag = "3")]
    pub embedding_vector: Vec<f32>,
}

#[derive(Debug, Error)]
pub enum EventError {
    #[error("Malformed event payload: {0}")]
    Malformed(#[from] prost::DecodeError),

    #[error("Event is missing a post id")]
    MissingPostId,

    #[error("Post id {0:?} is not a valid subject token")]
    InvalidPostId(String),
}

impl GeneratePostEmbeddingsEvent {
    /// Decode an inbound payload and check that its post id can be routed.
    pub fn decode_request(payload: &[u8]) -> Result<Self, EventError> {
        let event = Self::decode(payload)?;
        validate_post_id(&event.post_id)?;
        Ok(event)
    }
}

impl PostEmbeddingsUpdatedEvent {
    pub fn new(post_id: impl Into<String>, updated_at: DateTime<Utc>, vector: Vec<f32>) -> Self {
        Self {
            post_id: post_id.into(),
            updated_at: Some(to_timestamp(updated_at)),
            embedding_vector: vector,
        }
    }

    /// Timestamp of the computation, if present and representable
    pub fn updated_at_utc(&self) -> Option<DateTime<Utc>> {
        let ts = self.updated_at.as_ref()?;
        DateTime::from_timestamp(ts.seconds, u32::try_from(ts.nanos).ok()?)
    }
}

/// Subject an inbound request for `post_id` is published on
pub fn generate_subject(post_id: &str) -> String {
    format!("posts.{post_id}.generate_embeddings")
}

/// Subject the updated event for `post_id` is published to
pub fn updated_subject(post_id: &str) -> String {
    format!("posts.{post_id}.embeddings_updated")
}

/// Extract the post id token from a `posts.<id>.<action>` subject
pub fn post_id_from_subject(subject: &str) -> Option<&str> {
    let mut tokens = subject.split('.');
    match (tokens.next(), tokens.next(), tokens.next(), tokens.next()) {
        (Some("posts"), Some(id), Some(_), None) if !id.is_empty() => Some(id),
        _ => None,
    }
}

/// A post id must be exactly one subject token, otherwise the outbound
/// subject would be routed to the wrong post or become a wildcard.
pub fn validate_post_id(post_id: &str) -> Result<(), EventError> {
    if post_id.is_empty() {
        return Err(EventError::MissingPostId);
    }
    let invalid = post_id
        .chars()
        .any(|c| c == '.' || c == '*' || c == '>' || c.is_whitespace() || c.is_control());
    if invalid {
        return Err(EventError::InvalidPostId(post_id.to_string()));
    }
    Ok(())
}

fn to_timestamp(at: DateTime<Utc>) -> prost_types::Timestamp {
    prost_types::Timestamp {
        seconds: at.timestamp(),
        nanos: at.timestamp_subsec_nanos() as i32,
    }
}
