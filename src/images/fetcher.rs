// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! HTTP image download over a shared connection pool

use image::RgbImage;
use reqwest::Client;
use thiserror::Error;
use tracing::debug;
use url::Url;

use super::decode::{decode_rgb, DecodeError, DecodeLimits};
use crate::config::ImageFetchConfig;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Invalid image URL {0:?}")]
    InvalidUrl(String),

    #[error("Timeout fetching {0}")]
    Timeout(String),

    #[error("HTTP error fetching {url}: {reason}")]
    Transport { url: String, reason: String },

    #[error("HTTP {status} for {url}")]
    Status { status: u16, url: String },

    #[error("Image at {url} exceeds {limit} bytes")]
    TooLarge { url: String, limit: usize },

    #[error("Undecodable image at {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: DecodeError,
    },
}

impl FetchError {
    /// Whether the bytes arrived but were not an image
    pub fn is_decode(&self) -> bool {
        matches!(self, FetchError::Decode { .. })
    }
}

/// Downloads post images
///
/// Cloning is cheap: clones share the same `reqwest::Client` and therefore
/// the same connection pool.
#[derive(Clone)]
pub struct ImageFetcher {
    client: Client,
    max_bytes: usize,
    limits: DecodeLimits,
}

impl ImageFetcher {
    /// Build the shared HTTP client for image downloads
    pub fn new(config: &ImageFetchConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.as_str())
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;

        Ok(Self::with_client(client, config))
    }

    /// Use an existing client; only the size and decode limits of `config` apply
    pub fn with_client(client: Client, config: &ImageFetchConfig) -> Self {
        Self {
            client,
            max_bytes: config.max_bytes,
            limits: config.decode,
        }
    }

    /// Download `url` and decode it into an RGB image
    pub async fn fetch(&self, url: &str) -> Result<RgbImage, FetchError> {
        let bytes = self.fetch_bytes(url).await?;
        debug!("Fetched {} bytes from {}", bytes.len(), url);

        let limits = self.limits;
        tokio::task::spawn_blocking(move || decode_rgb(&bytes, limits))
            .await
            .map_err(|e| DecodeError::TaskFailed(e.to_string()))
            .and_then(|decoded| decoded)
            .map_err(|source| FetchError::Decode {
                url: url.to_string(),
                source,
            })
    }

    /// Download the raw body of `url`, enforcing the size cap
    pub async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let parsed = Url::parse(url).map_err(|_| FetchError::InvalidUrl(url.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
            return Err(FetchError::InvalidUrl(url.to_string()));
        }

        let transport_error = |e: reqwest::Error| {
            if e.is_timeout() {
                FetchError::Timeout(url.to_string())
            } else {
                FetchError::Transport {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            }
        };

        let mut response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let too_large = || FetchError::TooLarge {
            url: url.to_string(),
            limit: self.max_bytes,
        };

        let declared = response.content_length().unwrap_or(0);
        if declared > self.max_bytes as u64 {
            return Err(too_large());
        }

        let mut body = Vec::with_capacity(declared as usize);
        while let Some(chunk) = response.chunk().await.map_err(transport_error)? {
            if body.len() + chunk.len() > self.max_bytes {
                return Err(too_large());
            }
            body.extend_from_slice(&chunk);
        }

        Ok(body)
    }
}
