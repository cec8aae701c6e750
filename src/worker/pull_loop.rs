// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Bounded-concurrency pull loop
//!
//! Several fetch loops pull one message at a time and hand each message to
//! the processor on its own task. A shared semaphore caps how many messages
//! are processed at once; it is the only admission control.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::processor::MessageProcessor;
use crate::config::WorkerConfig;
use crate::stream::MessageSource;

#[derive(Debug, Clone)]
pub struct PullLoopConfig {
    pub concurrency: usize,
    pub fetchers: usize,
    pub fetch_timeout: Duration,
    pub fetch_error_backoff: Duration,
}

impl Default for PullLoopConfig {
    fn default() -> Self {
        Self::from(&WorkerConfig::default())
    }
}

impl From<&WorkerConfig> for PullLoopConfig {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            concurrency: config.concurrency,
            fetchers: config.fetchers,
            fetch_timeout: config.fetch_timeout,
            fetch_error_backoff: config.fetch_error_backoff,
        }
    }
}

#[derive(Clone)]
pub struct PullWorker {
    source: Arc<dyn MessageSource>,
    processor: Arc<MessageProcessor>,
    limiter: Arc<Semaphore>,
    config: PullLoopConfig,
}

impl PullWorker {
    pub fn new(
        source: Arc<dyn MessageSource>,
        processor: Arc<MessageProcessor>,
        config: PullLoopConfig,
    ) -> Self {
        Self {
            source,
            processor,
            limiter: Arc::new(Semaphore::new(config.concurrency.max(1))),
            config,
        }
    }

    /// Share an existing limiter with other workers
    pub fn with_limiter(mut self, limiter: Arc<Semaphore>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn limiter(&self) -> &Arc<Semaphore> {
        &self.limiter
    }

    /// Pull and process messages until `shutdown` is cancelled.
    ///
    /// Cancellation stops new fetches only; the call returns once every
    /// dispatched message has been processed and settled.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let tracker = TaskTracker::new();
        let mut fetchers = JoinSet::new();

        info!(
            concurrency = self.config.concurrency,
            fetchers = self.config.fetchers,
            "Worker started"
        );

        for id in 0..self.config.fetchers.max(1) {
            let worker = self.clone();
            let shutdown = shutdown.clone();
            let tracker = tracker.clone();
            fetchers.spawn(async move { worker.fetch_loop(id, shutdown, tracker).await });
        }

        while let Some(joined) = fetchers.join_next().await {
            if let Err(e) = joined {
                error!("Fetch loop terminated abnormally: {}", e);
            }
        }

        tracker.close();
        if !tracker.is_empty() {
            info!("Waiting for {} in-flight messages", tracker.len());
        }
        tracker.wait().await;

        info!("Worker stopped");
        Ok(())
    }

    async fn fetch_loop(&self, id: usize, shutdown: CancellationToken, tracker: TaskTracker) {
        debug!(fetcher = id, "Fetch loop started");

        loop {
            let fetched = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                fetched = self.source.fetch_one(self.config.fetch_timeout) => fetched,
            };

            let delivery = match fetched {
                Ok(Some(delivery)) => delivery,
                Ok(None) => continue,
                Err(e) => {
                    warn!(fetcher = id, "Fetch failed: {}", e);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.config.fetch_error_backoff) => continue,
                    }
                }
            };

            // Wait for a slot even during shutdown; the message is already in hand
            let permit = match Arc::clone(&self.limiter).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    error!(fetcher = id, "Concurrency limiter closed");
                    if let Err(e) = delivery.nak().await {
                        warn!("Failed to return message: {}", e);
                    }
                    break;
                }
            };

            let processor = Arc::clone(&self.processor);
            tracker.spawn(async move {
                processor.process(delivery).await;
                drop(permit);
            });
        }

        debug!(fetcher = id, "Fetch loop stopped");
    }
}
