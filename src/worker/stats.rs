// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use super::processor::Stage;

/// Counters shared by the pull loops, the processor and the health endpoint
#[derive(Debug, Default)]
pub struct WorkerStats {
    received: AtomicU64,
    acknowledged: AtomicU64,
    rejected_decode: AtomicU64,
    rejected_fetch: AtomicU64,
    rejected_image_decode: AtomicU64,
    rejected_embed: AtomicU64,
    rejected_publish: AtomicU64,
    in_flight: AtomicU64,
    peak_in_flight: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub received: u64,
    pub acknowledged: u64,
    pub rejected: RejectedCounts,
    pub in_flight: u64,
    pub peak_in_flight: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedCounts {
    pub decode: u64,
    pub fetch: u64,
    pub image_decode: u64,
    pub embed: u64,
    pub publish: u64,
}

impl RejectedCounts {
    pub fn total(&self) -> u64 {
        self.decode + self.fetch + self.image_decode + self.embed + self.publish
    }
}

impl WorkerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_acknowledged(&self) {
        self.acknowledged.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self, stage: Stage) {
        let counter = match stage {
            Stage::Decode => &self.rejected_decode,
            Stage::Fetch => &self.rejected_fetch,
            Stage::ImageDecode => &self.rejected_image_decode,
            Stage::Embed => &self.rejected_embed,
            Stage::Publish => &self.rejected_publish,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Mark one `process` call as started; the guard ends it on drop
    pub(crate) fn start_processing(&self) -> InFlightGuard<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlightGuard { stats: self }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            acknowledged: self.acknowledged.load(Ordering::Relaxed),
            rejected: RejectedCounts {
                decode: self.rejected_decode.load(Ordering::Relaxed),
                fetch: self.rejected_fetch.load(Ordering::Relaxed),
                image_decode: self.rejected_image_decode.load(Ordering::Relaxed),
                embed: self.rejected_embed.load(Ordering::Relaxed),
                publish: self.rejected_publish.load(Ordering::Relaxed),
            },
            in_flight: self.in_flight.load(Ordering::SeqCst),
            peak_in_flight: self.peak_in_flight.load(Ordering::SeqCst),
        }
    }
}

pub(crate) struct InFlightGuard<'a> {
    stats: &'a WorkerStats,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.stats.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
