// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Embedding worker: turns `generate_embeddings` events into
//! `embeddings_updated` events.

pub mod processor;
pub mod pull_loop;
pub mod stats;

pub use processor::{
    Disposition, MessageProcessor, ProcessError, ProcessOutcome, Published, Stage,
};
pub use pull_loop::{PullLoopConfig, PullWorker};
pub use stats::{RejectedCounts, StatsSnapshot, WorkerStats};
