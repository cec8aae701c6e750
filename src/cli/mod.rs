// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
pub mod worker;

use anyhow::Result;
use clap::{Parser, Subcommand};

pub use worker::{build_embedder, provision_stream, run_worker, WorkerArgs};

/// Embedding worker for post images
#[derive(Parser, Debug)]
#[command(name = "inspire-embedding-worker")]
#[command(version)]
#[command(about = "Computes post image embeddings from the POSTS stream", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub worker: WorkerArgs,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Provision the stream, then consume and process events (default)
    Run,

    /// Only make sure the stream exists, then exit
    Provision,
}

/// Execute CLI command
pub async fn execute(cli: Cli) -> Result<()> {
    let config = cli.worker.into_config();
    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_worker(config).await,
        Commands::Provision => provision_stream(config).await,
    }
}
