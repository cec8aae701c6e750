// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use anyhow::Result;
use clap::Parser;
use inspire_embedding_worker::{
    cli::{self, Cli},
    version,
};
use std::env;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    // Initialize tracing subscriber for logging
    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", "info");
    }
    tracing_subscriber::fmt::init();

    tracing::info!("{}", version::get_version_string());

    let cli = Cli::parse();
    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Fatal: {:#}", e);
        return Err(e);
    }

    Ok(())
}
