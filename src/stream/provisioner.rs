// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use tracing::{debug, info};

use super::{StreamBackend, StreamDescriptor, StreamError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionOutcome {
    Created,
    AlreadyExists,
}

/// Make sure a stream named `descriptor.name` exists.
///
/// An existing stream is left untouched, even if its subjects differ from
/// the descriptor. Backend failures are returned as-is; deciding whether to
/// restart is up to the caller.
pub async fn ensure_stream(
    backend: &dyn StreamBackend,
    descriptor: &StreamDescriptor,
) -> Result<ProvisionOutcome, StreamError> {
    let names = backend.stream_names().await?;

    if names.iter().any(|name| name == &descriptor.name) {
        debug!(stream = %descriptor.name, "Stream already exists");
        return Ok(ProvisionOutcome::AlreadyExists);
    }

    backend.create_stream(descriptor).await?;
    info!(
        stream = %descriptor.name,
        subjects = ?descriptor.subjects,
        "Created durable stream"
    );

    Ok(ProvisionOutcome::Created)
}
