// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Operational HTTP endpoints served next to the worker

pub mod health;

pub use health::{health_router, serve_health, HealthResponse};
