// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Telemetry infrastructure for the retrieval engine.
//!
//! Lightweight metrics collection without external dependencies; enough for a
//! library embedded in an agent process, where a full observability stack is
//! overkill. Call sites are gated on the `telemetry` feature, so disabling it
//! compiles the recording out entirely.
//!
//! Operation names follow a `component.operation` scheme:
//!
//! - `retriever.*` - query and index-build entry points
//! - `store.*` - vector-store operations
//! - `indexer.*` - project walking and per-file parsing

pub mod metrics;

pub use metrics::{Metrics, MetricsSnapshot, OperationMetrics, GLOBAL_METRICS};
