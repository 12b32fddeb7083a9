// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # Telemetry Channel
//!
//! Client-side delivery pipeline for telemetry logs (events, crashes, sessions).
//! Producers hand discrete logs to a per-stream [`channel`]; the pipeline batches
//! them, persists them durably, and ships them to a remote collection endpoint
//! with bounded storage and resilient retry, without blocking the producer.
//!
//! ## Architecture
//!
//! ```text
//!   producer ──enqueue──► Channel ──put──► LogStore (sled, quota, eviction)
//!                            │                 ▲
//!                   trigger  │ get_batch       │ resolve
//!                            ▼                 │
//!                    RetryingIngestion ──send──► IngestionClient (HTTP)
//! ```
//!
//! - [`storage`]: size-capped, crash-durable queue partitioned by stream
//! - [`ingestion`]: single-attempt client, backoff-driven retrying wrapper
//! - [`channel`]: per-stream batching state machine (actor + handle)
//! - [`group`]: owns the shared store and client, broadcasts global state
//!
//! A [`group::ChannelGroup`] is an explicitly constructed value; there is no
//! process-wide singleton.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

/// Per-stream batching and delivery scheduling
pub mod channel;

/// Pipeline configuration from environment variables
pub mod config;

/// Default limits and wire constants
pub mod constants;

/// Credentials resolution for the ingestion endpoint
pub mod credentials;

/// Error taxonomy for storage, ingestion and configuration
pub mod error;

/// Channel group: shared resources and broadcast of global state
pub mod group;

/// HTTP client construction
pub mod http;

/// Single-attempt and retrying ingestion clients
pub mod ingestion;

/// Optional telemetry callback for delivery outcomes and drops
pub mod listener;

/// Log, batch and identifier types
pub mod log;

/// Tracing formatter and subscriber setup
pub mod logger;

/// Persistent, size-bounded log store
pub mod storage;

pub use channel::{ChannelConfig, ChannelHandle, ChannelState, ChannelStatus};
pub use config::PipelineConfig;
pub use error::{
    ChannelError, ConfigurationError, IngestionError, PipelineError, StorageError,
};
pub use group::ChannelGroup;
pub use ingestion::{
    retry::{RetryHandle, RetryStrategy, RetryingIngestion, SendOutcome},
    IngestionClient,
};
pub use listener::{DropReason, PipelineListener};
pub use log::{BatchId, Log, LogBatch, LogId, StoredLog};
pub use storage::{LogStore, Resolution};

/// Crate version reported in diagnostics.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
