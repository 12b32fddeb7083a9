// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Default limits for batching, storage and retry, plus wire constants of the
//! ingestion endpoint.
//!
//! # Batching
//!
//! A channel flushes as soon as either `DEFAULT_TRIGGER_COUNT` logs are
//! pending or `DEFAULT_TRIGGER_INTERVAL` has elapsed since the oldest unsent
//! log was stored, whichever comes first. A batch never holds more logs than
//! the channel's trigger count.
//!
//! # Storage
//!
//! The store is capped at `DEFAULT_MAX_STORAGE_SIZE` bytes of serialized log
//! payload across all streams. The quota can be lowered or raised once before
//! the pipeline starts, but never below `MINIMUM_STORAGE_SIZE`.

use std::time::Duration;

/// Logs pending in a stream before a flush is triggered.
pub const DEFAULT_TRIGGER_COUNT: usize = 50;

/// Maximum time the oldest unsent log waits before a flush is triggered.
pub const DEFAULT_TRIGGER_INTERVAL: Duration = Duration::from_secs(3);

/// Default storage quota: 10MB of serialized payload across all streams.
pub const DEFAULT_MAX_STORAGE_SIZE: u64 = 10 * 1_024 * 1_024;

/// Lowest storage quota accepted by `set_max_storage_size`.
pub const MINIMUM_STORAGE_SIZE: u64 = 20 * 1_024;

/// Default backoff sequence between delivery attempts of one batch.
///
/// Four attempts in total: the first immediately, then after 10 seconds,
/// 5 minutes and 20 minutes.
pub const DEFAULT_RETRY_INTERVALS: [Duration; 3] = [
    Duration::from_secs(10),
    Duration::from_secs(5 * 60),
    Duration::from_secs(20 * 60),
];

/// Timeout applied to a single HTTP attempt, in seconds.
pub const DEFAULT_FLUSH_TIMEOUT_SECS: u64 = 30;

/// Path and API version appended to the configured log URL.
pub const LOGS_PATH: &str = "/logs?api-version=1.0.0";

/// Header carrying the application secret.
pub const APP_SECRET_HEADER: &str = "App-Secret";

/// Header carrying the installation identifier.
pub const INSTALL_ID_HEADER: &str = "Install-ID";

/// Longest accepted stream name.
pub const MAX_STREAM_NAME_LEN: usize = 64;
