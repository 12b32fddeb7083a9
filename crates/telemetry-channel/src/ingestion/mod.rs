// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery of batches to the ingestion endpoint.
//!
//! An [`IngestionClient`] makes exactly one attempt and classifies its failure;
//! [`retry::RetryingIngestion`] turns that into a cancellable, backoff-driven
//! delivery running in its own task.

pub mod http;
pub mod retry;

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::error::IngestionError;
use crate::log::LogBatch;

/// Single-attempt delivery of a batch. Implementations must not retry and
/// must not touch storage.
#[async_trait]
pub trait IngestionClient: Send + Sync {
    async fn send(&self, batch: &LogBatch, log_url: &str) -> Result<(), IngestionError>;
}

/// Maps an HTTP response status to the outcome of the attempt.
///
/// 408, 429 and 5xx can be retried; every other non-2xx status is final.
pub fn classify_status(status: StatusCode) -> Result<(), IngestionError> {
    if status.is_success() {
        return Ok(());
    }
    let code = status.as_u16();
    let message = status
        .canonical_reason()
        .unwrap_or("unexpected status")
        .to_string();
    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        Err(IngestionError::recoverable(Some(code), message))
    } else {
        Err(IngestionError::permanent(Some(code), message))
    }
}

/// Maps a transport failure to the outcome of the attempt.
///
/// A request that could not even be built will never succeed; timeouts and
/// connection or body errors may.
pub fn classify_transport_error(error: &reqwest::Error) -> IngestionError {
    let status = error.status().map(|status| status.as_u16());
    if error.is_builder() {
        IngestionError::permanent(status, error.to_string())
    } else {
        IngestionError::recoverable(status, error.to_string())
    }
}
