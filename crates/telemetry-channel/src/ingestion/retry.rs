// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Backoff-driven, cancellable delivery of one batch.
//!
//! [`RetryingIngestion::call`] spawns an attempt loop and returns a
//! [`RetryHandle`] right away. The loop sends, and on a recoverable failure
//! waits for the next interval of its [`RetryStrategy`] before trying again.
//! It stops on success, on a permanent failure, when the intervals run out, or
//! when the handle is cancelled. Cancellation is checked before every attempt
//! and interrupts a pending wait, but never aborts a request in progress.
//!
//! Every call gets its own task, so batches of different streams retry
//! independently of each other.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::IngestionClient;
use crate::constants::DEFAULT_RETRY_INTERVALS;
use crate::error::{ConfigurationError, IngestionError};
use crate::log::{BatchId, LogBatch};

/// Waits between delivery attempts of one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryStrategy {
    /// One wait per retry, in order. The batch fails once the list is used up.
    Intervals(Vec<Duration>),
    /// Doubling waits starting at `initial`, capped at `max`. `max_retries`
    /// of `None` retries forever.
    Exponential {
        initial: Duration,
        max: Duration,
        max_retries: Option<usize>,
    },
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::Intervals(DEFAULT_RETRY_INTERVALS.to_vec())
    }
}

impl RetryStrategy {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        match self {
            Self::Intervals(intervals) if intervals.is_empty() => {
                Err(ConfigurationError::EmptyRetryIntervals)
            }
            Self::Intervals(_) => Ok(()),
            Self::Exponential { initial, .. } if initial.is_zero() => {
                Err(ConfigurationError::InvalidRetryInterval(*initial))
            }
            Self::Exponential { initial, max, .. } if max < initial => {
                Err(ConfigurationError::InvalidRetryInterval(*max))
            }
            Self::Exponential { max_retries: Some(0), .. } => {
                Err(ConfigurationError::EmptyRetryIntervals)
            }
            Self::Exponential { .. } => Ok(()),
        }
    }

    /// Wait before retry number `retry` (0-based), `None` once exhausted.
    #[must_use]
    pub fn delay(&self, retry: usize) -> Option<Duration> {
        match self {
            Self::Intervals(intervals) => intervals.get(retry).copied(),
            Self::Exponential {
                initial,
                max,
                max_retries,
            } => {
                if max_retries.is_some_and(|limit| retry >= limit) {
                    return None;
                }
                let factor = u32::try_from(retry)
                    .ok()
                    .and_then(|shift| 1u32.checked_shl(shift))
                    .unwrap_or(u32::MAX);
                Some(initial.checked_mul(factor).map_or(*max, |delay| delay.min(*max)))
            }
        }
    }
}

/// Terminal state of a delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered { attempts: usize },
    /// Permanent failure, or the last allowed attempt failed.
    Failed { attempts: usize, error: IngestionError },
    Cancelled { attempts: usize },
}

impl SendOutcome {
    #[must_use]
    pub fn attempts(&self) -> usize {
        match self {
            Self::Delivered { attempts }
            | Self::Failed { attempts, .. }
            | Self::Cancelled { attempts } => *attempts,
        }
    }

    #[must_use]
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

/// Shares one [`IngestionClient`] and retry strategy across all channels.
#[derive(Clone)]
pub struct RetryingIngestion {
    client: Arc<dyn IngestionClient>,
    strategy: Arc<RetryStrategy>,
}

impl std::fmt::Debug for RetryingIngestion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingIngestion")
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}

impl RetryingIngestion {
    pub fn new(
        client: Arc<dyn IngestionClient>,
        strategy: RetryStrategy,
    ) -> Result<Self, ConfigurationError> {
        strategy.validate()?;
        Ok(Self {
            client,
            strategy: Arc::new(strategy),
        })
    }

    #[must_use]
    pub fn strategy(&self) -> &RetryStrategy {
        &self.strategy
    }

    /// Starts delivering `batch` to `log_url` on a new task.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn call(&self, batch: Arc<LogBatch>, log_url: String) -> RetryHandle {
        let token = CancellationToken::new();
        let batch_id = batch.id;
        let join = tokio::spawn(deliver(
            Arc::clone(&self.client),
            Arc::clone(&self.strategy),
            batch,
            log_url,
            token.clone(),
        ));
        RetryHandle {
            batch_id,
            token,
            join,
        }
    }
}

async fn deliver(
    client: Arc<dyn IngestionClient>,
    strategy: Arc<RetryStrategy>,
    batch: Arc<LogBatch>,
    log_url: String,
    token: CancellationToken,
) -> SendOutcome {
    let mut attempts = 0;
    loop {
        if token.is_cancelled() {
            return SendOutcome::Cancelled { attempts };
        }
        attempts += 1;
        let error = match client.send(&batch, &log_url).await {
            Ok(()) => return SendOutcome::Delivered { attempts },
            Err(error) if error.is_recoverable() => error,
            Err(error) => return SendOutcome::Failed { attempts, error },
        };

        let Some(delay) = strategy.delay(attempts - 1) else {
            warn!(
                "INGEST | giving up on batch {} of stream {} after {attempts} attempts: {error}",
                batch.id, batch.stream
            );
            return SendOutcome::Failed { attempts, error };
        };
        debug!(
            "INGEST | attempt {attempts} for batch {} failed ({error}), retrying in {delay:?}",
            batch.id
        );

        tokio::select! {
            biased;
            () = token.cancelled() => return SendOutcome::Cancelled { attempts },
            () = tokio::time::sleep(delay) => {}
        }
    }
}

/// Handle to an in-progress delivery. Awaiting it yields the [`SendOutcome`].
///
/// Dropping the handle does not stop the delivery; call [`RetryHandle::cancel`].
#[derive(Debug)]
pub struct RetryHandle {
    batch_id: BatchId,
    token: CancellationToken,
    join: JoinHandle<SendOutcome>,
}

impl RetryHandle {
    /// Stops further attempts and interrupts a pending wait.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    #[must_use]
    pub fn batch_id(&self) -> BatchId {
        self.batch_id
    }
}

impl Future for RetryHandle {
    type Output = SendOutcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.join).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(e)) if e.is_cancelled() => {
                Poll::Ready(SendOutcome::Cancelled { attempts: 0 })
            }
            Poll::Ready(Err(e)) => Poll::Ready(SendOutcome::Failed {
                attempts: 0,
                error: IngestionError::permanent(None, format!("delivery task failed: {e}")),
            }),
        }
    }
}
