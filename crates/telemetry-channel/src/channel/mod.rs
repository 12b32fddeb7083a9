// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-stream batching built on the actor pattern.
//!
//! ```text
//!    ┌───────────────┐
//!    │ ChannelHandle │ (Clone, one per producer)
//!    └───────┬───────┘
//!            │ ChannelCommand via unbounded mpsc
//!            v
//!    ┌───────────────┐      put / get_batch / resolve      ┌──────────┐
//!    │ChannelService │ ──────────────────────────────────► │ LogStore │
//!    │  actor task   │                                     └──────────┘
//!    └───────┬───────┘
//!            │ call(batch) -> RetryHandle
//!            v
//!    ┌───────────────────┐
//!    │ RetryingIngestion │
//!    └───────────────────┘
//! ```
//!
//! The service owns all channel state, so triggers, enable/disable, pause and
//! resume are processed in arrival order without locks. `enqueue` never blocks
//! and never fails from the producer's point of view.

pub mod service;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::constants::{DEFAULT_TRIGGER_COUNT, DEFAULT_TRIGGER_INTERVAL};
use crate::error::ChannelError;
use crate::ingestion::retry::RetryingIngestion;
use crate::listener::Listeners;
use crate::log::Log;
use crate::storage::LogStore;

pub use service::ChannelService;

/// Batching triggers of one stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    pub name: String,
    /// Flush as soon as this many logs are pending.
    pub trigger_count: usize,
    /// Flush once the oldest unsent log has waited this long.
    pub trigger_interval: Duration,
}

impl ChannelConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            trigger_count: DEFAULT_TRIGGER_COUNT,
            trigger_interval: DEFAULT_TRIGGER_INTERVAL,
        }
    }

    #[must_use]
    pub fn with_trigger_count(mut self, trigger_count: usize) -> Self {
        self.trigger_count = trigger_count.max(1);
        self
    }

    #[must_use]
    pub fn with_trigger_interval(mut self, trigger_interval: Duration) -> Self {
        self.trigger_interval = trigger_interval;
        self
    }
}

/// Resources shared by every channel of a group.
#[derive(Debug, Clone)]
pub struct ChannelResources {
    pub store: LogStore,
    pub ingestion: RetryingIngestion,
    pub listeners: Listeners,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// No batch outstanding.
    Idle,
    /// Exactly one batch is being delivered.
    Flushing,
}

/// Snapshot returned by [`ChannelHandle::status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelStatus {
    pub name: String,
    pub enabled: bool,
    pub paused: bool,
    pub state: ChannelState,
    /// Persisted logs not part of an outstanding batch.
    pub pending: usize,
}

#[derive(Debug)]
pub enum ChannelCommand {
    Enqueue(Log),
    Flush,
    SetEnabled(bool),
    Pause,
    Resume,
    SetLogUrl(String),
    Status(oneshot::Sender<ChannelStatus>),
    /// Persist what was enqueued before, cancel the in-flight send, then ack.
    Shutdown(oneshot::Sender<()>),
}

/// Cloneable handle to a running [`ChannelService`].
#[derive(Clone, Debug)]
pub struct ChannelHandle {
    name: Arc<str>,
    tx: mpsc::UnboundedSender<ChannelCommand>,
}

impl ChannelHandle {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hands `log` to the channel. Never blocks; a closed channel drops it.
    pub fn enqueue(&self, log: Log) {
        if self.tx.send(ChannelCommand::Enqueue(log)).is_err() {
            debug!("CHANNEL | {} is closed, dropping log", self.name);
        }
    }

    /// Requests an immediate flush. Coalesced with a flush already in progress.
    pub fn flush(&self) -> Result<(), ChannelError> {
        self.send(ChannelCommand::Flush)
    }

    /// Disabling cancels the in-flight batch and deletes every stored log of
    /// the stream. Logs enqueued while disabled are dropped.
    pub fn set_enabled(&self, enabled: bool) -> Result<(), ChannelError> {
        self.send(ChannelCommand::SetEnabled(enabled))
    }

    /// Stops starting new flushes. Logs keep being persisted.
    pub fn pause(&self) -> Result<(), ChannelError> {
        self.send(ChannelCommand::Pause)
    }

    pub fn resume(&self) -> Result<(), ChannelError> {
        self.send(ChannelCommand::Resume)
    }

    /// Endpoint for batches started from now on.
    pub fn set_log_url(&self, log_url: impl Into<String>) -> Result<(), ChannelError> {
        self.send(ChannelCommand::SetLogUrl(log_url.into()))
    }

    pub async fn status(&self) -> Result<ChannelStatus, ChannelError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send(ChannelCommand::Status(response_tx))?;
        response_rx.await.map_err(|_| self.closed())
    }

    /// Waits until every log enqueued before this call is persisted and the
    /// channel task has stopped.
    pub async fn shutdown(&self) -> Result<(), ChannelError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send(ChannelCommand::Shutdown(response_tx))?;
        response_rx.await.map_err(|_| self.closed())
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn send(&self, command: ChannelCommand) -> Result<(), ChannelError> {
        self.tx.send(command).map_err(|_| self.closed())
    }

    fn closed(&self) -> ChannelError {
        ChannelError::Closed(self.name.to_string())
    }
}
