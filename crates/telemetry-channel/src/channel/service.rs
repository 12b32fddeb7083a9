// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use super::{
    ChannelCommand, ChannelConfig, ChannelHandle, ChannelResources, ChannelState, ChannelStatus,
};
use crate::error::StorageError;
use crate::ingestion::retry::{RetryHandle, RetryingIngestion, SendOutcome};
use crate::listener::{DropReason, Listeners};
use crate::log::{Log, LogBatch};
use crate::storage::{LogStore, Resolution};

struct InFlight {
    batch: Arc<LogBatch>,
    handle: RetryHandle,
}

/// Task owning the state of one stream. Spawn [`ChannelService::run`].
pub struct ChannelService {
    config: ChannelConfig,
    store: LogStore,
    ingestion: RetryingIngestion,
    listeners: Listeners,
    log_url: String,
    enabled: bool,
    paused: bool,
    in_flight: Option<InFlight>,
    /// Interval trigger, armed while unsent logs are waiting.
    deadline: Option<Instant>,
    /// A trigger fired while a flush could not start.
    flush_requested: bool,
    rx: mpsc::UnboundedReceiver<ChannelCommand>,
}

impl ChannelService {
    /// Returns the service (to be spawned) and its handle.
    #[must_use]
    pub fn new(
        config: ChannelConfig,
        resources: ChannelResources,
        log_url: impl Into<String>,
    ) -> (Self, ChannelHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = ChannelHandle {
            name: Arc::from(config.name.as_str()),
            tx,
        };
        let service = Self {
            config,
            store: resources.store,
            ingestion: resources.ingestion,
            listeners: resources.listeners,
            log_url: log_url.into(),
            enabled: true,
            paused: false,
            in_flight: None,
            deadline: None,
            flush_requested: false,
            rx,
        };
        (service, handle)
    }

    /// Initial enabled and paused flags, applied before the first command.
    #[must_use]
    pub fn with_state(mut self, enabled: bool, paused: bool) -> Self {
        self.enabled = enabled;
        self.paused = paused;
        self
    }

    pub async fn run(mut self) {
        debug!("CHANNEL | {} started", self.config.name);
        // Logs persisted by a previous run are scheduled like fresh ones.
        self.check_pending_logs().await;

        loop {
            let timer_armed = self.deadline.is_some() && self.can_flush();
            let deadline = self.deadline.unwrap_or_else(Instant::now);

            tokio::select! {
                command = self.rx.recv() => match command {
                    Some(ChannelCommand::Shutdown(ack)) => {
                        self.stop().await;
                        let _ = ack.send(());
                        break;
                    }
                    Some(command) => self.handle(command).await,
                    None => {
                        self.stop().await;
                        break;
                    }
                },
                outcome = wait_in_flight(&mut self.in_flight), if self.in_flight.is_some() => {
                    self.on_outcome(outcome).await;
                }
                () = tokio::time::sleep_until(deadline), if timer_armed => {
                    self.deadline = None;
                    self.trigger_flush().await;
                }
            }
        }
        debug!("CHANNEL | {} stopped", self.config.name);
    }

    async fn handle(&mut self, command: ChannelCommand) {
        match command {
            ChannelCommand::Enqueue(log) => self.enqueue(log).await,
            ChannelCommand::Flush => self.trigger_flush().await,
            ChannelCommand::SetEnabled(enabled) => self.set_enabled(enabled).await,
            ChannelCommand::Pause => {
                self.paused = true;
            }
            ChannelCommand::Resume => {
                self.paused = false;
                if self.in_flight.is_none() && std::mem::take(&mut self.flush_requested) {
                    self.flush().await;
                } else {
                    self.check_pending_logs().await;
                }
            }
            ChannelCommand::SetLogUrl(log_url) => {
                self.log_url = log_url;
            }
            ChannelCommand::Status(response) => {
                let _ = response.send(self.status());
            }
            // Handled by the run loop.
            ChannelCommand::Shutdown(_) => {}
        }
    }

    fn status(&self) -> ChannelStatus {
        ChannelStatus {
            name: self.config.name.clone(),
            enabled: self.enabled,
            paused: self.paused,
            state: if self.in_flight.is_some() {
                ChannelState::Flushing
            } else {
                ChannelState::Idle
            },
            pending: self.store.pending_count(&self.config.name),
        }
    }

    fn can_flush(&self) -> bool {
        self.enabled && !self.paused
    }

    async fn enqueue(&mut self, log: Log) {
        let stream = self.config.name.clone();
        if !self.enabled {
            debug!("CHANNEL | {stream} is disabled, dropping log");
            self.listeners
                .notify(|listener| listener.on_dropped(&stream, &DropReason::Disabled));
            return;
        }

        let name = stream.clone();
        match self.blocking(move |store| store.put(&name, &log)).await {
            Ok(stored) => {
                for evicted in stored.evicted {
                    self.listeners.notify(|listener| {
                        listener.on_dropped(&evicted.stream, &DropReason::Evicted(evicted.id));
                    });
                }
                self.check_pending_logs().await;
            }
            Err(e) => {
                error!("CHANNEL | {stream} failed to persist log: {e}");
                let reason = DropReason::Storage(e.to_string());
                self.listeners
                    .notify(|listener| listener.on_dropped(&stream, &reason));
            }
        }
    }

    async fn set_enabled(&mut self, enabled: bool) {
        if self.enabled == enabled {
            return;
        }
        self.enabled = enabled;
        if enabled {
            debug!("CHANNEL | {} enabled", self.config.name);
            self.check_pending_logs().await;
            return;
        }

        if let Some(in_flight) = self.in_flight.take() {
            in_flight.handle.cancel();
        }
        self.deadline = None;
        self.flush_requested = false;

        let name = self.config.name.clone();
        match self.blocking(move |store| store.clear(&name)).await {
            Ok(removed) => debug!(
                "CHANNEL | {} disabled, deleted {removed} stored logs",
                self.config.name
            ),
            Err(e) => error!("CHANNEL | {} failed to clear stream: {e}", self.config.name),
        }
    }

    /// Count trigger, and arms the interval trigger for waiting logs.
    async fn check_pending_logs(&mut self) {
        if !self.enabled {
            return;
        }
        let pending = self.store.pending_count(&self.config.name);
        if pending == 0 {
            self.deadline = None;
            return;
        }
        if pending >= self.config.trigger_count {
            self.trigger_flush().await;
        } else {
            self.arm_timer();
        }
    }

    fn arm_timer(&mut self) {
        if self.deadline.is_none() && self.store.pending_count(&self.config.name) > 0 {
            self.deadline = Some(Instant::now() + self.config.trigger_interval);
        }
    }

    /// Flushes now, or once the outstanding batch resolves or the channel resumes.
    async fn trigger_flush(&mut self) {
        if !self.enabled {
            return;
        }
        if self.paused || self.in_flight.is_some() {
            self.flush_requested = true;
            return;
        }
        self.flush().await;
    }

    async fn flush(&mut self) {
        if !self.can_flush() || self.in_flight.is_some() {
            return;
        }
        self.deadline = None;

        let name = self.config.name.clone();
        let max_count = self.config.trigger_count;
        let batch = match self
            .blocking(move |store| store.get_batch(&name, max_count))
            .await
        {
            Ok(Some(batch)) => Arc::new(batch),
            Ok(None) => return,
            Err(e) => {
                error!("CHANNEL | {} failed to read batch: {e}", self.config.name);
                self.arm_timer();
                return;
            }
        };

        debug!(
            "CHANNEL | {} sending batch {} of {} logs",
            self.config.name,
            batch.id,
            batch.len()
        );
        self.listeners.notify(|listener| listener.on_sending(&batch));
        let handle = self.ingestion.call(Arc::clone(&batch), self.log_url.clone());
        self.in_flight = Some(InFlight { batch, handle });
    }

    async fn on_outcome(&mut self, outcome: SendOutcome) {
        let Some(InFlight { batch, .. }) = self.in_flight.take() else {
            return;
        };

        match outcome {
            SendOutcome::Delivered { attempts } => {
                self.resolve(&batch, Resolution::Delivered).await;
                debug!(
                    "CHANNEL | {} delivered batch {} after {attempts} attempts",
                    self.config.name, batch.id
                );
                self.listeners.notify(|listener| listener.on_sent(&batch));
                if self.can_flush() && std::mem::take(&mut self.flush_requested) {
                    self.flush().await;
                }
                self.check_pending_logs().await;
            }
            SendOutcome::Failed { attempts, error } => {
                self.resolve(&batch, Resolution::Rejected).await;
                error!(
                    "CHANNEL | {} dropped batch {} of {} logs after {attempts} attempts: {error}",
                    self.config.name,
                    batch.id,
                    batch.len()
                );
                self.listeners
                    .notify(|listener| listener.on_failed(&batch, &error));
                self.flush_requested = false;
                self.arm_timer();
            }
            SendOutcome::Cancelled { .. } => {
                self.resolve(&batch, Resolution::Retry).await;
                self.arm_timer();
            }
        }
    }

    async fn resolve(&self, batch: &LogBatch, resolution: Resolution) {
        let batch_id = batch.id;
        if let Err(e) = self
            .blocking(move |store| store.resolve(batch_id, resolution))
            .await
        {
            error!(
                "CHANNEL | {} failed to resolve batch {batch_id}: {e}",
                self.config.name
            );
        }
    }

    /// Every enqueue before the shutdown has already been persisted by the
    /// time this runs. The outstanding send is abandoned and its logs stay.
    async fn stop(&mut self) {
        if let Some(InFlight { batch, handle }) = self.in_flight.take() {
            handle.cancel();
            self.resolve(&batch, Resolution::Retry).await;
        }
        if let Err(e) = self.blocking(LogStore::flush).await {
            warn!("CHANNEL | {} failed to flush store: {e}", self.config.name);
        }
    }

    async fn blocking<T, F>(&self, operation: F) -> Result<T, StorageError>
    where
        F: FnOnce(&LogStore) -> Result<T, StorageError> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || operation(&store))
            .await
            .map_err(|e| StorageError::Task(e.to_string()))?
    }
}

async fn wait_in_flight(in_flight: &mut Option<InFlight>) -> SendOutcome {
    match in_flight {
        Some(in_flight) => (&mut in_flight.handle).await,
        None => std::future::pending().await,
    }
}
