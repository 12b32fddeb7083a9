// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Coordination of the channels of one pipeline.
//!
//! A [`ChannelGroup`] owns the resources every channel shares (the
//! [`LogStore`], the [`RetryingIngestion`] client and the listeners) and
//! broadcasts process-wide state to its members: enabled, network
//! availability and the ingestion URL. Channels added later inherit the
//! current state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::RwLock;
use tracing::{debug, error, info};

use crate::channel::{ChannelConfig, ChannelHandle, ChannelResources, ChannelService};
use crate::config::{validate_log_url, PipelineConfig};
use crate::error::{ChannelError, ConfigurationError, PipelineError};
use crate::ingestion::http::HttpIngestion;
use crate::ingestion::retry::RetryingIngestion;
use crate::listener::{Listeners, PipelineListener};
use crate::storage::{is_valid_stream_name, LogStore};

#[derive(Debug)]
pub struct ChannelGroup {
    store: LogStore,
    ingestion: RetryingIngestion,
    listeners: Listeners,
    log_url: RwLock<String>,
    enabled: AtomicBool,
    network_available: AtomicBool,
    /// Also serialises membership changes with state broadcasts.
    channels: RwLock<HashMap<String, ChannelHandle>>,
}

impl ChannelGroup {
    pub fn new(
        store: LogStore,
        ingestion: RetryingIngestion,
        log_url: impl Into<String>,
    ) -> Result<Self, ConfigurationError> {
        let log_url = log_url.into();
        validate_log_url(&log_url)?;
        Ok(Self {
            store,
            ingestion,
            listeners: Listeners::default(),
            log_url: RwLock::new(log_url),
            enabled: AtomicBool::new(true),
            network_available: AtomicBool::new(true),
            channels: RwLock::new(HashMap::new()),
        })
    }

    /// Opens the store and builds the HTTP client described by `config`.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;

        let store = LogStore::open(&config.storage_path)?;
        if let Some(max_storage_size) = config.max_storage_size {
            if !store.set_max_storage_size(max_storage_size)? {
                info!("GROUP | persisted logs were evicted to fit {max_storage_size} bytes");
            }
        }

        let credentials = Arc::new(config.credentials());
        let client = HttpIngestion::from_config(config, credentials, store.install_id());
        let ingestion = RetryingIngestion::new(Arc::new(client), config.retry_strategy())?;

        Ok(Self::new(store, ingestion, config.log_url.clone())?)
    }

    /// Starts a channel for `config.name` on the current tokio runtime.
    pub fn add_channel(&self, config: ChannelConfig) -> Result<ChannelHandle, ConfigurationError> {
        if !is_valid_stream_name(&config.name) {
            return Err(ConfigurationError::InvalidStreamName(config.name));
        }

        let mut channels = self.channels.write();
        if channels.contains_key(&config.name) {
            return Err(ConfigurationError::DuplicateChannel(config.name));
        }

        let name = config.name.clone();
        let resources = ChannelResources {
            store: self.store.clone(),
            ingestion: self.ingestion.clone(),
            listeners: self.listeners.clone(),
        };
        let (service, handle) = ChannelService::new(config, resources, self.log_url());
        let service = service.with_state(self.is_enabled(), !self.is_network_available());
        tokio::spawn(service.run());

        debug!("GROUP | added channel {name}");
        channels.insert(name, handle.clone());
        Ok(handle)
    }

    #[must_use]
    pub fn channel(&self, name: &str) -> Option<ChannelHandle> {
        self.channels.read().get(name).cloned()
    }

    #[must_use]
    pub fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Stops the channel. Its persisted logs stay in the store.
    pub async fn remove_channel(&self, name: &str) -> bool {
        let Some(handle) = self.channels.write().remove(name) else {
            return false;
        };
        if let Err(e) = handle.shutdown().await {
            debug!("GROUP | {e}");
        }
        true
    }

    pub fn add_listener(&self, listener: Arc<dyn PipelineListener>) {
        self.listeners.add(listener);
    }

    /// Disabling deletes the stored logs of every channel.
    pub fn set_enabled(&self, enabled: bool) {
        let channels = self.channels.read();
        if self.enabled.swap(enabled, Ordering::SeqCst) == enabled {
            return;
        }
        info!("GROUP | pipeline {}", if enabled { "enabled" } else { "disabled" });
        broadcast(&channels, |channel| channel.set_enabled(enabled));
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Pauses every channel while the network is down.
    pub fn on_network_available(&self, available: bool) {
        let channels = self.channels.read();
        if self.network_available.swap(available, Ordering::SeqCst) == available {
            return;
        }
        debug!("GROUP | network available: {available}");
        if available {
            broadcast(&channels, ChannelHandle::resume);
        } else {
            broadcast(&channels, ChannelHandle::pause);
        }
    }

    #[must_use]
    pub fn is_network_available(&self) -> bool {
        self.network_available.load(Ordering::SeqCst)
    }

    /// Applies to batches started after the call.
    pub fn set_log_url(&self, log_url: impl Into<String>) -> Result<(), ConfigurationError> {
        let log_url = log_url.into();
        validate_log_url(&log_url)?;

        let channels = self.channels.read();
        *self.log_url.write() = log_url.clone();
        broadcast(&channels, |channel| channel.set_log_url(log_url.clone()));
        Ok(())
    }

    #[must_use]
    pub fn log_url(&self) -> String {
        self.log_url.read().clone()
    }

    /// Quota of the shared store; see [`LogStore::set_max_storage_size`].
    pub fn set_max_storage_size(&self, bytes: u64) -> Result<bool, ConfigurationError> {
        self.store.set_max_storage_size(bytes)
    }

    #[must_use]
    pub fn store(&self) -> &LogStore {
        &self.store
    }

    /// Stops every channel once the logs enqueued so far are persisted.
    /// In-flight sends are abandoned and resume on the next start.
    pub async fn shutdown(&self) {
        let handles: Vec<ChannelHandle> = self.channels.write().drain().map(|(_, h)| h).collect();
        let results = join_all(handles.iter().map(|handle| handle.shutdown())).await;
        for result in results {
            if let Err(e) = result {
                debug!("GROUP | {e}");
            }
        }

        let store = self.store.clone();
        match tokio::task::spawn_blocking(move || store.flush()).await {
            Ok(Ok(())) => debug!("GROUP | shut down {} channels", handles.len()),
            Ok(Err(e)) => error!("GROUP | failed to flush store: {e}"),
            Err(e) => error!("GROUP | failed to flush store: {e}"),
        }
    }
}

fn broadcast(
    channels: &HashMap<String, ChannelHandle>,
    command: impl Fn(&ChannelHandle) -> Result<(), ChannelError>,
) {
    for channel in channels.values() {
        if let Err(e) = command(channel) {
            debug!("GROUP | {e}");
        }
    }
}
