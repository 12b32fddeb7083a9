// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Recording ingestion client and listener shared by the pipeline tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use telemetry_channel::listener::{DropReason, PipelineListener};
use telemetry_channel::{
    ChannelGroup, IngestionClient, IngestionError, Log, LogBatch, LogStore, RetryStrategy,
    RetryingIngestion,
};

/// One call to [`RecordingClient::send`].
#[derive(Debug, Clone)]
pub struct Attempt {
    pub stream: String,
    pub url: String,
    pub numbers: Vec<u64>,
    pub accepted: bool,
}

/// Accepts every batch unless a scripted result is queued.
#[derive(Default)]
pub struct RecordingClient {
    attempts: Mutex<Vec<Attempt>>,
    script: Mutex<VecDeque<Result<(), IngestionError>>>,
    started: AtomicUsize,
    latency: Duration,
}

impl RecordingClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every attempt takes `latency` before answering.
    pub fn with_latency(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            latency,
            ..Self::default()
        })
    }

    pub fn script(&self, results: impl IntoIterator<Item = Result<(), IngestionError>>) {
        self.script.lock().extend(results);
    }

    pub fn attempts(&self) -> Vec<Attempt> {
        self.attempts.lock().clone()
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    /// Accepted batches of `stream`, in delivery order.
    pub fn delivered(&self, stream: &str) -> Vec<Vec<u64>> {
        self.attempts
            .lock()
            .iter()
            .filter(|attempt| attempt.accepted && attempt.stream == stream)
            .map(|attempt| attempt.numbers.clone())
            .collect()
    }

    pub fn delivered_numbers(&self, stream: &str) -> Vec<u64> {
        self.delivered(stream).into_iter().flatten().collect()
    }
}

#[async_trait]
impl IngestionClient for RecordingClient {
    async fn send(&self, batch: &LogBatch, log_url: &str) -> Result<(), IngestionError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let result = self.script.lock().pop_front().unwrap_or(Ok(()));
        self.attempts.lock().push(Attempt {
            stream: batch.stream.clone(),
            url: log_url.to_string(),
            numbers: batch.logs.iter().map(|log| number(&log.decode().unwrap())).collect(),
            accepted: result.is_ok(),
        });
        result
    }
}

#[derive(Default)]
pub struct RecordingListener {
    pub sent: Mutex<Vec<usize>>,
    pub failed: Mutex<Vec<IngestionError>>,
    pub dropped: Mutex<Vec<(String, DropReason)>>,
}

impl PipelineListener for RecordingListener {
    fn on_sent(&self, batch: &LogBatch) {
        self.sent.lock().push(batch.len());
    }

    fn on_failed(&self, _batch: &LogBatch, error: &IngestionError) {
        self.failed.lock().push(error.clone());
    }

    fn on_dropped(&self, stream: &str, reason: &DropReason) {
        self.dropped.lock().push((stream.to_string(), reason.clone()));
    }
}

pub const LOG_URL: &str = "https://in.example.com";

pub fn log(n: u64) -> Log {
    Log::new("event").with_property("n", n)
}

pub fn number(log: &Log) -> u64 {
    log.properties["n"].as_u64().unwrap()
}

pub fn group(client: Arc<RecordingClient>, strategy: RetryStrategy) -> ChannelGroup {
    group_with_store(client, strategy, LogStore::open_temporary().unwrap())
}

pub fn group_at(client: Arc<RecordingClient>, path: &Path) -> ChannelGroup {
    group_with_store(client, RetryStrategy::default(), LogStore::open(path).unwrap())
}

fn group_with_store(
    client: Arc<RecordingClient>,
    strategy: RetryStrategy,
    store: LogStore,
) -> ChannelGroup {
    let ingestion = RetryingIngestion::new(client, strategy).unwrap();
    ChannelGroup::new(store, ingestion, LOG_URL).unwrap()
}

/// Polls `condition` every 10ms for up to a minute of (possibly paused) time.
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..6_000 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
