// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

mod input;

use std::env;

use tokio::io::{stdin, AsyncBufReadExt, BufReader};
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, error, info, warn};

use telemetry_channel::{logger, ChannelGroup, ChannelHandle, PipelineConfig, VERSION};

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[tokio::main]
pub async fn main() {
    let log_level = env::var("TELEMETRY_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());
    if logger::init(&log_level).is_err() {
        let _ = logger::init("info");
    }

    let config = match PipelineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("FORWARDER | invalid configuration: {e}");
            return;
        }
    };

    let group = match ChannelGroup::from_config(&config) {
        Ok(group) => group,
        Err(e) => {
            error!("FORWARDER | failed to start pipeline: {e}");
            return;
        }
    };

    if !config.has_credentials() {
        warn!("FORWARDER | no app secret configured, logs are stored but not sent");
        group.on_network_available(false);
    }
    info!(
        "FORWARDER | version {VERSION} forwarding to {} from {}",
        config.log_url,
        config.storage_path.display()
    );

    let mut lines = BufReader::new(stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut forwarded: u64 = 0;
    let interrupted = loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if forward(&group, &config, &line) {
                        forwarded += 1;
                    }
                }
                Ok(None) => break false,
                Err(e) => {
                    error!("FORWARDER | failed to read input: {e}");
                    break false;
                }
            },
            _ = &mut ctrl_c => break true,
        }
    };
    info!("FORWARDER | forwarded {forwarded} logs");

    if !interrupted && group.is_network_available() {
        drain(&group, Duration::from_secs(config.flush_timeout)).await;
    }
    group.shutdown().await;

    let remaining: usize = group
        .store()
        .streams()
        .iter()
        .map(|stream| group.store().total_count(stream))
        .sum();
    if remaining > 0 {
        info!("FORWARDER | {remaining} logs kept for the next run");
    }
}

/// Routes one input line to its stream, creating the channel on first use.
fn forward(group: &ChannelGroup, config: &PipelineConfig, line: &str) -> bool {
    let routed = match input::parse_line(line) {
        Ok(Some(routed)) => routed,
        Ok(None) => return false,
        Err(e) => {
            warn!("FORWARDER | skipping line: {e}");
            return false;
        }
    };

    match channel(group, config, &routed.stream) {
        Some(channel) => {
            channel.enqueue(routed.log);
            true
        }
        None => false,
    }
}

fn channel(group: &ChannelGroup, config: &PipelineConfig, stream: &str) -> Option<ChannelHandle> {
    if let Some(channel) = group.channel(stream) {
        return Some(channel);
    }
    match group.add_channel(config.channel_config(stream)) {
        Ok(channel) => {
            debug!("FORWARDER | opened stream {stream}");
            Some(channel)
        }
        Err(e) => {
            warn!("FORWARDER | cannot open stream: {e}");
            None
        }
    }
}

/// Flushes every channel and waits for the store to empty, up to `limit`.
async fn drain(group: &ChannelGroup, limit: Duration) {
    for name in group.channel_names() {
        if let Some(channel) = group.channel(&name) {
            if let Err(e) = channel.flush() {
                debug!("FORWARDER | {e}");
            }
        }
    }

    let drained = timeout(limit, async {
        // Stored logs include the batches still in flight.
        while group
            .channel_names()
            .iter()
            .any(|name| group.store().total_count(name) > 0)
        {
            sleep(DRAIN_POLL_INTERVAL).await;
        }
    })
    .await;
    if drained.is_err() {
        warn!("FORWARDER | gave up waiting for delivery after {limit:?}");
    }
}
