// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use chrono::{TimeZone, Utc};
use mockito::{Matcher, Server};
use telemetry_channel::{ChannelGroup, Log, PipelineConfig};
use tokio::time::{sleep, timeout};

fn pipeline_config(log_url: String, storage: &std::path::Path) -> PipelineConfig {
    let mut config = PipelineConfig::new(log_url);
    config.app_secret = Some("app-secret".to_string());
    config.storage_path = storage.join("db");
    config.trigger_count = 2;
    config.retry_intervals = vec![Duration::from_millis(50)];
    config
}

async fn wait_until_empty(group: &ChannelGroup, stream: &str) {
    timeout(Duration::from_secs(5), async {
        while group.store().total_count(stream) > 0 {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("logs were not resolved in time");
}

#[tokio::test]
async fn test_group_ships_batches_to_endpoint() {
    let mut server = Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();
    let config = pipeline_config(server.url(), dir.path());
    let group = ChannelGroup::from_config(&config).unwrap();
    let timestamp = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    let logs: Vec<Log> = (0..2)
        .map(|n| Log::new("crash").with_timestamp(timestamp).with_property("n", n))
        .collect();

    let mock = server
        .mock("POST", "/logs")
        .match_query(Matcher::UrlEncoded(
            "api-version".to_string(),
            "1.0.0".to_string(),
        ))
        .match_header("App-Secret", "app-secret")
        .match_header(
            "Install-ID",
            group.store().install_id().to_string().as_str(),
        )
        .match_body(Matcher::Exact(format!(
            "{{\"logs\":[{},{}]}}",
            serde_json::to_string(&logs[0]).unwrap(),
            serde_json::to_string(&logs[1]).unwrap()
        )))
        .with_status(202)
        .expect(1)
        .create_async()
        .await;

    let handle = group
        .add_channel(config.channel_config("crashes"))
        .unwrap();
    for log in logs {
        handle.enqueue(log);
    }
    handle.status().await.unwrap();

    wait_until_empty(&group, "crashes").await;
    mock.assert_async().await;
    group.shutdown().await;
}

#[tokio::test]
async fn test_rejected_batch_is_discarded() {
    let mut server = Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();
    let config = pipeline_config(server.url(), dir.path());
    let group = ChannelGroup::from_config(&config).unwrap();

    let mock = server
        .mock("POST", "/logs")
        .match_query(Matcher::Any)
        .with_status(400)
        .expect(1)
        .create_async()
        .await;

    let handle = group
        .add_channel(config.channel_config("events").with_trigger_count(1))
        .unwrap();
    handle.enqueue(Log::new("event"));
    handle.status().await.unwrap();

    wait_until_empty(&group, "events").await;
    mock.assert_async().await;
    group.shutdown().await;
}

#[tokio::test]
async fn test_compressed_delivery() {
    let mut server = Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();
    let mut config = pipeline_config(server.url(), dir.path());
    config.use_compression = true;
    let group = ChannelGroup::from_config(&config).unwrap();

    let mock = server
        .mock("POST", "/logs")
        .match_query(Matcher::Any)
        .match_header("Content-Encoding", "zstd")
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let handle = group
        .add_channel(config.channel_config("sessions").with_trigger_count(1))
        .unwrap();
    handle.enqueue(Log::new("session_start"));
    handle.status().await.unwrap();

    wait_until_empty(&group, "sessions").await;
    mock.assert_async().await;
    group.shutdown().await;
}

#[test]
fn test_from_config_rejects_invalid_settings() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = pipeline_config("https://in.example.com".to_string(), dir.path());
    config.retry_intervals.clear();
    assert!(ChannelGroup::from_config(&config).is_err());

    let mut config = pipeline_config("https://in.example.com".to_string(), dir.path());
    config.max_storage_size = Some(10);
    assert!(ChannelGroup::from_config(&config).is_err());
}
