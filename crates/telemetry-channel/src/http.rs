// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP client construction for the ingestion endpoint.
//!
//! The client carries the per-attempt timeout, connection pooling with TCP
//! keep-alive, and an optional HTTPS proxy. An invalid proxy never prevents
//! delivery: the client falls back to a direct connection.

use core::time::Duration;
use std::error::Error;
use tracing::error;

use crate::config::PipelineConfig;

/// Idle pooled connections are closed after this long.
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(270);

const TCP_KEEPALIVE: Duration = Duration::from_secs(120);

/// Builds the client used by [`crate::ingestion::http::HttpIngestion`].
#[must_use]
pub fn get_client(config: &PipelineConfig) -> reqwest::Client {
    match build_client(config, true) {
        Ok(client) => client,
        Err(e) => {
            error!(
                "INGEST | Unable to parse proxy configuration: {}, falling back to direct connection",
                e
            );
            match build_client(config, false) {
                Ok(client) => client,
                Err(inner) => {
                    error!(
                        "INGEST | Failed to build HTTP client without proxy: {}, using reqwest defaults",
                        inner
                    );
                    reqwest::Client::new()
                }
            }
        }
    }
}

fn create_client_builder() -> reqwest::ClientBuilder {
    let builder = reqwest::Client::builder();
    #[cfg(feature = "rustls-tls")]
    let builder = builder.use_rustls_tls();
    builder
}

fn build_client(
    config: &PipelineConfig,
    allow_proxy: bool,
) -> Result<reqwest::Client, Box<dyn Error>> {
    let mut client = create_client_builder()
        .timeout(Duration::from_secs(config.flush_timeout))
        .pool_idle_timeout(Some(POOL_IDLE_TIMEOUT))
        .tcp_keepalive(Some(TCP_KEEPALIVE));

    if allow_proxy {
        if let Some(https_uri) = &config.https_proxy {
            let proxy = reqwest::Proxy::https(https_uri.clone())?;
            client = client.proxy(proxy);
        }
    }

    Ok(client.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_client_with_proxy() {
        let mut config = PipelineConfig::new("https://in.example.com");
        config.https_proxy = Some("http://proxy.internal:3128".to_string());
        assert!(build_client(&config, true).is_ok());
    }

    #[test]
    fn test_invalid_proxy_falls_back_to_direct_connection() {
        let mut config = PipelineConfig::new("https://in.example.com");
        config.https_proxy = Some("http://[::1".to_string());
        assert!(build_client(&config, true).is_err());
        assert!(build_client(&config, false).is_ok());

        // Still yields a usable client.
        let _client = get_client(&config);
    }
}
