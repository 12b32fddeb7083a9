// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::error::Error;
use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::StatusCode;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;
use zstd::stream::write::Encoder;

use super::{classify_status, classify_transport_error, IngestionClient};
use crate::config::PipelineConfig;
use crate::constants::{APP_SECRET_HEADER, INSTALL_ID_HEADER, LOGS_PATH};
use crate::credentials::Credentials;
use crate::error::IngestionError;
use crate::log::LogBatch;

/// Ingestion over HTTP: one POST of `{"logs":[...]}` per attempt.
#[derive(Debug, Clone)]
pub struct HttpIngestion {
    client: reqwest::Client,
    credentials: Arc<Credentials>,
    install_id: Uuid,
    /// zstd level, `None` sends the body uncompressed.
    compression_level: Option<i32>,
}

impl HttpIngestion {
    pub fn new(
        client: reqwest::Client,
        credentials: Arc<Credentials>,
        install_id: Uuid,
    ) -> Self {
        Self {
            client,
            credentials,
            install_id,
            compression_level: None,
        }
    }

    /// Builds the client from configuration. The install id comes from the store.
    pub fn from_config(
        config: &PipelineConfig,
        credentials: Arc<Credentials>,
        install_id: Uuid,
    ) -> Self {
        let ingestion = Self::new(crate::http::get_client(config), credentials, install_id);
        if config.use_compression {
            ingestion.with_compression(config.compression_level)
        } else {
            ingestion
        }
    }

    #[must_use]
    pub fn with_compression(mut self, level: i32) -> Self {
        self.compression_level = Some(level);
        self
    }

    async fn headers(&self) -> Result<HeaderMap, IngestionError> {
        let invalid = |e: reqwest::header::InvalidHeaderValue| {
            IngestionError::permanent(None, format!("invalid header value: {e}"))
        };

        let secret = self
            .credentials
            .app_secret()
            .await
            .ok_or_else(|| IngestionError::recoverable(None, "app secret is not available"))?;

        let mut headers = HeaderMap::new();
        headers.insert(
            APP_SECRET_HEADER,
            HeaderValue::from_str(&secret).map_err(invalid)?,
        );
        headers.insert(
            INSTALL_ID_HEADER,
            HeaderValue::from_str(&self.install_id.to_string()).map_err(invalid)?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if self.compression_level.is_some() {
            headers.insert(CONTENT_ENCODING, HeaderValue::from_static("zstd"));
        }
        Ok(headers)
    }

    fn encode(&self, body: Vec<u8>) -> Result<Vec<u8>, IngestionError> {
        let Some(level) = self.compression_level else {
            return Ok(body);
        };
        compress(&body, level)
            .map_err(|e| IngestionError::permanent(None, format!("failed to compress batch: {e}")))
    }
}

fn compress(data: &[u8], level: i32) -> Result<Vec<u8>, Box<dyn Error>> {
    let mut encoder = Encoder::new(Vec::new(), level)?;
    encoder.write_all(data)?;
    encoder.finish().map_err(|e| Box::new(e) as Box<dyn Error>)
}

/// Endpoint receiving the batches for `log_url`.
#[must_use]
pub fn logs_endpoint(log_url: &str) -> String {
    format!("{}{LOGS_PATH}", log_url.trim_end_matches('/'))
}

#[async_trait]
impl IngestionClient for HttpIngestion {
    async fn send(&self, batch: &LogBatch, log_url: &str) -> Result<(), IngestionError> {
        let headers = self.headers().await?;
        let body = self.encode(batch.to_body())?;
        let time = Instant::now();

        let response = self
            .client
            .post(logs_endpoint(log_url))
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| classify_transport_error(&e))?;

        debug!(
            "INGEST | batch {} of stream {} answered {} after {} ms",
            batch.id,
            batch.stream,
            response.status(),
            time.elapsed().as_millis()
        );

        let status = response.status();
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN)
            && self.credentials.invalidate().await
        {
            return Err(IngestionError::recoverable(
                Some(status.as_u16()),
                "app secret rejected",
            ));
        }
        classify_status(status)
    }
}
