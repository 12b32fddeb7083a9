// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Pipeline configuration.
//!
//! Values come from `TELEMETRY_*` environment variables layered over the
//! defaults in [`crate::constants`]. Numeric values that fail to parse fall
//! back to their default; structural problems (missing log URL, empty retry
//! list, quota below the floor) are rejected by [`PipelineConfig::validate`].

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::channel::ChannelConfig;
use crate::constants;
use crate::credentials::Credentials;
use crate::error::ConfigurationError;
use crate::ingestion::retry::RetryStrategy;

const DEFAULT_STORAGE_PATH: &str = "./telemetry-logs";
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Secret sent in the `App-Secret` header.
    pub app_secret: Option<String>,
    /// File holding the secret, re-read whenever the endpoint rejects it.
    /// Ignored when `app_secret` is set.
    pub app_secret_file: Option<PathBuf>,
    /// Base URL of the ingestion endpoint.
    pub log_url: String,
    /// Directory holding the log database.
    pub storage_path: PathBuf,
    /// Storage quota in bytes; `None` keeps the built-in default.
    pub max_storage_size: Option<u64>,
    pub retry_intervals: Vec<Duration>,
    /// Timeout of a single HTTP attempt, in seconds.
    pub flush_timeout: u64,
    pub use_compression: bool,
    pub compression_level: i32,
    pub https_proxy: Option<String>,
    pub log_level: String,
    pub trigger_count: usize,
    pub trigger_interval: Duration,
}

impl PipelineConfig {
    /// Default configuration delivering to `log_url`.
    pub fn new(log_url: impl Into<String>) -> Self {
        Self {
            app_secret: None,
            app_secret_file: None,
            log_url: log_url.into(),
            storage_path: PathBuf::from(DEFAULT_STORAGE_PATH),
            max_storage_size: None,
            retry_intervals: constants::DEFAULT_RETRY_INTERVALS.to_vec(),
            flush_timeout: constants::DEFAULT_FLUSH_TIMEOUT_SECS,
            use_compression: false,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            https_proxy: None,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            trigger_count: constants::DEFAULT_TRIGGER_COUNT,
            trigger_interval: constants::DEFAULT_TRIGGER_INTERVAL,
        }
    }

    /// Loads and validates the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigurationError> {
        let log_url = env::var("TELEMETRY_LOG_URL")
            .map(|url| url.trim().to_string())
            .map_err(|_| {
                ConfigurationError::InvalidValue(
                    "TELEMETRY_LOG_URL environment variable is not set".to_string(),
                )
            })?;

        let mut config = Self::new(log_url);

        config.app_secret = non_empty_var("TELEMETRY_APP_SECRET");
        config.app_secret_file = non_empty_var("TELEMETRY_APP_SECRET_FILE").map(PathBuf::from);
        if let Some(path) = non_empty_var("TELEMETRY_STORAGE_PATH") {
            config.storage_path = PathBuf::from(path);
        }
        config.max_storage_size = parsed_var("TELEMETRY_MAX_STORAGE_SIZE");
        if let Ok(intervals) = env::var("TELEMETRY_RETRY_INTERVALS") {
            config.retry_intervals = parse_retry_intervals(&intervals)?;
        }
        config.flush_timeout = parsed_var("TELEMETRY_FLUSH_TIMEOUT")
            .filter(|timeout| *timeout > 0)
            .unwrap_or(constants::DEFAULT_FLUSH_TIMEOUT_SECS);
        config.use_compression = non_empty_var("TELEMETRY_USE_COMPRESSION")
            .is_some_and(|value| parse_bool(&value));
        config.compression_level =
            parsed_var("TELEMETRY_COMPRESSION_LEVEL").unwrap_or(DEFAULT_COMPRESSION_LEVEL);
        config.https_proxy =
            non_empty_var("TELEMETRY_PROXY_HTTPS").or_else(|| non_empty_var("HTTPS_PROXY"));
        if let Some(level) = non_empty_var("TELEMETRY_LOG_LEVEL") {
            config.log_level = level.to_lowercase();
        }
        if let Some(count) = parsed_var("TELEMETRY_TRIGGER_COUNT") {
            config.trigger_count = count;
        }
        if let Some(millis) = parsed_var("TELEMETRY_TRIGGER_INTERVAL_MS") {
            config.trigger_interval = Duration::from_millis(millis);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        validate_log_url(&self.log_url)?;
        if self.retry_intervals.is_empty() {
            return Err(ConfigurationError::EmptyRetryIntervals);
        }
        if self.trigger_count == 0 {
            return Err(ConfigurationError::InvalidValue(
                "trigger count must be at least 1".to_string(),
            ));
        }
        if tracing::Level::from_str(&self.log_level).is_err() {
            return Err(ConfigurationError::InvalidValue(format!(
                "unknown log level '{}'",
                self.log_level
            )));
        }
        if let Some(quota) = self.max_storage_size {
            if quota < constants::MINIMUM_STORAGE_SIZE {
                return Err(ConfigurationError::StorageQuotaBelowMinimum {
                    requested: quota,
                    minimum: constants::MINIMUM_STORAGE_SIZE,
                });
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn has_credentials(&self) -> bool {
        self.app_secret.is_some() || self.app_secret_file.is_some()
    }

    /// Secret source for the ingestion client. Without any configured
    /// secret requests carry an empty one.
    #[must_use]
    pub fn credentials(&self) -> Credentials {
        match (&self.app_secret, &self.app_secret_file) {
            (Some(secret), _) => Credentials::from_static_secret(secret),
            (None, Some(path)) => Credentials::from_file(path),
            (None, None) => Credentials::from_static_secret(""),
        }
    }

    #[must_use]
    pub fn retry_strategy(&self) -> RetryStrategy {
        RetryStrategy::Intervals(self.retry_intervals.clone())
    }

    /// Channel settings for `name` using the configured triggers.
    #[must_use]
    pub fn channel_config(&self, name: impl Into<String>) -> ChannelConfig {
        ChannelConfig::new(name)
            .with_trigger_count(self.trigger_count)
            .with_trigger_interval(self.trigger_interval)
    }
}

/// Accepts absolute `http` and `https` URLs.
pub(crate) fn validate_log_url(url: &str) -> Result<(), ConfigurationError> {
    match reqwest::Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") && parsed.has_host() => Ok(()),
        _ => Err(ConfigurationError::InvalidLogUrl(url.to_string())),
    }
}

/// Parses a comma separated list of whole seconds, e.g. `10,300,1200`.
pub(crate) fn parse_retry_intervals(value: &str) -> Result<Vec<Duration>, ConfigurationError> {
    let mut intervals = Vec::new();
    for part in value.split(',').map(str::trim).filter(|part| !part.is_empty()) {
        let secs = part.parse::<u64>().map_err(|_| {
            ConfigurationError::InvalidValue(format!("invalid retry interval '{part}'"))
        })?;
        intervals.push(Duration::from_secs(secs));
    }
    if intervals.is_empty() {
        return Err(ConfigurationError::EmptyRetryIntervals);
    }
    Ok(intervals)
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parsed_var<T: FromStr>(key: &str) -> Option<T> {
    non_empty_var(key).and_then(|value| value.parse::<T>().ok())
}
