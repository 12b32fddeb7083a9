// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// Errors raised by the persistent log store.
///
/// None of these reach producers: channels log them and drop the affected log.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage full: {requested} bytes requested but nothing left to evict under a {quota} byte quota")]
    StorageFull { requested: u64, quota: u64 },

    #[error("log of {size} bytes exceeds the storage quota of {quota} bytes")]
    LogTooLarge { size: u64, quota: u64 },

    #[error("invalid stream name '{0}'")]
    InvalidStream(String),

    #[error("database error: {0}")]
    Db(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage task failed: {0}")]
    Task(String),
}

/// Outcome classification of a single failed delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IngestionError {
    /// Timeouts, connectivity loss, 5xx, 408 and 429. The caller may retry.
    #[error("recoverable ingestion failure ({}): {message}", status_label(.status))]
    Recoverable {
        status: Option<u16>,
        message: String,
    },

    /// Any other rejection. The batch must be dropped.
    #[error("permanent ingestion failure ({}): {message}", status_label(.status))]
    Permanent {
        status: Option<u16>,
        message: String,
    },
}

impl IngestionError {
    pub fn recoverable(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Recoverable {
            status,
            message: message.into(),
        }
    }

    pub fn permanent(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Permanent {
            status,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Recoverable { .. })
    }

    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Recoverable { status, .. } | Self::Permanent { status, .. } => *status,
        }
    }
}

#[allow(clippy::ref_option)]
fn status_label(status: &Option<u16>) -> String {
    status.map_or_else(|| "no response".to_string(), |code| format!("status {code}"))
}

/// Misconfiguration of the pipeline, surfaced synchronously to the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("retry strategy needs at least one interval")]
    EmptyRetryIntervals,

    #[error("invalid retry interval {0:?}")]
    InvalidRetryInterval(Duration),

    #[error("storage quota cannot change once the store has started processing logs")]
    StorageAlreadyStarted,

    #[error("storage quota has already been set")]
    StorageQuotaAlreadySet,

    #[error("storage quota of {requested} bytes is below the minimum of {minimum} bytes")]
    StorageQuotaBelowMinimum { requested: u64, minimum: u64 },

    #[error("invalid log url '{0}'")]
    InvalidLogUrl(String),

    #[error("invalid stream name '{0}'")]
    InvalidStreamName(String),

    #[error("a channel named '{0}' is already registered")]
    DuplicateChannel(String),

    #[error("invalid configuration: {0}")]
    InvalidValue(String),
}

/// A command could not be delivered to a channel task.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("channel '{0}' is closed")]
    Closed(String),
}

/// Errors raised while assembling a pipeline from configuration.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ingestion_error_display() {
        let error = IngestionError::recoverable(Some(503), "service unavailable");
        assert_eq!(
            error.to_string(),
            "recoverable ingestion failure (status 503): service unavailable"
        );

        let error = IngestionError::permanent(None, "invalid header");
        assert_eq!(
            error.to_string(),
            "permanent ingestion failure (no response): invalid header"
        );
    }

    #[test]
    fn test_ingestion_error_classification() {
        assert!(IngestionError::recoverable(Some(429), "slow down").is_recoverable());
        assert!(!IngestionError::permanent(Some(400), "bad request").is_recoverable());
        assert_eq!(IngestionError::permanent(Some(400), "").status(), Some(400));
        assert_eq!(IngestionError::recoverable(None, "").status(), None);
    }

    #[test]
    fn test_configuration_error_display() {
        let error = ConfigurationError::StorageQuotaBelowMinimum {
            requested: 10,
            minimum: 20_480,
        };
        assert_eq!(
            error.to_string(),
            "storage quota of 10 bytes is below the minimum of 20480 bytes"
        );
    }

    #[test]
    fn test_pipeline_error_from_configuration() {
        let error: PipelineError = ConfigurationError::EmptyRetryIntervals.into();
        assert!(matches!(
            error,
            PipelineError::Configuration(ConfigurationError::EmptyRetryIntervals)
        ));
        assert_eq!(error.to_string(), "retry strategy needs at least one interval");
    }
}
