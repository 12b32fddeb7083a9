// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Logs, batches and their identifiers.
//!
//! A [`Log`] is built by a producer and handed to exactly one channel, which
//! serializes it into the store. From then on the pipeline only moves opaque
//! JSON payloads around: a [`LogBatch`] is a FIFO slice of a stream's stored
//! payloads and is spliced into the wire body without re-parsing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// A discrete telemetry record (event, crash, session start, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Log {
    /// Log kind, e.g. `event` or `managedError`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
    /// Stable identifier, set for logs that can be referenced (crashes, attachments).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    /// Session the log belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<Uuid>,
    /// Producer supplied fields.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,
}

impl Log {
    /// Creates a log of the given kind stamped with the current time.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            timestamp: Utc::now(),
            id: None,
            sid: None,
            properties: Map::new(),
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    #[must_use]
    pub fn with_session(mut self, sid: Uuid) -> Self {
        self.sid = Some(sid);
        self
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// Insertion sequence number assigned by the store.
///
/// Sequence numbers are globally monotonic, hence monotonic within a stream,
/// and define both FIFO delivery order and eviction order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LogId(pub u64);

impl LogId {
    /// Big-endian key so that the store's lexicographic order is sequence order.
    pub(crate) fn to_key(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    pub(crate) fn from_key(key: &[u8]) -> Option<Self> {
        let bytes: [u8; 8] = key.try_into().ok()?;
        Some(Self(u64::from_be_bytes(bytes)))
    }
}

impl fmt::Display for LogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier assigned to a batch when it is pulled from storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchId(pub Uuid);

impl BatchId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A log as persisted: its sequence number and serialized payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredLog {
    pub id: LogId,
    pub payload: Vec<u8>,
}

impl StoredLog {
    /// Deserializes the payload back into a [`Log`].
    pub fn decode(&self) -> Result<Log, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }
}

/// An ordered group of logs from one stream, the unit of transmission and retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogBatch {
    pub id: BatchId,
    pub stream: String,
    pub logs: Vec<StoredLog>,
}

impl LogBatch {
    #[must_use]
    pub fn len(&self) -> usize {
        self.logs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }

    /// Sum of the serialized payload sizes.
    #[must_use]
    pub fn payload_size(&self) -> u64 {
        self.logs.iter().map(|log| log.payload.len() as u64).sum()
    }

    /// Builds the wire body `{"logs":[...]}`, keeping insertion order.
    #[must_use]
    pub fn to_body(&self) -> Vec<u8> {
        const PREFIX: &[u8] = b"{\"logs\":[";
        const SUFFIX: &[u8] = b"]}";

        let capacity = PREFIX.len()
            + SUFFIX.len()
            + self.logs.len().saturating_sub(1)
            + usize::try_from(self.payload_size()).unwrap_or_default();
        let mut body = Vec::with_capacity(capacity);
        body.extend_from_slice(PREFIX);
        for (i, log) in self.logs.iter().enumerate() {
            if i > 0 {
                body.push(b',');
            }
            body.extend_from_slice(&log.payload);
        }
        body.extend_from_slice(SUFFIX);
        body
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stored(id: u64, log: &Log) -> StoredLog {
        StoredLog {
            id: LogId(id),
            payload: serde_json::to_vec(log).unwrap(),
        }
    }

    #[test]
    fn test_log_serializes_kind_as_type() {
        let log = Log::new("event").with_property("name", "click");
        let value = serde_json::to_value(&log).unwrap();

        assert_eq!(value["type"], "event");
        assert_eq!(value["properties"]["name"], "click");
        assert!(value.get("id").is_none());
        assert!(value.get("sid").is_none());
    }

    #[test]
    fn test_log_id_key_preserves_order() {
        let mut keys = vec![LogId(256).to_key(), LogId(1).to_key(), LogId(255).to_key()];
        keys.sort_unstable();
        let ids: Vec<_> = keys.iter().filter_map(|k| LogId::from_key(k)).collect();
        assert_eq!(ids, vec![LogId(1), LogId(255), LogId(256)]);
        assert_eq!(LogId::from_key(b"short"), None);
    }

    #[test]
    fn test_batch_body_is_json_array_in_order() {
        let first = Log::new("event").with_property("n", 1);
        let second = Log::new("event").with_property("n", 2);
        let batch = LogBatch {
            id: BatchId::new(),
            stream: "analytics".to_string(),
            logs: vec![stored(1, &first), stored(2, &second)],
        };

        let body: serde_json::Value = serde_json::from_slice(&batch.to_body()).unwrap();
        assert_eq!(body["logs"].as_array().unwrap().len(), 2);
        assert_eq!(body["logs"][0]["properties"], json!({"n": 1}));
        assert_eq!(body["logs"][1]["properties"], json!({"n": 2}));
    }

    #[test]
    fn test_empty_batch_body() {
        let batch = LogBatch {
            id: BatchId::new(),
            stream: "crashes".to_string(),
            logs: Vec::new(),
        };
        assert!(batch.is_empty());
        assert_eq!(batch.to_body(), b"{\"logs\":[]}".to_vec());
    }

    #[test]
    fn test_stored_log_decode() {
        let id = Uuid::new_v4();
        let log = Log::new("managedError").with_id(id);
        let decoded = stored(7, &log).decode().unwrap();
        assert_eq!(decoded, log);
    }
}
