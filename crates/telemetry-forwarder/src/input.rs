// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! One log per input line: `{"stream":"crashes","type":"managedError",...}`.
//!
//! `timestamp` defaults to the time the line was read; `id`, `sid` and
//! `properties` are optional.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use telemetry_channel::Log;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("malformed log line: {0}")]
    Json(#[from] serde_json::Error),

    #[error("log line has an empty stream")]
    EmptyStream,
}

#[derive(Deserialize)]
struct Line {
    stream: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    id: Option<Uuid>,
    #[serde(default)]
    sid: Option<Uuid>,
    #[serde(default)]
    properties: Map<String, Value>,
}

/// A parsed line and the stream it is routed to.
#[derive(Debug, PartialEq)]
pub struct Routed {
    pub stream: String,
    pub log: Log,
}

/// Blank lines yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<Routed>, InputError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let parsed: Line = serde_json::from_str(line)?;
    if parsed.stream.is_empty() {
        return Err(InputError::EmptyStream);
    }

    let mut log = Log::new(parsed.kind);
    if let Some(timestamp) = parsed.timestamp {
        log = log.with_timestamp(timestamp);
    }
    log.id = parsed.id;
    log.sid = parsed.sid;
    log.properties = parsed.properties;

    Ok(Some(Routed {
        stream: parsed.stream,
        log,
    }))
}
