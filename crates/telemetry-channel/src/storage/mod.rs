// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Persistent, size-bounded log store.
//!
//! Logs live in an embedded sled database, one tree per stream (`stream/<name>`)
//! keyed by the big-endian [`LogId`], so a tree scan yields insertion order.
//! Each stream also has an in-memory index of payload sizes and in-flight
//! markers, guarded by its own mutex: operations on different streams proceed
//! concurrently.
//!
//! # Quota
//!
//! The total size of stored payloads never exceeds the quota. Admission of a
//! new log is serialised store-wide; when the log does not fit, the oldest
//! log across all streams that is not in flight is evicted, repeatedly, until
//! it does. Stream locks are taken one at a time during that search.
//!
//! # Durability
//!
//! `put`, deleting resolutions and `clear` flush the database before
//! returning. In-flight markers are never persisted: after a restart every
//! stored log is pending again, so a crash mid-send leads to at most one
//! duplicate delivery.

mod index;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use sled::{Config as SledConfig, Db, Tree};
use tracing::{debug, error, warn};
use uuid::Uuid;

use self::index::StreamIndex;
use crate::constants::{DEFAULT_MAX_STORAGE_SIZE, MAX_STREAM_NAME_LEN, MINIMUM_STORAGE_SIZE};
use crate::error::{ConfigurationError, StorageError};
use crate::log::{BatchId, Log, LogBatch, LogId, StoredLog};

const META_TREE: &str = "__meta";
const INSTALL_ID_KEY: &[u8] = b"install_id";
const STREAM_TREE_PREFIX: &str = "stream/";

/// Final state of a batch handed out by [`LogStore::get_batch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Acknowledged by the endpoint; the logs are deleted.
    Delivered,
    /// Permanently failed; the logs are deleted.
    Rejected,
    /// Not delivered but retryable; the logs become pending again.
    Retry,
}

/// A log removed to make room under the quota.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictedLog {
    pub stream: String,
    pub id: LogId,
}

/// Result of a successful [`LogStore::put`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stored {
    pub id: LogId,
    /// Logs evicted to admit this one, oldest first.
    pub evicted: Vec<EvictedLog>,
}

struct Stream {
    name: String,
    tree: Tree,
    index: Mutex<StreamIndex>,
}

struct InFlightBatch {
    stream: String,
    ids: Vec<LogId>,
}

struct Inner {
    db: Db,
    path: Option<PathBuf>,
    install_id: Uuid,
    streams: RwLock<HashMap<String, Arc<Stream>>>,
    in_flight: Mutex<HashMap<BatchId, InFlightBatch>>,
    /// Serialises quota reservation and eviction across all streams, and the
    /// quota change against the first write.
    admission: Mutex<()>,
    usage: AtomicU64,
    quota: AtomicU64,
    started: AtomicBool,
    quota_set: AtomicBool,
}

/// Handle to the shared log store. Clones refer to the same database.
#[derive(Clone)]
pub struct LogStore {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for LogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogStore")
            .field("path", &self.inner.path)
            .field("usage", &self.total_size())
            .field("quota", &self.max_storage_size())
            .finish_non_exhaustive()
    }
}

impl LogStore {
    /// Opens (or creates) the store at `path` and reloads persisted logs.
    ///
    /// A corrupted database is discarded and recreated empty.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let db = match sled_config(&path).open() {
            Ok(db) => db,
            Err(sled::Error::Corruption { .. }) => {
                warn!("STORE | log database at {} is corrupted, recreating it", path.display());
                reset_path(&path)?;
                sled_config(&path).open()?
            }
            Err(err) => return Err(StorageError::Db(err)),
        };
        Self::from_db(db, Some(path))
    }

    /// Opens a store that lives in a temporary location and is removed on drop.
    pub fn open_temporary() -> Result<Self, StorageError> {
        let db = SledConfig::new().temporary(true).open()?;
        Self::from_db(db, None)
    }

    fn from_db(db: Db, path: Option<PathBuf>) -> Result<Self, StorageError> {
        let install_id = load_install_id(&db)?;

        let mut streams = HashMap::new();
        let mut usage = 0;
        for tree_name in db.tree_names() {
            let Some(name) = std::str::from_utf8(&tree_name)
                .ok()
                .and_then(|name| name.strip_prefix(STREAM_TREE_PREFIX))
            else {
                continue;
            };
            let tree = db.open_tree(&tree_name)?;
            let mut index = StreamIndex::default();
            for entry in tree.iter() {
                let (key, value) = entry?;
                match LogId::from_key(&key) {
                    Some(id) => index.insert(id, value.len() as u64),
                    None => warn!("STORE | skipping malformed key in stream {name}"),
                }
            }
            usage += index.size();
            debug!("STORE | reloaded {} logs for stream {name}", index.len());
            streams.insert(
                name.to_string(),
                Arc::new(Stream {
                    name: name.to_string(),
                    tree,
                    index: Mutex::new(index),
                }),
            );
        }

        Ok(Self {
            inner: Arc::new(Inner {
                db,
                path,
                install_id,
                streams: RwLock::new(streams),
                in_flight: Mutex::new(HashMap::new()),
                admission: Mutex::new(()),
                usage: AtomicU64::new(usage),
                quota: AtomicU64::new(DEFAULT_MAX_STORAGE_SIZE),
                started: AtomicBool::new(false),
                quota_set: AtomicBool::new(false),
            }),
        })
    }

    /// Identifier of this installation, generated once and persisted.
    #[must_use]
    pub fn install_id(&self) -> Uuid {
        self.inner.install_id
    }

    /// Filesystem location of the database, `None` for temporary stores.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }

    /// Serializes `log` and appends it to `stream`, evicting the oldest logs
    /// of any stream when the quota would be exceeded.
    pub fn put(&self, stream: &str, log: &Log) -> Result<Stored, StorageError> {
        validate_stream(stream)?;
        let payload = serde_json::to_vec(log)?;
        let size = payload.len() as u64;

        let stored = {
            let _admission = self.inner.admission.lock();
            self.inner.started.store(true, Ordering::SeqCst);
            let quota = self.max_storage_size();
            if size > quota {
                return Err(StorageError::LogTooLarge { size, quota });
            }

            let mut evicted = Vec::new();
            while self.total_size() + size > quota {
                match self.evict_oldest()? {
                    Some(log) => evicted.push(log),
                    None => return Err(StorageError::StorageFull { requested: size, quota }),
                }
            }

            let target = self.stream(stream)?;
            let id = LogId(self.inner.db.generate_id()?);
            {
                let mut index = target.index.lock();
                target.tree.insert(id.to_key(), payload)?;
                index.insert(id, size);
            }
            self.inner.usage.fetch_add(size, Ordering::SeqCst);
            Stored { id, evicted }
        };

        self.inner.db.flush()?;
        for log in &stored.evicted {
            warn!(
                "STORE | evicted log {} from stream {} to make room for {} bytes",
                log.id, log.stream, size
            );
        }
        Ok(stored)
    }

    /// Pulls up to `max_count` of the oldest pending logs of `stream` and marks
    /// them in flight. Returns `None` when nothing is pending.
    pub fn get_batch(&self, stream: &str, max_count: usize) -> Result<Option<LogBatch>, StorageError> {
        validate_stream(stream)?;
        self.mark_started();
        if max_count == 0 {
            return Ok(None);
        }
        let Some(target) = self.existing_stream(stream) else {
            return Ok(None);
        };

        let batch_id = BatchId::new();
        let mut logs = Vec::new();
        {
            let mut index = target.index.lock();
            for id in index.pending(max_count) {
                if let Some(payload) = target.tree.get(id.to_key())? {
                    index.mark(id, batch_id);
                    logs.push(StoredLog {
                        id,
                        payload: payload.to_vec(),
                    });
                } else if let Some(entry) = index.remove(id) {
                    error!("STORE | log {id} of stream {stream} vanished from the database");
                    self.inner.usage.fetch_sub(entry.size, Ordering::SeqCst);
                }
            }
            if logs.is_empty() {
                return Ok(None);
            }
            // Registered under the stream lock so a concurrent `clear` sees it.
            self.inner.in_flight.lock().insert(
                batch_id,
                InFlightBatch {
                    stream: stream.to_string(),
                    ids: logs.iter().map(|log| log.id).collect(),
                },
            );
        }
        debug!("STORE | batch {batch_id} holds {} logs of stream {stream}", logs.len());
        Ok(Some(LogBatch {
            id: batch_id,
            stream: stream.to_string(),
            logs,
        }))
    }

    /// Settles an in-flight batch. Unknown batch ids (already resolved, or
    /// cleared with their stream) are ignored.
    pub fn resolve(&self, batch_id: BatchId, resolution: Resolution) -> Result<(), StorageError> {
        let Some(batch) = self.inner.in_flight.lock().remove(&batch_id) else {
            warn!("STORE | ignoring resolution of unknown batch {batch_id}");
            return Ok(());
        };
        let Some(target) = self.existing_stream(&batch.stream) else {
            return Ok(());
        };

        match resolution {
            Resolution::Retry => {
                let mut index = target.index.lock();
                for id in &batch.ids {
                    index.unmark(*id, batch_id);
                }
                debug!("STORE | batch {batch_id} returned to stream {}", batch.stream);
            }
            Resolution::Delivered | Resolution::Rejected => {
                let mut removed = 0;
                {
                    let mut index = target.index.lock();
                    let mut deletion = sled::Batch::default();
                    for id in &batch.ids {
                        if let Some(size) = index.take(*id, batch_id) {
                            deletion.remove(id.to_key().to_vec());
                            removed += size;
                        }
                    }
                    target.tree.apply_batch(deletion)?;
                }
                self.inner.usage.fetch_sub(removed, Ordering::SeqCst);
                self.inner.db.flush()?;
                debug!(
                    "STORE | batch {batch_id} of stream {} deleted ({resolution:?})",
                    batch.stream
                );
            }
        }
        Ok(())
    }

    /// Deletes every log of `stream`, in flight or not. Returns how many were removed.
    pub fn clear(&self, stream: &str) -> Result<usize, StorageError> {
        validate_stream(stream)?;
        let Some(target) = self.existing_stream(stream) else {
            return Ok(0);
        };

        let (count, size) = {
            let mut index = target.index.lock();
            target.tree.clear()?;
            self.inner
                .in_flight
                .lock()
                .retain(|_, batch| batch.stream != stream);
            index.clear()
        };
        self.inner.usage.fetch_sub(size, Ordering::SeqCst);
        self.inner.db.flush()?;
        debug!("STORE | cleared {count} logs from stream {stream}");
        Ok(count)
    }

    /// Logs of `stream` that are stored and not in flight.
    #[must_use]
    pub fn pending_count(&self, stream: &str) -> usize {
        self.existing_stream(stream)
            .map_or(0, |target| target.index.lock().pending_len())
    }

    /// Logs of `stream` that are stored, including in-flight ones.
    #[must_use]
    pub fn total_count(&self, stream: &str) -> usize {
        self.existing_stream(stream)
            .map_or(0, |target| target.index.lock().len())
    }

    /// Bytes of payload stored across all streams.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.inner.usage.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn max_storage_size(&self) -> u64 {
        self.inner.quota.load(Ordering::SeqCst)
    }

    /// Names of streams known to the store, sorted.
    #[must_use]
    pub fn streams(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.streams.read().keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Sets the storage quota. Allowed once, before the first `put` or
    /// `get_batch`.
    ///
    /// Returns `Ok(false)` when the logs persisted by a previous run did not
    /// fit and the oldest of them were evicted.
    pub fn set_max_storage_size(&self, bytes: u64) -> Result<bool, ConfigurationError> {
        let _admission = self.inner.admission.lock();
        if self.inner.started.load(Ordering::SeqCst) {
            return Err(ConfigurationError::StorageAlreadyStarted);
        }
        if bytes < MINIMUM_STORAGE_SIZE {
            return Err(ConfigurationError::StorageQuotaBelowMinimum {
                requested: bytes,
                minimum: MINIMUM_STORAGE_SIZE,
            });
        }
        if self.inner.quota_set.swap(true, Ordering::SeqCst) {
            return Err(ConfigurationError::StorageQuotaAlreadySet);
        }

        self.inner.quota.store(bytes, Ordering::SeqCst);
        let mut fits = true;
        while self.total_size() > bytes {
            match self.evict_oldest() {
                Ok(Some(log)) => {
                    fits = false;
                    warn!(
                        "STORE | evicted log {} from stream {} to fit a quota of {bytes} bytes",
                        log.id, log.stream
                    );
                }
                Ok(None) => break,
                Err(e) => {
                    error!("STORE | failed to shrink storage to {bytes} bytes: {e}");
                    fits = false;
                    break;
                }
            }
        }
        if let Err(e) = self.inner.db.flush() {
            error!("STORE | failed to flush after quota change: {e}");
        }
        Ok(fits)
    }

    /// Flushes pending writes to disk.
    pub fn flush(&self) -> Result<(), StorageError> {
        self.inner.db.flush()?;
        Ok(())
    }

    /// Evicts the globally oldest log that is not in flight.
    ///
    /// Must be called with the admission lock held.
    fn evict_oldest(&self) -> Result<Option<EvictedLog>, StorageError> {
        loop {
            let streams: Vec<Arc<Stream>> = self.inner.streams.read().values().cloned().collect();
            let oldest = streams
                .iter()
                .filter_map(|stream| {
                    let index = stream.index.lock();
                    index.oldest_pending().map(|(id, _)| (id, stream))
                })
                .min_by_key(|(id, _)| *id);
            let Some((id, stream)) = oldest else {
                return Ok(None);
            };

            let mut index = stream.index.lock();
            // Pulled into a batch or deleted since the scan.
            if !index.is_pending(id) {
                continue;
            }
            stream.tree.remove(id.to_key())?;
            if let Some(entry) = index.remove(id) {
                self.inner.usage.fetch_sub(entry.size, Ordering::SeqCst);
            }
            return Ok(Some(EvictedLog {
                stream: stream.name.clone(),
                id,
            }));
        }
    }

    fn mark_started(&self) {
        if !self.inner.started.load(Ordering::SeqCst) {
            let _admission = self.inner.admission.lock();
            self.inner.started.store(true, Ordering::SeqCst);
        }
    }

    #[cfg(test)]
    fn in_flight_batches(&self) -> usize {
        self.inner.in_flight.lock().len()
    }

    fn existing_stream(&self, name: &str) -> Option<Arc<Stream>> {
        self.inner.streams.read().get(name).cloned()
    }

    fn stream(&self, name: &str) -> Result<Arc<Stream>, StorageError> {
        if let Some(stream) = self.existing_stream(name) {
            return Ok(stream);
        }
        let mut streams = self.inner.streams.write();
        if let Some(stream) = streams.get(name) {
            return Ok(Arc::clone(stream));
        }
        let tree = self.inner.db.open_tree(format!("{STREAM_TREE_PREFIX}{name}"))?;
        let stream = Arc::new(Stream {
            name: name.to_string(),
            tree,
            index: Mutex::new(StreamIndex::default()),
        });
        streams.insert(name.to_string(), Arc::clone(&stream));
        Ok(stream)
    }
}

/// Stream names are 1 to 64 characters of `[A-Za-z0-9_.-]`.
#[must_use]
pub fn is_valid_stream_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_STREAM_NAME_LEN
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'))
}

fn validate_stream(name: &str) -> Result<(), StorageError> {
    if is_valid_stream_name(name) {
        Ok(())
    } else {
        Err(StorageError::InvalidStream(name.to_string()))
    }
}

fn load_install_id(db: &Db) -> Result<Uuid, StorageError> {
    let meta = db.open_tree(META_TREE)?;
    if let Some(bytes) = meta.get(INSTALL_ID_KEY)? {
        if let Ok(id) = Uuid::from_slice(&bytes) {
            return Ok(id);
        }
        warn!("STORE | stored install id is malformed, generating a new one");
    }
    let id = Uuid::new_v4();
    meta.insert(INSTALL_ID_KEY, id.as_bytes().as_slice())?;
    meta.flush()?;
    Ok(id)
}

fn sled_config(path: &Path) -> SledConfig {
    SledConfig::new().path(path).cache_capacity(8 * 1024 * 1024)
}

fn reset_path(path: &Path) -> Result<(), StorageError> {
    if path.exists() {
        if path.is_dir() {
            fs::remove_dir_all(path)?;
        } else {
            fs::remove_file(path)?;
        }
    }
    Ok(())
}
