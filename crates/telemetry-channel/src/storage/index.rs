// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;

use crate::log::{BatchId, LogId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Entry {
    pub size: u64,
    /// Batch currently holding this log, if it is in flight.
    pub batch: Option<BatchId>,
}

/// In-memory mirror of one stream's tree: sizes and in-flight markers.
///
/// In-flight markers only live here, so every log is pending again after a
/// restart.
#[derive(Debug, Default)]
pub(crate) struct StreamIndex {
    entries: BTreeMap<LogId, Entry>,
    /// Entries carrying a batch marker.
    in_flight: usize,
}

impl StreamIndex {
    pub fn insert(&mut self, id: LogId, size: u64) {
        if let Some(replaced) = self.entries.insert(id, Entry { size, batch: None }) {
            self.release(&replaced);
        }
    }

    pub fn remove(&mut self, id: LogId) -> Option<Entry> {
        let entry = self.entries.remove(&id)?;
        self.release(&entry);
        Some(entry)
    }

    fn release(&mut self, entry: &Entry) {
        if entry.batch.is_some() {
            self.in_flight -= 1;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn pending_len(&self) -> usize {
        self.entries.len() - self.in_flight
    }

    pub fn size(&self) -> u64 {
        self.entries.values().map(|entry| entry.size).sum()
    }

    /// Oldest log that is not in flight.
    pub fn oldest_pending(&self) -> Option<(LogId, Entry)> {
        self.entries
            .iter()
            .find(|(_, entry)| entry.batch.is_none())
            .map(|(id, entry)| (*id, *entry))
    }

    /// Up to `max_count` oldest pending logs, in insertion order.
    pub fn pending(&self, max_count: usize) -> Vec<LogId> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.batch.is_none())
            .take(max_count)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn is_pending(&self, id: LogId) -> bool {
        self.entries
            .get(&id)
            .is_some_and(|entry| entry.batch.is_none())
    }

    pub fn mark(&mut self, id: LogId, batch: BatchId) {
        if let Some(entry) = self.entries.get_mut(&id) {
            if entry.batch.replace(batch).is_none() {
                self.in_flight += 1;
            }
        }
    }

    /// Clears the marker of `id` if it belongs to `batch`.
    pub fn unmark(&mut self, id: LogId, batch: BatchId) -> bool {
        match self.entries.get_mut(&id) {
            Some(entry) if entry.batch == Some(batch) => {
                entry.batch = None;
                self.in_flight -= 1;
                true
            }
            _ => false,
        }
    }

    /// Removes `id` if it belongs to `batch`, returning its size.
    pub fn take(&mut self, id: LogId, batch: BatchId) -> Option<u64> {
        match self.entries.get(&id) {
            Some(entry) if entry.batch == Some(batch) => {
                self.remove(id).map(|entry| entry.size)
            }
            _ => None,
        }
    }

    pub fn clear(&mut self) -> (usize, u64) {
        let cleared = (self.len(), self.size());
        self.entries.clear();
        self.in_flight = 0;
        cleared
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(sizes: &[(u64, u64)]) -> StreamIndex {
        let mut index = StreamIndex::default();
        for (id, size) in sizes {
            index.insert(LogId(*id), *size);
        }
        index
    }

    #[test]
    fn test_pending_skips_in_flight() {
        let mut index = index(&[(1, 10), (2, 20), (3, 30), (4, 40)]);
        let batch = BatchId::new();
        index.mark(LogId(1), batch);
        index.mark(LogId(2), batch);

        assert_eq!(index.pending(10), vec![LogId(3), LogId(4)]);
        assert_eq!(index.pending(1), vec![LogId(3)]);
        assert_eq!(index.pending_len(), 2);
        assert_eq!(index.len(), 4);
        assert_eq!(
            index.oldest_pending(),
            Some((LogId(3), Entry { size: 30, batch: None }))
        );
    }

    #[test]
    fn test_take_and_unmark_check_batch_owner() {
        let mut index = index(&[(1, 10), (2, 20)]);
        let batch = BatchId::new();
        let other = BatchId::new();
        index.mark(LogId(1), batch);

        assert_eq!(index.take(LogId(1), other), None);
        assert!(!index.unmark(LogId(2), batch));
        assert!(index.unmark(LogId(1), batch));
        assert!(index.is_pending(LogId(1)));

        index.mark(LogId(1), batch);
        assert_eq!(index.take(LogId(1), batch), Some(10));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_pending_len_tracks_markers() {
        let mut index = index(&[(1, 10), (2, 20), (3, 30)]);
        let batch = BatchId::new();
        index.mark(LogId(1), batch);
        index.mark(LogId(1), batch);
        index.mark(LogId(2), batch);
        index.mark(LogId(9), batch);
        assert_eq!(index.pending_len(), 1);

        index.take(LogId(1), batch);
        assert_eq!(index.pending_len(), 1);
        index.remove(LogId(2));
        assert_eq!(index.pending_len(), 1);

        index.mark(LogId(3), batch);
        assert_eq!(index.pending_len(), 0);
        assert!(index.unmark(LogId(3), batch));
        assert_eq!(index.pending_len(), 1);

        index.mark(LogId(3), batch);
        index.clear();
        index.insert(LogId(4), 40);
        assert_eq!(index.pending_len(), 1);
    }

    #[test]
    fn test_clear_reports_count_and_size() {
        let mut index = index(&[(1, 10), (2, 20)]);
        assert_eq!(index.clear(), (2, 30));
        assert_eq!(index.len(), 0);
        assert_eq!(index.oldest_pending(), None);
    }
}
