// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Optional callback for delivery outcomes.
//!
//! Pipeline failures never reach producers. Hosts that want to observe them
//! (permanent rejections, evictions, drops) register a [`PipelineListener`] on
//! the [`crate::group::ChannelGroup`]. Hooks are invoked from the channel task
//! and must not block.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::IngestionError;
use crate::log::{LogBatch, LogId};

/// Why a log left the pipeline without being delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// Enqueued while the channel was disabled.
    Disabled,
    /// Removed to make room under the storage quota.
    Evicted(LogId),
    /// The store refused the write.
    Storage(String),
}

#[allow(unused_variables)]
pub trait PipelineListener: Send + Sync {
    /// A batch is about to be handed to the retrying client.
    fn on_sending(&self, batch: &LogBatch) {}

    /// A batch was acknowledged by the endpoint.
    fn on_sent(&self, batch: &LogBatch) {}

    /// A batch was rejected or ran out of retries and has been discarded.
    fn on_failed(&self, batch: &LogBatch, error: &IngestionError) {}

    fn on_dropped(&self, stream: &str, reason: &DropReason) {}
}

/// Listeners shared by a group and its channels.
#[derive(Clone, Default)]
pub struct Listeners {
    inner: Arc<RwLock<Vec<Arc<dyn PipelineListener>>>>,
}

impl Listeners {
    pub fn add(&self, listener: Arc<dyn PipelineListener>) {
        self.inner.write().push(listener);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    pub(crate) fn notify(&self, event: impl Fn(&dyn PipelineListener)) {
        let listeners = self.inner.read().clone();
        for listener in &listeners {
            event(listener.as_ref());
        }
    }
}

impl std::fmt::Debug for Listeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Drops(Mutex<Vec<(String, DropReason)>>);

    impl PipelineListener for Drops {
        fn on_dropped(&self, stream: &str, reason: &DropReason) {
            self.0.lock().push((stream.to_string(), reason.clone()));
        }
    }

    #[test]
    fn test_notify_reaches_every_listener() {
        let listeners = Listeners::default();
        let first = Arc::new(Drops::default());
        let second = Arc::new(Drops::default());
        listeners.add(first.clone());
        listeners.add(second.clone());
        assert_eq!(listeners.len(), 2);

        listeners.notify(|listener| listener.on_dropped("crashes", &DropReason::Evicted(LogId(4))));
        // Default hooks are no-ops.
        listeners.notify(|listener| listener.on_sending(&LogBatch {
            id: crate::log::BatchId::new(),
            stream: "crashes".to_string(),
            logs: Vec::new(),
        }));

        for drops in [first, second] {
            assert_eq!(
                *drops.0.lock(),
                vec![("crashes".to_string(), DropReason::Evicted(LogId(4)))]
            );
        }
    }
}
