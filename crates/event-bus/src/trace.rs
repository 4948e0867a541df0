//! Bounded in-memory trace of bus activity.

use crate::hooks::{Inspector, InspectorInfo};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Ring buffer of the most recent inspector notifications.
///
/// Cheap to clone; clones share the buffer.
#[derive(Clone)]
pub struct TraceRecorder {
    entries: Arc<Mutex<VecDeque<InspectorInfo>>>,
    capacity: usize,
}

impl TraceRecorder {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn record(&self, info: &InspectorInfo) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(info.clone());
    }

    /// Entries oldest first.
    #[must_use]
    pub fn entries(&self) -> Vec<InspectorInfo> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// An inspector feeding this recorder.
    #[must_use]
    pub fn inspector(&self) -> Inspector {
        let recorder = self.clone();
        Arc::new(move |info: &InspectorInfo| recorder.record(info))
    }
}
