//! Outstanding-trigger metadata queue.
//!
//! One per camera. The presenter pushes at trigger-schedule time; the
//! camera driver pops when the vendor delivers (or drops) the exposure.
//! The queue is unbounded — its depth is exactly the number of triggers in
//! flight — and entries are never reordered: per-camera trigger order is
//! the ordering contract everything downstream relies on.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::FrameMetadata;

#[derive(Debug, Default)]
pub struct MetadataQueue {
    inner: Mutex<VecDeque<FrameMetadata>>,
}

impl MetadataQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_back(&self, metadata: FrameMetadata) {
        self.inner.lock().push_back(metadata);
    }

    pub fn pop_front(&self) -> Option<FrameMetadata> {
        self.inner.lock().pop_front()
    }

    /// Key of the oldest outstanding trigger, if any.
    pub fn front_key(&self) -> Option<i64> {
        self.inner.lock().front().map(|m| m.key)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Drop all outstanding entries, returning how many were discarded.
    /// Used when a camera is detached or a batch is aborted.
    pub fn clear(&self) -> usize {
        let mut queue = self.inner.lock();
        let n = queue.len();
        queue.clear();
        n
    }
}
