//! Per-camera staging store for acquired frames.
//!
//! The camera driver pushes paired records; the persistence worker drains
//! them to disk. Batch records are counted separately so the control
//! surface can report batch backpressure without walking the queue. Store
//! state drives the encoder latch group: `queue_process` is level-held
//! while work is pending, `queue_full` above the high watermark,
//! `queue_empty` when drained.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use core_sync::{LatchKey, LatchName, SyncFabric};
use std::sync::Arc;

use crate::FrameRecord;

/// Default drain-down target for the persistence worker.
pub const DEFAULT_MIN_ITEMS: usize = 4;
/// Default high watermark above which the store reports full.
pub const DEFAULT_MAX_ITEMS: usize = 18;

#[derive(Debug)]
struct StoreInner {
    queue: VecDeque<FrameRecord>,
    num_batch: i64,
    total_enqueued: i64,
}

#[derive(Debug)]
pub struct FrameStore {
    inner: Mutex<StoreInner>,
    fabric: Arc<SyncFabric>,
    /// Fabric member id; renumbered when topology compacts.
    encoder_id: AtomicUsize,
    min_items: usize,
    max_items: usize,
}

impl FrameStore {
    pub fn new(fabric: Arc<SyncFabric>, encoder_id: usize) -> Self {
        Self::with_watermarks(fabric, encoder_id, DEFAULT_MIN_ITEMS, DEFAULT_MAX_ITEMS)
    }

    pub fn with_watermarks(
        fabric: Arc<SyncFabric>,
        encoder_id: usize,
        min_items: usize,
        max_items: usize,
    ) -> Self {
        debug_assert!(min_items <= max_items);
        Self {
            inner: Mutex::new(StoreInner {
                queue: VecDeque::new(),
                num_batch: 0,
                total_enqueued: 0,
            }),
            fabric,
            encoder_id: AtomicUsize::new(encoder_id),
            min_items,
            max_items,
        }
    }

    pub fn encoder_id(&self) -> usize {
        self.encoder_id.load(Ordering::Acquire)
    }

    /// Renumber this store's encoder after a topology compaction.
    pub fn set_encoder_id(&self, encoder_id: usize) {
        self.encoder_id.store(encoder_id, Ordering::Release);
    }

    fn latch(&self, name: LatchName) -> LatchKey {
        LatchKey::new(name, self.encoder_id())
    }

    /// Stage a record for persistence. The store is unbounded; crossing the
    /// high watermark only raises `queue_full` as a backpressure signal.
    pub fn push(&self, record: FrameRecord) {
        let len = {
            let mut inner = self.inner.lock();
            if record.metadata.is_batch() {
                inner.num_batch += 1;
            }
            inner.total_enqueued += 1;
            inner.queue.push_back(record);
            inner.queue.len()
        };
        let _ = self.fabric.set(self.latch(LatchName::EncoderQueueProcess));
        let _ = self.fabric.reset(self.latch(LatchName::EncoderQueueEmpty));
        if len >= self.max_items {
            let _ = self.fabric.set(self.latch(LatchName::EncoderQueueFull));
        }
    }

    /// Take the oldest staged record.
    pub fn pop(&self) -> Option<FrameRecord> {
        let (record, len) = {
            let mut inner = self.inner.lock();
            let record = inner.queue.pop_front();
            if let Some(rec) = &record {
                if rec.metadata.is_batch() {
                    inner.num_batch -= 1;
                }
            }
            (record, inner.queue.len())
        };
        if len < self.min_items {
            let _ = self.fabric.reset(self.latch(LatchName::EncoderQueueFull));
        }
        if len == 0 {
            let _ = self.fabric.set(self.latch(LatchName::EncoderQueueEmpty));
            let _ = self.fabric.reset(self.latch(LatchName::EncoderQueueProcess));
        }
        record
    }

    /// Records still staged whose metadata carries the batch flag.
    pub fn batch_items_remaining(&self) -> i64 {
        self.inner.lock().num_batch
    }

    /// All records still staged.
    pub fn total_items_remaining(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Running count of everything ever staged.
    pub fn total_enqueued(&self) -> i64 {
        self.inner.lock().total_enqueued
    }

    pub fn min_items(&self) -> usize {
        self.min_items
    }

    pub fn max_items(&self) -> usize {
        self.max_items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FrameFlags, FrameMetadata};
    use core_image::Bitmap;

    fn record(batch: bool) -> FrameRecord {
        let mut md = FrameMetadata::new(0, 0, 0);
        if batch {
            md.flags |= FrameFlags::BATCH;
        }
        FrameRecord::new(md, Bitmap::black(2, 2))
    }

    fn store() -> (Arc<SyncFabric>, FrameStore, usize) {
        let fabric = Arc::new(SyncFabric::new());
        let id = fabric.add_encoder();
        let store = FrameStore::with_watermarks(Arc::clone(&fabric), id, 2, 4);
        (fabric, store, id)
    }

    #[test]
    fn push_signals_process_and_pop_drains() {
        let (fabric, store, id) = store();
        let process = LatchKey::new(LatchName::EncoderQueueProcess, id);
        let empty = LatchKey::new(LatchName::EncoderQueueEmpty, id);

        store.push(record(false));
        assert!(fabric.is_signalled(process).unwrap());
        assert!(!fabric.is_signalled(empty).unwrap());

        assert!(store.pop().is_some());
        assert!(store.pop().is_none());
        assert!(fabric.is_signalled(empty).unwrap());
        assert!(!fabric.is_signalled(process).unwrap());
    }

    #[test]
    fn num_batch_tracks_batch_records_only() {
        let (_fabric, store, _id) = store();
        store.push(record(true));
        store.push(record(false));
        store.push(record(true));
        assert_eq!(store.batch_items_remaining(), 2);
        assert_eq!(store.total_items_remaining(), 3);

        // FIFO: first pop is the batch record.
        assert!(store.pop().unwrap().metadata.is_batch());
        assert_eq!(store.batch_items_remaining(), 1);
        assert!(!store.pop().unwrap().metadata.is_batch());
        assert_eq!(store.batch_items_remaining(), 1);
        assert!(store.pop().unwrap().metadata.is_batch());
        assert_eq!(store.batch_items_remaining(), 0);
    }

    #[test]
    fn queue_full_raises_at_high_watermark_and_clears_below_low() {
        let (fabric, store, id) = store();
        let full = LatchKey::new(LatchName::EncoderQueueFull, id);

        for _ in 0..4 {
            store.push(record(false));
        }
        assert!(fabric.is_signalled(full).unwrap());

        // Drain below the low watermark (min_items = 2).
        store.pop();
        store.pop();
        store.pop();
        assert!(!fabric.is_signalled(full).unwrap());
    }
}
