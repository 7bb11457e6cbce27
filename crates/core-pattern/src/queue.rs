//! Bounded pattern queue with refill watermarks.
//!
//! The queue gates the decoder thread through the decoder latch group:
//! `queue_process` is held while the fill level is at or below the low
//! watermark (the refill request is level-triggered, so a simultaneous
//! empty-and-below-low observation is idempotent), `queue_full` while at
//! or above the high watermark, `queue_empty` when nothing is left.
//! Retries bypass the capacity check via `push_front` — a failed batch
//! pattern must never be droppable.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use core_sync::{LatchKey, LatchName, SyncFabric};

use crate::PatternDescriptor;

/// Default high watermark (queue capacity before enqueue rejects).
pub const DEFAULT_HIGH_WATERMARK: usize = 18;

/// Rejected enqueue; gives the descriptor back to the caller.
#[derive(Debug, thiserror::Error)]
#[error("pattern queue full (high watermark {high})")]
pub struct QueueFull {
    pub high: usize,
    pub descriptor: PatternDescriptor,
}

#[derive(Debug)]
pub struct PatternQueue {
    inner: Mutex<VecDeque<PatternDescriptor>>,
    fabric: Arc<SyncFabric>,
    decoder_id: usize,
    low: usize,
    high: usize,
}

impl PatternQueue {
    pub fn new(fabric: Arc<SyncFabric>, decoder_id: usize) -> Self {
        Self::with_watermarks(
            fabric,
            decoder_id,
            DEFAULT_HIGH_WATERMARK / 2,
            DEFAULT_HIGH_WATERMARK,
        )
    }

    pub fn with_watermarks(
        fabric: Arc<SyncFabric>,
        decoder_id: usize,
        low: usize,
        high: usize,
    ) -> Self {
        debug_assert!(low <= high / 2 || low < high, "low watermark above high");
        let queue = Self {
            inner: Mutex::new(VecDeque::new()),
            fabric,
            decoder_id,
            low: low.min(high),
            high: high.max(1),
        };
        // Fresh queue is empty: refill wanted immediately.
        let _ = queue.fabric.set(queue.latch(LatchName::DecoderQueueProcess));
        let _ = queue.fabric.set(queue.latch(LatchName::DecoderQueueEmpty));
        queue
    }

    fn latch(&self, name: LatchName) -> LatchKey {
        LatchKey::new(name, self.decoder_id)
    }

    fn publish_level(&self, len: usize) {
        if len == 0 {
            let _ = self.fabric.set(self.latch(LatchName::DecoderQueueEmpty));
        } else {
            let _ = self.fabric.reset(self.latch(LatchName::DecoderQueueEmpty));
        }
        if len <= self.low {
            let _ = self.fabric.set(self.latch(LatchName::DecoderQueueProcess));
        } else {
            let _ = self.fabric.reset(self.latch(LatchName::DecoderQueueProcess));
        }
        if len >= self.high {
            let _ = self.fabric.set(self.latch(LatchName::DecoderQueueFull));
        } else {
            let _ = self.fabric.reset(self.latch(LatchName::DecoderQueueFull));
        }
    }

    /// Append a descriptor; rejects at the high watermark.
    pub fn try_enqueue(&self, descriptor: PatternDescriptor) -> Result<(), QueueFull> {
        let len = {
            let mut queue = self.inner.lock();
            if queue.len() >= self.high {
                drop(queue);
                let _ = self.fabric.set(self.latch(LatchName::DecoderQueueFull));
                return Err(QueueFull {
                    high: self.high,
                    descriptor,
                });
            }
            queue.push_back(descriptor);
            queue.len()
        };
        self.publish_level(len);
        Ok(())
    }

    /// Re-insert a descriptor at the head (retry path). Not bounded.
    pub fn push_front(&self, descriptor: PatternDescriptor) {
        let len = {
            let mut queue = self.inner.lock();
            queue.push_front(descriptor);
            queue.len()
        };
        self.publish_level(len);
    }

    /// Take the next descriptor if one is available.
    pub fn try_dequeue(&self) -> Option<PatternDescriptor> {
        let (descriptor, len) = {
            let mut queue = self.inner.lock();
            let descriptor = queue.pop_front();
            (descriptor, queue.len())
        };
        self.publish_level(len);
        descriptor
    }

    /// Discard everything queued, returning the discard count.
    pub fn clear(&self) -> usize {
        let (n, len) = {
            let mut queue = self.inner.lock();
            let n = queue.len();
            queue.clear();
            (n, 0)
        };
        self.publish_level(len);
        n
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn low_watermark(&self) -> usize {
        self.low
    }

    pub fn high_watermark(&self) -> usize {
        self.high
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PatternDescriptor;
    use core_image::Rgba;

    fn queue() -> (Arc<SyncFabric>, PatternQueue, usize) {
        let fabric = Arc::new(SyncFabric::new());
        let id = fabric.add_decoder();
        let queue = PatternQueue::with_watermarks(Arc::clone(&fabric), id, 2, 4);
        (fabric, queue, id)
    }

    fn desc(index: u32) -> PatternDescriptor {
        PatternDescriptor::solid(index as u64, index, 0, Rgba::WHITE)
    }

    #[test]
    fn enqueue_rejects_at_high_watermark() {
        let (fabric, queue, id) = queue();
        for i in 0..4 {
            queue.try_enqueue(desc(i)).unwrap();
        }
        assert!(fabric
            .is_signalled(LatchKey::new(LatchName::DecoderQueueFull, id))
            .unwrap());
        let err = queue.try_enqueue(desc(4)).unwrap_err();
        assert_eq!(err.descriptor.index, 4);
        assert_eq!(queue.len(), 4);
    }

    #[test]
    fn refill_signal_is_level_held_at_or_below_low() {
        let (fabric, queue, id) = queue();
        let process = LatchKey::new(LatchName::DecoderQueueProcess, id);

        // Empty queue wants a refill.
        assert!(fabric.is_signalled(process).unwrap());

        for i in 0..4 {
            queue.try_enqueue(desc(i)).unwrap();
        }
        assert!(!fabric.is_signalled(process).unwrap());

        // Drain down to the low watermark: refill wanted again.
        queue.try_dequeue().unwrap();
        queue.try_dequeue().unwrap();
        assert_eq!(queue.len(), 2);
        assert!(fabric.is_signalled(process).unwrap());
    }

    #[test]
    fn empty_latch_tracks_fill_state() {
        let (fabric, queue, id) = queue();
        let empty = LatchKey::new(LatchName::DecoderQueueEmpty, id);
        assert!(fabric.is_signalled(empty).unwrap());
        queue.try_enqueue(desc(0)).unwrap();
        assert!(!fabric.is_signalled(empty).unwrap());
        queue.try_dequeue().unwrap();
        assert!(fabric.is_signalled(empty).unwrap());
    }

    #[test]
    fn push_front_bypasses_capacity_for_retries() {
        let (_fabric, queue, _id) = queue();
        for i in 0..4 {
            queue.try_enqueue(desc(i)).unwrap();
        }
        let mut retry = desc(9);
        retry.retry = 1;
        queue.push_front(retry);
        assert_eq!(queue.len(), 5);
        let head = queue.try_dequeue().unwrap();
        assert_eq!(head.index, 9);
        assert_eq!(head.retry, 1);
    }

    #[test]
    fn fifo_order() {
        let (_fabric, queue, _id) = queue();
        for i in 0..3 {
            queue.try_enqueue(desc(i)).unwrap();
        }
        for i in 0..3 {
            assert_eq!(queue.try_dequeue().unwrap().index, i);
        }
        assert!(queue.try_dequeue().is_none());
    }
}
