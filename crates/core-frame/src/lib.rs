//! Frame identity plumbing: metadata, the per-camera metadata queue, and
//! the frame store feeding persistence.
//!
//! The pattern→frame identity mapping survives the whole pipeline through
//! [`FrameMetadata`]: the presenter mints one per scheduled trigger, the
//! camera driver pairs it with the vendor frame it provoked, and the
//! persistence worker destroys it after the bytes hit disk. Keys are
//! allocated from one process-wide monotonic counter so a frame can be
//! traced across threads unambiguously.

mod metaqueue;
mod store;

pub use metaqueue::MetadataQueue;
pub use store::FrameStore;

use std::sync::atomic::{AtomicI64, Ordering};

use core_image::Bitmap;
use core_timing::Ticks;

bitflags::bitflags! {
    /// Acquisition context a frame was triggered in.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FrameFlags: u8 {
        /// Part of a deterministic batch (not live preview).
        const BATCH    = 0b0000_0001;
        /// Fixed-pattern acquisition (one pattern repeated).
        const FIXED    = 0b0000_0010;
        /// Final frame of its batch.
        const LAST     = 0b0000_0100;
        /// Triggered in blocking mode (presenter spun for the delay).
        const BLOCKING = 0b0000_1000;
    }
}

static NEXT_FRAME_KEY: AtomicI64 = AtomicI64::new(0);

/// Allocate a process-unique, monotonically increasing frame key.
pub fn allocate_frame_key() -> i64 {
    NEXT_FRAME_KEY.fetch_add(1, Ordering::Relaxed)
}

/// Identity and timing of one dispatched trigger.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameMetadata {
    /// Unique monotonic key pairing trigger, vendor frame and disk record.
    pub key: i64,
    pub projector_id: usize,
    pub camera_id: usize,
    /// Position within the structured-light sequence.
    pub pattern_index: u32,
    /// Filename stem derived from pattern identity; camera id and
    /// extension are appended at write time.
    pub filename: String,
    /// Tick value recorded immediately before the trigger latch was raised
    /// by the presenter.
    pub qpc_before_trigger: Ticks,
    /// Tick value recorded immediately after the vendor trigger call.
    pub qpc_after_trigger: Ticks,
    /// Tick instant the trigger is scheduled to fire (non-blocking mode).
    pub trigger_scheduled: Ticks,
    pub flags: FrameFlags,
    /// How many times the originating pattern was re-presented for this
    /// frame (0 on the first attempt).
    pub retry: u32,
    /// False only for bookkeeping records emitted after retry exhaustion.
    pub acquired: bool,
    pub save_png: bool,
    pub save_raw: bool,
    /// Present-to-trigger delay in microseconds in force at dispatch.
    pub delay_us: f64,
    /// Exposure in microseconds in force at dispatch.
    pub exposure_us: f64,
}

impl FrameMetadata {
    /// Fresh metadata with a newly allocated key. Timing fields start at
    /// zero and are filled in as the trigger progresses.
    pub fn new(projector_id: usize, camera_id: usize, pattern_index: u32) -> Self {
        Self {
            key: allocate_frame_key(),
            projector_id,
            camera_id,
            pattern_index,
            filename: format!("{pattern_index:03}"),
            qpc_before_trigger: 0,
            qpc_after_trigger: 0,
            trigger_scheduled: 0,
            flags: FrameFlags::empty(),
            retry: 0,
            acquired: true,
            save_png: true,
            save_raw: false,
            delay_us: 0.0,
            exposure_us: 0.0,
        }
    }

    pub fn is_batch(&self) -> bool {
        self.flags.contains(FrameFlags::BATCH)
    }

    pub fn is_last(&self) -> bool {
        self.flags.contains(FrameFlags::LAST)
    }
}

/// A paired frame: metadata plus the copied pixel payload.
///
/// The pixels are copied out of the vendor ring buffer at pairing time, so
/// ownership of the ring entry never leaves the camera driver.
#[derive(Debug, Clone)]
pub struct FrameRecord {
    pub metadata: FrameMetadata,
    pub pixels: Bitmap,
}

impl FrameRecord {
    pub fn new(metadata: FrameMetadata, pixels: Bitmap) -> Self {
        Self { metadata, pixels }
    }

    /// Bookkeeping record for a frame that was never acquired (retry
    /// exhaustion); carries an empty pixel buffer and `acquired = false`.
    pub fn unacquired(mut metadata: FrameMetadata) -> Self {
        metadata.acquired = false;
        metadata.save_png = false;
        metadata.save_raw = false;
        Self {
            metadata,
            pixels: Bitmap::black(0, 0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_unique_and_monotonic() {
        let a = allocate_frame_key();
        let b = allocate_frame_key();
        let c = allocate_frame_key();
        assert!(a < b && b < c);
    }

    #[test]
    fn flags_compose() {
        let mut md = FrameMetadata::new(0, 0, 7);
        md.flags = FrameFlags::BATCH | FrameFlags::LAST;
        assert!(md.is_batch());
        assert!(md.is_last());
        assert!(!md.flags.contains(FrameFlags::BLOCKING));
    }

    #[test]
    fn unacquired_record_clears_save_flags() {
        let md = FrameMetadata::new(1, 2, 4);
        let rec = FrameRecord::unacquired(md);
        assert!(!rec.metadata.acquired);
        assert!(!rec.metadata.save_png);
        assert!(!rec.metadata.save_raw);
        assert_eq!(rec.pixels.byte_len(), 0);
    }
}
