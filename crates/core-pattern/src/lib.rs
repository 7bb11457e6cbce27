//! Structured-light pattern descriptors and the per-projector pattern
//! queue.
//!
//! A pattern descriptor identifies one frame to project: its decoded
//! bitmap (or a solid color to fill), its position in the structured-light
//! sequence, and the acquisition modifiers that travel with it (retry
//! count, skip flag, per-pattern delay/exposure overrides for color-wheel
//! patterns). Descriptors are minted by the decoder thread, consumed by
//! the presenter, and — on a failed trigger during a batch — re-enqueued
//! at the head for another attempt.

mod decoder;
mod queue;

pub use decoder::{DecoderOptions, PatternDecoder};
pub use queue::{PatternQueue, QueueFull, DEFAULT_HIGH_WATERMARK};

use std::path::PathBuf;
use std::sync::Arc;

use core_image::{Bitmap, Rgba};

/// Maximum re-presentations of a failed pattern before giving up.
pub const MAX_PATTERN_RETRIES: u32 = 2;

/// Structured-light pattern taxonomy carried through to frame filenames
/// and the session manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatternClass {
    /// Pattern decoded from a file in the projector's input directory.
    FromFile,
    /// All-black fill (also used to pad simultaneous batches).
    Black,
    /// Horizontal sinusoidal fringe.
    FringeHorizontal,
    /// Vertical sinusoidal fringe.
    FringeVertical,
    /// Color-wheel pattern carrying its own delay/exposure overrides.
    DlpWheel,
    /// Single pattern repeated a fixed number of times.
    Fixed,
    /// Transition pattern used for system delay measurement.
    DelayMeasurement,
}

/// What the presenter should put on the display surface.
#[derive(Debug, Clone)]
pub enum PatternPayload {
    /// A decoded bitmap, optionally remembering its source file.
    Bitmap {
        uri: Option<PathBuf>,
        bitmap: Arc<Bitmap>,
    },
    /// A solid color fill rendered at presentation time.
    Solid(Rgba),
}

/// One frame of a structured-light sequence.
#[derive(Debug, Clone)]
pub struct PatternDescriptor {
    /// Monotonic image number assigned by the producing decoder.
    pub no: u64,
    pub class: PatternClass,
    /// Ordering index within the structured-light sequence.
    pub index: u32,
    /// Re-presentation count; capped at [`MAX_PATTERN_RETRIES`].
    pub retry: u32,
    pub projector_id: usize,
    pub payload: PatternPayload,
    /// Filename stem used when deriving frame filenames.
    pub filename_stem: String,
    /// Per-pattern present-to-trigger delay override in microseconds.
    pub delay_us: Option<f64>,
    /// Per-pattern exposure override in microseconds.
    pub exposure_us: Option<f64>,
    /// Present without triggering any camera.
    pub skip_acquisition: bool,
}

impl PatternDescriptor {
    /// Descriptor for a decoded file pattern.
    pub fn from_file(
        no: u64,
        index: u32,
        projector_id: usize,
        uri: PathBuf,
        bitmap: Arc<Bitmap>,
        filename_stem: String,
    ) -> Self {
        Self {
            no,
            class: PatternClass::FromFile,
            index,
            retry: 0,
            projector_id,
            payload: PatternPayload::Bitmap {
                uri: Some(uri),
                bitmap,
            },
            filename_stem,
            delay_us: None,
            exposure_us: None,
            skip_acquisition: false,
        }
    }

    /// Descriptor for a solid color fill.
    pub fn solid(no: u64, index: u32, projector_id: usize, color: Rgba) -> Self {
        Self {
            no,
            class: PatternClass::Black,
            index,
            retry: 0,
            projector_id,
            payload: PatternPayload::Solid(color),
            filename_stem: format!("solid_{index:03}"),
            delay_us: None,
            exposure_us: None,
            skip_acquisition: false,
        }
    }

    /// Black padding frame: presented to keep multi-projector batches in
    /// lockstep but never acquired.
    pub fn black_padding(no: u64, index: u32, projector_id: usize) -> Self {
        let mut desc = Self::solid(no, index, projector_id, Rgba::BLACK);
        desc.filename_stem = format!("black_{index:03}");
        desc.skip_acquisition = true;
        desc
    }

    pub fn retries_exhausted(&self) -> bool {
        self.retry >= MAX_PATTERN_RETRIES
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padding_is_black_and_skipped() {
        let desc = PatternDescriptor::black_padding(0, 18, 1);
        assert_eq!(desc.class, PatternClass::Black);
        assert!(desc.skip_acquisition);
        match &desc.payload {
            PatternPayload::Solid(c) => assert_eq!(c.to_bgra8(), [0, 0, 0, 255]),
            other => panic!("expected solid payload, got {other:?}"),
        }
    }

    #[test]
    fn retry_cap() {
        let mut desc = PatternDescriptor::solid(0, 0, 0, Rgba::WHITE);
        assert!(!desc.retries_exhausted());
        desc.retry = MAX_PATTERN_RETRIES;
        assert!(desc.retries_exhausted());
    }
}
