//! Camera backends and the per-camera driver thread.
//!
//! Every supported sensor family is reduced to the same narrow capability
//! set: claim the device, configure software-trigger mode and exposure,
//! arm a ring of stream buffers, emit one trigger, and deliver frames
//! through callbacks. Vendor callbacks run on SDK-owned threads, so they
//! are forbidden from doing real work here — they push a [`CameraEvent`]
//! into a lock-free intake channel and set a latch, and the driver thread
//! does the pairing, copying and bookkeeping on its own schedule.

mod backends;
mod driver;
mod reorder;

pub use backends::{
    create_backend, BackendConfig, FaultScript, FromFileCamera, SoftwareCamera, SoftwareFault,
};
pub use driver::{exposure_from_refresh, CameraDriver, DriverConfig};
pub use reorder::ReorderBuffer;

use std::sync::Arc;

use core_image::Bitmap;
use core_sync::{LatchKey, LatchName, SyncFabric};

/// Supported camera backend families.
///
/// The hardware SDK families are selectable for configuration purposes but
/// construct only when their SDK glue is present; this crate ships the
/// software-simulated sensor and the from-file replay backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Software-simulated sensor with scripted fault injection.
    Software,
    /// Replays images from a directory instead of a live sensor.
    FromFile,
    /// Basler Pylon family.
    Pylon,
    /// Teledyne Dalsa Sapera family.
    Sapera,
    /// FLIR Spinnaker family.
    Spinnaker,
    /// FLIR/Point Grey FlyCapture family.
    FlyCapture,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Software => "software",
            BackendKind::FromFile => "from-file",
            BackendKind::Pylon => "pylon",
            BackendKind::Sapera => "sapera",
            BackendKind::Spinnaker => "spinnaker",
            BackendKind::FlyCapture => "flycapture",
        }
    }
}

/// Camera failures.
#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    #[error("backend {0:?} is not available in this build")]
    BackendUnavailable(BackendKind),
    #[error("stream is not armed")]
    NotStreaming,
    #[error("operation not supported by this backend: {0}")]
    Unsupported(&'static str),
    #[error("camera disconnected")]
    Disconnected,
    #[error("image error: {0}")]
    Image(#[from] core_image::ImageError),
    #[error("driver thread failed to start: {0}")]
    Spawn(std::io::Error),
}

/// Event emitted by a vendor callback thread.
#[derive(Debug, Clone)]
pub enum CameraEvent {
    /// Sensor integration started for trigger `sequence`.
    ExposureBegin { sequence: u64 },
    /// Sensor integration finished for trigger `sequence`.
    ExposureEnd { sequence: u64 },
    /// A complete frame for trigger `sequence` left the link.
    FrameReady { sequence: u64, frame: Bitmap },
    /// The link dropped the frame for trigger `sequence`.
    FrameSkipped { sequence: u64 },
    /// The trigger was rejected or lost by the device.
    InvalidTrigger { sequence: u64 },
    /// Hard device loss; the driver attempts one stream restart.
    Disconnected,
}

/// Callback-side handle handed to a backend at stream arm time.
///
/// `emit` is the only operation: push the event and flip the matching
/// latch so the driver (and anything observing the camera group) wakes.
/// The camera id is read through a shared cell because topology
/// compaction can renumber the camera while its stream is armed.
#[derive(Clone)]
pub struct EventSink {
    tx: crossbeam_channel::Sender<CameraEvent>,
    fabric: Arc<SyncFabric>,
    camera_id: Arc<std::sync::atomic::AtomicUsize>,
}

impl EventSink {
    pub fn new(
        tx: crossbeam_channel::Sender<CameraEvent>,
        fabric: Arc<SyncFabric>,
        camera_id: Arc<std::sync::atomic::AtomicUsize>,
    ) -> Self {
        Self {
            tx,
            fabric,
            camera_id,
        }
    }

    pub fn camera_id(&self) -> usize {
        self.camera_id.load(std::sync::atomic::Ordering::Acquire)
    }

    pub fn emit(&self, event: CameraEvent) {
        let latch = match &event {
            CameraEvent::ExposureBegin { .. } => LatchName::CameraExposureBegin,
            CameraEvent::ExposureEnd { .. } => LatchName::CameraExposureEnd,
            CameraEvent::FrameReady { .. } => LatchName::CameraTransferEnd,
            CameraEvent::FrameSkipped { .. } => LatchName::CameraReadoutEnd,
            CameraEvent::InvalidTrigger { .. } => LatchName::CameraInvalidTrigger,
            CameraEvent::Disconnected => LatchName::CameraChangeId,
        };
        if self.tx.send(event).is_err() {
            // Driver gone; nothing left to wake.
            return;
        }
        let _ = self.fabric.set(LatchKey::new(latch, self.camera_id()));
    }
}

/// The five-operation capability interface every backend provides.
pub trait CameraBackend: Send {
    /// Stable identifier for the physical (or simulated) device.
    fn unique_identifier(&self) -> String;

    fn kind(&self) -> BackendKind;

    /// Apply software-trigger mode and exposure; the device may round the
    /// exposure and reports the value actually in force (µs).
    fn configure(&mut self, exposure_us: f64) -> Result<f64, CameraError>;

    /// Allocate `ring_buffers` stream buffers and begin streaming; frames
    /// and exposure progress are delivered through `sink`.
    fn arm_stream(&mut self, ring_buffers: usize, sink: EventSink) -> Result<(), CameraError>;

    /// Stop streaming and release the ring.
    fn stop_stream(&mut self) -> Result<(), CameraError>;

    /// Emit one software trigger tagged with the driver's `sequence`
    /// number. Non-blocking; `Ok` means the device accepted the trigger.
    fn trigger(&mut self, sequence: u64) -> Result<(), CameraError>;

    /// Re-read the input directory (from-file backend only).
    fn rescan_input_directory(&mut self) -> Result<(), CameraError> {
        Err(CameraError::Unsupported("rescan_input_directory"))
    }
}
