//! Concrete camera backends.
//!
//! [`SoftwareCamera`] simulates a software-triggered industrial sensor:
//! each trigger runs a scripted exposure on a sensor-owned thread and
//! delivers the synthesized frame through the event sink, exactly the way
//! a vendor SDK drives its callback thread. Faults (invalid trigger,
//! skipped frame, disconnect) are injectable per trigger sequence, which
//! is what the recovery paths are tested against.
//!
//! [`FromFileCamera`] replays a directory of images as if a sensor had
//! produced them; it backs the fully synthetic end-to-end configuration.
//!
//! The hardware families (Pylon, Sapera, Spinnaker, FlyCapture) construct
//! only when their SDK glue is linked in; without it the factory reports
//! [`CameraError::BackendUnavailable`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;

use core_image::{decode_png_file, Bitmap, FileList, PixelFormat};

use crate::{BackendKind, CameraBackend, CameraError, CameraEvent, EventSink};

/// Per-trigger fault scripted into a [`SoftwareCamera`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoftwareFault {
    /// The device rejects the trigger outright.
    InvalidTrigger,
    /// Exposure runs but the frame is lost on the link.
    FrameSkipped,
    /// The device drops off the bus after this trigger.
    Disconnect,
}

/// Shared fault script; cloneable so tests keep a handle after the
/// backend is boxed into the driver.
#[derive(Debug, Clone, Default)]
pub struct FaultScript {
    faults: Arc<Mutex<HashMap<u64, SoftwareFault>>>,
}

impl FaultScript {
    pub fn inject(&self, sequence: u64, fault: SoftwareFault) {
        self.faults.lock().insert(sequence, fault);
    }

    fn take(&self, sequence: u64) -> Option<SoftwareFault> {
        self.faults.lock().remove(&sequence)
    }
}

enum SensorCommand {
    Trigger { sequence: u64, exposure_us: f64 },
    Stop,
}

struct SensorWorker {
    tx: crossbeam_channel::Sender<SensorCommand>,
    handle: JoinHandle<()>,
}

/// Software-simulated sensor.
pub struct SoftwareCamera {
    identifier: String,
    width: u32,
    height: u32,
    exposure_us: f64,
    faults: FaultScript,
    worker: Option<SensorWorker>,
}

impl SoftwareCamera {
    /// Exposure granularity the simulated device rounds to.
    pub const EXPOSURE_STEP_US: f64 = 10.0;

    pub fn new(identifier: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            identifier: identifier.into(),
            width,
            height,
            exposure_us: 1_000.0,
            faults: FaultScript::default(),
            worker: None,
        }
    }

    /// Handle for scripting faults; valid before and after `arm_stream`.
    pub fn fault_script(&self) -> FaultScript {
        self.faults.clone()
    }

    fn synthesize_frame(width: u32, height: u32, sequence: u64) -> Bitmap {
        let mut frame = Bitmap::zeroed(width, height, PixelFormat::Gray8);
        // Cheap deterministic content: sequence-tinted gradient.
        let tint = (sequence & 0xff) as u8;
        for (row, chunk) in frame.data.chunks_exact_mut(width as usize).enumerate() {
            for (col, px) in chunk.iter_mut().enumerate() {
                *px = tint ^ ((row + col) & 0xff) as u8;
            }
        }
        frame
    }
}

impl CameraBackend for SoftwareCamera {
    fn unique_identifier(&self) -> String {
        self.identifier.clone()
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Software
    }

    fn configure(&mut self, exposure_us: f64) -> Result<f64, CameraError> {
        let stepped =
            (exposure_us.max(Self::EXPOSURE_STEP_US) / Self::EXPOSURE_STEP_US).round()
                * Self::EXPOSURE_STEP_US;
        self.exposure_us = stepped;
        Ok(stepped)
    }

    fn arm_stream(&mut self, _ring_buffers: usize, sink: EventSink) -> Result<(), CameraError> {
        if self.worker.is_some() {
            return Ok(());
        }
        let (tx, rx) = crossbeam_channel::unbounded();
        let faults = self.faults.clone();
        let (width, height) = (self.width, self.height);
        let identifier = self.identifier.clone();
        let handle = std::thread::Builder::new()
            .name(format!("software-sensor-{identifier}"))
            .spawn(move || {
                while let Ok(cmd) = rx.recv() {
                    match cmd {
                        SensorCommand::Stop => break,
                        SensorCommand::Trigger {
                            sequence,
                            exposure_us,
                        } => match faults.take(sequence) {
                            Some(SoftwareFault::InvalidTrigger) => {
                                sink.emit(CameraEvent::InvalidTrigger { sequence });
                            }
                            Some(SoftwareFault::Disconnect) => {
                                sink.emit(CameraEvent::Disconnected);
                            }
                            Some(SoftwareFault::FrameSkipped) => {
                                sink.emit(CameraEvent::ExposureBegin { sequence });
                                std::thread::sleep(Duration::from_micros(exposure_us as u64));
                                sink.emit(CameraEvent::ExposureEnd { sequence });
                                sink.emit(CameraEvent::FrameSkipped { sequence });
                            }
                            None => {
                                sink.emit(CameraEvent::ExposureBegin { sequence });
                                std::thread::sleep(Duration::from_micros(exposure_us as u64));
                                sink.emit(CameraEvent::ExposureEnd { sequence });
                                let frame = Self::synthesize_frame(width, height, sequence);
                                sink.emit(CameraEvent::FrameReady { sequence, frame });
                            }
                        },
                    }
                }
            })
            .map_err(CameraError::Spawn)?;
        self.worker = Some(SensorWorker { tx, handle });
        Ok(())
    }

    fn stop_stream(&mut self) -> Result<(), CameraError> {
        if let Some(worker) = self.worker.take() {
            let _ = worker.tx.send(SensorCommand::Stop);
            let _ = worker.handle.join();
        }
        Ok(())
    }

    fn trigger(&mut self, sequence: u64) -> Result<(), CameraError> {
        let worker = self.worker.as_ref().ok_or(CameraError::NotStreaming)?;
        worker
            .tx
            .send(SensorCommand::Trigger {
                sequence,
                exposure_us: self.exposure_us,
            })
            .map_err(|_| CameraError::Disconnected)
    }
}

impl Drop for SoftwareCamera {
    fn drop(&mut self) {
        let _ = self.stop_stream();
    }
}

/// Replay backend: frames come from a directory of PNG files, cycled.
pub struct FromFileCamera {
    identifier: String,
    file_list: Arc<Mutex<FileList>>,
    exposure_us: f64,
    worker: Option<SensorWorker>,
}

impl FromFileCamera {
    pub fn new(identifier: impl Into<String>, directory: &std::path::Path) -> Result<Self, CameraError> {
        Ok(Self {
            identifier: identifier.into(),
            file_list: Arc::new(Mutex::new(FileList::scan(directory)?)),
            exposure_us: 1_000.0,
            worker: None,
        })
    }
}

impl CameraBackend for FromFileCamera {
    fn unique_identifier(&self) -> String {
        self.identifier.clone()
    }

    fn kind(&self) -> BackendKind {
        BackendKind::FromFile
    }

    fn configure(&mut self, exposure_us: f64) -> Result<f64, CameraError> {
        self.exposure_us = exposure_us.max(0.0);
        Ok(self.exposure_us)
    }

    fn arm_stream(&mut self, _ring_buffers: usize, sink: EventSink) -> Result<(), CameraError> {
        if self.worker.is_some() {
            return Ok(());
        }
        let (tx, rx) = crossbeam_channel::unbounded();
        let file_list = Arc::clone(&self.file_list);
        let identifier = self.identifier.clone();
        let handle = std::thread::Builder::new()
            .name(format!("fromfile-sensor-{identifier}"))
            .spawn(move || {
                let mut cursor = 0usize;
                while let Ok(cmd) = rx.recv() {
                    match cmd {
                        SensorCommand::Stop => break,
                        SensorCommand::Trigger {
                            sequence,
                            exposure_us,
                        } => {
                            sink.emit(CameraEvent::ExposureBegin { sequence });
                            std::thread::sleep(Duration::from_micros(exposure_us as u64));
                            sink.emit(CameraEvent::ExposureEnd { sequence });

                            let path = {
                                let list = file_list.lock();
                                if list.is_empty() {
                                    None
                                } else {
                                    let index = cursor % list.len();
                                    cursor += 1;
                                    list.file_at(index).map(|p| p.to_path_buf())
                                }
                            };
                            match path.map(|p| decode_png_file(&p)) {
                                Some(Ok(frame)) => {
                                    sink.emit(CameraEvent::FrameReady { sequence, frame });
                                }
                                Some(Err(err)) => {
                                    tracing::warn!(
                                        target: "camera.fromfile",
                                        error = %err,
                                        "replay decode failed"
                                    );
                                    sink.emit(CameraEvent::FrameSkipped { sequence });
                                }
                                None => {
                                    sink.emit(CameraEvent::FrameSkipped { sequence });
                                }
                            }
                        }
                    }
                }
            })
            .map_err(CameraError::Spawn)?;
        self.worker = Some(SensorWorker { tx, handle });
        Ok(())
    }

    fn stop_stream(&mut self) -> Result<(), CameraError> {
        if let Some(worker) = self.worker.take() {
            let _ = worker.tx.send(SensorCommand::Stop);
            let _ = worker.handle.join();
        }
        Ok(())
    }

    fn trigger(&mut self, sequence: u64) -> Result<(), CameraError> {
        let worker = self.worker.as_ref().ok_or(CameraError::NotStreaming)?;
        worker
            .tx
            .send(SensorCommand::Trigger {
                sequence,
                exposure_us: self.exposure_us,
            })
            .map_err(|_| CameraError::Disconnected)
    }

    fn rescan_input_directory(&mut self) -> Result<(), CameraError> {
        self.file_list.lock().rescan()?;
        Ok(())
    }
}

impl Drop for FromFileCamera {
    fn drop(&mut self) {
        let _ = self.stop_stream();
    }
}

/// Backend construction parameters.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub identifier: String,
    /// Sensor geometry for the simulated backend.
    pub width: u32,
    pub height: u32,
    /// Input directory for the from-file backend.
    pub directory: Option<PathBuf>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            identifier: "camera".to_string(),
            width: 640,
            height: 480,
            directory: None,
        }
    }
}

/// Construct a backend of the requested kind.
pub fn create_backend(
    kind: BackendKind,
    config: &BackendConfig,
) -> Result<Box<dyn CameraBackend>, CameraError> {
    match kind {
        BackendKind::Software => Ok(Box::new(SoftwareCamera::new(
            config.identifier.clone(),
            config.width,
            config.height,
        ))),
        BackendKind::FromFile => {
            let directory = config
                .directory
                .as_deref()
                .ok_or(CameraError::Unsupported("from-file backend needs a directory"))?;
            Ok(Box::new(FromFileCamera::new(
                config.identifier.clone(),
                directory,
            )?))
        }
        other => Err(CameraError::BackendUnavailable(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_sync::SyncFabric;

    fn sink() -> (EventSink, crossbeam_channel::Receiver<CameraEvent>) {
        let fabric = Arc::new(SyncFabric::new());
        let camera_id = fabric.add_camera();
        let (tx, rx) = crossbeam_channel::unbounded();
        let id = Arc::new(std::sync::atomic::AtomicUsize::new(camera_id));
        (EventSink::new(tx, fabric, id), rx)
    }

    #[test]
    fn software_trigger_delivers_exposure_then_frame() {
        let mut cam = SoftwareCamera::new("sim0", 8, 8);
        cam.configure(200.0).unwrap();
        let (sink, rx) = sink();
        cam.arm_stream(18, sink).unwrap();
        cam.trigger(0).unwrap();

        let deadline = Duration::from_secs(2);
        assert!(matches!(
            rx.recv_timeout(deadline).unwrap(),
            CameraEvent::ExposureBegin { sequence: 0 }
        ));
        assert!(matches!(
            rx.recv_timeout(deadline).unwrap(),
            CameraEvent::ExposureEnd { sequence: 0 }
        ));
        match rx.recv_timeout(deadline).unwrap() {
            CameraEvent::FrameReady { sequence, frame } => {
                assert_eq!(sequence, 0);
                assert_eq!(frame.width, 8);
                assert_eq!(frame.format, PixelFormat::Gray8);
            }
            other => panic!("expected frame, got {other:?}"),
        }
        cam.stop_stream().unwrap();
    }

    #[test]
    fn scripted_invalid_trigger_fires_instead_of_frame() {
        let mut cam = SoftwareCamera::new("sim0", 8, 8);
        let script = cam.fault_script();
        script.inject(0, SoftwareFault::InvalidTrigger);
        let (sink, rx) = sink();
        cam.arm_stream(18, sink).unwrap();
        cam.trigger(0).unwrap();
        assert!(matches!(
            rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            CameraEvent::InvalidTrigger { sequence: 0 }
        ));
        // Next trigger is clean.
        cam.trigger(1).unwrap();
        assert!(matches!(
            rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            CameraEvent::ExposureBegin { sequence: 1 }
        ));
        cam.stop_stream().unwrap();
    }

    #[test]
    fn exposure_rounds_to_device_step() {
        let mut cam = SoftwareCamera::new("sim0", 8, 8);
        assert_eq!(cam.configure(1_234.0).unwrap(), 1_230.0);
        assert_eq!(cam.configure(3.0).unwrap(), SoftwareCamera::EXPOSURE_STEP_US);
    }

    #[test]
    fn trigger_without_stream_is_rejected() {
        let mut cam = SoftwareCamera::new("sim0", 8, 8);
        assert!(matches!(cam.trigger(0), Err(CameraError::NotStreaming)));
    }

    #[test]
    fn hardware_kinds_report_unavailable() {
        for kind in [
            BackendKind::Pylon,
            BackendKind::Sapera,
            BackendKind::Spinnaker,
            BackendKind::FlyCapture,
        ] {
            assert!(matches!(
                create_backend(kind, &BackendConfig::default()),
                Err(CameraError::BackendUnavailable(k)) if k == kind
            ));
        }
    }

    #[test]
    fn from_file_replays_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("000.png");
        let file = std::fs::File::create(&path).unwrap();
        let mut encoder = png::Encoder::new(std::io::BufWriter::new(file), 2, 2);
        encoder.set_color(png::ColorType::Grayscale);
        encoder.set_depth(png::BitDepth::Eight);
        encoder
            .write_header()
            .unwrap()
            .write_image_data(&[7, 7, 7, 7])
            .unwrap();

        let mut cam = FromFileCamera::new("file0", dir.path()).unwrap();
        cam.configure(50.0).unwrap();
        let (sink, rx) = sink();
        cam.arm_stream(4, sink).unwrap();
        cam.trigger(0).unwrap();

        let mut saw_frame = false;
        for _ in 0..3 {
            if let CameraEvent::FrameReady { frame, .. } =
                rx.recv_timeout(Duration::from_secs(2)).unwrap()
            {
                assert_eq!(frame.data, vec![7, 7, 7, 7]);
                saw_frame = true;
                break;
            }
        }
        assert!(saw_frame);
        cam.stop_stream().unwrap();
    }
}
