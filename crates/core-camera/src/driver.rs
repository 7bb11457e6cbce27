//! Per-camera driver thread.
//!
//! The driver consumes `camera.send_trigger`, fires the vendor trigger at
//! the scheduled instant, and turns vendor callbacks into frame records:
//! pop the expectation from the metadata queue, wait out the exposure,
//! pair the delivered frame in trigger order, copy it into the frame
//! store and release the presenter with `camera.ready`. Dropped and
//! invalid triggers re-raise `camera.repeat_trigger` so the presenter can
//! re-drive the pattern; repeated drops bump the per-camera timeout in
//! 50 ms steps up to a cap.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use core_frame::{FrameMetadata, FrameRecord, FrameStore, MetadataQueue};
use core_sync::{LatchKey, LatchName, SyncFabric, WaitOutcome};
use core_timing::stats::FrameStatistics;
use core_timing::units::RefreshTimebase;
use core_timing::{now_ticks, spin::SpinlockTimer};

use crate::{BackendKind, CameraBackend, CameraError, CameraEvent};

/// Timeout escalation step after a dropped frame.
const TIMEOUT_STEP: Duration = Duration::from_millis(50);
/// Upper bound for the escalated per-camera timeout.
const TIMEOUT_CAP: Duration = Duration::from_millis(1_000);

/// Driver construction parameters.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub camera_id: usize,
    pub projector_id: usize,
    /// Vendor stream ring depth.
    pub ring_buffers: usize,
    /// Initial per-trigger completion timeout.
    pub timeout: Duration,
    /// Initial exposure request in microseconds.
    pub exposure_us: f64,
}

impl DriverConfig {
    pub fn new(camera_id: usize, projector_id: usize) -> Self {
        Self {
            camera_id,
            projector_id,
            ring_buffers: 18,
            timeout: Duration::from_millis(500),
            exposure_us: 1_000.0,
        }
    }
}

/// Suggested exposure covering `k` whole refresh intervals, shaved by a
/// readout margin so the sensor is free before the next present.
pub fn exposure_from_refresh(refresh: &RefreshTimebase, k: f64) -> f64 {
    let period_us = refresh.period_ms() * 1_000.0;
    (k.max(1.0) * period_us - 500.0).max(100.0)
}

#[derive(Debug)]
struct DriverShared {
    /// Fabric member id; renumbered when topology compacts.
    camera_id: AtomicUsize,
    live_view: AtomicBool,
    batch: AtomicBool,
    timeout_us: AtomicU64,
    throttle_count: AtomicU64,
    failed: AtomicBool,
    exposure_us: Mutex<f64>,
    triggers_dispatched: AtomicU64,
    frames_delivered: AtomicU64,
    stats_trigger_duration: FrameStatistics,
    stats_trigger_frequency: FrameStatistics,
    stats_acquisition_duration: FrameStatistics,
}

/// Handle to a running camera driver.
pub struct CameraDriver {
    fabric: Arc<SyncFabric>,
    shared: Arc<DriverShared>,
    backend: Arc<Mutex<Box<dyn CameraBackend>>>,
    sink_id: Arc<AtomicUsize>,
    projector_id: usize,
    identifier: String,
    kind: BackendKind,
    handle: Option<JoinHandle<()>>,
}

impl CameraDriver {
    /// Configure the backend, arm its stream and spawn the driver thread.
    pub fn start(
        fabric: Arc<SyncFabric>,
        mut backend: Box<dyn CameraBackend>,
        metadata: Arc<MetadataQueue>,
        store: Arc<FrameStore>,
        config: DriverConfig,
    ) -> Result<Self, CameraError> {
        let identifier = backend.unique_identifier();
        let kind = backend.kind();
        let achieved = backend.configure(config.exposure_us)?;

        let (tx, rx) = crossbeam_channel::unbounded();
        let sink_id = Arc::new(AtomicUsize::new(config.camera_id));
        let sink = crate::EventSink::new(tx, Arc::clone(&fabric), Arc::clone(&sink_id));
        backend.arm_stream(config.ring_buffers, sink.clone())?;

        let shared = Arc::new(DriverShared {
            camera_id: AtomicUsize::new(config.camera_id),
            live_view: AtomicBool::new(true),
            batch: AtomicBool::new(false),
            timeout_us: AtomicU64::new(config.timeout.as_micros() as u64),
            throttle_count: AtomicU64::new(0),
            failed: AtomicBool::new(false),
            exposure_us: Mutex::new(achieved),
            triggers_dispatched: AtomicU64::new(0),
            frames_delivered: AtomicU64::new(0),
            stats_trigger_duration: FrameStatistics::new(),
            stats_trigger_frequency: FrameStatistics::new(),
            stats_acquisition_duration: FrameStatistics::new(),
        });

        let backend = Arc::new(Mutex::new(backend));
        let handle = {
            let worker = DriverWorker {
                fabric: Arc::clone(&fabric),
                shared: Arc::clone(&shared),
                backend: Arc::clone(&backend),
                metadata,
                store,
                rx,
                sink,
                ring_buffers: config.ring_buffers,
                inflight: VecDeque::new(),
                reorder: crate::ReorderBuffer::new(),
                next_sequence: 0,
                restart_attempted: false,
                timer: SpinlockTimer::new(),
            };
            std::thread::Builder::new()
                .name(format!("camera-driver-{}", config.camera_id))
                .spawn(move || worker.run())
                .map_err(CameraError::Spawn)?
        };

        Ok(Self {
            fabric,
            shared,
            backend,
            sink_id,
            projector_id: config.projector_id,
            identifier,
            kind,
            handle: Some(handle),
        })
    }

    pub fn camera_id(&self) -> usize {
        self.shared.camera_id.load(Ordering::Acquire)
    }

    /// Renumber this camera after a topology compaction. The fabric
    /// member must already answer at the new id.
    pub fn set_camera_id(&self, camera_id: usize) {
        self.shared.camera_id.store(camera_id, Ordering::Release);
        self.sink_id.store(camera_id, Ordering::Release);
        let _ = self
            .fabric
            .set(LatchKey::new(LatchName::CameraChangeId, camera_id));
    }

    pub fn projector_id(&self) -> usize {
        self.projector_id
    }

    pub fn unique_identifier(&self) -> &str {
        &self.identifier
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.kind
    }

    /// Request a new exposure; the backend may round. Returns the value in
    /// force.
    pub fn set_exposure(&self, exposure_us: f64) -> Result<f64, CameraError> {
        let achieved = self.backend.lock().configure(exposure_us)?;
        *self.shared.exposure_us.lock() = achieved;
        Ok(achieved)
    }

    pub fn exposure_us(&self) -> f64 {
        *self.shared.exposure_us.lock()
    }

    pub fn set_live_view(&self, enabled: bool) {
        self.shared.live_view.store(enabled, Ordering::Release);
    }

    pub fn live_view(&self) -> bool {
        self.shared.live_view.load(Ordering::Acquire)
    }

    pub fn set_batch(&self, batch: bool) {
        self.shared.batch.store(batch, Ordering::Release);
    }

    pub fn is_batch(&self) -> bool {
        self.shared.batch.load(Ordering::Acquire)
    }

    /// Re-read the input directory (from-file backend only).
    pub fn rescan_input_directory(&self) -> Result<(), CameraError> {
        self.backend.lock().rescan_input_directory()
    }

    /// Frames dropped to the throttle/skip path so far.
    pub fn throttle_count(&self) -> u64 {
        self.shared.throttle_count.load(Ordering::Relaxed)
    }

    /// Current (possibly escalated) per-trigger timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_micros(self.shared.timeout_us.load(Ordering::Relaxed))
    }

    /// Whether the driver hit a terminal device failure.
    pub fn has_failed(&self) -> bool {
        self.shared.failed.load(Ordering::Acquire)
    }

    pub fn triggers_dispatched(&self) -> u64 {
        self.shared.triggers_dispatched.load(Ordering::Relaxed)
    }

    pub fn frames_delivered(&self) -> u64 {
        self.shared.frames_delivered.load(Ordering::Relaxed)
    }

    pub fn trigger_duration_stats(&self) -> core_timing::stats::StatsSnapshot {
        self.shared.stats_trigger_duration.snapshot()
    }

    pub fn trigger_frequency_stats(&self) -> core_timing::stats::StatsSnapshot {
        self.shared.stats_trigger_frequency.snapshot()
    }

    pub fn acquisition_duration_stats(&self) -> core_timing::stats::StatsSnapshot {
        self.shared.stats_acquisition_duration.snapshot()
    }

    /// Signal termination and join the driver thread.
    pub fn stop(mut self) {
        self.stop_inner();
    }

    fn stop_inner(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self
                .fabric
                .set(LatchKey::new(LatchName::CameraTerminate, self.camera_id()));
            let _ = handle.join();
        }
    }
}

impl Drop for CameraDriver {
    fn drop(&mut self) {
        self.stop_inner();
    }
}

struct DriverWorker {
    fabric: Arc<SyncFabric>,
    shared: Arc<DriverShared>,
    backend: Arc<Mutex<Box<dyn CameraBackend>>>,
    metadata: Arc<MetadataQueue>,
    store: Arc<FrameStore>,
    rx: crossbeam_channel::Receiver<CameraEvent>,
    sink: crate::EventSink,
    ring_buffers: usize,
    /// Triggers dispatched but not yet paired with a frame, FIFO.
    inflight: VecDeque<(u64, FrameMetadata)>,
    reorder: crate::ReorderBuffer,
    next_sequence: u64,
    restart_attempted: bool,
    timer: SpinlockTimer,
}

impl DriverWorker {
    fn camera_id(&self) -> usize {
        self.shared.camera_id.load(Ordering::Acquire)
    }

    fn latch(&self, name: LatchName) -> LatchKey {
        LatchKey::new(name, self.camera_id())
    }

    fn run(mut self) {
        tracing::debug!(target: "camera.driver", camera_id = self.camera_id(), "driver thread started");

        loop {
            // Latch keys are rebuilt each pass: topology compaction can
            // renumber this camera through the shared id.
            let terminate = self.latch(LatchName::CameraTerminate);
            let send_trigger = self.latch(LatchName::CameraSendTrigger);
            let prepare = self.latch(LatchName::MainPrepareCamera);
            let transfer_end = self.latch(LatchName::CameraTransferEnd);
            let readout_end = self.latch(LatchName::CameraReadoutEnd);
            let change_id = self.latch(LatchName::CameraChangeId);

            self.drain_events();

            if self.shared.failed.load(Ordering::Acquire) {
                break;
            }
            if self
                .fabric
                .is_signalled(terminate)
                .unwrap_or(true)
            {
                break;
            }

            if self.fabric.is_signalled(prepare).unwrap_or(false) {
                let _ = self.fabric.reset(prepare);
                self.handle_prepare();
                continue;
            }

            if self.fabric.is_signalled(send_trigger).unwrap_or(false) {
                let _ = self.fabric.reset(send_trigger);
                self.process_trigger();
                continue;
            }

            match self.fabric.wait_any(
                &[terminate, send_trigger, prepare, transfer_end, readout_end, change_id],
                Some(Duration::from_millis(50)),
            ) {
                WaitOutcome::Signalled(key) if key == terminate => break,
                WaitOutcome::Signalled(key) if key == transfer_end || key == readout_end => {
                    let _ = self.fabric.reset(key);
                }
                WaitOutcome::Signalled(key) if key == change_id => {
                    let _ = self.fabric.reset(key);
                }
                WaitOutcome::Abandoned(key) => {
                    // Renumbered mid-wait; only a true removal ends the
                    // thread.
                    if self.camera_id() == key.id {
                        break;
                    }
                }
                _ => {}
            }
        }

        // Let an in-flight exposure finish on the device, then tear down.
        let _ = self.backend.lock().stop_stream();
        tracing::debug!(target: "camera.driver", camera_id = self.camera_id(), "driver thread stopped");
    }

    /// Batch preparation handshake: quiesce local state and ack.
    fn handle_prepare(&mut self) {
        if !self.inflight.is_empty() || self.reorder.staged_len() > 0 {
            tracing::warn!(
                target: "camera.driver",
                camera_id = self.camera_id(),
                inflight = self.inflight.len(),
                staged = self.reorder.staged_len(),
                "batch prepare with outstanding triggers"
            );
        }
        let _ = self.fabric.set(self.latch(LatchName::MainReadyCamera));
    }

    /// Drive one trigger end-to-end up to its exposure end.
    fn process_trigger(&mut self) {
        let Some(mut metadata) = self.metadata.pop_front() else {
            // A trigger with no expectation queued violates the pairing
            // invariant; surface it on the invalid-trigger path.
            tracing::error!(
                target: "camera.driver",
                camera_id = self.camera_id(),
                "send_trigger with empty metadata queue"
            );
            let _ = self.fabric.set(self.latch(LatchName::CameraInvalidTrigger));
            return;
        };

        let sequence = self.next_sequence;
        self.next_sequence += 1;

        // Deferred spin: in non-blocking mode the presenter scheduled the
        // trigger instant and moved on; the spin happens here.
        if metadata.trigger_scheduled > 0 {
            self.timer.wait_to(metadata.trigger_scheduled);
        }

        metadata.qpc_before_trigger = now_ticks();
        self.shared.stats_trigger_duration.tic();
        let trigger_result = self.backend.lock().trigger(sequence);
        self.shared.stats_trigger_duration.toc();
        metadata.qpc_after_trigger = now_ticks();

        self.shared.stats_trigger_frequency.add_frame();
        self.shared.triggers_dispatched.fetch_add(1, Ordering::Relaxed);

        if let Err(err) = trigger_result {
            tracing::warn!(
                target: "camera.driver",
                camera_id = self.camera_id(),
                sequence,
                error = %err,
                "vendor trigger rejected"
            );
            self.fail_trigger(sequence, Some(metadata), false);
            return;
        }

        self.inflight.push_back((sequence, metadata));

        // Await exposure end (or failure) for this trigger; frames from
        // earlier triggers may arrive meanwhile and are handled inline.
        let timeout = Duration::from_micros(self.shared.timeout_us.load(Ordering::Relaxed));
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                tracing::warn!(
                    target: "camera.driver",
                    camera_id = self.camera_id(),
                    sequence,
                    timeout_ms = timeout.as_millis() as u64,
                    "trigger timed out"
                );
                self.fail_trigger(sequence, None, true);
                return;
            }
            match self.rx.recv_timeout(remaining) {
                Ok(CameraEvent::ExposureBegin { sequence: s }) => {
                    if s == sequence {
                        let _ = self.fabric.set(self.latch(LatchName::CameraExposureBegin));
                    }
                }
                Ok(CameraEvent::ExposureEnd { sequence: s }) => {
                    if s == sequence {
                        let _ = self.fabric.set(self.latch(LatchName::CameraExposureEnd));
                        return;
                    }
                }
                Ok(CameraEvent::FrameReady { sequence: s, frame }) => {
                    self.handle_frame(s, frame);
                }
                Ok(CameraEvent::FrameSkipped { sequence: s }) => {
                    self.fail_trigger(s, None, true);
                    if s == sequence {
                        return;
                    }
                }
                Ok(CameraEvent::InvalidTrigger { sequence: s }) => {
                    self.fail_trigger(s, None, false);
                    if s == sequence {
                        return;
                    }
                }
                Ok(CameraEvent::Disconnected) => {
                    self.handle_disconnect();
                    return;
                }
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                    self.shared.failed.store(true, Ordering::Release);
                    return;
                }
            }
        }
    }

    /// Drain intake events accumulated while the driver was idle.
    fn drain_events(&mut self) {
        while let Ok(event) = self.rx.try_recv() {
            match event {
                CameraEvent::FrameReady { sequence, frame } => self.handle_frame(sequence, frame),
                CameraEvent::FrameSkipped { sequence } => self.fail_trigger(sequence, None, true),
                CameraEvent::InvalidTrigger { sequence } => {
                    self.fail_trigger(sequence, None, false)
                }
                CameraEvent::Disconnected => self.handle_disconnect(),
                CameraEvent::ExposureBegin { .. } | CameraEvent::ExposureEnd { .. } => {}
            }
        }
    }

    /// Pair a delivered frame with its queued expectation, in trigger
    /// order, and stage the record for persistence.
    fn handle_frame(&mut self, sequence: u64, frame: core_image::Bitmap) {
        if self.inflight.is_empty() {
            // Orphan callback: no outstanding expectation. Invalid-trigger
            // recovery path per the pairing invariant.
            tracing::error!(
                target: "camera.driver",
                camera_id = self.camera_id(),
                sequence,
                "orphan frame callback"
            );
            let _ = self.fabric.set(self.latch(LatchName::CameraInvalidTrigger));
            return;
        }

        self.reorder.insert(sequence, frame);

        while let Some((seq, frame)) = self.reorder.pop_in_order() {
            let Some((front_seq, metadata)) = self.inflight.pop_front() else {
                break;
            };
            if front_seq != seq {
                tracing::error!(
                    target: "camera.driver",
                    camera_id = self.camera_id(),
                    expected = front_seq,
                    got = seq,
                    "pairing desynchronized; dropping frame"
                );
                let _ = self.fabric.set(self.latch(LatchName::CameraInvalidTrigger));
                return;
            }

            let qpc_done = now_ticks();
            self.shared
                .stats_acquisition_duration
                .add_measurement(metadata.qpc_before_trigger, qpc_done);
            self.shared.frames_delivered.fetch_add(1, Ordering::Relaxed);

            let is_last = metadata.is_last();
            let keep = metadata.is_batch() || self.shared.live_view.load(Ordering::Acquire);
            if keep {
                self.store.push(FrameRecord::new(metadata, frame));
            }

            let _ = self.fabric.set(self.latch(LatchName::CameraReady));
            if is_last {
                let _ = self.fabric.set(self.latch(LatchName::MainEndCamera));
            }
        }
    }

    /// Failure path for a dropped or invalid trigger: discard the
    /// expectation, escalate the timeout on drops, and ask the presenter
    /// to re-drive.
    fn fail_trigger(&mut self, sequence: u64, unqueued: Option<FrameMetadata>, dropped: bool) {
        if unqueued.is_none() {
            if let Some(pos) = self.inflight.iter().position(|(s, _)| *s == sequence) {
                self.inflight.remove(pos);
            }
        }
        self.reorder.skip(sequence);

        if dropped {
            self.shared.throttle_count.fetch_add(1, Ordering::Relaxed);
            let current = self.shared.timeout_us.load(Ordering::Relaxed);
            let bumped =
                (current + TIMEOUT_STEP.as_micros() as u64).min(TIMEOUT_CAP.as_micros() as u64);
            self.shared.timeout_us.store(bumped, Ordering::Relaxed);
            tracing::debug!(
                target: "camera.driver",
                camera_id = self.camera_id(),
                sequence,
                timeout_ms = bumped / 1_000,
                "frame dropped; timeout escalated"
            );
        }

        let _ = self.fabric.set(self.latch(LatchName::CameraInvalidTrigger));
        let _ = self.fabric.set(self.latch(LatchName::CameraRepeatTrigger));
    }

    /// One stream restart is attempted; a second loss is terminal.
    fn handle_disconnect(&mut self) {
        if self.restart_attempted {
            tracing::error!(
                target: "camera.driver",
                camera_id = self.camera_id(),
                "camera disconnected twice; marking failed"
            );
            self.shared.failed.store(true, Ordering::Release);
            return;
        }
        self.restart_attempted = true;
        tracing::warn!(
            target: "camera.driver",
            camera_id = self.camera_id(),
            "camera disconnected; attempting stream restart"
        );
        let mut backend = self.backend.lock();
        let restart = backend
            .stop_stream()
            .and_then(|()| backend.arm_stream(self.ring_buffers, self.sink.clone()));
        if let Err(err) = restart {
            tracing::error!(
                target: "camera.driver",
                camera_id = self.camera_id(),
                error = %err,
                "stream restart failed"
            );
            self.shared.failed.store(true, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SoftwareCamera, SoftwareFault};
    use core_frame::FrameFlags;

    struct Rig {
        fabric: Arc<SyncFabric>,
        metadata: Arc<MetadataQueue>,
        store: Arc<FrameStore>,
        driver: CameraDriver,
        camera_id: usize,
    }

    fn rig_with(fault: &[(u64, SoftwareFault)]) -> Rig {
        let fabric = Arc::new(SyncFabric::new());
        let camera_id = fabric.add_camera();
        let encoder_id = fabric.add_encoder();
        let metadata = Arc::new(MetadataQueue::new());
        let store = Arc::new(FrameStore::new(Arc::clone(&fabric), encoder_id));

        let camera = SoftwareCamera::new("sim0", 16, 16);
        let script = camera.fault_script();
        for (seq, f) in fault {
            script.inject(*seq, *f);
        }
        let mut config = DriverConfig::new(camera_id, 0);
        config.exposure_us = 200.0;
        config.timeout = Duration::from_millis(250);
        let driver = CameraDriver::start(
            Arc::clone(&fabric),
            Box::new(camera),
            Arc::clone(&metadata),
            Arc::clone(&store),
            config,
        )
        .unwrap();

        Rig {
            fabric,
            metadata,
            store,
            driver,
            camera_id,
        }
    }

    fn dispatch(rig: &Rig, mut md: FrameMetadata) {
        md.camera_id = rig.camera_id;
        rig.metadata.push_back(md);
        rig.fabric
            .set(LatchKey::new(LatchName::CameraSendTrigger, rig.camera_id))
            .unwrap();
    }

    fn wait_latch(rig: &Rig, name: LatchName) -> bool {
        rig.fabric
            .wait(
                LatchKey::new(name, rig.camera_id),
                Some(Duration::from_secs(3)),
            )
            .is_signalled()
    }

    #[test]
    fn trigger_produces_store_record_and_ready() {
        let rig = rig_with(&[]);
        let mut md = FrameMetadata::new(0, 0, 3);
        md.flags |= FrameFlags::BATCH;
        let key = md.key;
        dispatch(&rig, md);

        assert!(wait_latch(&rig, LatchName::CameraReady));
        let record = rig.store.pop().expect("record staged");
        assert_eq!(record.metadata.key, key);
        assert_eq!(record.metadata.pattern_index, 3);
        assert!(record.metadata.qpc_before_trigger > 0);
        assert!(record.metadata.qpc_after_trigger >= record.metadata.qpc_before_trigger);
        assert_eq!(record.pixels.width, 16);
        assert_eq!(rig.driver.frames_delivered(), 1);
    }

    #[test]
    fn live_view_off_drops_non_batch_frames() {
        let rig = rig_with(&[]);
        rig.driver.set_live_view(false);
        dispatch(&rig, FrameMetadata::new(0, 0, 0));

        assert!(wait_latch(&rig, LatchName::CameraReady));
        assert_eq!(rig.store.total_items_remaining(), 0);
        // The frame was still counted as delivered.
        assert_eq!(rig.driver.frames_delivered(), 1);
    }

    #[test]
    fn invalid_trigger_raises_repeat() {
        let rig = rig_with(&[(0, SoftwareFault::InvalidTrigger)]);
        let mut md = FrameMetadata::new(0, 0, 4);
        md.flags |= FrameFlags::BATCH;
        dispatch(&rig, md);

        assert!(wait_latch(&rig, LatchName::CameraRepeatTrigger));
        assert!(rig
            .fabric
            .is_signalled(LatchKey::new(LatchName::CameraInvalidTrigger, rig.camera_id))
            .unwrap());
        assert_eq!(rig.store.total_items_remaining(), 0);

        // Recovery: clear the failure latches, re-drive, frame arrives.
        rig.fabric
            .reset(LatchKey::new(LatchName::CameraRepeatTrigger, rig.camera_id))
            .unwrap();
        rig.fabric
            .reset(LatchKey::new(LatchName::CameraInvalidTrigger, rig.camera_id))
            .unwrap();
        let mut md = FrameMetadata::new(0, 0, 4);
        md.flags |= FrameFlags::BATCH;
        md.retry = 1;
        dispatch(&rig, md);
        assert!(wait_latch(&rig, LatchName::CameraReady));
        let record = rig.store.pop().unwrap();
        assert_eq!(record.metadata.retry, 1);
    }

    #[test]
    fn dropped_frame_escalates_timeout() {
        let rig = rig_with(&[(0, SoftwareFault::FrameSkipped)]);
        let before = rig.driver.timeout();
        dispatch(&rig, FrameMetadata::new(0, 0, 0));

        assert!(wait_latch(&rig, LatchName::CameraRepeatTrigger));
        assert_eq!(rig.driver.throttle_count(), 1);
        assert_eq!(rig.driver.timeout(), before + TIMEOUT_STEP);
    }

    #[test]
    fn last_batch_frame_signals_main_end() {
        let rig = rig_with(&[]);
        let mut md = FrameMetadata::new(0, 0, 17);
        md.flags = FrameFlags::BATCH | FrameFlags::LAST;
        dispatch(&rig, md);

        assert!(wait_latch(&rig, LatchName::MainEndCamera));
        assert_eq!(rig.store.batch_items_remaining(), 1);
    }

    #[test]
    fn prepare_handshake_acks_ready() {
        let rig = rig_with(&[]);
        rig.fabric
            .set(LatchKey::new(LatchName::MainPrepareCamera, rig.camera_id))
            .unwrap();
        assert!(wait_latch(&rig, LatchName::MainReadyCamera));
    }

    #[test]
    fn stop_joins_cleanly() {
        let rig = rig_with(&[]);
        dispatch(&rig, FrameMetadata::new(0, 0, 0));
        assert!(wait_latch(&rig, LatchName::CameraReady));
        rig.driver.stop();
    }

    #[test]
    fn exposure_from_refresh_covers_whole_frames() {
        let refresh = RefreshTimebase::from_hz(60.0);
        let one = exposure_from_refresh(&refresh, 1.0);
        // One refresh interval minus the readout margin.
        assert!(one > 15_000.0 && one < 16_700.0, "exposure {one}");
        let two = exposure_from_refresh(&refresh, 2.0);
        assert!(two > one);
        // Degenerate inputs clamp to a usable floor.
        assert!(exposure_from_refresh(&refresh, 0.0) >= 100.0);
    }
}
