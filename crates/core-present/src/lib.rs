//! Per-projector presenter.
//!
//! The presenter is the projector's thread: it pulls decoded patterns
//! from the pattern queue, presents each aligned to a VBLANK boundary,
//! computes the trigger instant for every attached camera and hands the
//! trigger off (or spins it out itself in blocking mode), then waits for
//! the cameras to come back ready before the next step. Mode changes —
//! continuous preview versus deterministic batch — arrive as latch
//! signals from the coordinator and drive the state machine in
//! [`PresenterState`].

mod machine;

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use core_camera::CameraDriver;
use core_display::timebase::DisplayTimebase;
use core_display::DisplaySurface;
use core_frame::{FrameStore, MetadataQueue};
use core_pattern::PatternDecoder;
use core_sync::{LatchKey, LatchName, SyncFabric};
use core_timing::stats::FrameStatistics;
use core_timing::units::{RefreshTimebase, FALLBACK_REFRESH_HZ};

/// Presenter lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenterState {
    Idle,
    ContinuousReady,
    Continuous,
    PreparingBatch,
    Batching,
    Draining,
}

/// Why a batch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Every step completed (possibly with retry-exhausted bookkeeping
    /// records).
    Completed,
    /// The pattern queue starved a batch step beyond two refresh periods.
    MissingPattern,
    /// A camera stopped answering within the step deadline.
    CameraTimeout,
    /// Termination was requested mid-batch.
    Terminated,
    /// The display device was lost and could not be recreated.
    DisplayLost,
}

/// One camera attached to a presenter.
#[derive(Clone)]
pub struct CameraBinding {
    pub camera_id: usize,
    pub driver: Arc<CameraDriver>,
    pub metadata: Arc<MetadataQueue>,
    pub store: Arc<FrameStore>,
}

/// State shared between the presenter thread and its handle.
pub(crate) struct PresenterShared {
    /// Fabric member id; renumbered when topology compacts.
    pub(crate) projector_id: AtomicUsize,
    pub(crate) timebase: Mutex<DisplayTimebase>,
    pub(crate) cameras: RwLock<Vec<CameraBinding>>,
    pub(crate) state: Mutex<PresenterState>,
    pub(crate) last_batch_outcome: Mutex<Option<BatchOutcome>>,

    pub(crate) save_png: AtomicBool,
    pub(crate) save_raw: AtomicBool,
    /// Simultaneous-batch lockstep across presenters.
    pub(crate) synchronize: AtomicBool,
    pub(crate) sync_projectors: AtomicUsize,
    /// Step count imposed on the next batch (0 = own sequence length).
    /// Simultaneous batches set this to the longest participating
    /// sequence; shorter projectors pad with black presents.
    pub(crate) batch_steps_override: AtomicI64,
    pub(crate) failed: AtomicBool,

    pub(crate) present_counter: AtomicI64,
    pub(crate) vblank_counter: AtomicI64,
    pub(crate) skipped_frames: AtomicU64,

    pub(crate) pending_fullscreen: Mutex<Option<bool>>,

    pub(crate) stats_render: FrameStatistics,
    pub(crate) stats_present: FrameStatistics,
    pub(crate) stats_present_frequency: FrameStatistics,
    pub(crate) stats_vblank_wait: FrameStatistics,
}

/// Presenter construction parameters.
pub struct PresenterConfig {
    pub projector_id: usize,
    /// Coordinator group member owning the `draw_sync_*` latches.
    pub coordinator_id: usize,
    pub delay_ms: f64,
    pub present_interval_vblanks: i64,
    pub blocking: bool,
    pub save_png: bool,
    pub save_raw: bool,
}

impl PresenterConfig {
    pub fn new(projector_id: usize, coordinator_id: usize) -> Self {
        Self {
            projector_id,
            coordinator_id,
            delay_ms: 0.0,
            present_interval_vblanks: 1,
            blocking: true,
            save_png: true,
            save_raw: false,
        }
    }
}

/// Handle to a running presenter thread.
pub struct Presenter {
    fabric: Arc<SyncFabric>,
    shared: Arc<PresenterShared>,
    decoder: Arc<PatternDecoder>,
    handle: Option<JoinHandle<()>>,
}

impl Presenter {
    /// Spawn the presenter thread. The display surface moves into the
    /// thread; it is owned exclusively there from now on.
    pub fn start(
        fabric: Arc<SyncFabric>,
        surface: Box<dyn DisplaySurface>,
        decoder: Arc<PatternDecoder>,
        config: PresenterConfig,
    ) -> Self {
        // The refresh timebase is re-queried on the presenter thread; start
        // from the fallback so the timebase is never uninitialized.
        let mut timebase = DisplayTimebase::new(RefreshTimebase::from_hz(FALLBACK_REFRESH_HZ));
        timebase.set_delay_ms(config.delay_ms);
        timebase.set_present_interval_vblanks(config.present_interval_vblanks);
        timebase.set_blocking(config.blocking);

        let shared = Arc::new(PresenterShared {
            projector_id: AtomicUsize::new(config.projector_id),
            timebase: Mutex::new(timebase),
            cameras: RwLock::new(Vec::new()),
            state: Mutex::new(PresenterState::Idle),
            last_batch_outcome: Mutex::new(None),
            save_png: AtomicBool::new(config.save_png),
            save_raw: AtomicBool::new(config.save_raw),
            synchronize: AtomicBool::new(false),
            sync_projectors: AtomicUsize::new(0),
            batch_steps_override: AtomicI64::new(0),
            failed: AtomicBool::new(false),
            present_counter: AtomicI64::new(0),
            vblank_counter: AtomicI64::new(0),
            skipped_frames: AtomicU64::new(0),
            pending_fullscreen: Mutex::new(None),
            stats_render: FrameStatistics::new(),
            stats_present: FrameStatistics::new(),
            stats_present_frequency: FrameStatistics::new(),
            stats_vblank_wait: FrameStatistics::new(),
        });

        let handle = {
            let machine = machine::Machine::new(
                Arc::clone(&fabric),
                Arc::clone(&shared),
                Arc::clone(&decoder),
                surface,
                config.projector_id,
                config.coordinator_id,
            );
            std::thread::Builder::new()
                .name(format!("presenter-{}", config.projector_id))
                .spawn(move || machine.run())
                .expect("spawn presenter thread")
        };

        Self {
            fabric,
            shared,
            decoder,
            handle: Some(handle),
        }
    }

    pub fn projector_id(&self) -> usize {
        self.shared.projector_id.load(Ordering::Acquire)
    }

    /// Renumber this presenter after a topology compaction. The fabric
    /// member must already answer at the new id; the decoder follows so
    /// freshly minted descriptors carry the right projector.
    pub fn set_projector_id(&self, projector_id: usize) {
        self.shared.projector_id.store(projector_id, Ordering::Release);
        self.decoder.set_projector_id(projector_id);
        let _ = self
            .fabric
            .set(LatchKey::new(LatchName::DrawChangeId, projector_id));
    }

    /// Rebind an attached camera after cameras were renumbered.
    pub fn renumber_camera(&self, old_id: usize, new_id: usize) {
        for binding in self.shared.cameras.write().iter_mut() {
            if binding.camera_id == old_id {
                binding.camera_id = new_id;
            }
        }
    }

    pub fn decoder(&self) -> &Arc<PatternDecoder> {
        &self.decoder
    }

    pub fn state(&self) -> PresenterState {
        *self.shared.state.lock()
    }

    pub fn last_batch_outcome(&self) -> Option<BatchOutcome> {
        *self.shared.last_batch_outcome.lock()
    }

    pub fn has_failed(&self) -> bool {
        self.shared.failed.load(Ordering::Acquire)
    }

    pub fn present_counter(&self) -> i64 {
        self.shared.present_counter.load(Ordering::Relaxed)
    }

    pub fn vblank_counter(&self) -> i64 {
        self.shared.vblank_counter.load(Ordering::Relaxed)
    }

    pub fn skipped_frames(&self) -> u64 {
        self.shared.skipped_frames.load(Ordering::Relaxed)
    }

    // -----------------------------------------------------------------
    // Camera attachment
    // -----------------------------------------------------------------

    pub fn attach_camera(&self, binding: CameraBinding) {
        self.shared.cameras.write().push(binding);
    }

    /// Detach a camera; outstanding expectations for it are discarded.
    pub fn detach_camera(&self, camera_id: usize) -> bool {
        let mut cameras = self.shared.cameras.write();
        let before = cameras.len();
        cameras.retain(|binding| {
            if binding.camera_id == camera_id {
                binding.metadata.clear();
                false
            } else {
                true
            }
        });
        cameras.len() != before
    }

    pub fn have_cameras(&self) -> bool {
        !self.shared.cameras.read().is_empty()
    }

    pub fn camera_count(&self) -> usize {
        self.shared.cameras.read().len()
    }

    pub fn camera_ids(&self) -> Vec<usize> {
        self.shared.cameras.read().iter().map(|b| b.camera_id).collect()
    }

    /// Largest exposure among attached cameras, in microseconds.
    pub fn max_exposure_us(&self) -> f64 {
        self.shared
            .cameras
            .read()
            .iter()
            .map(|b| b.driver.exposure_us())
            .fold(0.0, f64::max)
    }

    pub fn set_live_view_for_cameras(&self, enabled: bool) {
        for binding in self.shared.cameras.read().iter() {
            binding.driver.set_live_view(enabled);
        }
    }

    pub fn set_batch_for_cameras(&self, batch: bool) {
        for binding in self.shared.cameras.read().iter() {
            binding.driver.set_batch(batch);
        }
    }

    // -----------------------------------------------------------------
    // Configuration
    // -----------------------------------------------------------------

    /// Update the present-to-trigger delay for blocking mode.
    pub fn set_delay_blocking(&self, delay_ms: f64) {
        let mut tb = self.shared.timebase.lock();
        tb.set_delay_ms(delay_ms);
        tb.set_blocking(true);
    }

    /// Update delay and present period for non-blocking mode; the
    /// (whole, fractional) decomposition is recomputed.
    pub fn set_delay_nonblocking(&self, delay_ms: f64) {
        let mut tb = self.shared.timebase.lock();
        tb.set_delay_ms(delay_ms);
        tb.set_blocking(false);
    }

    pub fn set_present_interval(&self, vblanks: i64) {
        self.shared.timebase.lock().set_present_interval_vblanks(vblanks);
    }

    pub fn delay_ms(&self) -> f64 {
        self.shared.timebase.lock().delay_us() / 1_000.0
    }

    /// Refresh rate the presenter is currently scheduling against.
    pub fn refresh_hz(&self) -> f64 {
        self.shared.timebase.lock().refresh().rate_hz()
    }

    pub fn is_blocking(&self) -> bool {
        self.shared.timebase.lock().blocking()
    }

    /// Batch-mode flags, applied by the coordinator during the ready
    /// window. Returns the effective concurrent-delay setting.
    pub fn configure_batch(
        &self,
        blocking: bool,
        concurrent_delay: bool,
        fixed: bool,
        num_acquire: i64,
    ) -> bool {
        let max_exposure = self.max_exposure_us();
        let mut tb = self.shared.timebase.lock();
        tb.set_blocking(blocking);
        tb.set_exposure_us(max_exposure);
        tb.set_fixed(fixed);
        tb.set_num_acquire(num_acquire);
        tb.set_concurrent_delay(concurrent_delay)
    }

    /// Arm (or disarm) multi-projector lockstep for a simultaneous batch.
    pub fn set_synchronize(&self, enabled: bool, projectors: usize) {
        self.shared.sync_projectors.store(projectors, Ordering::Release);
        self.shared.synchronize.store(enabled, Ordering::Release);
    }

    /// Impose a step count on the next batch (simultaneous batches use
    /// the longest participating sequence; shorter projectors pad with
    /// black presents). Zero restores the projector's own length.
    pub fn set_batch_steps(&self, steps: i64) {
        self.shared.batch_steps_override.store(steps.max(0), Ordering::Release);
    }

    pub fn set_save_png(&self, save: bool) {
        self.shared.save_png.store(save, Ordering::Release);
    }

    pub fn set_save_raw(&self, save: bool) {
        self.shared.save_raw.store(save, Ordering::Release);
    }

    pub fn set_fullscreen(&self, fullscreen: bool) {
        *self.shared.pending_fullscreen.lock() = Some(fullscreen);
        let _ = self
            .fabric
            .set(LatchKey::new(LatchName::DrawChangeId, self.projector_id()));
    }

    pub fn rescan_input_directory(&self) -> Result<usize, core_image::ImageError> {
        self.decoder.rescan_input_directory()
    }

    // -----------------------------------------------------------------
    // Statistics
    // -----------------------------------------------------------------

    pub fn render_stats(&self) -> core_timing::stats::StatsSnapshot {
        self.shared.stats_render.snapshot()
    }

    pub fn present_stats(&self) -> core_timing::stats::StatsSnapshot {
        self.shared.stats_present.snapshot()
    }

    pub fn present_frequency_stats(&self) -> core_timing::stats::StatsSnapshot {
        self.shared.stats_present_frequency.snapshot()
    }

    pub fn vblank_wait_stats(&self) -> core_timing::stats::StatsSnapshot {
        self.shared.stats_vblank_wait.snapshot()
    }

    /// Signal termination and join, waiting out the current operation.
    pub fn stop(mut self, _timeout: Duration) {
        self.stop_inner();
    }

    fn stop_inner(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self
                .fabric
                .set(LatchKey::new(LatchName::DrawTerminate, self.projector_id()));
            let _ = handle.join();
        }
    }
}

impl Drop for Presenter {
    fn drop(&mut self) {
        self.stop_inner();
    }
}
