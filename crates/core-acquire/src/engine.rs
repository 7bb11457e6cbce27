//! Engine ownership and topology verbs.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use core_camera::{create_backend, BackendConfig, BackendKind, CameraDriver, DriverConfig};
use core_display::DisplaySurface;
use core_frame::{FrameStore, MetadataQueue};
use core_image::FileList;
use core_pattern::{DecoderOptions, PatternDecoder, PatternQueue};
use core_persist::{
    CameraManifest, OutputLayout, PersistenceWorker, ProjectorManifest, SessionManifest,
};
use core_present::{CameraBinding, Presenter, PresenterConfig, PresenterState};
use core_sync::{GroupKind, LatchKey, LatchName, SyncFabric};

use crate::coordinator::BatchOptions;
use crate::AcquireError;

/// How long verbs wait for a presenter to reach a requested state.
const VERB_DEADLINE: Duration = Duration::from_secs(5);

/// Engine construction parameters.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub output_root: PathBuf,
    pub session: String,
    pub sl_method: String,
    pub save_png: bool,
    pub save_raw: bool,
    pub queue_low_watermark: usize,
    pub queue_high_watermark: usize,
    pub delay_ms: f64,
    pub present_interval_vblanks: i64,
    pub blocking: bool,
    pub exposure_us: f64,
    pub concurrent_delay: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("./data"),
            session: "session".to_string(),
            sl_method: "psgc_col".to_string(),
            save_png: true,
            save_raw: false,
            queue_low_watermark: 9,
            queue_high_watermark: 18,
            delay_ms: 0.0,
            present_interval_vblanks: 1,
            blocking: true,
            exposure_us: 10_000.0,
            concurrent_delay: false,
        }
    }
}

pub(crate) struct ProjectorUnit {
    pub(crate) presenter: Arc<Presenter>,
}

pub(crate) struct CameraUnit {
    pub(crate) driver: Arc<CameraDriver>,
    pub(crate) metadata: Arc<MetadataQueue>,
    pub(crate) store: Arc<FrameStore>,
    pub(crate) worker: Arc<PersistenceWorker>,
    pub(crate) projector_id: usize,
}

/// Reported projector state for the control surface.
#[derive(Debug, Clone)]
pub struct ProjectorInfo {
    pub id: usize,
    pub state: PresenterState,
    pub camera_ids: Vec<usize>,
    pub present_counter: i64,
    pub vblank_counter: i64,
    pub skipped_frames: u64,
    pub sequence_len: usize,
    pub failed: bool,
}

/// Reported camera state for the control surface.
#[derive(Debug, Clone)]
pub struct CameraInfo {
    pub id: usize,
    pub projector_id: usize,
    pub backend: BackendKind,
    pub identifier: String,
    pub exposure_us: f64,
    pub triggers_dispatched: u64,
    pub frames_delivered: u64,
    pub throttle_count: u64,
    /// Triggers dispatched but not yet paired with a frame.
    pub outstanding_triggers: usize,
    pub store_total_remaining: usize,
    pub store_batch_remaining: i64,
    pub failed: bool,
}

/// The acquisition engine: owner of fabric, topology and workers.
///
/// Verbs are meant to be driven from a single control thread (the
/// original operator loop); they are individually thread-safe but
/// concurrent topology mutation is not a supported usage.
pub struct Engine {
    pub(crate) fabric: Arc<SyncFabric>,
    pub(crate) coordinator_id: usize,
    pub(crate) layout: Arc<Mutex<OutputLayout>>,
    pub(crate) projectors: RwLock<Vec<ProjectorUnit>>,
    pub(crate) cameras: RwLock<Vec<CameraUnit>>,
    pub(crate) options: EngineOptions,
    pub(crate) batch_options: Mutex<BatchOptions>,
    pub(crate) batch_active: AtomicBool,
    pub(crate) batch_poisoned: AtomicBool,
}

impl Engine {
    pub fn new(options: EngineOptions) -> Self {
        let fabric = Arc::new(SyncFabric::new());
        let coordinator_id = fabric.add_coordinator();
        let layout = Arc::new(Mutex::new(OutputLayout::new(
            options.output_root.clone(),
            options.session.clone(),
        )));
        let batch_options = Mutex::new(BatchOptions {
            blocking: options.blocking,
            concurrent_delay: options.concurrent_delay,
            fixed: false,
            num_acquire: 1,
        });
        Self {
            fabric,
            coordinator_id,
            layout,
            projectors: RwLock::new(Vec::new()),
            cameras: RwLock::new(Vec::new()),
            options,
            batch_options,
            batch_active: AtomicBool::new(false),
            batch_poisoned: AtomicBool::new(false),
        }
    }

    pub fn fabric(&self) -> &Arc<SyncFabric> {
        &self.fabric
    }

    pub fn coordinator_id(&self) -> usize {
        self.coordinator_id
    }

    pub fn projector_count(&self) -> usize {
        self.projectors.read().len()
    }

    pub fn camera_count(&self) -> usize {
        self.cameras.read().len()
    }

    pub(crate) fn presenter(&self, projector_id: usize) -> Result<Arc<Presenter>, AcquireError> {
        self.projectors
            .read()
            .get(projector_id)
            .map(|unit| Arc::clone(&unit.presenter))
            .ok_or(AcquireError::NoSuchProjector(projector_id))
    }

    fn is_stopped(presenter: &Presenter) -> bool {
        matches!(
            presenter.state(),
            PresenterState::Idle | PresenterState::ContinuousReady
        )
    }

    fn ensure_stopped(&self, projector_id: usize) -> Result<(), AcquireError> {
        let presenter = self.presenter(projector_id)?;
        if !Self::is_stopped(&presenter) {
            return Err(AcquireError::ProjectorRunning(projector_id));
        }
        Ok(())
    }

    fn ensure_no_batch(&self) -> Result<(), AcquireError> {
        if self.batch_active.load(Ordering::Acquire) {
            return Err(AcquireError::BatchActive);
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Topology
    // -----------------------------------------------------------------

    /// Add a projector: allocates dense fabric ids, spawns the pattern
    /// decoder and the presenter on the given display surface.
    pub fn add_projector(
        &self,
        surface: Box<dyn DisplaySurface>,
        pattern_directory: &Path,
        cycle: bool,
    ) -> Result<usize, AcquireError> {
        self.ensure_no_batch()?;

        let projector_id = self.fabric.add_projector();
        let decoder_id = self.fabric.add_decoder();
        debug_assert_eq!(projector_id, decoder_id);

        let file_list = FileList::scan(pattern_directory)?;
        let queue = Arc::new(PatternQueue::with_watermarks(
            Arc::clone(&self.fabric),
            decoder_id,
            self.options.queue_low_watermark,
            self.options.queue_high_watermark,
        ));
        let decoder = Arc::new(PatternDecoder::start(
            Arc::clone(&self.fabric),
            decoder_id,
            projector_id,
            file_list,
            queue,
            DecoderOptions { cycle },
        ));

        let mut config = PresenterConfig::new(projector_id, self.coordinator_id);
        config.delay_ms = self.options.delay_ms;
        config.present_interval_vblanks = self.options.present_interval_vblanks;
        config.blocking = self.options.blocking;
        config.save_png = self.options.save_png;
        config.save_raw = self.options.save_raw;

        let presenter = Arc::new(Presenter::start(
            Arc::clone(&self.fabric),
            surface,
            decoder,
            config,
        ));

        self.projectors.write().push(ProjectorUnit { presenter });
        self.batch_poisoned.store(false, Ordering::Release);
        tracing::info!(target: "acquire.engine", projector_id, "projector added");
        Ok(projector_id)
    }

    /// Remove a projector. Requires the projector stopped, its cameras
    /// already removed, and — because the last slot is swapped into the
    /// hole — the last projector stopped as well.
    pub fn remove_projector(&self, projector_id: usize) -> Result<(), AcquireError> {
        self.ensure_no_batch()?;
        self.ensure_stopped(projector_id)?;

        if self
            .cameras
            .read()
            .iter()
            .any(|cam| cam.projector_id == projector_id)
        {
            return Err(AcquireError::CamerasAttached(projector_id));
        }

        let mut projectors = self.projectors.write();
        if projector_id >= projectors.len() {
            return Err(AcquireError::NoSuchProjector(projector_id));
        }
        let last = projectors.len() - 1;
        if last != projector_id && !Self::is_stopped(&projectors[last].presenter) {
            return Err(AcquireError::ProjectorRunning(last));
        }

        // Tear the removed unit down at its current id, then compact.
        let unit = projectors.swap_remove(projector_id);
        drop(unit);

        if last != projector_id {
            // Renumber the moved unit before its latch block moves, so the
            // abandoned-wait wakeup already sees the new id.
            let moved = &projectors[projector_id];
            moved.presenter.set_projector_id(projector_id);
            moved.presenter.decoder().set_decoder_id(projector_id);
            for camera in self.cameras.write().iter_mut() {
                if camera.projector_id == last {
                    camera.projector_id = projector_id;
                }
            }
        }
        drop(projectors);

        self.fabric.remove_member(GroupKind::Projector, projector_id)?;
        self.fabric.remove_member(GroupKind::Decoder, projector_id)?;
        self.batch_poisoned.store(false, Ordering::Release);
        tracing::info!(target: "acquire.engine", projector_id, "projector removed");
        Ok(())
    }

    /// Attach a camera to a (stopped) projector.
    pub fn add_camera(
        &self,
        projector_id: usize,
        backend_kind: BackendKind,
        backend_config: &BackendConfig,
    ) -> Result<usize, AcquireError> {
        self.ensure_no_batch()?;
        self.ensure_stopped(projector_id)?;
        let presenter = self.presenter(projector_id)?;

        let camera_id = self.fabric.add_camera();
        let encoder_id = self.fabric.add_encoder();
        debug_assert_eq!(camera_id, encoder_id);

        let backend = match create_backend(backend_kind, backend_config) {
            Ok(backend) => backend,
            Err(err) => {
                // Unwind the fabric allocations; nothing was spawned yet.
                let _ = self.fabric.remove_member(GroupKind::Camera, camera_id);
                let _ = self.fabric.remove_member(GroupKind::Encoder, encoder_id);
                return Err(err.into());
            }
        };

        let metadata = Arc::new(MetadataQueue::new());
        let store = Arc::new(FrameStore::new(Arc::clone(&self.fabric), encoder_id));

        let mut driver_config = DriverConfig::new(camera_id, projector_id);
        driver_config.exposure_us = self.options.exposure_us;
        let driver = match CameraDriver::start(
            Arc::clone(&self.fabric),
            backend,
            Arc::clone(&metadata),
            Arc::clone(&store),
            driver_config,
        ) {
            Ok(driver) => Arc::new(driver),
            Err(err) => {
                let _ = self.fabric.remove_member(GroupKind::Camera, camera_id);
                let _ = self.fabric.remove_member(GroupKind::Encoder, encoder_id);
                return Err(err.into());
            }
        };

        let worker = Arc::new(PersistenceWorker::start(
            Arc::clone(&self.fabric),
            encoder_id,
            camera_id,
            Arc::clone(&store),
            Arc::clone(&self.layout),
        ));

        presenter.attach_camera(CameraBinding {
            camera_id,
            driver: Arc::clone(&driver),
            metadata: Arc::clone(&metadata),
            store: Arc::clone(&store),
        });

        self.cameras.write().push(CameraUnit {
            driver,
            metadata,
            store,
            worker,
            projector_id,
        });
        self.batch_poisoned.store(false, Ordering::Release);
        tracing::info!(target: "acquire.engine", camera_id, projector_id, "camera added");
        Ok(camera_id)
    }

    /// Detach and tear down a camera. Requires its projector stopped (and
    /// the projector of the swapped-in last camera, when different).
    pub fn remove_camera(&self, camera_id: usize) -> Result<(), AcquireError> {
        self.ensure_no_batch()?;

        let mut cameras = self.cameras.write();
        if camera_id >= cameras.len() {
            return Err(AcquireError::NoSuchCamera(camera_id));
        }
        let owner = cameras[camera_id].projector_id;
        drop(cameras);
        self.ensure_stopped(owner)?;

        let mut cameras = self.cameras.write();
        let last = cameras.len() - 1;
        if last != camera_id {
            let moved_owner = cameras[last].projector_id;
            drop(cameras);
            self.ensure_stopped(moved_owner)?;
            cameras = self.cameras.write();
        }

        // Unbind from the presenter first so no new expectations appear.
        self.presenter(owner)?.detach_camera(camera_id);

        let unit = cameras.swap_remove(camera_id);
        drop(unit);

        if last != camera_id {
            let moved = &cameras[camera_id];
            moved.driver.set_camera_id(camera_id);
            moved.store.set_encoder_id(camera_id);
            moved.worker.set_encoder_id(camera_id);
            let moved_owner = moved.projector_id;
            drop(cameras);
            self.presenter(moved_owner)?.renumber_camera(last, camera_id);
        } else {
            drop(cameras);
        }

        self.fabric.remove_member(GroupKind::Camera, camera_id)?;
        self.fabric.remove_member(GroupKind::Encoder, camera_id)?;
        self.batch_poisoned.store(false, Ordering::Release);
        tracing::info!(target: "acquire.engine", camera_id, "camera removed");
        Ok(())
    }

    // -----------------------------------------------------------------
    // Continuous mode
    // -----------------------------------------------------------------

    /// Begin continuous preview on a projector: wait for the presenter's
    /// ready handshake, re-enable live view and raise the present gate.
    pub fn start_continuous(&self, projector_id: usize) -> Result<(), AcquireError> {
        self.ensure_no_batch()?;
        let presenter = self.presenter(projector_id)?;

        let ready = LatchKey::new(LatchName::PresentReady, projector_id);
        if !self.fabric.wait(ready, Some(VERB_DEADLINE)).is_signalled() {
            return Err(AcquireError::Timeout("present_ready"));
        }
        presenter.set_live_view_for_cameras(true);
        presenter.decoder().set_cycle(true);
        self.fabric.set(LatchKey::new(LatchName::Present, projector_id))?;
        Ok(())
    }

    /// Stop continuous preview. Idempotent: stopping a stopped projector
    /// is a no-op.
    pub fn stop_continuous(&self, projector_id: usize) -> Result<(), AcquireError> {
        let presenter = self.presenter(projector_id)?;
        self.fabric
            .reset(LatchKey::new(LatchName::Present, projector_id))?;

        let deadline = Instant::now() + VERB_DEADLINE;
        while presenter.state() == PresenterState::Continuous {
            if Instant::now() >= deadline {
                return Err(AcquireError::Timeout("continuous stop"));
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Configuration verbs
    // -----------------------------------------------------------------

    pub fn set_delay_blocking(&self, projector_id: usize, delay_ms: f64) -> Result<(), AcquireError> {
        self.ensure_stopped(projector_id)?;
        self.presenter(projector_id)?.set_delay_blocking(delay_ms);
        Ok(())
    }

    pub fn set_delay_nonblocking(
        &self,
        projector_id: usize,
        delay_ms: f64,
    ) -> Result<(), AcquireError> {
        self.ensure_stopped(projector_id)?;
        self.presenter(projector_id)?.set_delay_nonblocking(delay_ms);
        Ok(())
    }

    pub fn set_present_interval(
        &self,
        projector_id: usize,
        vblanks: i64,
    ) -> Result<(), AcquireError> {
        self.ensure_stopped(projector_id)?;
        self.presenter(projector_id)?.set_present_interval(vblanks);
        Ok(())
    }

    /// Set a camera's exposure; the backend may round. Valid only while
    /// the owning projector is stopped.
    pub fn set_exposure(&self, camera_id: usize, exposure_us: f64) -> Result<f64, AcquireError> {
        let cameras = self.cameras.read();
        let unit = cameras
            .get(camera_id)
            .ok_or(AcquireError::NoSuchCamera(camera_id))?;
        let owner = unit.projector_id;
        let driver = Arc::clone(&unit.driver);
        drop(cameras);
        self.ensure_stopped(owner)?;
        Ok(driver.set_exposure(exposure_us)?)
    }

    pub fn set_save_png(&self, save: bool) {
        for unit in self.projectors.read().iter() {
            unit.presenter.set_save_png(save);
        }
    }

    pub fn set_save_raw(&self, save: bool) {
        for unit in self.projectors.read().iter() {
            unit.presenter.set_save_raw(save);
        }
    }

    pub fn set_fullscreen(&self, projector_id: usize, fullscreen: bool) -> Result<(), AcquireError> {
        self.presenter(projector_id)?.set_fullscreen(fullscreen);
        Ok(())
    }

    pub fn rescan_input_directory(&self, projector_id: usize) -> Result<usize, AcquireError> {
        self.ensure_stopped(projector_id)?;
        Ok(self.presenter(projector_id)?.rescan_input_directory()?)
    }

    pub fn set_session(&self, session: &str) {
        self.layout.lock().set_session(session);
    }

    /// Directory of the active recording (timestamped per batch).
    pub fn recording_dir(&self) -> PathBuf {
        self.layout.lock().recording_dir()
    }

    pub fn set_batch_options(&self, options: BatchOptions) -> Result<(), AcquireError> {
        self.ensure_no_batch()?;
        *self.batch_options.lock() = options;
        Ok(())
    }

    // -----------------------------------------------------------------
    // Reporting
    // -----------------------------------------------------------------

    pub fn projector_info(&self, projector_id: usize) -> Result<ProjectorInfo, AcquireError> {
        let presenter = self.presenter(projector_id)?;
        Ok(ProjectorInfo {
            id: projector_id,
            state: presenter.state(),
            camera_ids: presenter.camera_ids(),
            present_counter: presenter.present_counter(),
            vblank_counter: presenter.vblank_counter(),
            skipped_frames: presenter.skipped_frames(),
            sequence_len: presenter.decoder().sequence_len(),
            failed: presenter.has_failed(),
        })
    }

    pub fn camera_info(&self, camera_id: usize) -> Result<CameraInfo, AcquireError> {
        let cameras = self.cameras.read();
        let unit = cameras
            .get(camera_id)
            .ok_or(AcquireError::NoSuchCamera(camera_id))?;
        Ok(CameraInfo {
            id: camera_id,
            projector_id: unit.projector_id,
            backend: unit.driver.backend_kind(),
            identifier: unit.driver.unique_identifier().to_string(),
            exposure_us: unit.driver.exposure_us(),
            triggers_dispatched: unit.driver.triggers_dispatched(),
            frames_delivered: unit.driver.frames_delivered(),
            throttle_count: unit.driver.throttle_count(),
            outstanding_triggers: unit.metadata.len(),
            store_total_remaining: unit.store.total_items_remaining(),
            store_batch_remaining: unit.store.batch_items_remaining(),
            failed: unit.driver.has_failed(),
        })
    }

    /// Remaining batch records across every camera's frame store; the
    /// backpressure figure the control surface reports after a batch.
    pub fn batch_items_remaining(&self) -> i64 {
        self.cameras
            .read()
            .iter()
            .map(|unit| unit.store.batch_items_remaining())
            .sum()
    }

    /// Block until every frame store has drained to disk.
    pub fn wait_for_persistence(&self, timeout: Duration) -> Result<(), AcquireError> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining: usize = self
                .cameras
                .read()
                .iter()
                .map(|unit| unit.store.total_items_remaining())
                .sum();
            if remaining == 0 {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(AcquireError::Timeout("persistence drain"));
            }
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    /// Write the session manifest describing the current rig into the
    /// active recording directory.
    pub fn write_manifest(&self) -> Result<(), AcquireError> {
        let layout = self.layout.lock();
        let mut manifest = SessionManifest::new(
            layout.session(),
            layout.recording(),
            self.options.sl_method.clone(),
        );
        for (id, unit) in self.projectors.read().iter().enumerate() {
            manifest.projectors.push(ProjectorManifest {
                id,
                refresh_hz: unit.presenter.refresh_hz(),
                delay_ms: unit.presenter.delay_ms(),
                present_interval_vblanks: self.options.present_interval_vblanks,
            });
        }
        for (id, unit) in self.cameras.read().iter().enumerate() {
            manifest.cameras.push(CameraManifest {
                id,
                projector_id: unit.projector_id,
                backend: unit.driver.backend_kind().as_str().to_string(),
                identifier: unit.driver.unique_identifier().to_string(),
                exposure_us: unit.driver.exposure_us(),
            });
        }
        manifest.write_to(&layout.recording_dir())?;
        Ok(())
    }

    /// Orderly shutdown: stop continuous everywhere, then drop every
    /// worker (each drop joins its thread).
    pub fn shutdown(self) {
        for (id, _) in self.projectors.read().iter().enumerate() {
            let _ = self.fabric.reset(LatchKey::new(LatchName::Present, id));
        }
        // Dropping the tables tears presenters, drivers and workers down;
        // their Drop impls signal terminate latches and join.
        drop(self.cameras);
        drop(self.projectors);
        tracing::info!(target: "acquire.engine", "engine shut down");
    }
}
