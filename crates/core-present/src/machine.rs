//! Presenter thread state machine.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use core_display::{DisplayError, DisplaySurface, PresentInfo};
use core_frame::{FrameFlags, FrameMetadata, FrameRecord};
use core_image::{solid_bitmap, Bitmap};
use core_pattern::{PatternDecoder, PatternDescriptor, PatternPayload, MAX_PATTERN_RETRIES};
use core_sync::{LatchKey, LatchName, SyncFabric, WaitOutcome};
use core_timing::spin::SpinlockTimer;
use core_timing::units::{RefreshTimebase, FALLBACK_REFRESH_HZ};
use core_timing::{now_ticks, us_to_ticks, Ticks};

use crate::{BatchOutcome, CameraBinding, PresenterShared, PresenterState};

/// Backstop for camera acknowledgement per step; the driver's own timeout
/// escalation is bounded well below this.
const CAMERA_STEP_DEADLINE: Duration = Duration::from_secs(3);
/// Backstop for the cross-presenter rendezvous latches.
const SYNC_DEADLINE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepResult {
    AllReady,
    Repeat,
    Timeout,
    Terminate,
}

pub(crate) struct Machine {
    fabric: Arc<SyncFabric>,
    shared: Arc<PresenterShared>,
    decoder: Arc<PatternDecoder>,
    surface: Box<dyn DisplaySurface>,
    coordinator_id: usize,
    timer: SpinlockTimer,
    last_present_qpc: Ticks,
    /// Projector resolution for rendering solid fills.
    surface_dims: (u32, u32),
}

impl Machine {
    pub(crate) fn new(
        fabric: Arc<SyncFabric>,
        shared: Arc<PresenterShared>,
        decoder: Arc<PatternDecoder>,
        surface: Box<dyn DisplaySurface>,
        projector_id: usize,
        coordinator_id: usize,
    ) -> Self {
        shared.projector_id.store(projector_id, Ordering::Release);
        Self {
            fabric,
            shared,
            decoder,
            surface,
            coordinator_id,
            timer: SpinlockTimer::new(),
            last_present_qpc: 0,
            surface_dims: (0, 0),
        }
    }

    fn projector_id(&self) -> usize {
        self.shared.projector_id.load(Ordering::Acquire)
    }

    fn proj(&self, name: LatchName) -> LatchKey {
        LatchKey::new(name, self.projector_id())
    }

    fn coord(&self, name: LatchName) -> LatchKey {
        LatchKey::new(name, self.coordinator_id)
    }

    fn set_state(&self, state: PresenterState) {
        *self.shared.state.lock() = state;
        tracing::debug!(target: "present.machine", projector_id = self.projector_id(), ?state, "state");
    }

    fn terminated(&self) -> bool {
        self.fabric
            .is_signalled(self.proj(LatchName::DrawTerminate))
            .unwrap_or(true)
    }

    fn period_ticks(&self) -> Ticks {
        self.shared.timebase.lock().refresh().period_ticks()
    }

    pub(crate) fn run(mut self) {
        // Idle → ContinuousReady: adopt the display's refresh clock, fall
        // back to 60 Hz when the query fails.
        let refresh = match self.surface.refresh_period() {
            Ok(refresh) => refresh,
            Err(err) => {
                tracing::warn!(
                    target: "present.machine",
                    projector_id = self.projector_id(),
                    error = %err,
                    "refresh rate query failed; assuming 60 Hz"
                );
                RefreshTimebase::from_hz(FALLBACK_REFRESH_HZ)
            }
        };
        self.shared.timebase.lock().set_refresh(refresh);
        if let Some(mode) = self.surface.enumerate_modes().first() {
            self.surface_dims = (mode.width, mode.height);
        }

        self.set_state(PresenterState::ContinuousReady);
        let _ = self.fabric.set(self.proj(LatchName::PresentReady));
        let _ = self.fabric.set(self.proj(LatchName::RenderReady));

        loop {
            // Keys rebuilt each pass: topology compaction can renumber
            // this projector through the shared id.
            let terminate = self.proj(LatchName::DrawTerminate);
            let present = self.proj(LatchName::Present);
            let prepare = self.proj(LatchName::MainPrepareDraw);
            let change_id = self.proj(LatchName::DrawChangeId);

            match self
                .fabric
                .wait_any(&[terminate, prepare, present, change_id], None)
            {
                WaitOutcome::Signalled(key) if key == terminate => break,
                WaitOutcome::Signalled(key) if key == change_id => {
                    let _ = self.fabric.reset(change_id);
                    self.apply_pending_commands();
                }
                WaitOutcome::Signalled(key) if key == prepare => {
                    if !self.batch_cycle() {
                        break;
                    }
                }
                WaitOutcome::Signalled(key) if key == present => {
                    if !self.run_continuous() {
                        break;
                    }
                }
                WaitOutcome::Abandoned(key) => {
                    // Renumbered mid-wait; only a true removal ends the
                    // thread.
                    if self.projector_id() == key.id {
                        break;
                    }
                }
                _ => {}
            }
        }

        self.set_state(PresenterState::Idle);
        tracing::debug!(target: "present.machine", projector_id = self.projector_id(), "presenter thread stopped");
    }

    fn apply_pending_commands(&mut self) {
        if let Some(fullscreen) = self.shared.pending_fullscreen.lock().take() {
            if let Err(err) = self.surface.set_fullscreen(fullscreen) {
                tracing::warn!(
                    target: "present.machine",
                    projector_id = self.projector_id(),
                    error = %err,
                    "fullscreen change failed"
                );
            }
        }
    }

    // -----------------------------------------------------------------
    // Continuous (preview) mode
    // -----------------------------------------------------------------

    /// Returns false when the presenter must shut down.
    fn run_continuous(&mut self) -> bool {
        self.set_state(PresenterState::Continuous);
        let present = self.proj(LatchName::Present);
        let prepare = self.proj(LatchName::MainPrepareDraw);

        loop {
            if self.terminated() || self.shared.failed.load(Ordering::Acquire) {
                self.set_state(PresenterState::ContinuousReady);
                return !self.shared.failed.load(Ordering::Acquire);
            }
            // The coordinator pauses continuous mode by clearing `present`
            // and enters batch preparation by raising `main_prepare_draw`.
            if self.fabric.is_signalled(prepare).unwrap_or(false) {
                self.set_state(PresenterState::ContinuousReady);
                return self.batch_cycle();
            }
            if !self.fabric.is_signalled(present).unwrap_or(false) {
                self.set_state(PresenterState::ContinuousReady);
                return true;
            }

            self.continuous_step();
        }
    }

    fn continuous_step(&mut self) {
        let period = self.period_ticks();
        let Some(descriptor) = self.dequeue_with_deadline(2 * period) else {
            return;
        };

        let Some((_info, _slipped)) = self.present_pattern(&descriptor) else {
            return;
        };
        let _ = self.fabric.set(self.proj(LatchName::RenderReady));

        let has_cameras = !self.shared.cameras.read().is_empty();
        if has_cameras && !descriptor.skip_acquisition {
            match self.schedule_and_wait_triggers(&descriptor, false, false) {
                StepResult::AllReady | StepResult::Terminate => {}
                StepResult::Repeat => {
                    // Continuous mode drops transient failures silently.
                    self.clear_camera_failure_latches();
                }
                StepResult::Timeout => {
                    tracing::warn!(
                        target: "present.machine",
                        projector_id = self.projector_id(),
                        "camera acknowledgement timed out in continuous mode"
                    );
                }
            }
        }
    }

    // -----------------------------------------------------------------
    // Batch mode
    // -----------------------------------------------------------------

    /// Full coordinator handshake: prepare → ready → (begin batch | resume).
    /// Returns false when the presenter must shut down.
    fn batch_cycle(&mut self) -> bool {
        let _ = self.fabric.reset(self.proj(LatchName::MainPrepareDraw));
        self.set_state(PresenterState::PreparingBatch);

        // Pause the refill cycle and rewind so the batch covers the
        // sequence deterministically from its first pattern.
        self.decoder.set_cycle(false);
        self.decoder.restart_sequence();

        let bindings: Vec<CameraBinding> = self.shared.cameras.read().clone();
        self.drain_outstanding(&bindings);

        for binding in &bindings {
            binding.driver.set_live_view(false);
            binding.driver.set_batch(true);
            let _ = self
                .fabric
                .set(LatchKey::new(LatchName::MainPrepareCamera, binding.camera_id));
        }
        for binding in &bindings {
            let ready = LatchKey::new(LatchName::MainReadyCamera, binding.camera_id);
            if !self
                .fabric
                .wait(ready, Some(CAMERA_STEP_DEADLINE))
                .is_signalled()
            {
                tracing::warn!(
                    target: "present.machine",
                    projector_id = self.projector_id(),
                    camera_id = binding.camera_id,
                    "camera did not acknowledge batch preparation"
                );
            }
            let _ = self.fabric.reset(ready);
        }

        let _ = self.fabric.set(self.proj(LatchName::MainReadyDraw));

        let terminate = self.proj(LatchName::DrawTerminate);
        let begin = self.proj(LatchName::MainBegin);
        let resume = self.proj(LatchName::MainResumeDraw);

        match self.fabric.wait_any(&[terminate, begin, resume], None) {
            WaitOutcome::Signalled(key) if key == begin => {
                let _ = self.fabric.reset(begin);
                self.set_state(PresenterState::Batching);
                let outcome = self.run_batch(&bindings);
                *self.shared.last_batch_outcome.lock() = Some(outcome);
                tracing::info!(
                    target: "present.machine",
                    projector_id = self.projector_id(),
                    ?outcome,
                    "batch finished"
                );

                self.set_state(PresenterState::Draining);
                self.drain_outstanding(&bindings);
                let _ = self.fabric.set(self.proj(LatchName::MainEndDraw));

                match self.fabric.wait_any(&[terminate, resume], None) {
                    WaitOutcome::Signalled(key) if key == resume => {
                        let _ = self.fabric.reset(resume);
                    }
                    _ => return false,
                }
            }
            WaitOutcome::Signalled(key) if key == resume => {
                let _ = self.fabric.reset(resume);
            }
            _ => return false,
        }

        self.set_state(PresenterState::ContinuousReady);
        let _ = self.fabric.set(self.proj(LatchName::PresentReady));
        true
    }

    fn run_batch(&mut self, bindings: &[CameraBinding]) -> BatchOutcome {
        let (fixed, num_acquire) = {
            let tb = self.shared.timebase.lock();
            (tb.fixed(), tb.num_acquire())
        };
        let sequence_len = self.decoder.sequence_len() as i64;
        let override_steps = self.shared.batch_steps_override.load(Ordering::Acquire);
        let steps = if fixed {
            num_acquire
        } else if override_steps > 0 {
            override_steps.max(sequence_len)
        } else {
            sequence_len
        };
        if steps == 0 {
            return BatchOutcome::Completed;
        }
        // Fixed patterns loosen cross-projector synchronization.
        let synchronize = self.shared.synchronize.load(Ordering::Acquire) && !fixed;
        if synchronize {
            tracing::debug!(
                target: "present.machine",
                projector_id = self.projector_id(),
                participants = self.shared.sync_projectors.load(Ordering::Acquire),
                steps,
                "entering lockstepped batch"
            );
        }
        let period = self.period_ticks();
        let has_cameras = !bindings.is_empty();

        let mut held: Option<PatternDescriptor> = None;
        let mut step: i64 = 0;

        while step < steps {
            if self.terminated() {
                return BatchOutcome::Terminated;
            }

            let mut descriptor = if fixed {
                if held.is_none() {
                    held = self.dequeue_with_deadline(2 * period);
                }
                match &held {
                    Some(d) => d.clone(),
                    None => return BatchOutcome::MissingPattern,
                }
            } else if step >= sequence_len {
                // Imposed step count past our own sequence: black padding,
                // presented but never acquired.
                PatternDescriptor::black_padding(step as u64, step as u32, self.projector_id())
            } else {
                match self.dequeue_indexed(step as u32, 2 * period) {
                    Some(d) => d,
                    None => return BatchOutcome::MissingPattern,
                }
            };

            if synchronize {
                self.fabric
                    .rendezvous(self.coord(LatchName::DrawSyncPresent), Some(SYNC_DEADLINE));
            }

            let Some((_info, slipped)) = self.present_pattern(&descriptor) else {
                return BatchOutcome::DisplayLost;
            };

            if synchronize {
                self.fabric
                    .rendezvous(self.coord(LatchName::DrawSyncVblank), Some(SYNC_DEADLINE));
            }

            // A display slip during a batch invalidates the step's timing;
            // re-present instead of triggering against a stale present.
            if slipped && !descriptor.skip_acquisition && descriptor.retry < MAX_PATTERN_RETRIES {
                // Close this round's trigger rendezvous before aborting the
                // step: every participant arrives at all three barriers
                // exactly once per round, so the re-present starts a fresh,
                // balanced round instead of leaving the counters offset.
                if synchronize {
                    self.fabric.rendezvous(
                        self.coord(LatchName::DrawSyncTriggers),
                        Some(SYNC_DEADLINE),
                    );
                }
                descriptor.retry += 1;
                if fixed {
                    held = Some(descriptor);
                } else {
                    self.decoder.queue().push_front(descriptor);
                }
                continue;
            }

            if !has_cameras || descriptor.skip_acquisition {
                // Padding and skip steps still arrive at the trigger
                // rendezvous so lockstepped projectors count every step.
                if synchronize {
                    self.fabric.rendezvous(
                        self.coord(LatchName::DrawSyncTriggers),
                        Some(SYNC_DEADLINE),
                    );
                }
                step += 1;
                continue;
            }

            // Padding steps never acquire, so "last" means the final step
            // of this projector's own sequence.
            let last = if fixed {
                step == steps - 1
            } else {
                step == sequence_len - 1
            };
            match self.schedule_and_wait_triggers(&descriptor, true, last) {
                StepResult::AllReady => {
                    step += 1;
                }
                StepResult::Repeat => {
                    self.clear_camera_failure_latches();
                    if descriptor.retry < MAX_PATTERN_RETRIES {
                        descriptor.retry += 1;
                        tracing::warn!(
                            target: "present.machine",
                            projector_id = self.projector_id(),
                            pattern_index = descriptor.index,
                            retry = descriptor.retry,
                            "re-presenting pattern after failed trigger"
                        );
                        if fixed {
                            held = Some(descriptor);
                        } else {
                            self.decoder.queue().push_front(descriptor);
                        }
                    } else {
                        // Permanently failed: keep the batch going and leave
                        // an unacquired bookkeeping record per camera.
                        tracing::error!(
                            target: "present.machine",
                            projector_id = self.projector_id(),
                            pattern_index = descriptor.index,
                            "pattern failed after retry exhaustion"
                        );
                        for binding in bindings {
                            let md =
                                self.mint_metadata(&descriptor, binding, true, last, 0, 0.0);
                            binding.store.push(FrameRecord::unacquired(md));
                        }
                        step += 1;
                    }
                }
                StepResult::Timeout => return BatchOutcome::CameraTimeout,
                StepResult::Terminate => return BatchOutcome::Terminated,
            }
        }

        BatchOutcome::Completed
    }

    // -----------------------------------------------------------------
    // Present + trigger plumbing
    // -----------------------------------------------------------------

    fn render_bitmap(&self, descriptor: &PatternDescriptor) -> Bitmap {
        match &descriptor.payload {
            PatternPayload::Bitmap { bitmap, .. } => (**bitmap).clone(),
            PatternPayload::Solid(color) => {
                let (w, h) = self.surface_dims;
                solid_bitmap(*color, w.max(1), h.max(1))
            }
        }
    }

    /// Present one pattern; returns `(info, slipped)` or `None` after an
    /// unrecoverable display loss.
    fn present_pattern(&mut self, descriptor: &PatternDescriptor) -> Option<(PresentInfo, bool)> {
        self.shared.stats_render.tic();
        let bitmap = self.render_bitmap(descriptor);
        self.shared.stats_render.toc();

        let interval = self.shared.timebase.lock().present_interval_vblanks().max(1);

        // Align to the target VBLANK boundary first, then queue the frame
        // onto it; the present interval burns additional whole boundaries.
        self.shared.stats_vblank_wait.tic();
        for _ in 1..interval {
            if self.surface.wait_for_vblank().is_err() {
                break;
            }
        }
        self.shared.stats_vblank_wait.toc();

        self.shared.stats_present.tic();
        let result = self.surface.present(&bitmap, 1);
        self.shared.stats_present.toc();

        let info = match result {
            Ok(info) => info,
            Err(DisplayError::DeviceRemoved) => {
                // One swap-chain recreation, then give up.
                tracing::warn!(
                    target: "present.machine",
                    projector_id = self.projector_id(),
                    "display device removed; attempting recreate"
                );
                if self.surface.recreate().is_err() {
                    self.fail_display();
                    return None;
                }
                match self.surface.present(&bitmap, 1) {
                    Ok(info) => info,
                    Err(_) => {
                        self.fail_display();
                        return None;
                    }
                }
            }
            Err(err) => {
                tracing::error!(
                    target: "present.machine",
                    projector_id = self.projector_id(),
                    error = %err,
                    "present failed"
                );
                self.fail_display();
                return None;
            }
        };

        self.shared.stats_present_frequency.add_frame();
        self.shared.present_counter.fetch_add(1, Ordering::Relaxed);
        self.shared
            .vblank_counter
            .store(info.vblank_count, Ordering::Relaxed);

        let period = self.period_ticks();
        let mut slipped = false;
        if self.last_present_qpc > 0 {
            let gap = info.present_qpc - self.last_present_qpc;
            let budget = self.shared.timebase.lock().step_budget_ticks().max(period);
            // One refresh interval of tolerance on top of the step budget:
            // a present that misses its scheduled boundary by a whole
            // VBLANK counts as skipped (in plain continuous mode the
            // threshold is exactly two refresh periods).
            if gap > budget + period {
                self.shared.skipped_frames.fetch_add(1, Ordering::Relaxed);
                slipped = true;
            }
        }
        self.last_present_qpc = info.present_qpc;

        Some((info, slipped))
    }

    fn fail_display(&mut self) {
        tracing::error!(
            target: "present.machine",
            projector_id = self.projector_id(),
            "display lost; presenter stopping"
        );
        self.shared.failed.store(true, Ordering::Release);
        let _ = self.fabric.set(self.proj(LatchName::DrawTerminate));
    }

    fn mint_metadata(
        &self,
        descriptor: &PatternDescriptor,
        binding: &CameraBinding,
        batch: bool,
        last: bool,
        scheduled: Ticks,
        delay_us: f64,
    ) -> FrameMetadata {
        let tb = self.shared.timebase.lock();
        let mut md = FrameMetadata::new(self.projector_id(), binding.camera_id, descriptor.index);
        md.filename = if tb.fixed() {
            // Fixed acquisitions repeat one index; the key keeps filenames
            // distinct across repeats.
            format!("{:03}_{}_{}", descriptor.index, descriptor.filename_stem, md.key)
        } else {
            format!("{:03}_{}", descriptor.index, descriptor.filename_stem)
        };
        if batch {
            md.flags |= FrameFlags::BATCH;
        }
        if tb.fixed() {
            md.flags |= FrameFlags::FIXED;
        }
        if last {
            md.flags |= FrameFlags::LAST;
        }
        if tb.blocking() {
            md.flags |= FrameFlags::BLOCKING;
        }
        md.retry = descriptor.retry;
        md.trigger_scheduled = scheduled;
        md.delay_us = delay_us;
        md.exposure_us = binding.driver.exposure_us();
        // Live-view frames feed the preview path only; persistence flags
        // apply to batch records.
        md.save_png = batch && self.shared.save_png.load(Ordering::Acquire);
        md.save_raw = batch && self.shared.save_raw.load(Ordering::Acquire);
        md
    }

    /// Push expectations, dispatch triggers for this present, and wait for
    /// every attached camera to come back ready.
    fn schedule_and_wait_triggers(
        &mut self,
        descriptor: &PatternDescriptor,
        batch: bool,
        last: bool,
    ) -> StepResult {
        let bindings: Vec<CameraBinding> = self.shared.cameras.read().clone();
        if bindings.is_empty() {
            return StepResult::AllReady;
        }

        let (blocking, default_delay_us) = {
            let tb = self.shared.timebase.lock();
            (tb.blocking(), tb.delay_us())
        };
        let delay_us = descriptor.delay_us.unwrap_or(default_delay_us);
        let trigger_at = self.last_present_qpc + us_to_ticks(delay_us);
        let scheduled = if blocking { 0 } else { trigger_at };

        for binding in &bindings {
            let _ = self
                .fabric
                .reset(LatchKey::new(LatchName::CameraReady, binding.camera_id));
            let md = self.mint_metadata(descriptor, binding, batch, last, scheduled, delay_us);
            binding.metadata.push_back(md);
        }

        // Simultaneous batches fire their triggers together.
        if self.shared.synchronize.load(Ordering::Acquire) && batch {
            self.fabric
                .rendezvous(self.coord(LatchName::DrawSyncTriggers), Some(SYNC_DEADLINE));
        }

        if blocking {
            // Lowest jitter: this thread owns the delay spin.
            self.timer.wait_to(trigger_at);
        }
        for binding in &bindings {
            let _ = self
                .fabric
                .set(LatchKey::new(LatchName::CameraSendTrigger, binding.camera_id));
        }

        self.wait_cameras(&bindings)
    }

    fn wait_cameras(&self, bindings: &[CameraBinding]) -> StepResult {
        let terminate = self.proj(LatchName::DrawTerminate);
        let mut wait_set: Vec<LatchKey> = vec![terminate];
        for binding in bindings {
            wait_set.push(LatchKey::new(LatchName::CameraRepeatTrigger, binding.camera_id));
            wait_set.push(LatchKey::new(LatchName::CameraReady, binding.camera_id));
        }

        let deadline = Instant::now() + CAMERA_STEP_DEADLINE;
        loop {
            match self.fabric.wait_any(&wait_set, Some(Duration::from_millis(50))) {
                WaitOutcome::Signalled(key) if key == terminate => return StepResult::Terminate,
                WaitOutcome::Abandoned(_) => return StepResult::Terminate,
                _ => {}
            }

            let mut all_ready = true;
            for binding in bindings {
                if self
                    .fabric
                    .is_signalled(LatchKey::new(LatchName::CameraRepeatTrigger, binding.camera_id))
                    .unwrap_or(false)
                {
                    return StepResult::Repeat;
                }
                if !self
                    .fabric
                    .is_signalled(LatchKey::new(LatchName::CameraReady, binding.camera_id))
                    .unwrap_or(false)
                {
                    all_ready = false;
                }
            }
            if all_ready {
                for binding in bindings {
                    let _ = self
                        .fabric
                        .reset(LatchKey::new(LatchName::CameraReady, binding.camera_id));
                }
                return StepResult::AllReady;
            }

            if Instant::now() >= deadline {
                return StepResult::Timeout;
            }
        }
    }

    fn clear_camera_failure_latches(&self) {
        for binding in self.shared.cameras.read().iter() {
            let _ = self
                .fabric
                .reset(LatchKey::new(LatchName::CameraRepeatTrigger, binding.camera_id));
            let _ = self
                .fabric
                .reset(LatchKey::new(LatchName::CameraInvalidTrigger, binding.camera_id));
            let _ = self
                .fabric
                .reset(LatchKey::new(LatchName::CameraReady, binding.camera_id));
        }
    }

    /// Wait for all outstanding expectations to clear (camera queues
    /// empty); bounded so a dead camera cannot wedge a mode change.
    fn drain_outstanding(&self, bindings: &[CameraBinding]) {
        let deadline = Instant::now() + CAMERA_STEP_DEADLINE;
        loop {
            let outstanding: usize = bindings.iter().map(|b| b.metadata.len()).sum();
            if outstanding == 0 {
                return;
            }
            if Instant::now() >= deadline {
                tracing::warn!(
                    target: "present.machine",
                    projector_id = self.projector_id(),
                    outstanding,
                    "discarding outstanding expectations on drain timeout"
                );
                for binding in bindings {
                    binding.metadata.clear();
                }
                return;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// Dequeue the descriptor for a specific batch step, discarding stale
    /// leftovers a racing refill may have queued before the sequence was
    /// restarted.
    fn dequeue_indexed(&self, index: u32, deadline_ticks: Ticks) -> Option<PatternDescriptor> {
        let deadline = now_ticks() + deadline_ticks;
        loop {
            let remaining = deadline - now_ticks();
            if remaining <= 0 {
                return None;
            }
            let descriptor = self.dequeue_with_deadline(remaining)?;
            if descriptor.index == index {
                return Some(descriptor);
            }
            tracing::debug!(
                target: "present.machine",
                projector_id = self.projector_id(),
                expected = index,
                got = descriptor.index,
                "discarding stale queued pattern"
            );
        }
    }

    /// Poll the pattern queue up to a tick deadline.
    fn dequeue_with_deadline(&self, deadline_ticks: Ticks) -> Option<PatternDescriptor> {
        let deadline = now_ticks() + deadline_ticks;
        loop {
            if let Some(descriptor) = self.decoder.queue().try_dequeue() {
                return Some(descriptor);
            }
            if now_ticks() >= deadline || self.terminated() {
                return None;
            }
            std::thread::sleep(Duration::from_micros(500));
        }
    }
}
