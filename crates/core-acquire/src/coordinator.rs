//! Batch acquisition verbs.
//!
//! The coordinator drives batches through the `main_*` latch handshake:
//! raise `main_prepare_draw` on every projector, wait for each
//! `main_ready_draw`, configure acquisition flags while the presenters sit
//! in the ready window, raise `main_begin`, wait out `main_end_draw`, and
//! finally `main_resume_draw` to restore the project-acquire cycle.
//! Sequential batches walk projectors one at a time; simultaneous batches
//! begin them all after arming the `draw_sync_*` rendezvous counters with
//! the participant count so presents, VBLANK waits and triggers stay in
//! lockstep.

use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use core_present::{BatchOutcome, Presenter};
use core_sync::{LatchKey, LatchName};

use crate::engine::Engine;
use crate::AcquireError;

/// How long the coordinator waits for a presenter's ready handshake.
const PREPARE_DEADLINE: Duration = Duration::from_secs(10);

/// Acquisition flags applied to every batch.
#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    /// Presenters spin out the trigger delay themselves.
    pub blocking: bool,
    /// Allow exposure/present overlap where exposure fits in the delay.
    pub concurrent_delay: bool,
    /// Fixed-pattern acquisition: repeat one pattern `num_acquire` times.
    pub fixed: bool,
    pub num_acquire: i64,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            blocking: true,
            concurrent_delay: false,
            fixed: false,
            num_acquire: 1,
        }
    }
}

/// Per-projector verdict of a batch verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProjectorBatchResult {
    /// Whether the projector acquired (it had cameras attached).
    pub participated: bool,
    pub outcome: Option<BatchOutcome>,
}

/// Per-projector result map returned by batch verbs.
pub type BatchReport = BTreeMap<usize, ProjectorBatchResult>;

impl Engine {
    fn enter_batch(&self) -> Result<(), AcquireError> {
        if self.batch_poisoned.load(Ordering::Acquire) {
            return Err(AcquireError::BatchPoisoned);
        }
        if self.camera_count() == 0 {
            return Err(AcquireError::NoCameras);
        }
        if self
            .batch_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(AcquireError::BatchActive);
        }
        Ok(())
    }

    /// Prepare every projector for batch acquisition and wait for each
    /// ready handshake. Returns presenters in id order.
    fn prepare_all(&self) -> Result<Vec<(usize, Arc<Presenter>)>, AcquireError> {
        let n = self.projector_count();
        self.fabric.reset_all_coordinator(self.coordinator_id)?;
        for id in 0..n {
            self.fabric.reset_projector_main(id)?;
            self.fabric
                .set(LatchKey::new(LatchName::MainPrepareDraw, id))?;
        }

        let mut presenters = Vec::with_capacity(n);
        for id in 0..n {
            let ready = LatchKey::new(LatchName::MainReadyDraw, id);
            if !self
                .fabric
                .wait(ready, Some(PREPARE_DEADLINE))
                .is_signalled()
            {
                return Err(AcquireError::Timeout("main_ready_draw"));
            }
            self.fabric.reset(ready)?;
            presenters.push((id, self.presenter(id)?));
        }
        Ok(presenters)
    }

    /// Wait for one projector's batch to finish and collect its outcome.
    fn await_end(&self, id: usize, presenter: &Presenter) -> ProjectorBatchResult {
        let end = LatchKey::new(LatchName::MainEndDraw, id);
        let outcome = if self.fabric.wait(end, None).is_signalled() {
            let _ = self.fabric.reset(end);
            presenter.last_batch_outcome()
        } else {
            Some(BatchOutcome::Terminated)
        };

        if matches!(
            outcome,
            Some(BatchOutcome::CameraTimeout) | Some(BatchOutcome::DisplayLost)
        ) {
            // Something structural broke mid-batch; batch mode stays
            // refused until the topology is rebuilt.
            self.batch_poisoned.store(true, Ordering::Release);
        }

        ProjectorBatchResult {
            participated: true,
            outcome,
        }
    }

    /// Restore the project-acquire cycle on every prepared projector.
    fn resume_all(&self, presenters: &[(usize, Arc<Presenter>)]) {
        for (id, presenter) in presenters {
            presenter.decoder().set_cycle(true);
            if presenter.have_cameras() {
                presenter.set_batch_for_cameras(false);
                presenter.set_live_view_for_cameras(true);
                presenter.set_synchronize(false, 0);
                presenter.set_batch_steps(0);
            }
            let _ = self
                .fabric
                .set(LatchKey::new(LatchName::MainResumeDraw, *id));
        }
    }

    /// Acquire every projector's sequence one projector at a time:
    /// projector 0 completes all its exposures before projector 1 begins.
    pub fn start_sequential_batch(&self) -> Result<BatchReport, AcquireError> {
        self.enter_batch()?;
        let result = self.run_sequential();
        self.batch_active.store(false, Ordering::Release);
        result
    }

    fn run_sequential(&self) -> Result<BatchReport, AcquireError> {
        let options = *self.batch_options.lock();
        tracing::info!(target: "acquire.coordinator", ?options, "sequential batch starting");

        self.layout.lock().set_recording_to_timestamp("seq");
        self.write_manifest()?;

        let presenters = self.prepare_all()?;
        for (_, presenter) in &presenters {
            if presenter.have_cameras() {
                presenter.configure_batch(
                    options.blocking,
                    options.concurrent_delay,
                    options.fixed,
                    options.num_acquire,
                );
                presenter.set_synchronize(false, 0);
                presenter.set_batch_steps(0);
            }
        }

        let mut report = BatchReport::new();
        for (id, presenter) in &presenters {
            if presenter.have_cameras() {
                self.fabric
                    .set(LatchKey::new(LatchName::MainBegin, *id))?;
                report.insert(*id, self.await_end(*id, presenter));
            } else {
                report.insert(
                    *id,
                    ProjectorBatchResult {
                        participated: false,
                        outcome: None,
                    },
                );
            }
        }

        self.resume_all(&presenters);
        tracing::info!(
            target: "acquire.coordinator",
            remaining = self.batch_items_remaining(),
            "sequential batch finished"
        );
        Ok(report)
    }

    /// Acquire all projectors in lockstep: every participant's k-th
    /// present lands on a common VBLANK boundary, enforced by the
    /// `draw_sync_*` rendezvous counters. Shorter sequences are padded
    /// with black presents so each projector runs the same step count.
    pub fn start_simultaneous_batch(&self) -> Result<BatchReport, AcquireError> {
        self.enter_batch()?;
        let result = self.run_simultaneous();
        self.batch_active.store(false, Ordering::Release);
        result
    }

    fn run_simultaneous(&self) -> Result<BatchReport, AcquireError> {
        let options = *self.batch_options.lock();
        tracing::info!(target: "acquire.coordinator", ?options, "simultaneous batch starting");

        self.layout.lock().set_recording_to_timestamp("sim");
        self.write_manifest()?;

        let presenters = self.prepare_all()?;

        // Collect participants and the global timing envelope.
        let mut participants: Vec<(usize, Arc<Presenter>)> = Vec::new();
        let mut max_exposure_us: f64 = 0.0;
        let mut min_delay_us = f64::MAX;
        let mut max_len: usize = 0;
        for (id, presenter) in &presenters {
            if !presenter.have_cameras() {
                continue;
            }
            max_exposure_us = max_exposure_us.max(presenter.max_exposure_us());
            min_delay_us = min_delay_us.min(presenter.delay_ms() * 1_000.0);
            max_len = max_len.max(presenter.decoder().sequence_len());
            participants.push((*id, Arc::clone(presenter)));
        }

        // Overlap is granted only when the largest exposure fits inside
        // the shortest delay across all participants.
        let allow_concurrent = options.concurrent_delay && max_exposure_us < min_delay_us;

        for (_, presenter) in &participants {
            presenter.configure_batch(
                options.blocking,
                allow_concurrent,
                options.fixed,
                options.num_acquire,
            );
            presenter.set_synchronize(participants.len() > 1, participants.len());
            presenter.set_batch_steps(max_len as i64);
        }

        // Arm the rendezvous counters to the participant count before any
        // begin signal goes out.
        for name in [
            LatchName::DrawSyncPresent,
            LatchName::DrawSyncVblank,
            LatchName::DrawSyncTriggers,
        ] {
            self.fabric.set_start_count(
                LatchKey::new(name, self.coordinator_id),
                participants.len() as i32,
                true,
            )?;
        }

        for (id, _) in &participants {
            self.fabric
                .set(LatchKey::new(LatchName::MainBegin, *id))?;
        }

        let mut report = BatchReport::new();
        for (id, presenter) in &presenters {
            if participants.iter().any(|(pid, _)| pid == id) {
                report.insert(*id, self.await_end(*id, presenter));
            } else {
                report.insert(
                    *id,
                    ProjectorBatchResult {
                        participated: false,
                        outcome: None,
                    },
                );
            }
        }

        self.resume_all(&presenters);
        tracing::info!(
            target: "acquire.coordinator",
            remaining = self.batch_items_remaining(),
            "simultaneous batch finished"
        );
        Ok(report)
    }
}
