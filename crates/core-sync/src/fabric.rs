//! Central latch storage and wait machinery.
//!
//! All latch state lives behind one mutex paired with one condvar. Waits
//! over arbitrary latch subsets are then a scan under the lock followed by
//! a condvar sleep; every mutation (set, conditional flip, membership
//! change) broadcasts so waiters re-scan. Latch operations are far off the
//! microsecond-critical paths (those spin in core-timing), so the single
//! broadcast domain is not a throughput concern, and it makes wait-any /
//! wait-all over mixed groups trivially race-free.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::{
    FabricError, GroupKind, LatchKey, LatchName, WaitOutcome, CAMERA_LATCHES,
    COORDINATOR_LATCHES, DECODER_LATCHES, ENCODER_LATCHES, PROJECTOR_LATCHES,
};

/// Waits that gave up before their subset qualified.
pub static WAIT_TIMEOUTS: AtomicU64 = AtomicU64::new(0);
/// Waits that observed a removed latch.
pub static WAIT_ABANDONED: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone)]
struct LatchState {
    signalled: bool,
    set_count: i32,
    reset_count: i32,
    set_start: i32,
    reset_start: i32,
    /// Rendezvous round; bumped when the set down-counter completes a lap
    /// through `rendezvous`, releasing that round's participants.
    round: u64,
}

impl LatchState {
    fn new() -> Self {
        Self {
            signalled: false,
            set_count: 1,
            reset_count: 1,
            set_start: 1,
            reset_start: 1,
            round: 0,
        }
    }
}

fn new_member(names: &[LatchName]) -> Vec<LatchState> {
    names.iter().map(|_| LatchState::new()).collect()
}

#[derive(Debug, Default)]
struct FabricState {
    decoders: Vec<Vec<LatchState>>,
    encoders: Vec<Vec<LatchState>>,
    projectors: Vec<Vec<LatchState>>,
    cameras: Vec<Vec<LatchState>>,
    coordinators: Vec<Vec<LatchState>>,
}

impl FabricState {
    fn group(&self, kind: GroupKind) -> &Vec<Vec<LatchState>> {
        match kind {
            GroupKind::Decoder => &self.decoders,
            GroupKind::Encoder => &self.encoders,
            GroupKind::Projector => &self.projectors,
            GroupKind::Camera => &self.cameras,
            GroupKind::Coordinator => &self.coordinators,
        }
    }

    fn group_mut(&mut self, kind: GroupKind) -> &mut Vec<Vec<LatchState>> {
        match kind {
            GroupKind::Decoder => &mut self.decoders,
            GroupKind::Encoder => &mut self.encoders,
            GroupKind::Projector => &mut self.projectors,
            GroupKind::Camera => &mut self.cameras,
            GroupKind::Coordinator => &mut self.coordinators,
        }
    }

    fn resolve(&self, key: LatchKey) -> Option<&LatchState> {
        self.group(key.name.group())
            .get(key.id)
            .map(|member| &member[key.name.slot()])
    }

    fn resolve_mut(&mut self, key: LatchKey) -> Option<&mut LatchState> {
        self.group_mut(key.name.group())
            .get_mut(key.id)
            .map(|member| &mut member[key.name.slot()])
    }
}

/// The process-wide latch fabric.
#[derive(Debug)]
pub struct SyncFabric {
    state: Mutex<FabricState>,
    cond: Condvar,
}

impl Default for SyncFabric {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncFabric {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FabricState::default()),
            cond: Condvar::new(),
        }
    }

    // ---------------------------------------------------------------------
    // Membership
    // ---------------------------------------------------------------------

    fn add_member(&self, kind: GroupKind, names: &[LatchName]) -> usize {
        let mut state = self.state.lock();
        let group = state.group_mut(kind);
        group.push(new_member(names));
        let id = group.len() - 1;
        tracing::debug!(target: "sync.fabric", ?kind, id, "member added");
        id
    }

    pub fn add_decoder(&self) -> usize {
        self.add_member(GroupKind::Decoder, DECODER_LATCHES)
    }

    pub fn add_encoder(&self) -> usize {
        self.add_member(GroupKind::Encoder, ENCODER_LATCHES)
    }

    pub fn add_projector(&self) -> usize {
        self.add_member(GroupKind::Projector, PROJECTOR_LATCHES)
    }

    pub fn add_camera(&self) -> usize {
        self.add_member(GroupKind::Camera, CAMERA_LATCHES)
    }

    pub fn add_coordinator(&self) -> usize {
        self.add_member(GroupKind::Coordinator, COORDINATOR_LATCHES)
    }

    /// Remove a group member. The last member is swapped into the freed
    /// slot so ids stay dense; waiters are woken so they rebind to the
    /// renamed member or observe abandonment.
    pub fn remove_member(&self, kind: GroupKind, id: usize) -> Result<(), FabricError> {
        let mut state = self.state.lock();
        let group = state.group_mut(kind);
        if id >= group.len() {
            return Err(FabricError::NoSuchMember(kind, id));
        }
        group.swap_remove(id);
        tracing::debug!(target: "sync.fabric", ?kind, id, remaining = group.len(), "member removed");
        drop(state);
        self.cond.notify_all();
        Ok(())
    }

    /// Move a member from one id to another, displacing nothing: the member
    /// at `to` is swapped with the member at `from`. Used by topology
    /// renumbering so outstanding waits rebind to the surviving member.
    pub fn rename_member(
        &self,
        kind: GroupKind,
        from: usize,
        to: usize,
    ) -> Result<(), FabricError> {
        let mut state = self.state.lock();
        let group = state.group_mut(kind);
        if from >= group.len() {
            return Err(FabricError::NoSuchMember(kind, from));
        }
        if to >= group.len() {
            return Err(FabricError::NoSuchMember(kind, to));
        }
        group.swap(from, to);
        drop(state);
        self.cond.notify_all();
        Ok(())
    }

    pub fn group_len(&self, kind: GroupKind) -> usize {
        self.state.lock().group(kind).len()
    }

    // ---------------------------------------------------------------------
    // Latch state
    // ---------------------------------------------------------------------

    /// Signal a latch unconditionally.
    pub fn set(&self, key: LatchKey) -> Result<(), FabricError> {
        let mut state = self.state.lock();
        let latch = state
            .resolve_mut(key)
            .ok_or(FabricError::NoSuchLatch(key))?;
        latch.signalled = true;
        drop(state);
        self.cond.notify_all();
        Ok(())
    }

    /// Clear a latch unconditionally.
    pub fn reset(&self, key: LatchKey) -> Result<(), FabricError> {
        let mut state = self.state.lock();
        let latch = state
            .resolve_mut(key)
            .ok_or(FabricError::NoSuchLatch(key))?;
        latch.signalled = false;
        Ok(())
    }

    /// Decrement the set down-counter; on reaching zero the latch signals
    /// and the counter reloads. Returns whether this call flipped it.
    pub fn set_conditional(&self, key: LatchKey) -> Result<bool, FabricError> {
        let mut state = self.state.lock();
        let latch = state
            .resolve_mut(key)
            .ok_or(FabricError::NoSuchLatch(key))?;
        latch.set_count -= 1;
        if latch.set_count <= 0 {
            latch.signalled = true;
            latch.set_count = latch.set_start;
            drop(state);
            self.cond.notify_all();
            return Ok(true);
        }
        Ok(false)
    }

    /// Dual of [`SyncFabric::set_conditional`] for the reset counter.
    pub fn reset_conditional(&self, key: LatchKey) -> Result<bool, FabricError> {
        let mut state = self.state.lock();
        let latch = state
            .resolve_mut(key)
            .ok_or(FabricError::NoSuchLatch(key))?;
        latch.reset_count -= 1;
        if latch.reset_count <= 0 {
            latch.signalled = false;
            latch.reset_count = latch.reset_start;
            return Ok(true);
        }
        Ok(false)
    }

    /// Configure the set down-counter start value; optionally reload the
    /// current counter as well.
    pub fn set_start_count(
        &self,
        key: LatchKey,
        start: i32,
        reload_current: bool,
    ) -> Result<(), FabricError> {
        let mut state = self.state.lock();
        let latch = state
            .resolve_mut(key)
            .ok_or(FabricError::NoSuchLatch(key))?;
        latch.set_start = start.max(1);
        if reload_current {
            latch.set_count = latch.set_start;
        }
        Ok(())
    }

    /// Configure the reset down-counter start value.
    pub fn reset_start_count(
        &self,
        key: LatchKey,
        start: i32,
        reload_current: bool,
    ) -> Result<(), FabricError> {
        let mut state = self.state.lock();
        let latch = state
            .resolve_mut(key)
            .ok_or(FabricError::NoSuchLatch(key))?;
        latch.reset_start = start.max(1);
        if reload_current {
            latch.reset_count = latch.reset_start;
        }
        Ok(())
    }

    /// Remaining set-counter value.
    pub fn set_count_remaining(&self, key: LatchKey) -> Result<i32, FabricError> {
        let state = self.state.lock();
        state
            .resolve(key)
            .map(|l| l.set_count)
            .ok_or(FabricError::NoSuchLatch(key))
    }

    /// Current signalled state.
    pub fn is_signalled(&self, key: LatchKey) -> Result<bool, FabricError> {
        let state = self.state.lock();
        state
            .resolve(key)
            .map(|l| l.signalled)
            .ok_or(FabricError::NoSuchLatch(key))
    }

    // ---------------------------------------------------------------------
    // Bulk resets
    // ---------------------------------------------------------------------

    fn reset_member_except(
        &self,
        kind: GroupKind,
        id: usize,
        names: &[LatchName],
        except: &[LatchName],
    ) -> Result<(), FabricError> {
        let mut state = self.state.lock();
        let group = state.group_mut(kind);
        let member = group
            .get_mut(id)
            .ok_or(FabricError::NoSuchMember(kind, id))?;
        for name in names {
            if except.contains(name) {
                continue;
            }
            let latch = &mut member[name.slot()];
            latch.signalled = false;
            latch.set_count = latch.set_start;
            latch.reset_count = latch.reset_start;
        }
        Ok(())
    }

    pub fn reset_all_decoder(&self, id: usize) -> Result<(), FabricError> {
        self.reset_member_except(GroupKind::Decoder, id, DECODER_LATCHES, &[])
    }

    pub fn reset_all_encoder(&self, id: usize) -> Result<(), FabricError> {
        self.reset_member_except(GroupKind::Encoder, id, ENCODER_LATCHES, &[])
    }

    pub fn reset_all_projector(&self, id: usize) -> Result<(), FabricError> {
        self.reset_member_except(GroupKind::Projector, id, PROJECTOR_LATCHES, &[])
    }

    /// Reset a projector's latches except the two ready handshakes, which
    /// carry state across a mode change.
    pub fn reset_all_projector_except_ready(&self, id: usize) -> Result<(), FabricError> {
        self.reset_member_except(
            GroupKind::Projector,
            id,
            PROJECTOR_LATCHES,
            &[LatchName::RenderReady, LatchName::PresentReady],
        )
    }

    pub fn reset_all_camera(&self, id: usize) -> Result<(), FabricError> {
        self.reset_member_except(GroupKind::Camera, id, CAMERA_LATCHES, &[])
    }

    /// Reset a camera's latches except `CameraReady`, so a presenter does
    /// not deadlock waiting on a camera that was already idle.
    pub fn reset_all_camera_except_ready(&self, id: usize) -> Result<(), FabricError> {
        self.reset_member_except(GroupKind::Camera, id, CAMERA_LATCHES, &[LatchName::CameraReady])
    }

    pub fn reset_all_coordinator(&self, id: usize) -> Result<(), FabricError> {
        self.reset_member_except(GroupKind::Coordinator, id, COORDINATOR_LATCHES, &[])
    }

    /// Reset the coordinator→presenter batch latches of one projector.
    pub fn reset_projector_main(&self, id: usize) -> Result<(), FabricError> {
        let mut state = self.state.lock();
        let group = state.group_mut(GroupKind::Projector);
        let member = group
            .get_mut(id)
            .ok_or(FabricError::NoSuchMember(GroupKind::Projector, id))?;
        for name in [
            LatchName::MainPrepareDraw,
            LatchName::MainReadyDraw,
            LatchName::MainBegin,
            LatchName::MainEndDraw,
            LatchName::MainResumeDraw,
        ] {
            member[name.slot()].signalled = false;
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Waits
    // ---------------------------------------------------------------------

    /// Wait for a single latch.
    pub fn wait(&self, key: LatchKey, timeout: Option<Duration>) -> WaitOutcome {
        self.wait_any(&[key], timeout)
    }

    /// Wait until any latch of the subset is signalled. Returns the first
    /// signalled key in subset order.
    pub fn wait_any(&self, keys: &[LatchKey], timeout: Option<Duration>) -> WaitOutcome {
        self.wait_any_and_all(keys, &[], timeout)
    }

    /// Wait until every latch of the subset is signalled simultaneously.
    pub fn wait_all(&self, keys: &[LatchKey], timeout: Option<Duration>) -> WaitOutcome {
        self.wait_any_and_all(&[], keys, timeout)
    }

    /// Wait until at least one of `any` is signalled (if `any` is
    /// non-empty) and all of `all` are signalled (if `all` is non-empty).
    pub fn wait_any_and_all(
        &self,
        any: &[LatchKey],
        all: &[LatchKey],
        timeout: Option<Duration>,
    ) -> WaitOutcome {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();
        loop {
            // Abandonment is checked before signal state so removal always
            // surfaces, even if another subset member happens to be set.
            for &key in any.iter().chain(all.iter()) {
                if state.resolve(key).is_none() {
                    WAIT_ABANDONED.fetch_add(1, Ordering::Relaxed);
                    return WaitOutcome::Abandoned(key);
                }
            }

            let all_ok = all
                .iter()
                .all(|&key| state.resolve(key).is_some_and(|l| l.signalled));
            if all_ok {
                if any.is_empty() {
                    return WaitOutcome::All;
                }
                let hit = any
                    .iter()
                    .find(|&&key| state.resolve(key).is_some_and(|l| l.signalled));
                if let Some(&key) = hit {
                    return WaitOutcome::Signalled(key);
                }
            }

            match deadline {
                Some(d) => {
                    if self.cond.wait_until(&mut state, d).timed_out() {
                        WAIT_TIMEOUTS.fetch_add(1, Ordering::Relaxed);
                        return WaitOutcome::TimedOut;
                    }
                }
                None => self.cond.wait(&mut state),
            }
        }
    }

    /// N-party barrier on a latch's set down-counter. Each participant
    /// decrements the counter and blocks until the counter completes its
    /// lap; the final arriver reloads the counter, bumps the round and
    /// releases everyone. The latch's signalled bit is not touched, so the
    /// same latch can rendezvous every step of a batch without resets.
    pub fn rendezvous(&self, key: LatchKey, timeout: Option<Duration>) -> WaitOutcome {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();
        let round = {
            let latch = match state.resolve_mut(key) {
                Some(l) => l,
                None => {
                    WAIT_ABANDONED.fetch_add(1, Ordering::Relaxed);
                    return WaitOutcome::Abandoned(key);
                }
            };
            let round = latch.round;
            latch.set_count -= 1;
            if latch.set_count <= 0 {
                latch.set_count = latch.set_start;
                latch.round = latch.round.wrapping_add(1);
                drop(state);
                self.cond.notify_all();
                return WaitOutcome::Signalled(key);
            }
            round
        };
        loop {
            match deadline {
                Some(d) => {
                    if self.cond.wait_until(&mut state, d).timed_out() {
                        WAIT_TIMEOUTS.fetch_add(1, Ordering::Relaxed);
                        return WaitOutcome::TimedOut;
                    }
                }
                None => self.cond.wait(&mut state),
            }
            match state.resolve(key) {
                None => {
                    WAIT_ABANDONED.fetch_add(1, Ordering::Relaxed);
                    return WaitOutcome::Abandoned(key);
                }
                Some(l) if l.round != round => return WaitOutcome::Signalled(key),
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn fabric_with_projector() -> (Arc<SyncFabric>, usize) {
        let fabric = Arc::new(SyncFabric::new());
        let id = fabric.add_projector();
        (fabric, id)
    }

    #[test]
    fn set_then_wait_returns_signalled() {
        let (fabric, id) = fabric_with_projector();
        let key = LatchKey::new(LatchName::Present, id);
        fabric.set(key).unwrap();
        assert_eq!(
            fabric.wait(key, Some(Duration::from_millis(10))),
            WaitOutcome::Signalled(key)
        );
        // Manual-reset: still signalled until reset.
        assert!(fabric.is_signalled(key).unwrap());
        fabric.reset(key).unwrap();
        assert!(!fabric.is_signalled(key).unwrap());
    }

    #[test]
    fn wait_any_returns_exactly_one_signalled_key() {
        let (fabric, id) = fabric_with_projector();
        let a = LatchKey::new(LatchName::Present, id);
        let b = LatchKey::new(LatchName::DrawTerminate, id);
        fabric.set(b).unwrap();
        assert_eq!(
            fabric.wait_any(&[a, b], Some(Duration::from_millis(10))),
            WaitOutcome::Signalled(b)
        );
    }

    #[test]
    fn wait_timeout_returns_timed_out() {
        let (fabric, id) = fabric_with_projector();
        let key = LatchKey::new(LatchName::Present, id);
        assert_eq!(
            fabric.wait(key, Some(Duration::from_millis(5))),
            WaitOutcome::TimedOut
        );
    }

    #[test]
    fn wait_all_requires_every_latch() {
        let (fabric, id) = fabric_with_projector();
        let a = LatchKey::new(LatchName::Present, id);
        let b = LatchKey::new(LatchName::Render, id);
        fabric.set(a).unwrap();
        assert_eq!(
            fabric.wait_all(&[a, b], Some(Duration::from_millis(5))),
            WaitOutcome::TimedOut
        );
        fabric.set(b).unwrap();
        assert_eq!(
            fabric.wait_all(&[a, b], Some(Duration::from_millis(5))),
            WaitOutcome::All
        );
    }

    #[test]
    fn wait_any_and_all_combines_conditions() {
        let (fabric, id) = fabric_with_projector();
        let any = [LatchKey::new(LatchName::MainBegin, id)];
        let all = [LatchKey::new(LatchName::PresentReady, id)];
        fabric.set(any[0]).unwrap();
        // `any` satisfied but `all` not: still waiting.
        assert_eq!(
            fabric.wait_any_and_all(&any, &all, Some(Duration::from_millis(5))),
            WaitOutcome::TimedOut
        );
        fabric.set(all[0]).unwrap();
        assert_eq!(
            fabric.wait_any_and_all(&any, &all, Some(Duration::from_millis(5))),
            WaitOutcome::Signalled(any[0])
        );
    }

    #[test]
    fn conditional_set_fires_on_nth_call() {
        let (fabric, id) = fabric_with_projector();
        let key = LatchKey::new(LatchName::CameraSyncTriggers, id);
        fabric.set_start_count(key, 3, true).unwrap();
        assert!(!fabric.set_conditional(key).unwrap());
        assert!(!fabric.set_conditional(key).unwrap());
        assert!(fabric.set_conditional(key).unwrap());
        assert!(fabric.is_signalled(key).unwrap());
        // Counter reloaded for the next lap.
        assert_eq!(fabric.set_count_remaining(key).unwrap(), 3);
    }

    #[test]
    fn conditional_reset_mirrors_set() {
        let (fabric, id) = fabric_with_projector();
        let key = LatchKey::new(LatchName::Present, id);
        fabric.set(key).unwrap();
        fabric.reset_start_count(key, 2, true).unwrap();
        assert!(!fabric.reset_conditional(key).unwrap());
        assert!(fabric.is_signalled(key).unwrap());
        assert!(fabric.reset_conditional(key).unwrap());
        assert!(!fabric.is_signalled(key).unwrap());
    }

    #[test]
    fn cross_thread_set_wakes_waiter() {
        let (fabric, id) = fabric_with_projector();
        let key = LatchKey::new(LatchName::MainBegin, id);
        let waiter = {
            let fabric = Arc::clone(&fabric);
            thread::spawn(move || fabric.wait(key, Some(Duration::from_secs(5))))
        };
        thread::sleep(Duration::from_millis(10));
        fabric.set(key).unwrap();
        assert_eq!(waiter.join().unwrap(), WaitOutcome::Signalled(key));
    }

    #[test]
    fn removed_member_abandons_waiters() {
        let fabric = Arc::new(SyncFabric::new());
        let id = fabric.add_camera();
        let key = LatchKey::new(LatchName::CameraSendTrigger, id);
        let waiter = {
            let fabric = Arc::clone(&fabric);
            thread::spawn(move || fabric.wait(key, Some(Duration::from_secs(5))))
        };
        thread::sleep(Duration::from_millis(10));
        fabric.remove_member(GroupKind::Camera, id).unwrap();
        assert_eq!(waiter.join().unwrap(), WaitOutcome::Abandoned(key));
    }

    #[test]
    fn swap_remove_keeps_ids_dense_and_rebinds() {
        let fabric = SyncFabric::new();
        let c0 = fabric.add_camera();
        let c1 = fabric.add_camera();
        let c2 = fabric.add_camera();
        assert_eq!((c0, c1, c2), (0, 1, 2));

        // Mark camera 2 so we can recognize it after the swap.
        let marker = LatchKey::new(LatchName::CameraReady, 2);
        fabric.set(marker).unwrap();

        fabric.remove_member(GroupKind::Camera, 0).unwrap();
        assert_eq!(fabric.group_len(GroupKind::Camera), 2);
        // Former camera 2 now answers at id 0.
        assert!(fabric
            .is_signalled(LatchKey::new(LatchName::CameraReady, 0))
            .unwrap());
        // Operations on the vanished tail id fail.
        assert_eq!(
            fabric.set(LatchKey::new(LatchName::CameraReady, 2)),
            Err(FabricError::NoSuchLatch(LatchKey::new(
                LatchName::CameraReady,
                2
            )))
        );
    }

    #[test]
    fn rename_swaps_member_state() {
        let fabric = SyncFabric::new();
        fabric.add_projector();
        fabric.add_projector();
        fabric.set(LatchKey::new(LatchName::Present, 1)).unwrap();

        fabric.rename_member(GroupKind::Projector, 1, 0).unwrap();
        assert!(fabric
            .is_signalled(LatchKey::new(LatchName::Present, 0))
            .unwrap());
        assert!(!fabric
            .is_signalled(LatchKey::new(LatchName::Present, 1))
            .unwrap());

        assert_eq!(
            fabric.rename_member(GroupKind::Projector, 0, 5),
            Err(FabricError::NoSuchMember(GroupKind::Projector, 5))
        );
    }

    #[test]
    fn rendezvous_releases_all_parties_together() {
        let fabric = Arc::new(SyncFabric::new());
        let id = fabric.add_coordinator();
        let key = LatchKey::new(LatchName::DrawSyncPresent, id);
        fabric.set_start_count(key, 3, true).unwrap();

        let mut handles = Vec::new();
        for _ in 0..3 {
            let fabric = Arc::clone(&fabric);
            handles.push(thread::spawn(move || {
                fabric.rendezvous(key, Some(Duration::from_secs(5)))
            }));
        }
        for handle in handles {
            assert_eq!(handle.join().unwrap(), WaitOutcome::Signalled(key));
        }
        // Counter reloaded: a second round works identically.
        let mut handles = Vec::new();
        for _ in 0..3 {
            let fabric = Arc::clone(&fabric);
            handles.push(thread::spawn(move || {
                fabric.rendezvous(key, Some(Duration::from_secs(5)))
            }));
        }
        for handle in handles {
            assert_eq!(handle.join().unwrap(), WaitOutcome::Signalled(key));
        }
    }

    #[test]
    fn bulk_reset_respects_exceptions() {
        let fabric = SyncFabric::new();
        let id = fabric.add_projector();
        for name in [
            LatchName::Present,
            LatchName::PresentReady,
            LatchName::RenderReady,
            LatchName::MainBegin,
        ] {
            fabric.set(LatchKey::new(name, id)).unwrap();
        }
        fabric.reset_all_projector_except_ready(id).unwrap();
        assert!(!fabric
            .is_signalled(LatchKey::new(LatchName::Present, id))
            .unwrap());
        assert!(!fabric
            .is_signalled(LatchKey::new(LatchName::MainBegin, id))
            .unwrap());
        assert!(fabric
            .is_signalled(LatchKey::new(LatchName::PresentReady, id))
            .unwrap());
        assert!(fabric
            .is_signalled(LatchKey::new(LatchName::RenderReady, id))
            .unwrap());
    }

    #[test]
    fn camera_reset_preserves_ready() {
        let fabric = SyncFabric::new();
        let id = fabric.add_camera();
        fabric.set(LatchKey::new(LatchName::CameraReady, id)).unwrap();
        fabric
            .set(LatchKey::new(LatchName::CameraInvalidTrigger, id))
            .unwrap();
        fabric.reset_all_camera_except_ready(id).unwrap();
        assert!(fabric
            .is_signalled(LatchKey::new(LatchName::CameraReady, id))
            .unwrap());
        assert!(!fabric
            .is_signalled(LatchKey::new(LatchName::CameraInvalidTrigger, id))
            .unwrap());
    }
}
