//! Named latch fabric for thread synchronization.
//!
//! Every thread in the engine (pattern decoders, presenters, camera
//! drivers, persistence workers, the coordinator) coordinates through a
//! process-wide set of named latches rather than ad-hoc channels. A latch
//! is a manual-reset signal: setting it wakes every waiter and it stays
//! signalled until someone resets it. On top of the plain bit each latch
//! carries a *set* down-counter and a *reset* down-counter with reload
//! start values, so N-way coordination (e.g. "flip only once all
//! presenters have arrived") is expressed as a conditional set that only
//! fires on the N-th call.
//!
//! Latches are grouped per thread family and indexed by a dense id within
//! the group; ids are assigned on add and compacted with swap-and-pop on
//! remove, so outstanding waits either rebind to the member that moved
//! into the slot or report [`WaitOutcome::Abandoned`] when the slot is
//! gone.

mod fabric;

pub use fabric::SyncFabric;

use std::fmt;

/// Thread family a latch group belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupKind {
    Decoder,
    Encoder,
    Projector,
    Camera,
    Coordinator,
}

/// All latch names in the fabric.
///
/// Names keep the historical split: `Main*` latches are raised by the
/// coordinator and consumed by a presenter (`*Draw`) or raised by a
/// presenter and consumed by its camera drivers (`*Camera`). `DrawSync*`
/// latches live in the coordinator group and synchronize presenters with
/// each other during simultaneous batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LatchName {
    // Pattern decoder group.
    DecoderQueueFull,
    DecoderQueueEmpty,
    DecoderQueueProcess,
    DecoderTerminate,
    DecoderChangeId,

    // Frame encoder (persistence) group.
    EncoderQueueFull,
    EncoderQueueEmpty,
    EncoderQueueProcess,
    EncoderTerminate,
    EncoderChangeId,

    // Projector (presenter) group.
    Present,
    PresentReady,
    Render,
    RenderReady,
    DrawTerminate,
    DrawVblank,
    DrawChangeId,
    CameraSyncTriggers,
    MainPrepareDraw,
    MainReadyDraw,
    MainBegin,
    MainEndDraw,
    MainResumeDraw,

    // Camera (driver) group.
    CameraSendTrigger,
    CameraRepeatTrigger,
    CameraExposureBegin,
    CameraExposureEnd,
    CameraReadoutBegin,
    CameraReadoutEnd,
    CameraTransferBegin,
    CameraTransferEnd,
    CameraTerminate,
    CameraReady,
    CameraInvalidTrigger,
    CameraChangeId,
    MainPrepareCamera,
    MainReadyCamera,
    MainEndCamera,

    // Coordinator group.
    DrawSyncPresent,
    DrawSyncVblank,
    DrawSyncTriggers,
}

/// Latch names per group, in slot order.
pub const DECODER_LATCHES: &[LatchName] = &[
    LatchName::DecoderQueueFull,
    LatchName::DecoderQueueEmpty,
    LatchName::DecoderQueueProcess,
    LatchName::DecoderTerminate,
    LatchName::DecoderChangeId,
];

pub const ENCODER_LATCHES: &[LatchName] = &[
    LatchName::EncoderQueueFull,
    LatchName::EncoderQueueEmpty,
    LatchName::EncoderQueueProcess,
    LatchName::EncoderTerminate,
    LatchName::EncoderChangeId,
];

pub const PROJECTOR_LATCHES: &[LatchName] = &[
    LatchName::Present,
    LatchName::PresentReady,
    LatchName::Render,
    LatchName::RenderReady,
    LatchName::DrawTerminate,
    LatchName::DrawVblank,
    LatchName::DrawChangeId,
    LatchName::CameraSyncTriggers,
    LatchName::MainPrepareDraw,
    LatchName::MainReadyDraw,
    LatchName::MainBegin,
    LatchName::MainEndDraw,
    LatchName::MainResumeDraw,
];

pub const CAMERA_LATCHES: &[LatchName] = &[
    LatchName::CameraSendTrigger,
    LatchName::CameraRepeatTrigger,
    LatchName::CameraExposureBegin,
    LatchName::CameraExposureEnd,
    LatchName::CameraReadoutBegin,
    LatchName::CameraReadoutEnd,
    LatchName::CameraTransferBegin,
    LatchName::CameraTransferEnd,
    LatchName::CameraTerminate,
    LatchName::CameraReady,
    LatchName::CameraInvalidTrigger,
    LatchName::CameraChangeId,
    LatchName::MainPrepareCamera,
    LatchName::MainReadyCamera,
    LatchName::MainEndCamera,
];

pub const COORDINATOR_LATCHES: &[LatchName] = &[
    LatchName::DrawSyncPresent,
    LatchName::DrawSyncVblank,
    LatchName::DrawSyncTriggers,
];

impl LatchName {
    /// Group this latch name belongs to.
    pub fn group(self) -> GroupKind {
        use LatchName::*;
        match self {
            DecoderQueueFull | DecoderQueueEmpty | DecoderQueueProcess | DecoderTerminate
            | DecoderChangeId => GroupKind::Decoder,
            EncoderQueueFull | EncoderQueueEmpty | EncoderQueueProcess | EncoderTerminate
            | EncoderChangeId => GroupKind::Encoder,
            Present | PresentReady | Render | RenderReady | DrawTerminate | DrawVblank
            | DrawChangeId | CameraSyncTriggers | MainPrepareDraw | MainReadyDraw | MainBegin
            | MainEndDraw | MainResumeDraw => GroupKind::Projector,
            CameraSendTrigger | CameraRepeatTrigger | CameraExposureBegin | CameraExposureEnd
            | CameraReadoutBegin | CameraReadoutEnd | CameraTransferBegin | CameraTransferEnd
            | CameraTerminate | CameraReady | CameraInvalidTrigger | CameraChangeId
            | MainPrepareCamera | MainReadyCamera | MainEndCamera => GroupKind::Camera,
            DrawSyncPresent | DrawSyncVblank | DrawSyncTriggers => GroupKind::Coordinator,
        }
    }

    /// Slot index of this name within its group's latch block.
    pub(crate) fn slot(self) -> usize {
        let names = match self.group() {
            GroupKind::Decoder => DECODER_LATCHES,
            GroupKind::Encoder => ENCODER_LATCHES,
            GroupKind::Projector => PROJECTOR_LATCHES,
            GroupKind::Camera => CAMERA_LATCHES,
            GroupKind::Coordinator => COORDINATOR_LATCHES,
        };
        // Names and blocks are defined together; a miss is a programming error.
        names.iter().position(|n| *n == self).unwrap()
    }
}

/// Fully qualified latch address: a name plus the member id in its group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LatchKey {
    pub name: LatchName,
    pub id: usize,
}

impl LatchKey {
    pub const fn new(name: LatchName, id: usize) -> Self {
        Self { name, id }
    }
}

impl fmt::Display for LatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}[{}]", self.name, self.id)
    }
}

/// Result of a fabric wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Exactly one latch of the waited subset was observed signalled.
    Signalled(LatchKey),
    /// Every latch of a `wait_all` subset was observed signalled at once.
    All,
    /// The timeout elapsed with no qualifying latch state.
    TimedOut,
    /// A waited latch was removed from the fabric.
    Abandoned(LatchKey),
}

impl WaitOutcome {
    pub fn is_signalled(&self) -> bool {
        matches!(self, WaitOutcome::Signalled(_) | WaitOutcome::All)
    }
}

/// Fabric operation failures.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum FabricError {
    #[error("no such latch: {0}")]
    NoSuchLatch(LatchKey),
    #[error("group {0:?} has no member {1}")]
    NoSuchMember(GroupKind, usize),
}
