//! Engine assembly and coordination.
//!
//! [`Engine`] owns the whole rig: the latch fabric, the dense topology
//! tables of projectors and cameras, the output layout and every worker
//! thread. Its methods are the in-process command verbs — start/stop
//! continuous preview, sequential and simultaneous batch acquisition,
//! topology mutation, configuration changes — and they enforce the
//! engine's structural rules (topology only mutates while the affected
//! projectors are stopped, batch mode refuses to re-enter after a fatal
//! violation until the topology is rebuilt).
//!
//! The old mutual pointers between rendering and acquisition threads are
//! replaced by integer ids into the engine's tables: presenters hold
//! camera bindings by id, cameras know their projector by id, and
//! swap-and-pop removal renumbers both the table slot and the latch
//! fabric member so ids stay dense.

mod coordinator;
mod engine;

pub use coordinator::{BatchOptions, BatchReport, ProjectorBatchResult};
pub use engine::{CameraInfo, Engine, EngineOptions, ProjectorInfo};

use core_camera::CameraError;
use core_image::ImageError;
use core_sync::FabricError;

/// Control-surface failures.
#[derive(Debug, thiserror::Error)]
pub enum AcquireError {
    #[error("a batch acquisition is already active")]
    BatchActive,
    #[error("batch mode is poisoned until the topology is rebuilt")]
    BatchPoisoned,
    #[error("no cameras attached")]
    NoCameras,
    #[error("no such projector: {0}")]
    NoSuchProjector(usize),
    #[error("no such camera: {0}")]
    NoSuchCamera(usize),
    #[error("projector {0} must be stopped for this operation")]
    ProjectorRunning(usize),
    #[error("projector {0} still has cameras attached")]
    CamerasAttached(usize),
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    #[error(transparent)]
    Camera(#[from] CameraError),
    #[error(transparent)]
    Image(#[from] ImageError),
    #[error(transparent)]
    Fabric(#[from] FabricError),
    #[error(transparent)]
    Persist(#[from] core_persist::PersistError),
}
