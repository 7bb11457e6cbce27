//! Display primitive abstraction.
//!
//! The presenter drives its projector through [`DisplaySurface`]: present a
//! bitmap aligned to the refresh clock, wait out VBLANK boundaries, read
//! back present/VBLANK counters. The real swap-chain implementation is
//! platform glue that lives outside the engine; in-tree we ship
//! [`VirtualDisplay`], a simulated monitor clock that honors the same
//! contract deterministically and is what every scenario test runs against.
//!
//! [`timebase::DisplayTimebase`] collects the per-projector timing tuple —
//! refresh period, present interval, present-to-trigger delay, exposure —
//! together with every derived decomposition the presenter schedules from.

pub mod timebase;
mod virtual_display;

pub use virtual_display::{VirtualDisplay, VirtualDisplayProbe};

use core_image::Bitmap;
use core_timing::units::RefreshTimebase;
use core_timing::Ticks;

/// Display failures.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum DisplayError {
    /// The device backing the surface was lost; the owner may attempt one
    /// [`DisplaySurface::recreate`] before giving up.
    #[error("display device removed")]
    DeviceRemoved,
    /// The surface cannot report its refresh rate.
    #[error("refresh rate query failed")]
    RefreshUnavailable,
    #[error("requested display mode is not supported: {0}x{1}@{2}")]
    UnsupportedMode(u32, u32, u32),
}

/// One selectable output mode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayMode {
    pub width: u32,
    pub height: u32,
    pub refresh_hz: f64,
}

/// Counters sampled from the surface after a present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SurfaceStatistics {
    /// Completed present operations.
    pub present_count: i64,
    /// VBLANK intervals elapsed since the surface was created.
    pub vblank_count: i64,
    /// Tick timestamp of the most recent present.
    pub present_qpc: Ticks,
}

/// Result of one present call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresentInfo {
    pub present_count: i64,
    /// VBLANK boundary the frame was scanned out on.
    pub vblank_count: i64,
    /// Tick timestamp of the scan-out boundary.
    pub present_qpc: Ticks,
}

/// The display primitive consumed by a presenter.
///
/// A surface is owned exclusively by its presenter thread; none of these
/// methods are called concurrently.
pub trait DisplaySurface: Send {
    /// Make `bitmap` visible. With `sync_interval > 0` the call returns
    /// after the frame is queued onto the `sync_interval`-th upcoming
    /// VBLANK boundary; with 0 it returns immediately.
    fn present(&mut self, bitmap: &Bitmap, sync_interval: u32) -> Result<PresentInfo, DisplayError>;

    /// Block until the next VBLANK boundary; returns its tick timestamp.
    fn wait_for_vblank(&mut self) -> Result<Ticks, DisplayError>;

    /// Sample present/VBLANK counters.
    fn frame_statistics(&self) -> SurfaceStatistics;

    /// Refresh timing of the attached output.
    fn refresh_period(&self) -> Result<RefreshTimebase, DisplayError>;

    fn set_fullscreen(&mut self, fullscreen: bool) -> Result<(), DisplayError>;

    fn is_fullscreen(&self) -> bool;

    fn enumerate_modes(&self) -> Vec<DisplayMode>;

    fn set_mode(&mut self, mode: DisplayMode) -> Result<(), DisplayError>;

    /// Rebuild the surface after [`DisplayError::DeviceRemoved`].
    fn recreate(&mut self) -> Result<(), DisplayError>;
}
