//! Simulated display surface.
//!
//! The virtual display derives VBLANK boundaries from a fixed epoch and a
//! configurable refresh period: boundary `n` falls at `epoch + n·period`.
//! Waits sleep most of the interval and spin the last stretch so boundary
//! timestamps are tick-accurate without burning a core for a full frame.
//! Fault injection hooks cover the device-removed and refresh-query
//! failure paths the presenter must recover from.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use core_image::Bitmap;
use core_timing::units::RefreshTimebase;
use core_timing::{now_ticks, spin::SpinlockTimer, Ticks, TICKS_PER_MICROSECOND};

use crate::{DisplayError, DisplayMode, DisplaySurface, PresentInfo, SurfaceStatistics};

/// Sleep until this close to the boundary, then spin.
const SPIN_MARGIN_TICKS: Ticks = 300 * TICKS_PER_MICROSECOND;

#[derive(Debug)]
struct VirtualState {
    stats: SurfaceStatistics,
    fullscreen: bool,
    mode: DisplayMode,
    fail_presents: u32,
    fail_refresh_query: bool,
    recreate_count: u32,
    last_present_dims: Option<(u32, u32)>,
}

/// Shared observer handle for tests and diagnostics.
#[derive(Debug, Clone)]
pub struct VirtualDisplayProbe {
    state: Arc<Mutex<VirtualState>>,
}

impl VirtualDisplayProbe {
    pub fn statistics(&self) -> SurfaceStatistics {
        self.state.lock().stats
    }

    pub fn recreate_count(&self) -> u32 {
        self.state.lock().recreate_count
    }

    pub fn last_present_dims(&self) -> Option<(u32, u32)> {
        self.state.lock().last_present_dims
    }

    /// Make the next `n` present calls fail with `DeviceRemoved`.
    pub fn fail_next_presents(&self, n: u32) {
        self.state.lock().fail_presents = n;
    }

    /// Force refresh-rate queries to fail.
    pub fn fail_refresh_query(&self, fail: bool) {
        self.state.lock().fail_refresh_query = fail;
    }
}

/// Deterministic in-process display surface.
#[derive(Debug)]
pub struct VirtualDisplay {
    epoch: Ticks,
    refresh: RefreshTimebase,
    state: Arc<Mutex<VirtualState>>,
    timer: SpinlockTimer,
}

impl VirtualDisplay {
    /// Create a surface with the given refresh rate.
    pub fn new(refresh_hz: f64, width: u32, height: u32) -> Self {
        let refresh = RefreshTimebase::from_hz(refresh_hz);
        Self {
            epoch: now_ticks(),
            refresh,
            state: Arc::new(Mutex::new(VirtualState {
                stats: SurfaceStatistics::default(),
                fullscreen: false,
                mode: DisplayMode {
                    width,
                    height,
                    refresh_hz,
                },
                fail_presents: 0,
                fail_refresh_query: false,
                recreate_count: 0,
                last_present_dims: None,
            })),
            timer: SpinlockTimer::new(),
        }
    }

    /// Observer handle sharing this surface's counters.
    pub fn probe(&self) -> VirtualDisplayProbe {
        VirtualDisplayProbe {
            state: Arc::clone(&self.state),
        }
    }

    /// Index of the next VBLANK boundary strictly after `now`.
    fn next_boundary(&self, now: Ticks) -> i64 {
        let period = self.refresh.period_ticks();
        (now - self.epoch) / period + 1
    }

    fn boundary_tick(&self, boundary: i64) -> Ticks {
        self.epoch + boundary * self.refresh.period_ticks()
    }

    /// Sleep-then-spin to an absolute tick target.
    fn wait_until_tick(&mut self, target: Ticks) {
        let sleep_until = target - SPIN_MARGIN_TICKS;
        let now = now_ticks();
        if sleep_until > now {
            std::thread::sleep(Duration::from_nanos((sleep_until - now) as u64));
        }
        self.timer.wait_to(target);
    }
}

impl DisplaySurface for VirtualDisplay {
    fn present(&mut self, bitmap: &Bitmap, sync_interval: u32) -> Result<PresentInfo, DisplayError> {
        {
            let mut state = self.state.lock();
            if state.fail_presents > 0 {
                state.fail_presents -= 1;
                return Err(DisplayError::DeviceRemoved);
            }
            state.last_present_dims = Some((bitmap.width, bitmap.height));
        }

        let now = now_ticks();
        let (boundary, qpc) = if sync_interval == 0 {
            ((now - self.epoch) / self.refresh.period_ticks(), now)
        } else {
            let boundary = self.next_boundary(now) + (sync_interval as i64 - 1);
            let tick = self.boundary_tick(boundary);
            self.wait_until_tick(tick);
            (boundary, tick)
        };

        let mut state = self.state.lock();
        state.stats.present_count += 1;
        state.stats.vblank_count = boundary;
        state.stats.present_qpc = qpc;
        Ok(PresentInfo {
            present_count: state.stats.present_count,
            vblank_count: boundary,
            present_qpc: qpc,
        })
    }

    fn wait_for_vblank(&mut self) -> Result<Ticks, DisplayError> {
        let boundary = self.next_boundary(now_ticks());
        let tick = self.boundary_tick(boundary);
        self.wait_until_tick(tick);
        let mut state = self.state.lock();
        if boundary > state.stats.vblank_count {
            state.stats.vblank_count = boundary;
        }
        Ok(tick)
    }

    fn frame_statistics(&self) -> SurfaceStatistics {
        self.state.lock().stats
    }

    fn refresh_period(&self) -> Result<RefreshTimebase, DisplayError> {
        if self.state.lock().fail_refresh_query {
            return Err(DisplayError::RefreshUnavailable);
        }
        Ok(self.refresh)
    }

    fn set_fullscreen(&mut self, fullscreen: bool) -> Result<(), DisplayError> {
        self.state.lock().fullscreen = fullscreen;
        Ok(())
    }

    fn is_fullscreen(&self) -> bool {
        self.state.lock().fullscreen
    }

    fn enumerate_modes(&self) -> Vec<DisplayMode> {
        vec![self.state.lock().mode]
    }

    fn set_mode(&mut self, mode: DisplayMode) -> Result<(), DisplayError> {
        let current = self.state.lock().mode;
        if mode.width != current.width || mode.height != current.height {
            return Err(DisplayError::UnsupportedMode(
                mode.width,
                mode.height,
                mode.refresh_hz as u32,
            ));
        }
        self.state.lock().mode = mode;
        Ok(())
    }

    fn recreate(&mut self) -> Result<(), DisplayError> {
        let mut state = self.state.lock();
        state.fail_presents = 0;
        state.recreate_count += 1;
        tracing::info!(target: "display.virtual", count = state.recreate_count, "surface recreated");
        Ok(())
    }
}
