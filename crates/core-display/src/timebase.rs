//! Per-projector timing tuple.
//!
//! One `DisplayTimebase` travels with each presenter and holds every
//! derived quantity its scheduling needs: the refresh period, the present
//! interval (in VBLANK units), the present-to-trigger delay split into
//! whole VBLANKs plus a fractional microsecond residue, and the exposure
//! budget rounded up to whole VBLANKs. All deriveds are recomputed
//! whenever an input changes so the presenter never does unit math inline.

use core_timing::units::{RefreshTimebase, VblankDecomposition};
use core_timing::Ticks;

#[derive(Debug, Clone)]
pub struct DisplayTimebase {
    refresh: RefreshTimebase,

    /// Frame display time in VBLANK units (non-blocking mode).
    present_interval_vblanks: i64,
    present_interval_ticks: Ticks,

    /// Present-to-trigger delay.
    delay_us: f64,
    delay_ticks: Ticks,
    delay_decomposition: VblankDecomposition,

    /// Camera exposure budget.
    exposure_us: f64,
    exposure_ticks: Ticks,
    exposure_whole_vblanks: i64,

    /// Blocking acquisition: the presenter itself spins out the delay.
    blocking: bool,
    /// Overlap next present with the previous exposure. Valid only while
    /// `exposure <= delay`; the setter enforces the gate.
    concurrent_delay: bool,
    /// Fixed-pattern acquisition (one pattern repeated, sync loosened).
    fixed: bool,
    /// Repeat count for fixed-pattern acquisition.
    num_acquire: i64,
}

impl DisplayTimebase {
    pub fn new(refresh: RefreshTimebase) -> Self {
        let mut tb = Self {
            refresh,
            present_interval_vblanks: 1,
            present_interval_ticks: 0,
            delay_us: 0.0,
            delay_ticks: 0,
            delay_decomposition: refresh.decompose_us(0.0),
            exposure_us: 0.0,
            exposure_ticks: 0,
            exposure_whole_vblanks: 0,
            blocking: true,
            concurrent_delay: false,
            fixed: false,
            num_acquire: 1,
        };
        tb.recompute();
        tb
    }

    fn recompute(&mut self) {
        self.present_interval_ticks = self.refresh.vblanks_to_ticks(self.present_interval_vblanks);
        self.delay_decomposition = self.refresh.decompose_us(self.delay_us);
        self.delay_ticks = self.delay_decomposition.total_ticks;
        self.exposure_ticks = core_timing::us_to_ticks(self.exposure_us);
        self.exposure_whole_vblanks = self.refresh.vblanks_to_cover_us(self.exposure_us);
        if self.exposure_ticks > self.delay_ticks {
            // Overlap gate: exposure no longer fits inside the delay.
            self.concurrent_delay = false;
        }
    }

    pub fn refresh(&self) -> RefreshTimebase {
        self.refresh
    }

    /// Swap the refresh timebase (mode change, recreated swap chain) and
    /// re-derive everything.
    pub fn set_refresh(&mut self, refresh: RefreshTimebase) {
        self.refresh = refresh;
        self.recompute();
    }

    pub fn present_interval_vblanks(&self) -> i64 {
        self.present_interval_vblanks
    }

    pub fn present_interval_ticks(&self) -> Ticks {
        self.present_interval_ticks
    }

    /// Present period for non-blocking mode, in whole VBLANK units (≥ 1).
    pub fn set_present_interval_vblanks(&mut self, vblanks: i64) {
        self.present_interval_vblanks = vblanks.max(1);
        self.recompute();
    }

    pub fn delay_us(&self) -> f64 {
        self.delay_us
    }

    pub fn delay_ticks(&self) -> Ticks {
        self.delay_ticks
    }

    pub fn delay_decomposition(&self) -> VblankDecomposition {
        self.delay_decomposition
    }

    pub fn set_delay_ms(&mut self, ms: f64) {
        self.delay_us = ms.max(0.0) * 1_000.0;
        self.recompute();
    }

    pub fn set_delay_us(&mut self, us: f64) {
        self.delay_us = us.max(0.0);
        self.recompute();
    }

    pub fn exposure_us(&self) -> f64 {
        self.exposure_us
    }

    pub fn exposure_ticks(&self) -> Ticks {
        self.exposure_ticks
    }

    /// Exposure rounded up to whole VBLANK intervals.
    pub fn exposure_whole_vblanks(&self) -> i64 {
        self.exposure_whole_vblanks
    }

    pub fn set_exposure_us(&mut self, us: f64) {
        self.exposure_us = us.max(0.0);
        self.recompute();
    }

    pub fn blocking(&self) -> bool {
        self.blocking
    }

    pub fn set_blocking(&mut self, blocking: bool) {
        self.blocking = blocking;
    }

    pub fn concurrent_delay(&self) -> bool {
        self.concurrent_delay
    }

    /// Request exposure/present overlap. Granted only while the measured
    /// exposure fits inside the present-to-trigger delay; returns the
    /// effective setting.
    pub fn set_concurrent_delay(&mut self, requested: bool) -> bool {
        self.concurrent_delay = requested && self.exposure_ticks <= self.delay_ticks;
        self.concurrent_delay
    }

    pub fn fixed(&self) -> bool {
        self.fixed
    }

    pub fn set_fixed(&mut self, fixed: bool) {
        self.fixed = fixed;
    }

    pub fn num_acquire(&self) -> i64 {
        self.num_acquire
    }

    pub fn set_num_acquire(&mut self, n: i64) {
        self.num_acquire = n.max(1);
    }

    /// Ticks between consecutive presents in the current mode: the
    /// configured present interval, but never less than what delay plus
    /// exposure require when they cannot overlap.
    pub fn step_budget_ticks(&self) -> Ticks {
        let serial = if self.concurrent_delay {
            self.delay_ticks
        } else {
            self.delay_ticks + self.exposure_ticks
        };
        self.present_interval_ticks.max(serial)
    }
}
