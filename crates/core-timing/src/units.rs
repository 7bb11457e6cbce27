//! Refresh-interval unit algebra.
//!
//! The presenter schedules against two clocks at once: the display's VBLANK
//! cadence (whole refresh intervals, waited through the display primitive)
//! and the tick counter (sub-interval residue, waited by spinning). Any
//! duration therefore decomposes into `whole` VBLANKs plus a fractional
//! remainder strictly smaller than one refresh period.

use crate::{ticks_to_us, us_to_ticks, Ticks, TICKS_PER_SECOND};

/// Fallback refresh rate assumed when the display cannot report one.
pub const FALLBACK_REFRESH_HZ: f64 = 60.0;

/// A duration split against the refresh period: `whole` complete VBLANK
/// intervals plus `fraction_ticks` residue, `0 <= fraction_ticks < period`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VblankDecomposition {
    pub whole: i64,
    pub fraction_ticks: Ticks,
    pub fraction_us: f64,
    pub total_ticks: Ticks,
}

/// Conversion factors derived from one display refresh period.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefreshTimebase {
    period_ticks: Ticks,
}

impl RefreshTimebase {
    /// Build from a refresh rate in Hz. Non-finite or non-positive rates
    /// fall back to [`FALLBACK_REFRESH_HZ`].
    pub fn from_hz(hz: f64) -> Self {
        let hz = if hz.is_finite() && hz > 0.0 {
            hz
        } else {
            FALLBACK_REFRESH_HZ
        };
        let period_ticks = (TICKS_PER_SECOND as f64 / hz).round() as Ticks;
        Self { period_ticks }
    }

    /// Build from a refresh period expressed in ticks.
    pub fn from_period_ticks(period_ticks: Ticks) -> Self {
        debug_assert!(period_ticks > 0);
        Self {
            period_ticks: period_ticks.max(1),
        }
    }

    /// Ticks per VBLANK interval.
    pub fn period_ticks(&self) -> Ticks {
        self.period_ticks
    }

    /// Refresh period in milliseconds.
    pub fn period_ms(&self) -> f64 {
        ticks_to_us(self.period_ticks) / 1_000.0
    }

    /// Refresh rate in Hz.
    pub fn rate_hz(&self) -> f64 {
        TICKS_PER_SECOND as f64 / self.period_ticks as f64
    }

    /// Convert microseconds to (possibly fractional) VBLANK units.
    pub fn us_to_vblanks(&self, us: f64) -> f64 {
        us_to_ticks(us) as f64 / self.period_ticks as f64
    }

    /// Convert VBLANK units to microseconds.
    pub fn vblanks_to_us(&self, vblanks: f64) -> f64 {
        ticks_to_us((vblanks * self.period_ticks as f64).round() as Ticks)
    }

    /// Convert whole VBLANK intervals to ticks.
    pub fn vblanks_to_ticks(&self, vblanks: i64) -> Ticks {
        vblanks.saturating_mul(self.period_ticks)
    }

    /// Decompose a duration in microseconds into whole VBLANKs plus a
    /// fractional microsecond residue.
    pub fn decompose_us(&self, us: f64) -> VblankDecomposition {
        let total_ticks = us_to_ticks(us.max(0.0));
        self.decompose_ticks(total_ticks)
    }

    /// Decompose a tick duration into whole VBLANKs plus residue ticks.
    pub fn decompose_ticks(&self, total_ticks: Ticks) -> VblankDecomposition {
        let total_ticks = total_ticks.max(0);
        let whole = total_ticks / self.period_ticks;
        let fraction_ticks = total_ticks % self.period_ticks;
        VblankDecomposition {
            whole,
            fraction_ticks,
            fraction_us: ticks_to_us(fraction_ticks),
            total_ticks,
        }
    }

    /// Number of whole VBLANK intervals needed to cover a duration
    /// (rounded towards infinity, the way exposure windows are budgeted).
    pub fn vblanks_to_cover_us(&self, us: f64) -> i64 {
        let ticks = us_to_ticks(us.max(0.0));
        (ticks + self.period_ticks - 1) / self.period_ticks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TICKS_PER_MILLISECOND;

    #[test]
    fn sixty_hz_period() {
        let tb = RefreshTimebase::from_hz(60.0);
        let ms = tb.period_ms();
        assert!((ms - 16.666).abs() < 0.01, "period {ms} ms");
        assert!((tb.rate_hz() - 60.0).abs() < 0.01);
    }

    #[test]
    fn invalid_rate_falls_back() {
        let tb = RefreshTimebase::from_hz(0.0);
        assert!((tb.rate_hz() - FALLBACK_REFRESH_HZ).abs() < 0.01);
        let tb = RefreshTimebase::from_hz(f64::NAN);
        assert!((tb.rate_hz() - FALLBACK_REFRESH_HZ).abs() < 0.01);
    }

    #[test]
    fn decomposition_invariant_holds() {
        let tb = RefreshTimebase::from_hz(60.0);
        for us in [0.0, 100.0, 16_666.0, 20_000.0, 50_000.0, 123_456.7] {
            let d = tb.decompose_us(us);
            assert!(d.fraction_ticks >= 0);
            assert!(d.fraction_ticks < tb.period_ticks());
            assert_eq!(
                d.whole * tb.period_ticks() + d.fraction_ticks,
                d.total_ticks
            );
        }
    }

    #[test]
    fn decompose_exact_multiple_has_zero_fraction() {
        let tb = RefreshTimebase::from_period_ticks(10 * TICKS_PER_MILLISECOND);
        let d = tb.decompose_ticks(30 * TICKS_PER_MILLISECOND);
        assert_eq!(d.whole, 3);
        assert_eq!(d.fraction_ticks, 0);
    }

    #[test]
    fn cover_rounds_up() {
        let tb = RefreshTimebase::from_period_ticks(10 * TICKS_PER_MILLISECOND);
        assert_eq!(tb.vblanks_to_cover_us(0.0), 0);
        assert_eq!(tb.vblanks_to_cover_us(10_000.0), 1);
        assert_eq!(tb.vblanks_to_cover_us(10_001.0), 2);
    }
}
