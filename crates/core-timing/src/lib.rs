//! High-resolution timing for the acquisition engine.
//!
//! Everything in the engine that talks about time does so in *ticks*: a
//! monotonic nanosecond count read from a process-wide origin. Using a fixed
//! 1 GHz tick frequency means trigger instants, present timestamps and raw
//! file metadata are plain `i64` values that need no frequency attached.
//!
//! Three pieces live here:
//! - [`spin`]: busy-wait timers for sub-millisecond trigger scheduling. OS
//!   sleep quanta are far too coarse for present-to-trigger delays, so the
//!   waits spin on the tick counter.
//! - [`units`]: conversion between microseconds, ticks and display refresh
//!   intervals (VBLANK units), including the (whole VBLANKs, fractional µs)
//!   decomposition the presenter schedules against.
//! - [`stats`]: streaming min/mean/stddev/max collection (Welford) used for
//!   render, present, trigger and acquisition measurements.

pub mod spin;
pub mod stats;
pub mod units;

use std::sync::OnceLock;
use std::time::Instant;

/// Monotonic tick count. One tick is one nanosecond from the process origin.
pub type Ticks = i64;

/// Ticks per second (fixed synthetic frequency).
pub const TICKS_PER_SECOND: i64 = 1_000_000_000;

/// Ticks per millisecond.
pub const TICKS_PER_MILLISECOND: i64 = TICKS_PER_SECOND / 1_000;

/// Ticks per microsecond.
pub const TICKS_PER_MICROSECOND: i64 = TICKS_PER_SECOND / 1_000_000;

fn origin() -> Instant {
    static ORIGIN: OnceLock<Instant> = OnceLock::new();
    *ORIGIN.get_or_init(Instant::now)
}

/// Current tick count.
///
/// The first call in the process pins the origin; all later reads are
/// nanoseconds elapsed since then. Saturates at `i64::MAX` (≈292 years).
pub fn now_ticks() -> Ticks {
    let ns = origin().elapsed().as_nanos();
    i64::try_from(ns).unwrap_or(i64::MAX)
}

/// Convert a tick count to milliseconds.
pub fn ticks_to_ms(ticks: Ticks) -> f64 {
    ticks as f64 / TICKS_PER_MILLISECOND as f64
}

/// Convert a tick count to microseconds.
pub fn ticks_to_us(ticks: Ticks) -> f64 {
    ticks as f64 / TICKS_PER_MICROSECOND as f64
}

/// Convert microseconds to ticks (rounded to nearest).
pub fn us_to_ticks(us: f64) -> Ticks {
    (us * TICKS_PER_MICROSECOND as f64).round() as Ticks
}

/// Convert milliseconds to ticks (rounded to nearest).
pub fn ms_to_ticks(ms: f64) -> Ticks {
    (ms * TICKS_PER_MILLISECOND as f64).round() as Ticks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_advance_monotonically() {
        let a = now_ticks();
        let b = now_ticks();
        assert!(b >= a);
    }

    #[test]
    fn unit_conversions_round_trip() {
        assert_eq!(us_to_ticks(1.0), TICKS_PER_MICROSECOND);
        assert_eq!(ms_to_ticks(1.0), TICKS_PER_MILLISECOND);
        assert_eq!(ticks_to_ms(TICKS_PER_MILLISECOND), 1.0);
        assert_eq!(ticks_to_us(us_to_ticks(250.0)), 250.0);
    }
}
