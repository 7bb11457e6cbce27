//! Busy-wait timers.
//!
//! Camera triggers must fire within tens of microseconds of their scheduled
//! instant; `thread::sleep` wakes on the scheduler's terms, typically a
//! millisecond or more late. The spinlock timer therefore burns the core:
//! it reads the tick counter in a tight loop with a `spin_loop` hint until
//! the target passes. Callers are expected to hold the wait short (a frame
//! period at most) and to own the thread they spin on.

use crate::{now_ticks, ticks_to_ms, Ticks, TICKS_PER_MICROSECOND, TICKS_PER_MILLISECOND};

/// Microsecond-resolution busy-wait timer.
///
/// The wait interval is set once and reused; `wait` and its variants record
/// the actual start/stop ticks so the achieved duration can be queried
/// afterwards with [`SpinlockTimer::last_wait_duration_ms`].
#[derive(Debug, Clone)]
pub struct SpinlockTimer {
    interval: Ticks,
    start: Ticks,
    stop: Ticks,
}

impl Default for SpinlockTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl SpinlockTimer {
    pub fn new() -> Self {
        Self {
            interval: 0,
            start: 0,
            stop: 0,
        }
    }

    /// Set the wait interval in microseconds.
    pub fn set_wait_interval_us(&mut self, us: f64) {
        debug_assert!(us >= 0.0);
        self.interval = (us * TICKS_PER_MICROSECOND as f64).round() as Ticks;
    }

    /// Set the wait interval in milliseconds.
    pub fn set_wait_interval_ms(&mut self, ms: f64) {
        debug_assert!(ms >= 0.0);
        self.interval = (ms * TICKS_PER_MILLISECOND as f64).round() as Ticks;
    }

    /// Configured interval in ticks.
    pub fn interval_ticks(&self) -> Ticks {
        self.interval
    }

    /// Spin for the configured interval starting now.
    pub fn wait(&mut self) {
        let start = now_ticks();
        self.wait_from(start);
    }

    /// Spin until `start + interval`, crediting the wait as having begun at
    /// `start`. Lets callers fold work done since `start` into the wait.
    pub fn wait_from(&mut self, start: Ticks) {
        let target = start.saturating_add(self.interval);
        self.start = start;
        self.spin_until(target);
    }

    /// Spin until the absolute tick `target` is reached.
    pub fn wait_to(&mut self, target: Ticks) {
        self.start = now_ticks();
        self.spin_until(target);
    }

    /// Spin until `target`, crediting the wait as having begun at `start`.
    pub fn wait_from_to(&mut self, start: Ticks, target: Ticks) {
        self.start = start;
        self.spin_until(target);
    }

    /// Duration of the last completed wait in milliseconds.
    pub fn last_wait_duration_ms(&self) -> f64 {
        ticks_to_ms(self.stop.saturating_sub(self.start))
    }

    fn spin_until(&mut self, target: Ticks) {
        let mut now = now_ticks();
        while now < target {
            std::hint::spin_loop();
            now = now_ticks();
        }
        self.stop = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_reaches_requested_interval() {
        let mut timer = SpinlockTimer::new();
        timer.set_wait_interval_us(200.0);
        let before = now_ticks();
        timer.wait();
        let elapsed = now_ticks() - before;
        assert!(elapsed >= 200 * TICKS_PER_MICROSECOND);
        assert!(timer.last_wait_duration_ms() >= 0.2);
    }

    #[test]
    fn wait_to_absolute_target() {
        let mut timer = SpinlockTimer::new();
        let target = now_ticks() + 100 * TICKS_PER_MICROSECOND;
        timer.wait_to(target);
        assert!(now_ticks() >= target);
    }

    #[test]
    fn wait_to_past_target_returns_immediately() {
        let mut timer = SpinlockTimer::new();
        let target = now_ticks() - TICKS_PER_MILLISECOND;
        timer.wait_to(target);
        // No hang, and the recorded duration is non-negative.
        assert!(timer.last_wait_duration_ms() >= 0.0);
    }

    #[test]
    fn wait_from_credits_earlier_start() {
        let mut timer = SpinlockTimer::new();
        timer.set_wait_interval_us(300.0);
        let start = now_ticks();
        // Simulate work taking a slice of the interval.
        let mut spin = SpinlockTimer::new();
        spin.set_wait_interval_us(100.0);
        spin.wait();
        timer.wait_from(start);
        let total = now_ticks() - start;
        assert!(total >= 300 * TICKS_PER_MICROSECOND);
        // The wait should not have added the full interval on top of the work.
        assert!(total < 600 * TICKS_PER_MICROSECOND);
    }
}
