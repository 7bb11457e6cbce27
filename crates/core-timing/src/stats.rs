//! Streaming timing statistics.
//!
//! Render, present, trigger and acquisition durations are sampled on hot
//! threads, so the collector keeps only running state: count, mean and M2
//! (Welford's online algorithm) plus min/max updated in place. Two usage
//! patterns are supported, matching how the measurements are taken:
//!
//! 1. `add_frame` per event: the interval between consecutive calls is the
//!    sample, and FPS follows from first-to-last span.
//! 2. `tic`/`toc` around an action: the tic→toc interval is the sample, but
//!    FPS is still computed from the first tic to the last toc, so mean
//!    duration and FPS are intentionally *not* reciprocals of each other.

use parking_lot::Mutex;

use crate::{now_ticks, ticks_to_ms, Ticks};

#[derive(Debug, Clone)]
struct StatsInner {
    start: Ticks,
    stop: Ticks,
    tic: Ticks,
    toc: Ticks,
    min_ms: f64,
    max_ms: f64,
    count: f64,
    mean_ms: f64,
    m2: f64,
    n_events: f64,
    initialized: bool,
    last_was_tic: bool,
}

impl StatsInner {
    fn new() -> Self {
        Self {
            start: 0,
            stop: 0,
            tic: 0,
            toc: 0,
            min_ms: f64::INFINITY,
            max_ms: f64::NEG_INFINITY,
            count: 0.0,
            mean_ms: 0.0,
            m2: 0.0,
            n_events: 0.0,
            initialized: false,
            last_was_tic: false,
        }
    }

    fn push_sample_ms(&mut self, sample_ms: f64) {
        self.count += 1.0;
        let delta = sample_ms - self.mean_ms;
        self.mean_ms += delta / self.count;
        let delta2 = sample_ms - self.mean_ms;
        self.m2 += delta * delta2;
        if sample_ms < self.min_ms {
            self.min_ms = sample_ms;
        }
        if sample_ms > self.max_ms {
            self.max_ms = sample_ms;
        }
    }
}

/// Point-in-time copy of collected statistics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsSnapshot {
    pub count: u64,
    pub min_ms: f64,
    pub mean_ms: f64,
    pub max_ms: f64,
    pub deviation_ms: f64,
    pub fps: f64,
    pub total_ms: f64,
}

/// Thread-safe streaming duration statistics.
#[derive(Debug)]
pub struct FrameStatistics {
    inner: Mutex<StatsInner>,
}

impl Default for FrameStatistics {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameStatistics {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StatsInner::new()),
        }
    }

    /// Record one event; the sample is the interval since the previous call.
    pub fn add_frame(&self) {
        let now = now_ticks();
        let mut inner = self.inner.lock();
        if !inner.initialized {
            inner.start = now;
            inner.stop = now;
            inner.initialized = true;
            inner.n_events += 1.0;
            return;
        }
        let sample = ticks_to_ms(now - inner.stop);
        inner.stop = now;
        inner.n_events += 1.0;
        inner.push_sample_ms(sample);
    }

    /// Mark the beginning of a measured action.
    pub fn tic(&self) {
        let now = now_ticks();
        let mut inner = self.inner.lock();
        inner.tic = now;
        inner.last_was_tic = true;
        if !inner.initialized {
            inner.start = now;
            inner.initialized = true;
        }
    }

    /// Mark the end of a measured action and record the tic→toc sample.
    pub fn toc(&self) {
        let now = now_ticks();
        let mut inner = self.inner.lock();
        if !inner.last_was_tic {
            tracing::warn!(target: "timing.stats", "toc without preceding tic");
            return;
        }
        inner.toc = now;
        inner.stop = now;
        inner.last_was_tic = false;
        inner.n_events += 1.0;
        let sample = ticks_to_ms(now - inner.tic);
        inner.push_sample_ms(sample);
    }

    /// Last completed tic→toc interval in ticks.
    pub fn last_tictoc_interval(&self) -> Ticks {
        let inner = self.inner.lock();
        inner.toc.saturating_sub(inner.tic)
    }

    /// Record an externally measured interval.
    pub fn add_measurement(&self, from: Ticks, to: Ticks) {
        let mut inner = self.inner.lock();
        if !inner.initialized {
            inner.start = from;
            inner.initialized = true;
        }
        inner.stop = to;
        inner.n_events += 1.0;
        let sample = ticks_to_ms(to - from);
        inner.push_sample_ms(sample);
    }

    /// Discard all collected state.
    pub fn reset(&self) {
        *self.inner.lock() = StatsInner::new();
    }

    pub fn mean_ms(&self) -> f64 {
        self.inner.lock().mean_ms
    }

    pub fn min_ms(&self) -> f64 {
        let inner = self.inner.lock();
        if inner.count > 0.0 {
            inner.min_ms
        } else {
            0.0
        }
    }

    pub fn max_ms(&self) -> f64 {
        let inner = self.inner.lock();
        if inner.count > 0.0 {
            inner.max_ms
        } else {
            0.0
        }
    }

    /// Sample standard deviation in milliseconds.
    pub fn deviation_ms(&self) -> f64 {
        let inner = self.inner.lock();
        if inner.count > 1.0 {
            (inner.m2 / (inner.count - 1.0)).sqrt()
        } else {
            0.0
        }
    }

    /// Events per second over the whole measurement span.
    pub fn fps(&self) -> f64 {
        let inner = self.inner.lock();
        let span_ms = ticks_to_ms(inner.stop.saturating_sub(inner.start));
        if span_ms > 0.0 {
            // First event opens the span; n-1 intervals fit inside it for
            // add_frame usage, but the original counts raw events, so we do.
            inner.n_events * 1_000.0 / span_ms
        } else {
            0.0
        }
    }

    /// Total measurement span in milliseconds.
    pub fn total_time_ms(&self) -> f64 {
        let inner = self.inner.lock();
        ticks_to_ms(inner.stop.saturating_sub(inner.start))
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let inner = self.inner.lock();
        let span_ms = ticks_to_ms(inner.stop.saturating_sub(inner.start));
        StatsSnapshot {
            count: inner.count as u64,
            min_ms: if inner.count > 0.0 { inner.min_ms } else { 0.0 },
            mean_ms: inner.mean_ms,
            max_ms: if inner.count > 0.0 { inner.max_ms } else { 0.0 },
            deviation_ms: if inner.count > 1.0 {
                (inner.m2 / (inner.count - 1.0)).sqrt()
            } else {
                0.0
            },
            fps: if span_ms > 0.0 {
                inner.n_events * 1_000.0 / span_ms
            } else {
                0.0
            },
            total_ms: span_ms,
        }
    }

    /// Merge two collectors into a fresh one. Welford state is combined with
    /// the parallel-variance formula; the span is the union of both spans.
    pub fn combine(a: &FrameStatistics, b: &FrameStatistics) -> FrameStatistics {
        let ia = a.inner.lock().clone();
        let ib = b.inner.lock().clone();
        let mut out = StatsInner::new();

        out.count = ia.count + ib.count;
        if out.count > 0.0 {
            let delta = ib.mean_ms - ia.mean_ms;
            out.mean_ms = (ia.mean_ms * ia.count + ib.mean_ms * ib.count) / out.count;
            out.m2 = ia.m2 + ib.m2 + delta * delta * ia.count * ib.count / out.count;
            out.min_ms = ia.min_ms.min(ib.min_ms);
            out.max_ms = ia.max_ms.max(ib.max_ms);
        }
        out.n_events = ia.n_events + ib.n_events;
        out.initialized = ia.initialized || ib.initialized;
        out.start = match (ia.initialized, ib.initialized) {
            (true, true) => ia.start.min(ib.start),
            (true, false) => ia.start,
            (false, true) => ib.start,
            (false, false) => 0,
        };
        out.stop = ia.stop.max(ib.stop);

        FrameStatistics {
            inner: Mutex::new(out),
        }
    }
}
