//! Progress reporting for streaming engine runs.
//!
//! Engines take an optional callback instead of owning any notification
//! machinery; callers decide how and where to observe progress (print it,
//! forward it over a channel, ignore it). Within one run the reported
//! fraction is monotonically non-decreasing and ends at 1.0 on completion.

/// Progress callback function type. Receives a fraction in `[0.0, 1.0]`.
pub type ProgressCallback = dyn Fn(f64) + Send + Sync;

/// Wraps an optional callback and enforces the per-run monotonicity
/// guarantee, clamping out-of-range values along the way.
pub struct ProgressReporter<'a> {
    callback: Option<&'a ProgressCallback>,
    last: f64,
}

impl<'a> ProgressReporter<'a> {
    pub fn new(callback: Option<&'a ProgressCallback>) -> Self {
        Self { callback, last: 0.0 }
    }

    /// Report `done / total` as the current fraction. A zero `total` counts
    /// as already complete.
    pub fn update(&mut self, done: u64, total: u64) {
        let fraction = if total == 0 { 1.0 } else { done as f64 / total as f64 };
        self.emit(fraction);
    }

    /// Report completion.
    pub fn finish(&mut self) {
        self.emit(1.0);
    }

    fn emit(&mut self, fraction: f64) {
        let clamped = fraction.clamp(0.0, 1.0);
        if clamped < self.last {
            return;
        }
        self.last = clamped;
        if let Some(callback) = self.callback {
            callback(clamped);
        }
    }
}
