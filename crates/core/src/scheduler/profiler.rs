/// Performance profiling helpers for tracking container timing.
///
/// Provides RAII-style profiling scopes that report through `tracing`.
use std::borrow::Cow;
use std::time::Instant;
use tracing::debug;

/// A profiling scope that measures elapsed time using RAII.
///
/// The elapsed time is logged at debug level when dropped.
pub struct ProfilerScope {
    start: Instant,
    name: Cow<'static, str>,
}

impl ProfilerScope {
    /// Creates a new profiling scope.
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Gets elapsed time in milliseconds.
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for ProfilerScope {
    fn drop(&mut self) {
        debug!(scope = %self.name, elapsed_ms = self.elapsed_ms(), "profiled");
    }
}

/// Running statistics over repeated executions of one graph.
#[derive(Debug, Clone, Default)]
pub struct RunTimer {
    runs: u64,
    last_ms: f64,
    total_ms: f64,
}

impl RunTimer {
    /// Records one run in milliseconds.
    pub fn record(&mut self, time_ms: f64) {
        self.runs += 1;
        self.last_ms = time_ms;
        self.total_ms += time_ms;
    }

    pub fn runs(&self) -> u64 {
        self.runs
    }

    /// Gets the last recorded run time.
    pub fn last_ms(&self) -> f64 {
        self.last_ms
    }

    /// Mean run time, zero before the first run.
    pub fn mean_ms(&self) -> f64 {
        if self.runs == 0 {
            0.0
        } else {
            self.total_ms / self.runs as f64
        }
    }
}
