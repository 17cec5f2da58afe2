use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Default trailing window for rate estimation.
const DEFAULT_WINDOW: Duration = Duration::from_secs(5);

/// Default maximum retained samples.
const DEFAULT_MAX_SAMPLES: usize = 100;

struct SpeedSample {
    bytes: u64,
    timestamp: Instant,
}

/// Calculates transfer speed over a trailing time window.
///
/// The rate is bytes completed within the window divided by the window
/// length, so transient stalls and bursts show up promptly instead of being
/// averaged away over the transfer's lifetime.
pub struct SpeedCalculator {
    inner: Mutex<SpeedInner>,
}

struct SpeedInner {
    samples: Vec<SpeedSample>,
    max_samples: usize,
    window: Duration,
}

impl SpeedCalculator {
    /// Creates a new calculator.
    ///
    /// - `window`: trailing window for the rate (default 5 s).
    /// - `max_samples`: maximum retained samples (default 100).
    pub fn new(window: Option<Duration>, max_samples: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(SpeedInner {
                samples: Vec::new(),
                max_samples: max_samples.unwrap_or(DEFAULT_MAX_SAMPLES),
                window: window.unwrap_or(DEFAULT_WINDOW),
            }),
        }
    }

    /// Records `bytes` completed at the current instant.
    pub fn add_sample(&self, bytes: u64) {
        let mut s = self.inner.lock().unwrap();
        let now = Instant::now();
        s.samples.push(SpeedSample {
            bytes,
            timestamp: now,
        });

        // Prune samples outside the window.
        let cutoff = now - s.window;
        s.samples.retain(|sample| sample.timestamp >= cutoff);

        if s.samples.len() > s.max_samples {
            let excess = s.samples.len() - s.max_samples;
            s.samples.drain(..excess);
        }
    }

    /// Returns bytes/second over the trailing window (0.0 with no samples).
    pub fn bytes_per_second(&self) -> f64 {
        let mut s = self.inner.lock().unwrap();
        let cutoff = Instant::now() - s.window;
        s.samples.retain(|sample| sample.timestamp >= cutoff);

        let total: u64 = s.samples.iter().map(|sample| sample.bytes).sum();
        total as f64 / s.window.as_secs_f64()
    }

    /// Estimates time remaining for `remaining_bytes` at the current rate.
    ///
    /// Returns `None` when the rate is zero or vanishingly small.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        let speed = self.bytes_per_second();
        if speed < f64::EPSILON {
            return None;
        }
        Some(Duration::from_secs_f64(remaining_bytes as f64 / speed))
    }

    /// Clears all recorded samples.
    pub fn reset(&self) {
        let mut s = self.inner.lock().unwrap();
        s.samples.clear();
    }
}
