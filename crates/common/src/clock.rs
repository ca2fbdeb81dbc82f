//! Clock and timing utilities for render supervision.
//!
//! The render engine reports progress as microseconds of output written.
//! This module provides utilities for:
//! - Timing a render session (elapsed time, ETA)
//! - Converting engine microsecond timestamps
//! - Measuring duration drift between expected and produced output

use std::time::Instant;

/// A clock anchored at the moment a render session started.
#[derive(Debug, Clone)]
pub struct RenderClock {
    /// The instant the render started.
    epoch: Instant,

    /// Wall-clock time at epoch (RFC 3339 string).
    epoch_wall: String,
}

impl RenderClock {
    /// Create a new render clock anchored to now.
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
            epoch_wall: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Seconds elapsed since the render started.
    pub fn elapsed_secs(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    /// Wall-clock time at render start.
    pub fn epoch_wall(&self) -> &str {
        &self.epoch_wall
    }

    /// Convert engine microseconds to seconds.
    pub fn us_to_secs(us: i64) -> f64 {
        us as f64 / 1_000_000.0
    }
}

/// ETA from elapsed wall time and completion fraction.
pub fn eta_from_elapsed(elapsed_secs: f64, fraction: f64) -> f64 {
    if fraction <= 0.0 {
        return 0.0;
    }
    ((elapsed_secs / fraction.min(1.0)) - elapsed_secs).max(0.0)
}

/// Drift between the expected output duration and what the engine produced.
#[derive(Debug, Clone, Copy)]
pub struct DriftMeasurement {
    /// Expected duration (us).
    pub expected_us: i64,
    /// Measured duration (us).
    pub measured_us: i64,
}

impl DriftMeasurement {
    /// Drift in microseconds (positive = output is longer than expected).
    pub fn drift_us(&self) -> i64 {
        self.measured_us - self.expected_us
    }

    /// Drift in milliseconds.
    pub fn drift_ms(&self) -> f64 {
        self.drift_us() as f64 / 1_000.0
    }

    /// Whether drift exceeds an acceptable threshold.
    pub fn exceeds_threshold_ms(&self, threshold_ms: f64) -> bool {
        self.drift_ms().abs() > threshold_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_elapsed() {
        let clock = RenderClock::start();
        assert!(clock.elapsed_secs() < 1.0);
        assert!(!clock.epoch_wall().is_empty());
    }

    #[test]
    fn test_us_conversion() {
        assert!((RenderClock::us_to_secs(1_500_000) - 1.5).abs() < 1e-9);
        assert_eq!(RenderClock::us_to_secs(0), 0.0);
    }

    #[test]
    fn test_eta() {
        assert!((eta_from_elapsed(10.0, 0.5) - 10.0).abs() < 1e-9);
        assert_eq!(eta_from_elapsed(10.0, 0.0), 0.0);
        assert_eq!(eta_from_elapsed(10.0, 1.0), 0.0);
    }

    #[test]
    fn test_drift_measurement() {
        let drift = DriftMeasurement {
            expected_us: 10_000_000,
            measured_us: 10_050_000,
        };
        assert_eq!(drift.drift_us(), 50_000);
        assert!((drift.drift_ms() - 50.0).abs() < 1e-9);
        assert!(drift.exceeds_threshold_ms(33.3));
        assert!(!drift.exceeds_threshold_ms(100.0));
    }
}
