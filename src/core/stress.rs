// src/core/stress.rs
// Jitter injected before acquisition attempts to widen race windows in
// concurrent scenarios. Only active when the "stress-test" feature is enabled.

use std::thread;

#[cfg(feature = "stress-test")]
use rand::{Rng, rng};
#[cfg(feature = "stress-test")]
use std::time::Duration;

/// Configuration options for stress testing
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Probability of delaying an attempt (0.0-1.0)
    pub delay_probability: f64,
    /// Minimum delay in milliseconds
    pub min_delay_ms: u64,
    /// Maximum delay in milliseconds
    pub max_delay_ms: u64,
    /// Whether to yield after a resource is released
    pub yield_after_release: bool,
}

impl Default for StressConfig {
    fn default() -> Self {
        StressConfig {
            delay_probability: 0.5,
            min_delay_ms: 1,
            max_delay_ms: 10,
            yield_after_release: true,
        }
    }
}

/// Apply a delay to the current thread
#[cfg(feature = "stress-test")]
pub fn apply_delay(min_ms: u64, max_ms: u64) {
    let delay_ms = if min_ms >= max_ms {
        min_ms
    } else {
        rng().random_range(min_ms..=max_ms)
    };
    thread::sleep(Duration::from_millis(delay_ms));
}

/// Maybe sleep before an acquisition attempt
///
/// # Returns
/// `true` if the attempt was delayed
#[cfg(feature = "stress-test")]
pub fn on_acquire_attempt(config: &StressConfig) -> bool {
    if rng().random::<f64>() < config.delay_probability {
        apply_delay(config.min_delay_ms, config.max_delay_ms);
        true
    } else {
        false
    }
}

#[cfg(not(feature = "stress-test"))]
pub fn on_acquire_attempt(_config: &StressConfig) -> bool {
    false
}

/// Give other threads a chance to grab a just-released resource
pub fn on_release(config: &StressConfig) {
    if cfg!(feature = "stress-test") && config.yield_after_release {
        thread::yield_now();
    }
}
