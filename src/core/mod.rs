// Core types
pub mod types;
pub use types::*;

// Assignment map and allocation primitives
pub mod registry;

// Wait-for graph and cycle detection
pub mod graph;

// Throughput and utilization counters
pub mod metrics;

// The engine
pub mod simulator;
pub use simulator::{Observer, Resolution, Simulator};

// Supervisory deadlock monitor
pub mod monitor;
pub use monitor::{DeadlockCallback, Monitor, MonitorConfig, MonitorPolicy};

// Logging functionality
#[cfg(feature = "event-log")]
pub mod logger;

pub mod stress;
pub use stress::StressConfig;

#[cfg(feature = "event-log")]
use anyhow::Context;
use anyhow::Result;
use std::sync::Arc;

/// Simulator configuration
///
/// ```rust
/// use deadlock_sim::SimConfig;
///
/// let sim = SimConfig::new()
///     .observer(|event| println!("{:?}", event.event))
///     .build()
///     .unwrap();
/// assert!(sim.acquire("R1", "P1"));
/// ```
#[derive(Default)]
pub struct SimConfig {
    observer: Option<Observer>,
    on_deadlock: Option<DeadlockCallback>,
    #[cfg(feature = "event-log")]
    log_path: Option<String>,
    stress: Option<StressConfig>,
}

impl SimConfig {
    /// Create a configuration with no observer, no event log and no stress jitter
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a callback to receive every engine event
    ///
    /// The callback runs on the thread that performed the operation, after
    /// the engine lock is released.
    pub fn observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(&EngineEvent) + Send + Sync + 'static,
    {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Set a callback to be invoked when a deadlock is reported
    ///
    /// Fires for every cycle found by [`Simulator::find_deadlock`] or
    /// [`Simulator::detect_cycle`], and for every report of a running
    /// [`Monitor`].
    pub fn on_deadlock<F>(mut self, callback: F) -> Self
    where
        F: Fn(DeadlockInfo) + Send + Sync + 'static,
    {
        self.on_deadlock = Some(Arc::new(callback));
        self
    }

    /// Activate the event log and set the path for the log file
    ///
    /// # Arguments
    /// * `path` - Path to the log file. If the path contains "{timestamp}",
    ///   it will be replaced with the current timestamp.
    #[cfg(feature = "event-log")]
    pub fn with_log<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.log_path = Some(path.as_ref().to_string_lossy().into_owned());
        self
    }

    /// Inject random jitter before acquisition attempts
    ///
    /// Has no effect unless the "stress-test" feature is enabled.
    pub fn stress(mut self, config: StressConfig) -> Self {
        self.stress = Some(config);
        self
    }

    /// Build the simulator
    ///
    /// # Errors
    /// Returns an error if the event log cannot be created
    pub fn build(self) -> Result<Simulator> {
        let mut simulator = Simulator::with_parts(self.observer, self.stress);
        if let Some(callback) = self.on_deadlock {
            simulator.set_deadlock_callback(callback);
        }

        #[cfg(feature = "event-log")]
        if let Some(path) = self.log_path {
            let logger =
                logger::EventLogger::with_file(path).context("Failed to initialize logger")?;
            simulator.set_logger(logger);
        }

        Ok(simulator)
    }
}
