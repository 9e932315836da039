//! Supervisory deadlock monitor
//!
//! Runs cycle detection on a background thread at a fixed interval. When the
//! wait-for graph contains a circular wait, the monitor hands a
//! [`DeadlockInfo`] to the configured callback, writes it to the event log and
//! applies its [`MonitorPolicy`]. Callbacks run on the monitor thread, never
//! under the engine lock, so they may call back into the simulator.
//!
//! Under [`MonitorPolicy::ReportOnly`] a standing cycle is reported once; it is
//! reported again only after it changes or disappears and comes back.

use crate::core::simulator::Simulator;
use crate::core::types::{DeadlockInfo, ProcessId};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Callback invoked with every detected deadlock
pub type DeadlockCallback = Arc<dyn Fn(DeadlockInfo) + Send + Sync>;

/// What the monitor does after reporting a deadlock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MonitorPolicy {
    /// Only report, once per distinct cycle; the caller resolves
    ReportOnly,
    /// Clear the wait-for graph, withdrawing every parked request
    #[default]
    ResetGraph,
    /// Abort the lowest-priority process on the cycle (greatest key)
    AbortVictim,
}

/// Configuration for the monitor thread
#[derive(Clone)]
pub struct MonitorConfig {
    /// Time between detection passes
    pub interval: Duration,
    /// Resolution applied after each report
    pub policy: MonitorPolicy,
    /// Deadlock callback
    pub callback: Option<DeadlockCallback>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            interval: Duration::from_millis(50),
            policy: MonitorPolicy::default(),
            callback: None,
        }
    }
}

impl MonitorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the time between detection passes
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the resolution applied after a report
    pub fn policy(mut self, policy: MonitorPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set a callback to be invoked when a deadlock is detected
    pub fn callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(DeadlockInfo) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self
    }
}

/// Handle to a running monitor thread
///
/// The thread stops when the handle is dropped or [`Monitor::stop`] is called.
pub struct Monitor {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Monitor {
    /// Start monitoring `simulator`
    pub fn spawn(simulator: Arc<Simulator>, config: MonitorConfig) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);

        let handle = thread::spawn(move || {
            let mut reported: Option<Vec<ProcessId>> = None;
            while flag.load(Ordering::Acquire) {
                thread::park_timeout(config.interval);
                if !flag.load(Ordering::Acquire) {
                    break;
                }

                let Some(info) = simulator.scan_deadlock() else {
                    reported = None;
                    continue;
                };
                if config.policy == MonitorPolicy::ReportOnly {
                    let key = cycle_key(&info.process_cycle);
                    if reported.as_ref() == Some(&key) {
                        continue;
                    }
                    reported = Some(key);
                }
                handle_deadlock(&simulator, &config, info);
            }
        });

        Monitor {
            running,
            handle: Some(handle),
        }
    }

    /// Stop the monitor thread and wait for it to exit
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            let _ = handle.join();
        }
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn handle_deadlock(simulator: &Simulator, config: &MonitorConfig, info: DeadlockInfo) {
    simulator.report_deadlock(&info);
    simulator.log_deadlock(&info);
    let victim = pick_victim(&info.process_cycle);

    if let Some(callback) = &config.callback {
        callback(info);
    }

    match config.policy {
        MonitorPolicy::ReportOnly => {}
        MonitorPolicy::ResetGraph => simulator.resolve_circular_wait(),
        MonitorPolicy::AbortVictim => {
            if let Some(victim) = victim {
                simulator.abort(victim);
            }
        }
    }
}

/// Identity of a cycle regardless of which member the traversal started from
fn cycle_key(cycle: &[ProcessId]) -> Vec<ProcessId> {
    let mut key = cycle.to_vec();
    key.sort();
    key
}

/// Lowest priority is the greatest process key
fn pick_victim(cycle: &[ProcessId]) -> Option<ProcessId> {
    cycle.iter().max().cloned()
}
