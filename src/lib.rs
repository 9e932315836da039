//! # deadlock-sim
//!
//! A resource allocation and deadlock detection engine.
//!
//! deadlock-sim tracks which process holds which resource and which process
//! waits for which, detects circular waits in the wait-for graph, and applies
//! the classical resolutions: preemption, forced release, and resetting the
//! wait state.
//!
//! ## Features
//!
//! - Mutual exclusion enforced by a single engine lock
//! - All-or-nothing multi-resource acquisition
//! - Iterative cycle detection over the wait-for graph
//! - Blocking requests with timeouts, cancellation and a supervising monitor
//! - Throughput and utilization metrics
//! - Structured events and an optional JSON-lines event log

mod core;
pub use crate::core::{
    DeadlockCallback, Monitor, MonitorConfig, MonitorPolicy, Observer, Resolution, SimConfig, Simulator,
    StressConfig,
    graph::WaitForGraph,
    metrics::{Metered, Metrics, MetricsSnapshot, SessionSummary},
    registry::{Allocator, Grant, ResourceRegistry},
    types::{
        DeadlockCondition, DeadlockInfo, EngineEvent, Events, ProcessId, ResourceId, WaitOutcome,
    },
};

#[cfg(feature = "event-log")]
pub use crate::core::logger::{EventLogger, LogRecord};
