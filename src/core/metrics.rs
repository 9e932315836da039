//! Throughput and utilization bookkeeping
//!
//! [`Metrics`] is a set of lock-free counters shared between the simulator
//! and whoever reads them. [`Metered`] is the decorator that feeds it: it
//! wraps any [`Allocator`] and records every successful allocation, so the
//! registry itself stays free of timing code.

use crate::core::registry::{Allocator, Grant};
use crate::core::types::{ProcessId, ResourceId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Point-in-time read of the counters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Completed allocation operations (throughput proxy)
    pub completed_count: u64,
    /// Mean time from request start to grant, in milliseconds (0 when nothing completed)
    pub mean_utilization_ms: f64,
}

/// Report produced when a session is closed
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Wall-clock time between `start_session` and `end_session`
    pub elapsed_ms: u64,
    /// Completed allocation operations
    pub completed_count: u64,
    /// Mean utilization time in milliseconds
    pub mean_utilization_ms: f64,
}

/// Process-wide allocation counters
#[derive(Debug, Default)]
pub struct Metrics {
    completed: AtomicU64,
    utilization_nanos: AtomicU64,
    utilization_count: AtomicU64,
    session_start: Mutex<Option<Instant>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed operation that started at `started`
    pub fn record(&self, started: Instant) {
        let nanos = u64::try_from(started.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.utilization_nanos.fetch_add(nanos, Ordering::Relaxed);
        self.utilization_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn completed_count(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Arithmetic mean of recorded utilization times, 0 when none were recorded
    pub fn mean_utilization_ms(&self) -> f64 {
        let count = self.utilization_count.load(Ordering::Relaxed);
        if count == 0 {
            return 0.0;
        }
        let nanos = self.utilization_nanos.load(Ordering::Relaxed);
        nanos as f64 / count as f64 / 1_000_000.0
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            completed_count: self.completed_count(),
            mean_utilization_ms: self.mean_utilization_ms(),
        }
    }

    /// Start the wall-clock session timer, restarting it if already running
    pub fn start_session(&self) {
        *self.session_start.lock() = Some(Instant::now());
    }

    /// Stop the session timer and summarize
    ///
    /// Ending a session that was never started reports zero elapsed time.
    pub fn end_session(&self) -> SessionSummary {
        let elapsed_ms = self
            .session_start
            .lock()
            .take()
            .map(|start| u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0);

        SessionSummary {
            elapsed_ms,
            completed_count: self.completed_count(),
            mean_utilization_ms: self.mean_utilization_ms(),
        }
    }
}

/// Allocator decorator recording throughput and utilization
///
/// Successful `acquire`, `acquire_all` and every `preempt_and_acquire` count
/// as one completed operation each. Releases are not recorded.
#[derive(Debug)]
pub struct Metered<A> {
    inner: A,
    metrics: Arc<Metrics>,
}

impl<A: Allocator> Metered<A> {
    pub fn new(inner: A, metrics: Arc<Metrics>) -> Self {
        Metered { inner, metrics }
    }

    /// The wrapped allocator
    pub fn inner(&self) -> &A {
        &self.inner
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Acquire, attributing the time since `started` to the operation
    ///
    /// Used by blocking requests, whose utilization time includes the wait.
    pub fn acquire_since(
        &mut self,
        resource: &ResourceId,
        process: &ProcessId,
        started: Instant,
    ) -> Grant {
        let grant = self.inner.acquire(resource, process);
        if grant.is_granted() {
            self.metrics.record(started);
        }
        grant
    }
}

impl<A: Allocator> Allocator for Metered<A> {
    fn acquire(&mut self, resource: &ResourceId, process: &ProcessId) -> Grant {
        self.acquire_since(resource, process, Instant::now())
    }

    fn release(&mut self, resource: &ResourceId) -> Option<ProcessId> {
        self.inner.release(resource)
    }

    fn preempt_and_acquire(
        &mut self,
        resource: &ResourceId,
        process: &ProcessId,
    ) -> Option<ProcessId> {
        let started = Instant::now();
        let evicted = self.inner.preempt_and_acquire(resource, process);
        self.metrics.record(started);
        evicted
    }

    fn acquire_all(&mut self, process: &ProcessId, resources: &[ResourceId]) -> Grant {
        let started = Instant::now();
        let grant = self.inner.acquire_all(process, resources);
        if grant.is_granted() {
            self.metrics.record(started);
        }
        grant
    }

    fn release_all(&mut self, process: &ProcessId) -> Vec<ResourceId> {
        self.inner.release_all(process)
    }

    fn holder_of(&self, resource: &ResourceId) -> Option<&ProcessId> {
        self.inner.holder_of(resource)
    }
}
